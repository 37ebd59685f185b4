use anyhow::{Context, bail};
use google_gmail1::Gmail;
use gtriage::adaptation::AdaptationEngine;
use gtriage::auth;
use gtriage::classifier::Classifier;
use gtriage::config::Config;
use gtriage::db::Database;
use gtriage::gmail::GmailClient;
use gtriage::llm::{OpenAiClient, UsageMeter};
use gtriage::models::NewFeedback;
use gtriage::prompt::PromptStore;
use gtriage::scheduler::Scheduler;
use gtriage::service::Triage;
use std::sync::{Arc, Mutex};
use tracing::Level;

const USAGE: &str = "Usage: gtriage [--debug] [--log-file PATH] [--reset-token] <command>

Commands:
  run                                   check now, then daily (scheduler)
  fetch [N]                             list uncategorized primary messages
  label [N]                             classify and label uncategorized messages
  classify <SUBJECT> <SNIPPET>          classify text without touching the mailbox
  feedback <ID> <AI> <USER> [SUBJ] [SNIPPET]
                                        record a correction
  stats                                 feedback statistics
  adapt [MIN]                           rewrite the prompt now if enough feedback
  history [N]                           recent prompt rewrites";

struct Args {
    debug: bool,
    log_file: Option<String>,
    reset_token: bool,
    command: Vec<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        debug: false,
        log_file: None,
        reset_token: false,
        command: Vec::new(),
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--debug" => args.debug = true,
            "--reset-token" => args.reset_token = true,
            "--log-file" => args.log_file = Some(iter.next().context("--log-file needs a path")?),
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            _ => args.command.push(arg),
        }
    }
    Ok(args)
}

fn init_logging(debug: bool, log_file: Option<&str>) -> anyhow::Result<()> {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let builder = tracing_subscriber::fmt().with_max_level(level);
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn count_arg(args: &[String], index: usize, default: usize) -> anyhow::Result<usize> {
    match args.get(index) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Expected a number, got '{}'", raw)),
        None => Ok(default),
    }
}

async fn connect_gmail(config: &Config) -> anyhow::Result<GmailClient> {
    let secret = auth::Authenticator::load_secret(&config.gmail.credentials_path).await?;
    let authenticator = auth::Authenticator::authenticate(secret).await?;

    let hub = Gmail::new(
        hyper::Client::builder().build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .context("Failed to load native roots")?
                .https_only()
                .enable_http1()
                .build(),
        ),
        authenticator,
    );
    Ok(GmailClient::new(hub))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    init_logging(args.debug, args.log_file.as_deref())?;
    let config = Config::load();

    if args.reset_token {
        auth::RingStorage.clear_token().await?;
        println!("Token cleared. Run again without --reset-token to re-authenticate.");
        return Ok(());
    }

    let Some(command) = args.command.first().map(String::as_str) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let rest = &args.command[1..];

    let db = Database::new(&config.storage.database_url).await?;
    db.run_migrations().await?;
    let prompts = PromptStore::new(&config.storage.prompt_path);
    prompts.ensure_seeded().await?;
    let usage = Arc::new(UsageMeter::new());
    let model = || -> anyhow::Result<Arc<OpenAiClient>> {
        Ok(Arc::new(OpenAiClient::new(config.model.client_config())?))
    };

    match command {
        "run" => {
            let engine = AdaptationEngine::new(
                db.clone(),
                prompts,
                model()?,
                config.model.synthesis(),
                usage.clone(),
            );
            let scheduler = Scheduler::new(
                Arc::new(engine),
                db,
                config.adaptation.scheduled_min_feedback,
                config.scheduler.daily_time()?,
                config.scheduler.poll_interval(),
            );
            scheduler.run().await;
        }
        "adapt" => {
            let min = count_arg(rest, 0, config.adaptation.manual_min_feedback)?;
            let engine = AdaptationEngine::new(
                db,
                prompts,
                model()?,
                config.model.synthesis(),
                usage.clone(),
            );
            let outcome = engine.run(min).await;
            println!("Prompt update: {}", outcome);
            if !outcome.is_committed() {
                std::process::exit(1);
            }
        }
        "stats" => {
            let stats = match db.aggregate().await {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::error!(error = %e, "Error retrieving feedback statistics");
                    Default::default()
                }
            };
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        "history" => {
            let limit = count_arg(rest, 0, 10)?;
            for version in db.prompt_versions(limit as i64).await? {
                println!(
                    "#{} {} from {} records ({} -> {} chars)",
                    version.id,
                    version.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    version.feedback_count,
                    version.old_prompt.len(),
                    version.new_prompt.len()
                );
            }
        }
        "classify" => {
            let (Some(subject), Some(snippet)) = (rest.first(), rest.get(1)) else {
                bail!("classify needs a subject and a snippet");
            };
            let classifier = Classifier::new(
                model()?,
                prompts,
                config.model.classify_model.clone(),
                usage.clone(),
            );
            println!("{}", classifier.classify(subject, snippet).await);
        }
        "fetch" | "label" | "feedback" => {
            let gmail = Arc::new(connect_gmail(&config).await?);
            let triage = Triage::new(gmail, model()?, db, prompts, &config, usage.clone());
            match command {
                "fetch" => {
                    let max = count_arg(rest, 0, 10)?;
                    for message in triage.fetch_candidates(max).await {
                        println!("{}\t{}\t{}", message.id, message.sender, message.subject);
                    }
                }
                "label" => {
                    let max = count_arg(rest, 0, 5)?;
                    for labeled in triage.label_candidates(max).await {
                        println!("Classified: {} → {}", labeled.subject, labeled.category);
                    }
                }
                _ => {
                    let [message_id, ai_category, user_category, ..] = rest else {
                        bail!("feedback needs a message id, the AI category and your category");
                    };
                    let feedback = NewFeedback {
                        message_id: message_id.clone(),
                        subject: rest.get(3).cloned().unwrap_or_default(),
                        snippet: rest.get(4).cloned().unwrap_or_default(),
                        ai_category: ai_category.clone(),
                        user_category: user_category.clone(),
                    };
                    if !triage.record_feedback(feedback).await {
                        bail!("Failed to store feedback");
                    }
                    println!("Feedback recorded successfully");
                }
            }
        }
        other => {
            eprintln!("Unknown command '{}'\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }

    let (calls, tokens) = usage.snapshot();
    if calls > 0 {
        tracing::info!(
            calls,
            prompt_tokens = tokens.prompt_tokens,
            completion_tokens = tokens.completion_tokens,
            total_tokens = tokens.total_tokens,
            "Model usage"
        );
    }
    Ok(())
}
