//! Prompt adaptation: rewrite the classification prompt from corrections.
//!
//! One run walks THRESHOLD_CHECK → GENERATING → WRITING → COMMITTED and may
//! stop at any step. Only a committed run changes persistent state for good;
//! a run that fails after the prompt file was swapped puts the backup back.
//!
//! Runs inside one process are serialized by a lock. Runs in separate
//! processes are serialized by the commit, which claims the feedback rows and
//! fails if any was already consumed.

use crate::db::Database;
use crate::error::Error;
use crate::llm::{ChatMessage, CompletionRequest, LanguageModel, UsageMeter};
use crate::models::{FeedbackRecord, PerformanceMetrics};
use crate::prompt::{ActivePrompt, PromptStore, parse_categories};
use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Unprocessed records considered per run.
pub const FEEDBACK_WINDOW: i64 = 100;

/// Misclassified examples sent to the model, to bound the request size.
pub const MAX_EXAMPLES: usize = 20;

const SYSTEM_PROMPT: &str = "You are an expert at creating effective prompts for email classification. \
Your task is to improve a classification prompt based on feedback data where the AI made incorrect predictions. \
Analyze the patterns in the misclassifications and suggest improvements to the prompt.";

#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommittedUpdate {
    pub version_id: i64,
    pub feedback_count: usize,
    pub backup: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdaptationOutcome {
    /// Another run holds the engine, or another process consumed the same
    /// feedback first.
    Busy,
    Insufficient { available: usize, required: usize },
    GenerationFailed(String),
    WriteFailed(String),
    Committed(CommittedUpdate),
}

impl AdaptationOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

impl fmt::Display for AdaptationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "skipped, another update is running"),
            Self::Insufficient {
                available,
                required,
            } => write!(f, "not enough feedback ({available}/{required})"),
            Self::GenerationFailed(reason) => write!(f, "generation failed: {reason}"),
            Self::WriteFailed(reason) => write!(f, "write failed: {reason}"),
            Self::Committed(update) => write!(
                f,
                "committed version {} from {} records",
                update.version_id, update.feedback_count
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct Misclassification<'a> {
    subject: &'a str,
    snippet: &'a str,
    ai_prediction: &'a str,
    correct_category: &'a str,
}

pub struct AdaptationEngine<L> {
    db: Database,
    prompts: PromptStore,
    model: Arc<L>,
    settings: SynthesisSettings,
    usage: Arc<UsageMeter>,
    running: Mutex<()>,
}

impl<L: LanguageModel> AdaptationEngine<L> {
    pub fn new(
        db: Database,
        prompts: PromptStore,
        model: Arc<L>,
        settings: SynthesisSettings,
        usage: Arc<UsageMeter>,
    ) -> Self {
        Self {
            db,
            prompts,
            model,
            settings,
            usage,
            running: Mutex::new(()),
        }
    }

    /// One adaptation cycle. Overlapping calls return [`AdaptationOutcome::Busy`].
    pub async fn run(&self, min_feedback_count: usize) -> AdaptationOutcome {
        let Ok(_running) = self.running.try_lock() else {
            warn!("Prompt update already in progress");
            return AdaptationOutcome::Busy;
        };

        info!(min_feedback_count, "Checking for prompt updates");
        let outcome = self.cycle(min_feedback_count).await;
        match &outcome {
            AdaptationOutcome::Committed(_) => info!(%outcome, "Prompt update completed"),
            AdaptationOutcome::Insufficient { .. } | AdaptationOutcome::Busy => {
                info!(%outcome, "Prompt left unchanged")
            }
            _ => error!(%outcome, "Prompt update failed"),
        }
        outcome
    }

    async fn cycle(&self, min_feedback_count: usize) -> AdaptationOutcome {
        let feedback = match self.db.unprocessed(FEEDBACK_WINDOW).await {
            Ok(feedback) => feedback,
            Err(e) => {
                error!(error = %e, "Failed to read unprocessed feedback");
                Vec::new()
            }
        };
        if feedback.len() < min_feedback_count {
            return AdaptationOutcome::Insufficient {
                available: feedback.len(),
                required: min_feedback_count,
            };
        }

        let current = match self.prompts.load().await {
            Ok(prompt) => prompt,
            Err(e) => return AdaptationOutcome::GenerationFailed(e.to_string()),
        };
        let improved = match self.generate(&current, &feedback).await {
            Ok(text) => text,
            Err(reason) => return AdaptationOutcome::GenerationFailed(reason),
        };

        let mut categories = parse_categories(&improved);
        if categories.is_empty() {
            categories = current.categories.clone();
        }
        let backup = match self.prompts.replace(&improved, &categories).await {
            Ok(backup) => backup,
            Err(e) => return AdaptationOutcome::WriteFailed(e.to_string()),
        };

        let metrics = PerformanceMetrics {
            feedback_count: feedback.len(),
            update_date: Utc::now(),
        };
        let ids: Vec<i64> = feedback.iter().map(|r| r.id).collect();
        match self
            .db
            .commit_adaptation(&current.text, &improved, &metrics, &ids)
            .await
        {
            Ok(version_id) => AdaptationOutcome::Committed(CommittedUpdate {
                version_id,
                feedback_count: feedback.len(),
                backup,
            }),
            Err(e) => {
                if let Err(restore_err) = self.prompts.restore(&backup).await {
                    error!(error = %restore_err, backup = %backup.display(), "Failed to restore prompt");
                }
                match e {
                    Error::Conflict(reason) => {
                        warn!(%reason, "Another update consumed this feedback");
                        AdaptationOutcome::Busy
                    }
                    e => AdaptationOutcome::WriteFailed(format!("recording update: {e}")),
                }
            }
        }
    }

    async fn generate(
        &self,
        current: &ActivePrompt,
        feedback: &[FeedbackRecord],
    ) -> Result<String, String> {
        info!(records = feedback.len(), "Generating improved prompt");

        let request = CompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(synthesis_payload(current, feedback)),
            ],
            temperature: Some(self.settings.temperature),
            max_tokens: Some(self.settings.max_tokens),
        };

        let completion = self
            .model
            .complete(request)
            .await
            .map_err(|e| e.to_string())?;
        self.usage.record(&completion);

        extract_prompt(&completion.content).ok_or_else(|| "model returned no prompt".to_string())
    }
}

fn synthesis_payload(current: &ActivePrompt, feedback: &[FeedbackRecord]) -> String {
    let examples: Vec<Misclassification> = feedback
        .iter()
        .filter(|r| r.is_misclassified())
        .take(MAX_EXAMPLES)
        .map(|r| Misclassification {
            subject: &r.subject,
            snippet: &r.snippet,
            ai_prediction: &r.ai_category,
            correct_category: &r.user_category,
        })
        .collect();
    let examples = serde_json::to_string_pretty(&examples).unwrap_or_else(|_| "[]".to_string());

    format!(
        "Here is the current email classification prompt:\n```\n{prompt}\n```\n\n\
         Here are the current categories:\n{categories}\n\n\
         Here are examples where the AI made incorrect predictions:\n{examples}\n\n\
         Based on these misclassifications, please:\n\
         1. Identify patterns in the misclassifications\n\
         2. Suggest new or modified examples to add to the prompt\n\
         3. Suggest any new categories if needed\n\
         4. Provide a complete updated prompt that maintains the same format but improves classification accuracy\n\n\
         The updated prompt should follow the exact same format as the original, with appropriate modifications to the examples section. \
         Keep the {{subject}} and {{snippet}} placeholders.\n",
        prompt = current.text,
        categories = current.categories.names().join(", "),
    )
}

fn fenced_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").expect("valid regex"))
}

/// The prompt inside the first fenced code block, else the whole response.
pub fn extract_prompt(response: &str) -> Option<String> {
    let text = match fenced_block().captures(response) {
        Some(block) => block[1].to_string(),
        None => response.to_string(),
    };
    (!text.trim().is_empty()).then_some(text)
}
