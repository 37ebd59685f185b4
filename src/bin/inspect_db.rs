use sqlx::Row;
use sqlx::sqlite::SqlitePoolOptions;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <search_query> [database_url]", args[0]);
        eprintln!("Search query matches against message id or subject.");
        std::process::exit(1);
    }

    let query = &args[1];
    let search_term = format!("%{}%", query);

    let database_url = args.get(2).map(String::as_str).unwrap_or("sqlite://feedback.db");
    let pool = SqlitePoolOptions::new()
        .connect(database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let rows = sqlx::query(
        "SELECT message_id, subject, ai_category, user_category, timestamp, is_processed
         FROM classification_feedback
         WHERE message_id LIKE ? OR subject LIKE ?
         ORDER BY timestamp DESC
         LIMIT 20",
    )
    .bind(&search_term)
    .bind(&search_term)
    .fetch_all(&pool)
    .await?;

    if rows.is_empty() {
        println!("No feedback found matching '{}'", query);
    }
    for row in rows {
        let message_id: String = row.get("message_id");
        let subject: Option<String> = row.get("subject");
        let ai: Option<String> = row.get("ai_category");
        let user: Option<String> = row.get("user_category");
        let timestamp: Option<String> = row.get("timestamp");
        let processed: bool = row.get("is_processed");

        println!("ID: {}", message_id);
        println!("Subject: {:?}", subject);
        println!("AI: {:?}  User: {:?}", ai, user);
        println!("Recorded: {:?}  Processed: {}", timestamp, processed);
        println!(
            "--------------------------------------------------------------------------------"
        );
    }

    let updates = sqlx::query(
        "SELECT id, timestamp, feedback_count, performance_metrics, length(new_prompt) AS size
         FROM prompt_updates
         ORDER BY id DESC
         LIMIT 5",
    )
    .fetch_all(&pool)
    .await?;

    println!("PROMPT UPDATES:");
    if updates.is_empty() {
        println!("(None)");
    }
    for row in updates {
        let id: i64 = row.get("id");
        let timestamp: Option<String> = row.get("timestamp");
        let count: Option<i64> = row.get("feedback_count");
        let metrics: Option<String> = row.get("performance_metrics");
        let size: Option<i64> = row.get("size");
        println!(
            "#{} {:?} feedback={:?} chars={:?} {}",
            id,
            timestamp,
            count,
            size,
            metrics.unwrap_or_default()
        );
    }

    Ok(())
}
