use crate::error::{Error, Result};
use crate::models::{
    ConfusionPair, FeedbackRecord, FeedbackStats, NewFeedback, PerformanceMetrics, PromptVersion,
};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info, warn};

const FEEDBACK_COLUMNS: &str =
    "id, message_id, subject, snippet, ai_category, user_category, timestamp, is_processed";

const INSERT_PROMPT_VERSION: &str = "INSERT INTO prompt_updates
     (old_prompt, new_prompt, timestamp, feedback_count, performance_metrics)
     VALUES (?, ?, ?, ?, ?)";

const MAX_CONFUSIONS: i64 = 10;

/// Feedback store: user corrections plus the prompt rewrite history.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection keeps every query on
    /// the same memory instance.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");
        for statement in schema.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert or replace the correction for a message. A resubmission
    /// overwrites the previous values and makes the record unprocessed again.
    pub async fn record_feedback(&self, feedback: &NewFeedback) -> Result<()> {
        sqlx::query(
            "INSERT INTO classification_feedback
             (message_id, subject, snippet, ai_category, user_category, timestamp, is_processed)
             VALUES (?, ?, ?, ?, ?, ?, 0)
             ON CONFLICT(message_id) DO UPDATE SET subject=excluded.subject,
             snippet=excluded.snippet, ai_category=excluded.ai_category,
             user_category=excluded.user_category, timestamp=excluded.timestamp, is_processed=0",
        )
        .bind(&feedback.message_id)
        .bind(&feedback.subject)
        .bind(&feedback.snippet)
        .bind(&feedback.ai_category)
        .bind(&feedback.user_category)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(message_id = %feedback.message_id, "Stored feedback");
        Ok(())
    }

    pub async fn feedback_for_message(&self, message_id: &str) -> Result<Option<FeedbackRecord>> {
        let record = sqlx::query_as::<_, FeedbackRecord>(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM classification_feedback WHERE message_id = ?"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Unprocessed feedback, newest first.
    pub async fn unprocessed(&self, limit: i64) -> Result<Vec<FeedbackRecord>> {
        let records = sqlx::query_as::<_, FeedbackRecord>(&format!(
            "SELECT {FEEDBACK_COLUMNS} FROM classification_feedback
             WHERE is_processed = 0
             ORDER BY timestamp DESC, id DESC
             LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = records.len(), "Retrieved unprocessed feedback");
        Ok(records)
    }

    pub async fn mark_processed(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE classification_feedback SET is_processed = 1 WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Statistics over every stored record. Counts are recomputed from the
    /// rows on each call.
    pub async fn aggregate(&self) -> Result<FeedbackStats> {
        let total: i64 = sqlx::query("SELECT COUNT(*) FROM classification_feedback")
            .fetch_one(&self.pool)
            .await?
            .get(0);

        let incorrect_count: i64 = sqlx::query(
            "SELECT COUNT(*) FROM classification_feedback WHERE ai_category <> user_category",
        )
        .fetch_one(&self.pool)
        .await?
        .get(0);

        let category_distribution = sqlx::query(
            "SELECT user_category, COUNT(*) FROM classification_feedback GROUP BY user_category",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| (row.get::<String, _>(0), row.get::<i64, _>(1)))
        .collect();

        let top_confusions = sqlx::query(
            "SELECT ai_category, user_category, COUNT(*) AS count
             FROM classification_feedback
             WHERE ai_category <> user_category
             GROUP BY ai_category, user_category
             ORDER BY count DESC, ai_category ASC, user_category ASC
             LIMIT ?",
        )
        .bind(MAX_CONFUSIONS)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| ConfusionPair {
            ai_category: row.get(0),
            user_category: row.get(1),
            count: row.get(2),
        })
        .collect();

        let accuracy = if total > 0 {
            (total - incorrect_count) as f64 / total as f64
        } else {
            0.0
        };

        Ok(FeedbackStats {
            total,
            incorrect_count,
            accuracy,
            category_distribution,
            top_confusions,
        })
    }

    pub async fn record_prompt_version(
        &self,
        old_prompt: &str,
        new_prompt: &str,
        metrics: &PerformanceMetrics,
    ) -> Result<i64> {
        let result = sqlx::query(INSERT_PROMPT_VERSION)
            .bind(old_prompt)
            .bind(new_prompt)
            .bind(metrics.update_date)
            .bind(metrics.feedback_count as i64)
            .bind(serde_json::to_string(metrics)?)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Append the version row and consume the feedback that produced it, as
    /// one transaction.
    ///
    /// Every id must still be unprocessed. If another writer consumed any of
    /// them first, nothing is written and [`Error::Conflict`] is returned.
    pub async fn commit_adaptation(
        &self,
        old_prompt: &str,
        new_prompt: &str,
        metrics: &PerformanceMetrics,
        feedback_ids: &[i64],
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        if !feedback_ids.is_empty() {
            let sql = format!(
                "UPDATE classification_feedback SET is_processed = 1
                 WHERE is_processed = 0 AND id IN ({})",
                placeholders(feedback_ids.len())
            );
            let mut query = sqlx::query(&sql);
            for id in feedback_ids {
                query = query.bind(id);
            }
            let claimed = query.execute(&mut *tx).await?.rows_affected();
            if claimed != feedback_ids.len() as u64 {
                tx.rollback().await?;
                warn!(
                    claimed,
                    expected = feedback_ids.len(),
                    "Feedback already consumed by another update"
                );
                return Err(Error::Conflict(format!(
                    "{} of {} feedback records were already processed",
                    feedback_ids.len() as u64 - claimed,
                    feedback_ids.len()
                )));
            }
        }

        let version_id = sqlx::query(INSERT_PROMPT_VERSION)
            .bind(old_prompt)
            .bind(new_prompt)
            .bind(metrics.update_date)
            .bind(metrics.feedback_count as i64)
            .bind(serde_json::to_string(metrics)?)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        tx.commit().await?;
        info!(
            version_id,
            consumed = feedback_ids.len(),
            "Recorded prompt version"
        );
        Ok(version_id)
    }

    /// Prompt history, newest first.
    pub async fn prompt_versions(&self, limit: i64) -> Result<Vec<PromptVersion>> {
        let versions = sqlx::query_as::<_, PromptVersion>(
            "SELECT id, old_prompt, new_prompt, timestamp, feedback_count, performance_metrics
             FROM prompt_updates
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(versions)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
