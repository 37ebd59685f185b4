use crate::adaptation::{AdaptationEngine, AdaptationOutcome};
use crate::db::Database;
use crate::llm::LanguageModel;
use chrono::{Days, Local, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// First moment strictly after `now` whose time of day is `at`.
pub fn next_occurrence(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today
            .checked_add_days(Days::new(1))
            .unwrap_or(today)
    }
}

/// Daily wall-clock trigger. Due at most once per poll however late the poll.
#[derive(Debug, Clone)]
pub struct DailyCadence {
    at: NaiveTime,
    next_due: NaiveDateTime,
}

impl DailyCadence {
    pub fn starting(now: NaiveDateTime, at: NaiveTime) -> Self {
        Self {
            at,
            next_due: next_occurrence(now, at),
        }
    }

    pub fn next_due(&self) -> NaiveDateTime {
        self.next_due
    }

    pub fn poll(&mut self, now: NaiveDateTime) -> bool {
        if now < self.next_due {
            return false;
        }
        self.next_due = next_occurrence(now, self.at);
        true
    }
}

pub struct Scheduler<L> {
    engine: Arc<AdaptationEngine<L>>,
    db: Database,
    min_feedback_count: usize,
    daily_at: NaiveTime,
    poll_interval: Duration,
}

impl<L: LanguageModel> Scheduler<L> {
    pub fn new(
        engine: Arc<AdaptationEngine<L>>,
        db: Database,
        min_feedback_count: usize,
        daily_at: NaiveTime,
        poll_interval: Duration,
    ) -> Self {
        Self {
            engine,
            db,
            min_feedback_count,
            daily_at,
            poll_interval,
        }
    }

    /// One scheduled trigger: log where feedback stands, then run the engine.
    pub async fn check_and_update(&self) -> AdaptationOutcome {
        info!("Running scheduled prompt update check");
        match self.db.aggregate().await {
            Ok(stats) => info!(
                total = stats.total,
                incorrect = stats.incorrect_count,
                accuracy = stats.accuracy,
                "Current feedback stats"
            ),
            Err(e) => error!(error = %e, "Failed to read feedback stats"),
        }
        self.engine.run(self.min_feedback_count).await
    }

    /// Run once now, then daily at the configured time. Never returns.
    pub async fn run(&self) {
        info!(
            daily_at = %self.daily_at,
            min_feedback = self.min_feedback_count,
            "Starting scheduled updates service"
        );
        self.check_and_update().await;

        let mut cadence = DailyCadence::starting(Local::now().naive_local(), self.daily_at);
        info!(next = %cadence.next_due(), "Next scheduled check");
        loop {
            tokio::time::sleep(self.poll_interval).await;
            if cadence.poll(Local::now().naive_local()) {
                self.check_and_update().await;
                info!(next = %cadence.next_due(), "Next scheduled check");
            }
        }
    }
}
