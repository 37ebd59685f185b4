//! The operations exposed to front ends and the command line.
//!
//! Every method here absorbs collaborator failures: it logs and returns an
//! empty list, the fallback category, or `false`.

use crate::adaptation::AdaptationEngine;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::db::Database;
use crate::labeler::Labeler;
use crate::llm::{LanguageModel, UsageMeter};
use crate::mailbox::Mailbox;
use crate::models::{Category, FeedbackStats, Message, NewFeedback, PromptVersion};
use crate::prompt::PromptStore;
use crate::retriever::MailRetriever;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct LabeledMessage {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub category: Category,
}

pub struct Triage<M, L> {
    mailbox: Arc<M>,
    db: Database,
    prompts: PromptStore,
    retriever: MailRetriever<M>,
    classifier: Classifier<L>,
    labeler: Labeler<M>,
    engine: Arc<AdaptationEngine<L>>,
    usage: Arc<UsageMeter>,
}

impl<M: Mailbox, L: LanguageModel> Triage<M, L> {
    pub fn new(
        mailbox: Arc<M>,
        model: Arc<L>,
        db: Database,
        prompts: PromptStore,
        config: &Config,
        usage: Arc<UsageMeter>,
    ) -> Self {
        let retriever = MailRetriever::new(
            mailbox.clone(),
            config.gmail.query.clone(),
            config.gmail.page_size,
        );
        let classifier = Classifier::new(
            model.clone(),
            prompts.clone(),
            config.model.classify_model.clone(),
            usage.clone(),
        );
        let labeler = Labeler::new(mailbox.clone(), config.adaptation.label_cache_ttl());
        let engine = AdaptationEngine::new(
            db.clone(),
            prompts.clone(),
            model,
            config.model.synthesis(),
            usage.clone(),
        );

        Self {
            mailbox,
            db,
            prompts,
            retriever,
            classifier,
            labeler,
            engine: Arc::new(engine),
            usage,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn usage(&self) -> &UsageMeter {
        &self.usage
    }

    pub async fn classify(&self, subject: &str, snippet: &str) -> Category {
        self.classifier.classify(subject, snippet).await
    }

    /// Newest primary messages that carry no category label yet.
    pub async fn fetch_candidates(&self, max_results: usize) -> Vec<Message> {
        let categories = match self.prompts.load().await {
            Ok(prompt) => prompt.categories,
            Err(e) => {
                error!(error = %e, "Cannot determine categories");
                return Vec::new();
            }
        };
        let exclude = match self.labeler.category_label_ids(&categories).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Cannot list category labels");
                return Vec::new();
            }
        };

        self.retriever.fetch_candidates(max_results, &exclude).await
    }

    /// Classify and label up to `max_results` candidates. Messages that fail
    /// to label are logged and left out of the result.
    pub async fn label_candidates(&self, max_results: usize) -> Vec<LabeledMessage> {
        let mut labeled = Vec::new();
        for message in self.fetch_candidates(max_results).await {
            let category = self.classify(&message.subject, &message.snippet).await;
            if let Err(e) = self.apply_category(&message.id, &category).await {
                warn!(message_id = %message.id, error = %e, "Failed to label message");
                continue;
            }
            info!(subject = %message.subject, %category, "Classified");
            labeled.push(LabeledMessage {
                message_id: message.id,
                subject: message.subject,
                sender: message.sender,
                category,
            });
        }
        labeled
    }

    pub async fn classify_and_label(&self, message_id: &str) -> Option<LabeledMessage> {
        let message = match self.mailbox.get_message(message_id).await {
            Ok(message) => message,
            Err(e) => {
                error!(message_id, error = %e, "Failed to fetch message");
                return None;
            }
        };

        let category = self.classify(&message.subject, &message.snippet).await;
        if let Err(e) = self.apply_category(&message.id, &category).await {
            error!(message_id, error = %e, "Failed to label message");
            return None;
        }
        Some(LabeledMessage {
            message_id: message.id,
            subject: message.subject,
            sender: message.sender,
            category,
        })
    }

    async fn apply_category(&self, message_id: &str, category: &Category) -> crate::Result<()> {
        let label_id = self.labeler.ensure_label(category.as_str()).await?;
        self.labeler.apply_label(message_id, &label_id).await
    }

    /// Store a correction and move the message to the corrected label.
    ///
    /// Missing subject or snippet are fetched from the mailbox when possible.
    /// Returns whether the feedback was stored; relabeling failures are only
    /// logged.
    pub async fn record_feedback(&self, mut feedback: NewFeedback) -> bool {
        if feedback.subject.is_empty() || feedback.snippet.is_empty() {
            match self.mailbox.get_message(&feedback.message_id).await {
                Ok(message) => {
                    if feedback.subject.is_empty() {
                        feedback.subject = message.subject;
                    }
                    if feedback.snippet.is_empty() {
                        feedback.snippet = message.snippet;
                    }
                }
                Err(e) => warn!(message_id = %feedback.message_id, error = %e, "Failed to fetch message details"),
            }
        }

        if let Err(e) = self.db.record_feedback(&feedback).await {
            error!(message_id = %feedback.message_id, error = %e, "Error storing feedback");
            return false;
        }
        info!(message_id = %feedback.message_id, "Feedback recorded");

        if feedback.is_correction() {
            if let Err(e) = self
                .labeler
                .relabel(
                    &feedback.message_id,
                    &feedback.ai_category,
                    &feedback.user_category,
                )
                .await
            {
                warn!(message_id = %feedback.message_id, error = %e, "Error updating labels");
            }
        }
        true
    }

    pub async fn get_stats(&self) -> FeedbackStats {
        match self.db.aggregate().await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Error retrieving feedback statistics");
                FeedbackStats::default()
            }
        }
    }

    pub async fn trigger_adaptation(&self, min_feedback_count: usize) -> bool {
        self.engine.run(min_feedback_count).await.is_committed()
    }

    pub async fn prompt_history(&self, limit: i64) -> Vec<PromptVersion> {
        match self.db.prompt_versions(limit).await {
            Ok(versions) => versions,
            Err(e) => {
                error!(error = %e, "Error retrieving prompt history");
                Vec::new()
            }
        }
    }
}
