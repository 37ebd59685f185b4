use crate::llm::{ChatMessage, CompletionRequest, LanguageModel, UsageMeter};
use crate::models::Category;
use crate::prompt::PromptStore;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct Classifier<L> {
    model: Arc<L>,
    prompts: PromptStore,
    model_name: String,
    usage: Arc<UsageMeter>,
}

impl<L: LanguageModel> Classifier<L> {
    pub fn new(
        model: Arc<L>,
        prompts: PromptStore,
        model_name: impl Into<String>,
        usage: Arc<UsageMeter>,
    ) -> Self {
        Self {
            model,
            prompts,
            model_name: model_name.into(),
            usage,
        }
    }

    /// Category for one message. Any failure yields the fallback category.
    pub async fn classify(&self, subject: &str, snippet: &str) -> Category {
        let prompt = match self.prompts.load().await {
            Ok(prompt) => prompt,
            Err(e) => {
                error!(error = %e, "Cannot classify without a prompt");
                return Category::fallback();
            }
        };

        let request = CompletionRequest {
            model: self.model_name.clone(),
            messages: vec![ChatMessage::user(prompt.render(subject, snippet))],
            temperature: None,
            max_tokens: None,
        };

        let completion = match self.model.complete(request).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(error = %e, subject, "Classification call failed");
                return Category::fallback();
            }
        };
        self.usage.record(&completion);

        let category = prompt.categories.resolve(&completion.content);
        if category.is_fallback() && !prompt.categories.contains(completion.content.trim()) {
            warn!(answer = %completion.content.trim(), "Model answered outside the category set");
        }
        debug!(subject, %category, "Classified");
        category
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FALLBACK_CATEGORY;
    use crate::testing::ScriptedModel;

    async fn classifier(model: ScriptedModel) -> (tempfile::TempDir, Classifier<ScriptedModel>) {
        let dir = tempfile::tempdir().unwrap();
        let prompts = PromptStore::new(dir.path().join("prompt.txt"));
        prompts.ensure_seeded().await.unwrap();
        let classifier = Classifier::new(
            Arc::new(model),
            prompts,
            "gpt-test",
            Arc::new(UsageMeter::new()),
        );
        (dir, classifier)
    }

    #[tokio::test]
    async fn test_classify_returns_declared_category() {
        let (_dir, classifier) = classifier(ScriptedModel::new().respond(" Promotions\n")).await;

        let category = classifier
            .classify("Free Concert Tickets!!", "Win two tickets to...")
            .await;

        assert_eq!(category.as_str(), "Promotions");
        let requests = classifier.model.requests.lock().unwrap();
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[0].messages[0].role, "user");
        assert!(requests[0].messages[0].content.contains("Subject: Free Concert Tickets!!"));
        assert_eq!(requests[0].model, "gpt-test");
    }

    #[tokio::test]
    async fn test_classify_maps_unknown_answer_to_fallback() {
        let (_dir, classifier) = classifier(ScriptedModel::new().respond("Spam")).await;
        let category = classifier.classify("Hi", "there").await;
        assert_eq!(category.as_str(), FALLBACK_CATEGORY);
    }

    #[tokio::test]
    async fn test_classify_model_failure_falls_back() {
        let (_dir, classifier) = classifier(ScriptedModel::new().fail("timeout")).await;
        assert!(classifier.classify("Hi", "there").await.is_fallback());
    }

    #[tokio::test]
    async fn test_classify_without_prompt_falls_back_without_calling_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new().respond("Work"));
        let classifier = Classifier::new(
            model.clone(),
            PromptStore::new(dir.path().join("absent.txt")),
            "gpt-test",
            Arc::new(UsageMeter::new()),
        );

        assert!(classifier.classify("Hi", "there").await.is_fallback());
        assert_eq!(model.request_count(), 0);
    }

    #[tokio::test]
    async fn test_classify_records_usage() {
        let (_dir, classifier) = classifier(ScriptedModel::new().respond("Work")).await;
        classifier.classify("Standup", "notes").await;
        let (calls, usage) = classifier.usage.snapshot();
        assert_eq!(calls, 1);
        assert_eq!(usage.total_tokens, 11);
    }
}
