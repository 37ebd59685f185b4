use crate::error::Result;
use crate::models::{Label, Message, MessagePage};
use async_trait::async_trait;

/// Remote mailbox operations the pipeline depends on.
///
/// Implementations are treated as rate-limited and eventually consistent;
/// callers never cache their answers across invocations.
#[async_trait]
pub trait Mailbox: Send + Sync {
    async fn list_messages(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<String>,
    ) -> Result<MessagePage>;

    async fn get_message(&self, id: &str) -> Result<Message>;

    async fn list_labels(&self) -> Result<Vec<Label>>;

    async fn create_label(&self, name: &str) -> Result<Label>;

    async fn modify_labels(&self, message_id: &str, add: &[String], remove: &[String])
    -> Result<()>;
}
