//! In-memory collaborators for unit tests.

use crate::error::{Error, Result};
use crate::llm::{Completion, CompletionRequest, LanguageModel, TokenUsage};
use crate::mailbox::Mailbox;
use crate::models::{Label, Message, MessagePage};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

pub fn message(id: &str, internal_date: i64, labels: &[&str]) -> Message {
    Message {
        id: id.to_string(),
        subject: format!("Subject {id}"),
        sender: "sender@example.com".to_string(),
        snippet: format!("Snippet {id}"),
        label_ids: labels.iter().map(|l| l.to_string()).collect(),
        internal_date,
    }
}

/// Mailbox whose listing is a fixed sequence of pages.
#[derive(Default)]
pub struct FakeMailbox {
    messages: HashMap<String, Message>,
    pages: Vec<Vec<String>>,
    failing_pages: HashSet<usize>,
    failing_messages: HashSet<String>,
    labels: Mutex<Vec<Label>>,
    pub list_calls: Mutex<usize>,
    pub label_list_calls: Mutex<usize>,
    pub modifications: Mutex<Vec<(String, Vec<String>, Vec<String>)>>,
}

impl FakeMailbox {
    /// Split `messages` into pages of `page_len`, in the given order.
    pub fn with_messages(messages: Vec<Message>, page_len: usize) -> Self {
        let pages = messages
            .chunks(page_len.max(1))
            .map(|chunk| chunk.iter().map(|m| m.id.clone()).collect())
            .collect();
        Self {
            messages: messages.into_iter().map(|m| (m.id.clone(), m)).collect(),
            pages,
            ..Default::default()
        }
    }

    pub fn with_pages(mut self, pages: Vec<Vec<&str>>) -> Self {
        self.pages = pages
            .into_iter()
            .map(|p| p.into_iter().map(str::to_string).collect())
            .collect();
        self
    }

    pub fn with_labels(self, labels: &[(&str, &str)]) -> Self {
        *self.labels.lock().unwrap() = labels
            .iter()
            .map(|(id, name)| Label {
                id: id.to_string(),
                name: name.to_string(),
                label_type: "user".to_string(),
            })
            .collect();
        self
    }

    pub fn failing_page(mut self, index: usize) -> Self {
        self.failing_pages.insert(index);
        self
    }

    pub fn failing_message(mut self, id: &str) -> Self {
        self.failing_messages.insert(id.to_string());
        self
    }

    pub fn labels(&self) -> Vec<Label> {
        self.labels.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn list_messages(
        &self,
        _query: &str,
        _page_size: u32,
        page_token: Option<String>,
    ) -> Result<MessagePage> {
        *self.list_calls.lock().unwrap() += 1;
        let index: usize = page_token.as_deref().map_or(0, |t| t.parse().unwrap());
        if self.failing_pages.contains(&index) {
            return Err(Error::Mailbox(format!("page {index} unavailable")));
        }

        let ids = self.pages.get(index).cloned().unwrap_or_default();
        let next_page_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(MessagePage {
            ids,
            next_page_token,
        })
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        if self.failing_messages.contains(id) {
            return Err(Error::Mailbox(format!("message {id} unavailable")));
        }
        self.messages
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Mailbox(format!("no message {id}")))
    }

    async fn list_labels(&self) -> Result<Vec<Label>> {
        *self.label_list_calls.lock().unwrap() += 1;
        Ok(self.labels.lock().unwrap().clone())
    }

    async fn create_label(&self, name: &str) -> Result<Label> {
        let mut labels = self.labels.lock().unwrap();
        let label = Label {
            id: format!("Label_{}", labels.len() + 1),
            name: name.to_string(),
            label_type: "user".to_string(),
        };
        labels.push(label.clone());
        Ok(label)
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<()> {
        self.modifications.lock().unwrap().push((
            message_id.to_string(),
            add.to_vec(),
            remove.to_vec(),
        ));
        Ok(())
    }
}

/// Model that answers from a queue and records every request.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, content: impl Into<String>) -> Self {
        self.responses.lock().unwrap().push_back(Ok(content.into()));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(Error::Model(message.to_string())));
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(content)) => Ok(Completion {
                content,
                usage: Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 1,
                    total_tokens: 11,
                }),
            }),
            Some(Err(e)) => Err(e),
            None => Err(Error::Model("no scripted response".to_string())),
        }
    }
}
