use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use crate::models;
use async_trait::async_trait;
use google_gmail1::Gmail;
use google_gmail1::api::{Label as ApiLabel, ModifyMessageRequest};
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use tracing::debug;

/// Longest snippet taken from a message body when Gmail sends none.
const MAX_SNIPPET_CHARS: usize = 300;

#[derive(Clone)]
pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
}

impl GmailClient {
    pub fn new(hub: Gmail<HttpsConnector<HttpConnector>>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl Mailbox for GmailClient {
    async fn list_messages(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<String>,
    ) -> Result<models::MessagePage> {
        let mut req = self
            .hub
            .users()
            .messages_list("me")
            .q(query)
            .max_results(page_size);

        if let Some(token) = &page_token {
            req = req.page_token(token);
        }

        let (_, message_list) = req
            .doit()
            .await
            .map_err(|e| Error::Mailbox(format!("Failed to list messages: {}", e)))?;

        let ids = message_list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        Ok(models::MessagePage {
            ids,
            next_page_token: message_list.next_page_token,
        })
    }

    async fn get_message(&self, id: &str) -> Result<models::Message> {
        let (_, msg) = self
            .hub
            .users()
            .messages_get("me", id)
            .format("full")
            .doit()
            .await
            .map_err(|e| Error::Mailbox(format!("Failed to get message {}: {}", id, e)))?;

        let mut sender = None;
        let mut subject = None;

        if let Some(payload) = &msg.payload {
            if let Some(headers) = &payload.headers {
                for header in headers {
                    match header.name.as_deref().map(str::to_ascii_lowercase).as_deref() {
                        Some("from") => sender = header.value.clone(),
                        Some("subject") => subject = header.value.clone(),
                        _ => {}
                    }
                }
            }
        }

        let mut snippet = msg.snippet.clone().unwrap_or_default();
        if snippet.trim().is_empty() {
            if let Some(body) = msg.payload.as_ref().and_then(body_snippet) {
                snippet = body;
            }
        }

        Ok(models::Message {
            id: msg.id.unwrap_or_else(|| id.to_string()),
            subject: subject.unwrap_or_else(|| "(No Subject)".to_string()),
            sender: sender.unwrap_or_else(|| "(No Sender)".to_string()),
            snippet,
            label_ids: msg.label_ids.unwrap_or_default().into_iter().collect(),
            internal_date: msg.internal_date.unwrap_or(0),
        })
    }

    async fn list_labels(&self) -> Result<Vec<models::Label>> {
        let (_, label_list) = self
            .hub
            .users()
            .labels_list("me")
            .doit()
            .await
            .map_err(|e| Error::Mailbox(format!("Failed to list labels: {}", e)))?;

        let labels = label_list
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| models::Label {
                id: l.id.unwrap_or_default(),
                name: l.name.unwrap_or_default(),
                label_type: l.type_.unwrap_or_default(),
            })
            .collect();

        Ok(labels)
    }

    async fn create_label(&self, name: &str) -> Result<models::Label> {
        let req = ApiLabel {
            name: Some(name.to_string()),
            label_list_visibility: Some("labelShow".to_string()),
            message_list_visibility: Some("show".to_string()),
            ..Default::default()
        };
        let (_, label) = self
            .hub
            .users()
            .labels_create(req, "me")
            .doit()
            .await
            .map_err(|e| Error::Mailbox(format!("Failed to create label {}: {}", name, e)))?;

        debug!(name, "Created label");
        Ok(models::Label {
            id: label.id.unwrap_or_default(),
            name: label.name.unwrap_or_else(|| name.to_string()),
            label_type: label.type_.unwrap_or_else(|| "user".to_string()),
        })
    }

    async fn modify_labels(
        &self,
        message_id: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<()> {
        let req = ModifyMessageRequest {
            add_label_ids: (!add.is_empty()).then(|| add.to_vec()),
            remove_label_ids: (!remove.is_empty()).then(|| remove.to_vec()),
        };
        self.hub
            .users()
            .messages_modify(req, "me", message_id)
            .doit()
            .await
            .map_err(|e| {
                Error::Mailbox(format!("Failed to modify labels of {}: {}", message_id, e))
            })?;
        Ok(())
    }
}

/// Leading text of the plain-text body, or of the HTML body when the message
/// has no plain-text part.
fn body_snippet(payload: &google_gmail1::api::MessagePart) -> Option<String> {
    extract_text_body(payload, "text/plain")
        .or_else(|| extract_text_body(payload, "text/html"))
        .map(|body| body.chars().take(MAX_SNIPPET_CHARS).collect())
}

fn extract_text_body(part: &google_gmail1::api::MessagePart, mime_type: &str) -> Option<String> {
    if part.mime_type.as_deref() == Some(mime_type) {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
            return Some(decode_body(data));
        }
    }

    let mut full_body = String::new();
    for p in part.parts.iter().flatten() {
        if let Some(body) = extract_text_body(p, mime_type) {
            full_body.push_str(&body);
        }
    }
    (!full_body.is_empty()).then_some(full_body)
}

/// Body data may arrive already decoded or still base64url encoded.
fn decode_body(data: &[u8]) -> String {
    use base64::{Engine as _, engine::general_purpose};

    let data_str = String::from_utf8_lossy(data);
    let trimmed = data_str.trim();
    let decoded = general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| general_purpose::URL_SAFE.decode(trimmed))
        .or_else(|_| general_purpose::STANDARD.decode(trimmed));

    match decoded.ok().and_then(|bytes| String::from_utf8(bytes).ok()) {
        Some(text) => text,
        None => data_str.into_owned(),
    }
}
