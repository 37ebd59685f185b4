use crate::mailbox::Mailbox;
use crate::models::Message;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_QUERY: &str = "category:primary";
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Candidates gathered before sorting, as a multiple of the requested count.
/// Pages are not date ordered, so a newer message can arrive on a later page;
/// the extra buffer makes that less likely to be missed. It is a heuristic
/// bound, not a guarantee.
const SLACK_FACTOR: usize = 2;

pub struct MailRetriever<M> {
    mailbox: Arc<M>,
    query: String,
    page_size: u32,
}

impl<M: Mailbox> MailRetriever<M> {
    pub fn new(mailbox: Arc<M>, query: impl Into<String>, page_size: u32) -> Self {
        Self {
            mailbox,
            query: query.into(),
            page_size: page_size.max(1),
        }
    }

    /// Newest `max_results` messages from the primary stream that carry none
    /// of `exclude_label_ids`.
    ///
    /// Never fails: a message that cannot be fetched is skipped, and a page
    /// that cannot be listed ends pagination with whatever was collected.
    pub async fn fetch_candidates(
        &self,
        max_results: usize,
        exclude_label_ids: &HashSet<String>,
    ) -> Vec<Message> {
        if max_results == 0 {
            return Vec::new();
        }

        let target = max_results.saturating_mul(SLACK_FACTOR);
        let mut candidates: Vec<Message> = Vec::new();
        let mut seen = HashSet::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        'pages: loop {
            let page = match self
                .mailbox
                .list_messages(&self.query, self.page_size, page_token.take())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, pages, collected = candidates.len(), "Stopping pagination early");
                    break;
                }
            };
            pages += 1;

            for id in page.ids {
                if !seen.insert(id.clone()) {
                    continue;
                }

                let message = match self.mailbox.get_message(&id).await {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(message_id = %id, error = %e, "Skipping message");
                        continue;
                    }
                };

                if message.has_any_label(exclude_label_ids) {
                    debug!(message_id = %id, "Already categorized");
                    continue;
                }

                candidates.push(message);
                if candidates.len() >= target {
                    break 'pages;
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        candidates.sort_by(|a, b| b.internal_date.cmp(&a.internal_date));
        candidates.truncate(max_results);

        info!(
            requested = max_results,
            returned = candidates.len(),
            pages,
            "Fetched candidate messages"
        );
        candidates
    }
}
