use crate::error::Result;
use crate::mailbox::Mailbox;
use crate::models::{CategorySet, Label, names_match};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Mailbox labels as last listed, trusted for at most `ttl`.
///
/// A zero TTL re-lists on every lookup. Creating a label invalidates the
/// listing so the next lookup sees it.
#[derive(Debug)]
pub struct LabelDirectory {
    ttl: Duration,
    listing: Mutex<Option<(Instant, Vec<Label>)>>,
}

impl LabelDirectory {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            listing: Mutex::new(None),
        }
    }

    fn fresh(&self) -> Option<Vec<Label>> {
        if self.ttl.is_zero() {
            return None;
        }
        let listing = self.listing.lock().ok()?;
        match listing.as_ref() {
            Some((fetched_at, labels)) if fetched_at.elapsed() < self.ttl => Some(labels.clone()),
            _ => None,
        }
    }

    fn store(&self, labels: &[Label]) {
        if self.ttl.is_zero() {
            return;
        }
        if let Ok(mut listing) = self.listing.lock() {
            *listing = Some((Instant::now(), labels.to_vec()));
        }
    }

    fn invalidate(&self) {
        if let Ok(mut listing) = self.listing.lock() {
            *listing = None;
        }
    }

    pub async fn labels<M: Mailbox + ?Sized>(&self, mailbox: &M) -> Result<Vec<Label>> {
        if let Some(labels) = self.fresh() {
            return Ok(labels);
        }
        let labels = mailbox.list_labels().await?;
        self.store(&labels);
        Ok(labels)
    }
}

fn find_by_name<'a>(labels: &'a [Label], name: &str) -> Option<&'a Label> {
    labels.iter().find(|l| names_match(&l.name, name))
}

pub struct Labeler<M> {
    mailbox: Arc<M>,
    directory: LabelDirectory,
}

impl<M: Mailbox> Labeler<M> {
    pub fn new(mailbox: Arc<M>, label_cache_ttl: Duration) -> Self {
        Self {
            mailbox,
            directory: LabelDirectory::new(label_cache_ttl),
        }
    }

    pub async fn find_label(&self, name: &str) -> Result<Option<String>> {
        let labels = self.directory.labels(self.mailbox.as_ref()).await?;
        Ok(find_by_name(&labels, name).map(|l| l.id.clone()))
    }

    /// Id of the label named `name` (case-insensitive), created if missing.
    pub async fn ensure_label(&self, name: &str) -> Result<String> {
        if let Some(id) = self.find_label(name).await? {
            return Ok(id);
        }

        let label = self.mailbox.create_label(name).await?;
        self.directory.invalidate();
        info!(name, id = %label.id, "Created label");
        Ok(label.id)
    }

    pub async fn apply_label(&self, message_id: &str, label_id: &str) -> Result<()> {
        self.mailbox
            .modify_labels(message_id, &[label_id.to_string()], &[])
            .await?;
        debug!(message_id, label_id, "Applied label");
        Ok(())
    }

    /// Move a message from the label of a wrong category to the right one.
    /// The wrong label is only removed if it exists.
    pub async fn relabel(&self, message_id: &str, from: &str, to: &str) -> Result<()> {
        let add = self.ensure_label(to).await?;
        let remove = match self.find_label(from).await? {
            Some(id) if id != add => vec![id],
            _ => Vec::new(),
        };

        self.mailbox
            .modify_labels(message_id, &[add], &remove)
            .await?;
        info!(message_id, from, to, "Relabeled message");
        Ok(())
    }

    /// Ids of existing labels whose names are categories.
    pub async fn category_label_ids(&self, categories: &CategorySet) -> Result<HashSet<String>> {
        let labels = self.directory.labels(self.mailbox.as_ref()).await?;
        Ok(labels
            .into_iter()
            .filter(|l| categories.contains(&l.name))
            .map(|l| l.id)
            .collect())
    }
}
