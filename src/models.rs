use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Category returned whenever classification fails or the model answers
/// outside the declared set.
pub const FALLBACK_CATEGORY: &str = "Other";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub label_type: String, // 'system' or 'user'
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub snippet: String,
    pub label_ids: HashSet<String>,
    pub internal_date: i64,
}

impl Message {
    pub fn has_any_label(&self, label_ids: &HashSet<String>) -> bool {
        !self.label_ids.is_disjoint(label_ids)
    }
}

/// One page of message ids from the mailbox listing.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// A user correction as submitted, before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeedback {
    pub message_id: String,
    pub subject: String,
    pub snippet: String,
    pub ai_category: String,
    pub user_category: String,
}

impl NewFeedback {
    pub fn is_correction(&self) -> bool {
        self.ai_category != self.user_category
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FeedbackRecord {
    pub id: i64,
    pub message_id: String,
    pub subject: String,
    pub snippet: String,
    pub ai_category: String,
    pub user_category: String,
    pub timestamp: DateTime<Utc>,
    pub is_processed: bool,
}

impl FeedbackRecord {
    pub fn is_misclassified(&self) -> bool {
        self.ai_category != self.user_category
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PromptVersion {
    pub id: i64,
    pub old_prompt: String,
    pub new_prompt: String,
    pub timestamp: DateTime<Utc>,
    pub feedback_count: i64,
    pub performance_metrics: String, // JSON object
}

/// Metrics stored with every prompt rewrite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetrics {
    pub feedback_count: usize,
    pub update_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfusionPair {
    pub ai_category: String,
    pub user_category: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedbackStats {
    pub total: i64,
    pub incorrect_count: i64,
    pub accuracy: f64,
    pub category_distribution: BTreeMap<String, i64>,
    pub top_confusions: Vec<ConfusionPair>,
}

/// Category and label names compare equal ignoring case, for any script.
pub fn names_match(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// The ordered set of categories the classifier may answer with.
///
/// Names are unique case-insensitively; the first spelling wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategorySet(Vec<String>);

impl CategorySet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for name in names {
            let name = name.into();
            let name = name.trim();
            if !name.is_empty() && set.lookup(name).is_none() {
                set.0.push(name.to_string());
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn lookup(&self, name: &str) -> Option<&String> {
        self.0.iter().find(|c| names_match(c, name))
    }

    /// Map raw model output onto a member of the set, or the fallback.
    pub fn resolve(&self, raw: &str) -> Category {
        let cleaned = raw
            .trim()
            .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*'))
            .trim_end_matches('.')
            .trim();

        match self.lookup(cleaned) {
            Some(name) => Category(name.clone()),
            None => Category::fallback(),
        }
    }
}

/// A category name that is either a member of a [`CategorySet`] or the
/// fallback. Only constructed through [`CategorySet::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Category(String);

impl Category {
    pub fn fallback() -> Self {
        Category(FALLBACK_CATEGORY.to_string())
    }

    pub fn is_fallback(&self) -> bool {
        self.0 == FALLBACK_CATEGORY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> CategorySet {
        CategorySet::new(["Sports", "Promotions", "Job Applications", "Other"])
    }

    #[test]
    fn test_category_set_dedups_case_insensitively() {
        let set = CategorySet::new(["Work", "work", " WORK ", "Travel", ""]);
        assert_eq!(set.names(), &["Work".to_string(), "Travel".to_string()]);
    }

    #[test]
    fn test_resolve_matches_canonical_spelling() {
        let set = categories();
        assert_eq!(set.resolve("promotions").as_str(), "Promotions");
        assert_eq!(set.resolve("  \"Job Applications\".\n").as_str(), "Job Applications");
        assert_eq!(set.resolve("`Sports`").as_str(), "Sports");
    }

    #[test]
    fn test_non_ascii_names_match_ignoring_case() {
        let set = CategorySet::new(["Événements", "événements", "ÉVÉNEMENTS", "Reisen"]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.resolve("ÉVÉNEMENTS").as_str(), "Événements");
        assert_eq!(set.resolve("reisen").as_str(), "Reisen");
    }

    #[test]
    fn test_resolve_unknown_output_falls_back() {
        let set = categories();
        let category = set.resolve("Category: Promotions because it is an ad");
        assert!(category.is_fallback());
        assert_eq!(category.to_string(), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_feedback_record_misclassification() {
        let record = FeedbackRecord {
            id: 1,
            message_id: "m1".to_string(),
            subject: String::new(),
            snippet: String::new(),
            ai_category: "Work".to_string(),
            user_category: "Conferences".to_string(),
            timestamp: Utc::now(),
            is_processed: false,
        };
        assert!(record.is_misclassified());
    }
}
