//! The active classification prompt and its backups.
//!
//! The prompt lives in a plain text file. Its category set is persisted next
//! to it as `<file>.categories.json`; when that file is missing the set is
//! parsed from the prompt's `Categories:` section.

use crate::error::{Error, Result};
use crate::models::CategorySet;
use chrono::Local;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;
use tracing::{debug, info, warn};

pub const SUBJECT_SLOT: &str = "{subject}";
pub const SNIPPET_SLOT: &str = "{snippet}";

pub const DEFAULT_PROMPT: &str = r#"You are an AI email assistant. Based on the subject and body of the email, classify the email into one of the following categories:

Categories:
- Sports
- Entertainment
- Job Applications
- Conferences
- Promotions
- Work
- Other

Examples:
1. "ESPN Weekly Highlights" → Sports
2. "AMC Movie Times" → Entertainment
3. "Application for Software Engineer Role" → Job Applications
4. "Invitation: AI Research Conference 2024" → Conferences
5. "30% Off New Headphones!" → Promotions
6. "Project deadline and updates" → Work
7. "Data Analyst Skills that matter in 2025" → Promotions
8. "Practice coding with interviews" → Promotions
9. "Can you solve this problem?" → Promotions

Classify the following:

Subject: {subject}
Body: {snippet}

Return only the category name.
"#;

fn categories_section() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)Categories:(.*?)(?:\n\s*\n|\z)").expect("valid regex"))
}

/// Category names listed as `- <name>` lines under `Categories:`.
pub fn parse_categories(prompt_text: &str) -> CategorySet {
    let Some(section) = categories_section().captures(prompt_text) else {
        return CategorySet::default();
    };

    CategorySet::new(
        section[1]
            .lines()
            .map(str::trim)
            .filter_map(|line| line.strip_prefix("- ")),
    )
}

#[derive(Debug, Clone)]
pub struct ActivePrompt {
    pub text: String,
    pub categories: CategorySet,
}

impl ActivePrompt {
    /// Fill the template with one message.
    pub fn render(&self, subject: &str, snippet: &str) -> String {
        if !self.text.contains(SUBJECT_SLOT) && !self.text.contains(SNIPPET_SLOT) {
            return format!(
                "{}\n\nSubject: {}\nBody: {}",
                self.text.trim_end(),
                subject,
                snippet
            );
        }

        self.text
            .replace(SUBJECT_SLOT, subject)
            .replace(SNIPPET_SLOT, snippet)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct PromptStore {
    path: PathBuf,
}

impl PromptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sidecar_path(&self) -> PathBuf {
        sibling(&self.path, "categories.json")
    }

    /// Write the default prompt if no prompt file exists yet.
    pub async fn ensure_seeded(&self) -> Result<bool> {
        if fs::try_exists(&self.path).await? {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        write_atomic(&self.path, DEFAULT_PROMPT).await?;
        let categories = parse_categories(DEFAULT_PROMPT);
        write_atomic(&self.sidecar_path(), &serde_json::to_string_pretty(&categories)?).await?;
        info!(path = %self.path.display(), "Seeded default classification prompt");
        Ok(true)
    }

    pub async fn read_text(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::Prompt(format!("Failed to read {}: {}", self.path.display(), e)))
    }

    pub async fn load(&self) -> Result<ActivePrompt> {
        let text = self.read_text().await?;
        let categories = match self.read_sidecar().await {
            Some(categories) => categories,
            None => parse_categories(&text),
        };
        Ok(ActivePrompt { text, categories })
    }

    async fn read_sidecar(&self) -> Option<CategorySet> {
        let raw = fs::read_to_string(self.sidecar_path()).await.ok()?;
        match serde_json::from_str::<CategorySet>(&raw) {
            Ok(categories) if !categories.is_empty() => Some(categories),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable category file");
                None
            }
        }
    }

    /// Back up the current prompt, then swap in `new_text` with its category
    /// set.
    ///
    /// The prompt file is swapped by a rename, so a failure before it leaves
    /// the previous prompt active. If the category file cannot be written
    /// afterwards the backup is put back and the error returned.
    /// Returns the backup path.
    pub async fn replace(&self, new_text: &str, categories: &CategorySet) -> Result<PathBuf> {
        let current = self.read_text().await?;
        let backup = self.write_backup(&current).await?;

        write_atomic(&self.path, new_text).await?;

        let written = match serde_json::to_string_pretty(categories) {
            Ok(json) => write_atomic(&self.sidecar_path(), &json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            warn!(error = %e, "Failed to persist categories, rolling back prompt");
            if let Err(restore_err) = self.restore(&backup).await {
                warn!(error = %restore_err, "Rollback of prompt failed");
            }
            return Err(e);
        }

        info!(path = %self.path.display(), backup = %backup.display(), "Updated classification prompt");
        Ok(backup)
    }

    /// Put a backup's text and category set back as the live prompt.
    pub async fn restore(&self, backup: &Path) -> Result<()> {
        let text = fs::read_to_string(backup).await?;
        write_atomic(&self.path, &text).await?;

        // No saved set means there was none; categories come from the text.
        let sidecar = self.sidecar_path();
        match fs::read_to_string(backup_sidecar(backup)).await {
            Ok(json) => write_atomic(&sidecar, &json).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if fs::try_exists(&sidecar).await? {
                    fs::remove_file(&sidecar).await?;
                }
            }
            Err(e) => return Err(e.into()),
        }

        warn!(backup = %backup.display(), "Restored classification prompt from backup");
        Ok(())
    }

    async fn write_backup(&self, content: &str) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut backup = sibling(&self.path, &format!("{stamp}.bak"));
        let mut n = 1;
        while fs::try_exists(&backup).await? {
            backup = sibling(&self.path, &format!("{stamp}_{n}.bak"));
            n += 1;
        }

        fs::write(&backup, content).await?;
        let sidecar = self.sidecar_path();
        if fs::try_exists(&sidecar).await? {
            fs::copy(&sidecar, backup_sidecar(&backup)).await?;
        }
        debug!(backup = %backup.display(), "Backup created");
        Ok(backup)
    }

    /// Backup files for this prompt, oldest first.
    pub async fn backups(&self) -> Result<Vec<PathBuf>> {
        let Some(file_name) = self.path.file_name().and_then(|n| n.to_str()) else {
            return Ok(Vec::new());
        };
        let prefix = format!("{file_name}.");
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };

        let mut backups = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && name.ends_with(".bak") {
                let modified = entry.metadata().await.and_then(|m| m.modified()).ok();
                backups.push((modified, entry.path()));
            }
        }
        backups.sort();
        Ok(backups.into_iter().map(|(_, path)| path).collect())
    }
}

/// `<file>.<stamp>.bak` keeps its category set in `<file>.<stamp>.categories.json`.
fn backup_sidecar(backup: &Path) -> PathBuf {
    backup.with_extension("categories.json")
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = sibling(path, "tmp");
    fs::write(&tmp, content).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_categories_from_default_prompt() {
        let categories = parse_categories(DEFAULT_PROMPT);
        assert_eq!(categories.len(), 7);
        assert!(categories.contains("Job Applications"));
        assert!(categories.contains("Other"));
        assert!(!categories.contains("Examples:"));
    }

    #[test]
    fn test_parse_categories_without_section() {
        assert!(parse_categories("Classify this email.").is_empty());
    }

    #[test]
    fn test_parse_categories_at_end_of_text() {
        let categories = parse_categories("Intro\n\nCategories:\n- Alpha\n- Beta");
        assert_eq!(categories.names(), &["Alpha".to_string(), "Beta".to_string()]);
    }

    #[test]
    fn test_render_substitutes_slots() {
        let prompt = ActivePrompt {
            text: DEFAULT_PROMPT.to_string(),
            categories: parse_categories(DEFAULT_PROMPT),
        };
        let rendered = prompt.render("Free Concert Tickets!!", "Win two tickets");
        assert!(rendered.contains("Subject: Free Concert Tickets!!"));
        assert!(rendered.contains("Body: Win two tickets"));
        assert!(!rendered.contains(SUBJECT_SLOT));
    }

    #[test]
    fn test_render_appends_message_when_template_has_no_slots() {
        let prompt = ActivePrompt {
            text: "Categories:\n- Work\n".to_string(),
            categories: CategorySet::new(["Work"]),
        };
        let rendered = prompt.render("Standup", "Notes");
        assert!(rendered.ends_with("Subject: Standup\nBody: Notes"));
    }

    #[tokio::test]
    async fn test_seed_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptStore::new(dir.path().join("prompt.txt"));

        assert!(store.ensure_seeded().await.unwrap());
        assert!(!store.ensure_seeded().await.unwrap());

        let prompt = store.load().await.unwrap();
        assert_eq!(prompt.text, DEFAULT_PROMPT);
        assert!(prompt.categories.contains("Promotions"));
    }

    #[tokio::test]
    async fn test_load_missing_prompt_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptStore::new(dir.path().join("missing.txt"));
        assert!(matches!(store.load().await, Err(Error::Prompt(_))));
    }

    #[tokio::test]
    async fn test_replace_backs_up_previous_text() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptStore::new(dir.path().join("prompt.txt"));
        store.ensure_seeded().await.unwrap();

        let new_text = "Categories:\n- Work\n- Travel\n\nSubject: {subject}\nBody: {snippet}\n";
        let backup = store
            .replace(new_text, &parse_categories(new_text))
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(&backup).await.unwrap(), DEFAULT_PROMPT);
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.text, new_text);
        assert_eq!(loaded.categories.names(), &["Work".to_string(), "Travel".to_string()]);
        assert!(!fs::try_exists(sibling(store.path(), "tmp")).await.unwrap());
    }

    #[tokio::test]
    async fn test_backups_within_same_second_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptStore::new(dir.path().join("prompt.txt"));
        store.ensure_seeded().await.unwrap();

        let categories = CategorySet::new(["Work"]);
        store.replace("v2", &categories).await.unwrap();
        store.replace("v3", &categories).await.unwrap();
        store.replace("v4", &categories).await.unwrap();

        let backups = store.backups().await.unwrap();
        assert_eq!(backups.len(), 3);
        let mut contents = Vec::new();
        for backup in &backups {
            contents.push(fs::read_to_string(backup).await.unwrap());
        }
        contents.sort();
        assert_eq!(contents, vec![DEFAULT_PROMPT.to_string(), "v2".into(), "v3".into()]);
    }

    #[tokio::test]
    async fn test_backup_carries_category_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptStore::new(dir.path().join("prompt.txt"));
        store.ensure_seeded().await.unwrap();
        let seeded = store.load().await.unwrap().categories;

        // A rewrite without a Categories: section keeps the seeded set only
        // through the category file.
        let sectionless = "Classify: {subject} / {snippet}";
        store.replace(sectionless, &seeded).await.unwrap();
        let backup = store
            .replace("Categories:\n- Work\n", &CategorySet::new(["Work"]))
            .await
            .unwrap();
        assert!(fs::try_exists(backup_sidecar(&backup)).await.unwrap());

        store.restore(&backup).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.text, sectionless);
        assert_eq!(loaded.categories, seeded);
        assert_eq!(store.backups().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_category_write_rolls_back_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptStore::new(dir.path().join("prompt.txt"));
        store.ensure_seeded().await.unwrap();
        // A directory where the temporary category file should go.
        fs::create_dir(sibling(&store.sidecar_path(), "tmp")).await.unwrap();

        let result = store
            .replace("Categories:\n- Work\n", &CategorySet::new(["Work"]))
            .await;

        assert!(result.is_err());
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.text, DEFAULT_PROMPT);
        assert!(loaded.categories.contains("Sports"));
    }

    #[tokio::test]
    async fn test_restore_reinstates_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptStore::new(dir.path().join("prompt.txt"));
        store.ensure_seeded().await.unwrap();

        let backup = store
            .replace("Categories:\n- Work\n", &CategorySet::new(["Work"]))
            .await
            .unwrap();
        store.restore(&backup).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.text, DEFAULT_PROMPT);
        assert!(loaded.categories.contains("Sports"));
    }
}
