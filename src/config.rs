use crate::adaptation::SynthesisSettings;
use crate::error::{Error, Result};
use crate::llm::{DEFAULT_BASE_URL, OpenAiConfig};
use crate::retriever::{DEFAULT_PAGE_SIZE, DEFAULT_QUERY};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: Storage,
    pub gmail: GmailSettings,
    pub model: ModelSettings,
    pub adaptation: AdaptationSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub database_url: String,
    pub prompt_path: String,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            database_url: "sqlite:feedback.db?mode=rwc".to_string(),
            prompt_path: "email_classifier_prompt.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GmailSettings {
    pub credentials_path: String,
    pub query: String,
    pub page_size: u32,
}

impl Default for GmailSettings {
    fn default() -> Self {
        Self {
            credentials_path: "credentials.json".to_string(),
            query: DEFAULT_QUERY.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub classify_model: String,
    pub synthesis_model: String,
    pub synthesis_temperature: f32,
    pub synthesis_max_tokens: u32,
    pub timeout_seconds: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            classify_model: "gpt-3.5-turbo".to_string(),
            synthesis_model: "gpt-4".to_string(),
            synthesis_temperature: 0.7,
            synthesis_max_tokens: 2000,
            timeout_seconds: 120,
        }
    }
}

impl ModelSettings {
    /// Client settings with the key read from the environment. A missing key
    /// is logged; calls will then fail and callers fall back.
    pub fn client_config(&self) -> OpenAiConfig {
        let api_key = std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::error!(var = %self.api_key_env, "Model API key is not set");
        }
        OpenAiConfig {
            base_url: self.base_url.clone(),
            api_key,
            timeout_seconds: self.timeout_seconds,
        }
    }

    pub fn synthesis(&self) -> SynthesisSettings {
        SynthesisSettings {
            model: self.synthesis_model.clone(),
            temperature: self.synthesis_temperature,
            max_tokens: self.synthesis_max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationSettings {
    pub scheduled_min_feedback: usize,
    pub manual_min_feedback: usize,
    /// How long a label listing may be reused; 0 re-lists on every lookup.
    pub label_cache_ttl_secs: u64,
}

impl Default for AdaptationSettings {
    fn default() -> Self {
        Self {
            scheduled_min_feedback: 20,
            manual_min_feedback: 10,
            label_cache_ttl_secs: 0,
        }
    }
}

impl AdaptationSettings {
    pub fn label_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.label_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Local wall-clock time of the daily run, `HH:MM`.
    pub daily_at: String,
    pub poll_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            daily_at: "02:00".to_string(),
            poll_interval_secs: 60,
        }
    }
}

impl SchedulerSettings {
    pub fn daily_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.daily_at, "%H:%M")
            .map_err(|e| Error::Config(format!("Invalid daily_at '{}': {}", self.daily_at, e)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(SETTINGS_FILE)
    }

    /// Settings from `path`; defaults when the file is absent or invalid.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match Self::parse(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring invalid settings file");
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.scheduler.daily_time()?;
        Ok(config)
    }
}
