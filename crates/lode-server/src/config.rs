//! Application configuration.

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Sessions older than this many days are deleted after each
    /// recording. Zero disables retention.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Database size budget in bytes. Zero disables eviction.
    #[serde(default)]
    pub max_db_bytes: u64,
    /// Duplicate-line suppression window in milliseconds.
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    /// Interval of the best-effort session byte-count sync.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default)]
    pub extraction: ExtractionSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionSettings {
    #[serde(default)]
    pub enabled: bool,
    /// "local" (Ollama-compatible server) or "hosted" (Anthropic API).
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Hosted backend only. Falls back to ANTHROPIC_API_KEY.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_token_threshold")]
    pub token_threshold: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

/// A single configuration problem. Validation collects all of these
/// instead of stopping at the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lode")
        .join("history.db")
}

fn default_retention_days() -> i64 {
    30
}

fn default_dedup_window_ms() -> u64 {
    2000
}

fn default_sync_interval_secs() -> u64 {
    5
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_token_threshold() -> usize {
    4000
}

fn default_overlap_tokens() -> usize {
    500
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: default_backend(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            token_threshold: default_token_threshold(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            retention_days: default_retention_days(),
            max_db_bytes: 0,
            dedup_window_ms: default_dedup_window_ms(),
            sync_interval_secs: default_sync_interval_secs(),
            extraction: ExtractionSettings::default(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config from the default location or fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lode")
            .join("config.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }
        Ok(Config::default())
    }

    /// Collect every configuration problem.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.retention_days < 0 {
            errors.push(ValidationError {
                field: "retention_days".to_string(),
                message: "must be zero or positive".to_string(),
            });
        }
        if self.dedup_window_ms == 0 {
            errors.push(ValidationError {
                field: "dedup_window_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.sync_interval_secs == 0 {
            errors.push(ValidationError {
                field: "sync_interval_secs".to_string(),
                message: "must be positive".to_string(),
            });
        }

        let e = &self.extraction;
        if e.backend != "local" && e.backend != "hosted" {
            errors.push(ValidationError {
                field: "extraction.backend".to_string(),
                message: format!("unknown backend '{}', use 'local' or 'hosted'", e.backend),
            });
        }
        if e.token_threshold == 0 {
            errors.push(ValidationError {
                field: "extraction.token_threshold".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if e.overlap_tokens >= e.token_threshold {
            errors.push(ValidationError {
                field: "extraction.overlap_tokens".to_string(),
                message: "must be smaller than token_threshold".to_string(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn validation_collects_all_problems() {
        let mut config = Config::default();
        config.retention_days = -1;
        config.dedup_window_ms = 0;
        config.extraction.backend = "cloud".to_string();

        let errors = config.validate();
        assert_eq!(errors.len(), 3);
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"retention_days"));
        assert!(fields.contains(&"dedup_window_ms"));
        assert!(fields.contains(&"extraction.backend"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            retention_days = 7

            [extraction]
            enabled = true
            backend = "hosted"
            model = "claude-sonnet-4"
            "#,
        )
        .unwrap();

        assert_eq!(config.retention_days, 7);
        assert_eq!(config.dedup_window_ms, 2000);
        assert!(config.extraction.enabled);
        assert_eq!(config.extraction.backend, "hosted");
        assert_eq!(config.extraction.token_threshold, 4000);
    }

    #[test]
    fn overlap_must_fit_inside_threshold() {
        let mut config = Config::default();
        config.extraction.overlap_tokens = 4000;
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "extraction.overlap_tokens");
    }
}
