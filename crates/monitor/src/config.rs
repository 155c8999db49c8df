//! Proctor configuration
//!
//! YAML/JSON configuration for the backend client, detection cadence,
//! escalation rules and notice timing. Every field has a default that
//! reproduces the production exam policy; `PROCTOR_*` environment variables
//! override the file.

use proctor_core::Category;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level proctor configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProctorConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub notices: NoticeConfig,
}

impl ProctorConfig {
    /// Load from YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read(path)?;
        let config: Self =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read(path)?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load by extension, falling back to defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.extension().is_some_and(|e| e == "json") => Self::from_json_file(p)?,
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment variable overrides
    /// Format: PROCTOR_<SETTING>=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PROCTOR_API_URL") {
            self.backend.base_url = url;
        }
        if let Some(token) = lookup("PROCTOR_API_TOKEN") {
            self.backend.token = Some(token);
        }
        if let Some(ms) = lookup("PROCTOR_COOLDOWN_MS").and_then(|v| v.parse().ok()) {
            self.detection.cooldown_ms = ms;
        }
        if let Some(ms) = lookup("PROCTOR_SAMPLE_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.detection.sample_interval_ms = ms;
        }
        if let Some(conf) = lookup("PROCTOR_MIN_CONFIDENCE").and_then(|v| v.parse().ok()) {
            self.detection.min_confidence = conf;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "detection.sample_interval_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return Err(ConfigError::Invalid(format!(
                "detection.min_confidence out of range: {}",
                self.detection.min_confidence
            )));
        }
        if self.session.deadline_tick_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.deadline_tick_ms must be positive".to_string(),
            ));
        }
        self.policy.validate()
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Exam service client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token issued by the authentication service
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

/// Webcam sampling and classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Low on purpose: recall over precision
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    #[serde(default = "default_max_predictions")]
    pub max_predictions: usize,

    /// Minimum gap between accepted detections of one category
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: i64,

    #[serde(default = "default_person_label")]
    pub person_label: String,

    /// Substring vocabulary for prohibited items
    #[serde(default = "default_prohibited_labels")]
    pub prohibited_labels: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            min_confidence: default_min_confidence(),
            max_predictions: default_max_predictions(),
            cooldown_ms: default_cooldown_ms(),
            person_label: default_person_label(),
            prohibited_labels: default_prohibited_labels(),
        }
    }
}

fn default_sample_interval_ms() -> u64 {
    1_000
}

fn default_min_confidence() -> f32 {
    0.35
}

fn default_max_predictions() -> usize {
    10
}

fn default_cooldown_ms() -> i64 {
    5_000
}

fn default_person_label() -> String {
    "person".to_string()
}

fn default_prohibited_labels() -> Vec<String> {
    [
        "cell phone",
        "phone",
        "mobile",
        "iphone",
        "smartphone",
        "cellphone",
        "handphone",
        "laptop",
        "computer",
        "book",
        "notebook",
        "tv",
        "remote",
        "tablet",
        "calculator",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// One escalation counter: the categories it sums and when it disqualifies
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CounterRule {
    pub name: String,
    pub categories: Vec<Category>,

    /// Count at which the session is disqualified; `None` means log-only
    #[serde(default)]
    pub disqualify_at: Option<u32>,

    /// Message shown on the terminal notice
    #[serde(default)]
    pub reason: Option<String>,
}

impl CounterRule {
    pub fn counted(
        name: &str,
        categories: &[Category],
        disqualify_at: u32,
        reason: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            categories: categories.to_vec(),
            disqualify_at: Some(disqualify_at),
            reason: Some(reason.to_string()),
        }
    }

    pub fn log_only(name: &str, categories: &[Category]) -> Self {
        Self {
            name: name.to_string(),
            categories: categories.to_vec(),
            disqualify_at: None,
            reason: None,
        }
    }
}

/// Escalation rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<CounterRule>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

fn default_rules() -> Vec<CounterRule> {
    vec![
        CounterRule::counted(
            "tab_switch",
            &[Category::TabSwitch],
            2,
            "You have been removed from the exam due to multiple tab switches (2 violations).",
        ),
        CounterRule::counted(
            "object",
            &[Category::ObjectDetected, Category::MultiplePersons],
            2,
            "Exam terminated: prohibited objects or additional persons detected twice.",
        ),
        CounterRule::log_only("fullscreen", &[Category::ExitFullscreen]),
        CounterRule::log_only("camera", &[Category::CameraBlocked]),
        CounterRule::log_only("editor", &[Category::PasteAttempt]),
    ]
}

impl PolicyConfig {
    pub fn rule_for(&self, category: Category) -> Option<&CounterRule> {
        self.rules.iter().find(|r| r.categories.contains(&category))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.disqualify_at == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "rule '{}' has a zero threshold",
                    rule.name
                )));
            }
            for category in &rule.categories {
                if *category == Category::KickedOut {
                    return Err(ConfigError::Invalid(format!(
                        "rule '{}' counts KICKED_OUT, which is emitted by the policy itself",
                        rule.name
                    )));
                }
                if !seen.insert(*category) {
                    return Err(ConfigError::Invalid(format!(
                        "category {} appears in more than one rule",
                        category
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Exam session timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_deadline_tick_ms")]
    pub deadline_tick_ms: u64,

    #[serde(default = "default_language")]
    pub default_language: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            deadline_tick_ms: default_deadline_tick_ms(),
            default_language: default_language(),
        }
    }
}

fn default_deadline_tick_ms() -> u64 {
    1_000
}

fn default_language() -> String {
    "javascript".to_string()
}

/// Background retry for disqualify/complete reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

/// Candidate-facing notices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeConfig {
    /// How long a warning banner stays up
    #[serde(default = "default_warning_dismiss_ms")]
    pub warning_dismiss_ms: u64,

    /// Entries kept in the recent-warnings feed
    #[serde(default = "default_feed_len")]
    pub feed_len: usize,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            warning_dismiss_ms: default_warning_dismiss_ms(),
            feed_len: default_feed_len(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_warning_dismiss_ms() -> u64 {
    5_000
}

fn default_feed_len() -> usize {
    3
}

fn default_channel_capacity() -> usize {
    64
}
