use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::Severity;

pub type UserId = i64;
pub type ProblemId = i64;
pub type TestId = i64;

/// What kind of deviation a violation reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    TabSwitch,
    ExitFullscreen,
    CameraBlocked,
    ObjectDetected,
    MultiplePersons,
    KickedOut,
    PasteAttempt,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::TabSwitch,
        Category::ExitFullscreen,
        Category::CameraBlocked,
        Category::ObjectDetected,
        Category::MultiplePersons,
        Category::KickedOut,
        Category::PasteAttempt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::TabSwitch => "TAB_SWITCH",
            Category::ExitFullscreen => "EXIT_FULLSCREEN",
            Category::CameraBlocked => "CAMERA_BLOCKED",
            Category::ObjectDetected => "OBJECT_DETECTED",
            Category::MultiplePersons => "MULTIPLE_PERSONS",
            Category::KickedOut => "KICKED_OUT",
            Category::PasteAttempt => "PASTE_ATTEMPT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
    }

    /// Severity the sensors attach when they raise this category
    pub fn default_severity(&self) -> Severity {
        match self {
            Category::KickedOut => Severity::Critical,
            Category::PasteAttempt => Severity::Low,
            _ => Severity::High,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who and what a violation is about
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Subject {
    pub user_id: UserId,
    /// Problem on screen when the violation happened, if any
    pub problem_id: Option<ProblemId>,
    pub test_id: TestId,
}

impl Subject {
    pub fn new(user_id: UserId, test_id: TestId) -> Self {
        Self {
            user_id,
            problem_id: None,
            test_id,
        }
    }

    pub fn on_problem(mut self, problem_id: Option<ProblemId>) -> Self {
        self.problem_id = problem_id;
        self
    }
}

/// A single detected incident. Built once by the producing adapter and never
/// mutated afterwards; the builder methods consume `self`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViolationEvent {
    pub event_id: String,
    pub category: Category,
    pub severity: Severity,
    /// Human-readable description, forwarded verbatim to the audit sink
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
    pub subject: Subject,

    /// Structured evidence keyed by `event_keys` constants
    #[serde(default)]
    pub evidence: BTreeMap<String, serde_json::Value>,
}

impl ViolationEvent {
    pub fn new(
        category: Category,
        subject: Subject,
        detail: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            category,
            severity: category.default_severity(),
            detail: detail.into(),
            occurred_at,
            subject,
            evidence: BTreeMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_evidence(mut self, key: &str, value: serde_json::Value) -> Self {
        self.evidence.insert(key.to_string(), value);
        self
    }

    pub fn occurred_at_ms(&self) -> i64 {
        self.occurred_at.timestamp_millis()
    }

    /// Deterministic sha256(user|test|category|occurred_ms), stable across retries
    /// of the same audit record.
    pub fn fingerprint(&self) -> String {
        let input = format!(
            "{}|{}|{}|{}",
            self.subject.user_id,
            self.subject.test_id,
            self.category.as_str(),
            self.occurred_at_ms()
        );
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Validate evidence fields against canonical keys.
    /// Returns Ok(()) if all fields are recognized, Err with invalid key if not.
    pub fn validate_basic(&self) -> Result<(), String> {
        let valid_keys = super::event_keys::all_valid_keys();
        let valid_set: std::collections::HashSet<_> = valid_keys.into_iter().collect();

        for key in self.evidence.keys() {
            if !valid_set.contains(key.as_str()) {
                return Err(format!("unknown evidence field: {}", key));
            }
        }

        if self.detail.trim().is_empty() {
            return Err(format!("{} event has empty detail", self.category));
        }

        Ok(())
    }
}
