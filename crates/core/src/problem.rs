//! Problem and execution types as consumed from the course/problem and
//! execution services. Read-only input to the engine.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use super::event::{ProblemId, TestId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCase {
    pub input_data: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Problem {
    pub id: ProblemId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub difficulty: String,
    /// Starter code keyed by language, e.g. {"javascript": "...", "python": "..."}
    #[serde(default)]
    pub starter_codes: BTreeMap<String, String>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl Problem {
    pub fn starter_code(&self, language: &str) -> &str {
        self.starter_codes
            .get(language)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Scheduled test as returned by `GET /student/active-test`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTest {
    pub id: TestId,
    pub title: String,
    #[serde(deserialize_with = "deserialize_utc")]
    pub start_time: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_utc")]
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub problems: Vec<Problem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActiveTestResponse {
    pub active_test: Option<ActiveTest>,
    /// Set when re-entry is refused (already completed or disqualified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Accepts RFC 3339 or the naive ISO form the scheduling service emits,
/// which is taken to be UTC.
fn deserialize_utc<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// Body of `POST /execute`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub problem_id: ProblemId,
    pub language: String,
    pub code: String,
    pub test_id: TestId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseResult {
    pub index: u32,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response of `POST /execute`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub verdict: Verdict,
    #[serde(default)]
    pub passed_cases: u32,
    #[serde(default)]
    pub total_cases: u32,
    #[serde(default)]
    pub output_log: String,
    /// Seconds, as reported by the executor
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub case_results: Vec<CaseResult>,
}

impl ExecutionResult {
    /// Verdict shown when the execution service could not be reached
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Error,
            passed_cases: 0,
            total_cases: 0,
            output_log: reason.into(),
            execution_time: 0.0,
            case_results: Vec::new(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.verdict == Verdict::Passed && self.passed_cases == self.total_cases
    }
}
