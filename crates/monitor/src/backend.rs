//! Exam service client
//!
//! The audit sink, disqualification, execution, completion and active-test
//! endpoints are external collaborators. `ExamBackend` is the seam; the HTTP
//! implementation speaks the JSON contract of the assessment API.

use async_trait::async_trait;
use proctor_core::{
    ActiveTestResponse, Category, ExecutionRequest, ExecutionResult, ProblemId, Severity, TestId,
    UserId, ViolationEvent,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::BackendConfig;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl BackendError {
    /// Worth retrying: connection trouble or a server-side failure
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transport(_) => true,
            BackendError::Status { status, .. } => *status >= 500 || *status == 429,
            BackendError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Body of `POST /student/log-behavior`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BehaviorRecord {
    pub user_id: UserId,
    pub problem_id: Option<ProblemId>,
    pub test_id: TestId,
    pub event_type: Category,
    pub severity: Severity,
    pub details: String,
}

impl From<&ViolationEvent> for BehaviorRecord {
    fn from(event: &ViolationEvent) -> Self {
        Self {
            user_id: event.subject.user_id,
            problem_id: event.subject.problem_id,
            test_id: event.subject.test_id,
            event_type: event.category,
            severity: event.severity,
            details: event.detail.clone(),
        }
    }
}

#[async_trait]
pub trait ExamBackend: Send + Sync {
    /// Audit sink; callers treat failures as droppable
    async fn log_behavior(&self, record: &BehaviorRecord) -> Result<(), BackendError>;

    async fn disqualify(&self, test_id: TestId, user_id: UserId) -> Result<(), BackendError>;

    /// Run or submit code against the problem's test cases
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, BackendError>;

    async fn complete(&self, test_id: TestId) -> Result<(), BackendError>;

    async fn active_test(&self) -> Result<ActiveTestResponse, BackendError>;
}

/// reqwest-backed client for the assessment API
pub struct HttpExamBackend {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpExamBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ExamBackend for HttpExamBackend {
    async fn log_behavior(&self, record: &BehaviorRecord) -> Result<(), BackendError> {
        let request = self
            .client
            .post(self.url("/student/log-behavior"))
            .json(record);
        Self::check(self.authorized(request).send().await?).await?;
        Ok(())
    }

    async fn disqualify(&self, test_id: TestId, user_id: UserId) -> Result<(), BackendError> {
        let request = self
            .client
            .post(self.url(&format!("/student/disqualify-test/{}", test_id)))
            .query(&[("user_id", user_id)]);
        Self::check(self.authorized(request).send().await?).await?;
        Ok(())
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, BackendError> {
        let builder = self.client.post(self.url("/execute")).json(request);
        let response = Self::check(self.authorized(builder).send().await?).await?;
        Ok(response.json::<ExecutionResult>().await?)
    }

    async fn complete(&self, test_id: TestId) -> Result<(), BackendError> {
        let request = self
            .client
            .post(self.url(&format!("/student/complete-test/{}", test_id)));
        Self::check(self.authorized(request).send().await?).await?;
        Ok(())
    }

    async fn active_test(&self) -> Result<ActiveTestResponse, BackendError> {
        let request = self.client.get(self.url("/student/active-test"));
        let response = Self::check(self.authorized(request).send().await?).await?;
        Ok(response.json::<ActiveTestResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proctor_core::Subject;

    #[test]
    fn test_behavior_record_wire_shape() {
        let event = ViolationEvent::new(
            Category::TabSwitch,
            Subject::new(7, 42).on_problem(Some(3)),
            "Tab switch detected (count: 1)",
            Utc::now(),
        );
        let json = serde_json::to_value(BehaviorRecord::from(&event)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "user_id": 7,
                "problem_id": 3,
                "test_id": 42,
                "event_type": "TAB_SWITCH",
                "severity": "HIGH",
                "details": "Tab switch detected (count: 1)"
            })
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Transport("refused".into()).is_transient());
        assert!(BackendError::Status {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!BackendError::Status {
            status: 404,
            body: String::new()
        }
        .is_transient());
        assert!(!BackendError::Decode("eof".into()).is_transient());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let backend = HttpExamBackend::new(&BackendConfig {
            base_url: "http://localhost:8000/api/v1/".to_string(),
            token: None,
            request_timeout_ms: 1000,
        })
        .unwrap();
        assert_eq!(
            backend.url("/execute"),
            "http://localhost:8000/api/v1/execute"
        );
    }
}
