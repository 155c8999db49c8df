/// UI-facing error taxonomy for exam interactions.
/// The engine reports these as values; nothing here is meant to reach the
/// candidate as a panic or an unhandled failure.
use serde::{Deserialize, Serialize};

use super::event::ProblemId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    EmptyCode,
    ProblemLocked,
    SubmissionInFlight,
    UnknownProblem,
    SessionClosed,
    SessionAlreadyActive,
    ExecutionUnavailable,
    CameraBlocked,
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::EmptyCode => "empty_code",
            ErrorCode::ProblemLocked => "problem_locked",
            ErrorCode::SubmissionInFlight => "submission_in_flight",
            ErrorCode::UnknownProblem => "unknown_problem",
            ErrorCode::SessionClosed => "session_closed",
            ErrorCode::SessionAlreadyActive => "session_already_active",
            ErrorCode::ExecutionUnavailable => "execution_unavailable",
            ErrorCode::CameraBlocked => "camera_blocked",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<ProblemId>,
}

impl ErrorReport {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            problem_id: None,
        }
    }

    pub fn for_problem(mut self, problem_id: ProblemId) -> Self {
        self.problem_id = Some(problem_id);
        self
    }
}
