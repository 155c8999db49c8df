pub mod error;
pub mod event;
pub mod event_keys;
pub mod problem;
pub mod severity;


pub use error::{ErrorCode, ErrorReport};
pub use event::{Category, ProblemId, Subject, TestId, UserId, ViolationEvent};
pub use problem::{
    ActiveTest, ActiveTestResponse, CaseResult, ExecutionRequest, ExecutionResult, Problem,
    TestCase, Verdict,
};
pub use severity::Severity;
