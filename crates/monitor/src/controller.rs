//! Exam session controller
//!
//! Wraps `ExamSession` with the remote calls around it: execution, submit
//! persistence, completion and disqualification reports. Local state always
//! moves first or independently of the network; remote failures never trap
//! the candidate inside the exam.

use proctor_core::{
    ErrorCode, ErrorReport, ExecutionRequest, ExecutionResult, ProblemId, Subject, TestId, UserId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

use crate::backend::{BackendError, ExamBackend};
use crate::clock::Clock;
use crate::config::{ProctorConfig, RetryConfig};
use crate::retry::retry_with_backoff;
use crate::session::{
    DeadlineTick, Direction, ExamSession, SessionError, SessionSnapshot, SessionStatus,
    SubmitOutcome, SubmitTicket, TIME_UP_MESSAGE,
};

pub const EXECUTION_UNAVAILABLE: &str = "Failed to connect to execution server.";
pub const SUBMIT_FAILED: &str = "Failed to submit code. Please try again.";

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{0}")]
    Refused(String),

    #[error("no test is currently scheduled")]
    NoActiveTest,

    #[error("Failed to submit code. Please try again. ({0})")]
    Backend(#[from] BackendError),
}

impl ControllerError {
    pub fn report(&self) -> ErrorReport {
        match self {
            ControllerError::Session(e) => e.report(),
            ControllerError::Refused(message) => {
                ErrorReport::new(ErrorCode::SessionClosed, message.clone())
            }
            ControllerError::NoActiveTest => {
                ErrorReport::new(ErrorCode::SessionClosed, self.to_string())
            }
            ControllerError::Backend(_) => {
                ErrorReport::new(ErrorCode::ExecutionUnavailable, SUBMIT_FAILED)
            }
        }
    }
}

/// Session lifecycle as observed by the runtime and the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Active,
    Completed { auto: bool, message: String },
    Disqualified { reason: String },
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionPhase::Active)
    }
}

#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub result: ExecutionResult,
    pub outcome: SubmitOutcome,
}

pub struct ExamSessionController {
    user_id: UserId,
    session: Mutex<ExamSession>,
    backend: Arc<dyn ExamBackend>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    phase: watch::Sender<SessionPhase>,
    completion_reported: AtomicBool,
}

impl ExamSessionController {
    pub fn new(
        user_id: UserId,
        session: ExamSession,
        backend: Arc<dyn ExamBackend>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
    ) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Active);
        Self {
            user_id,
            session: Mutex::new(session),
            backend,
            clock,
            retry,
            phase,
            completion_reported: AtomicBool::new(false),
        }
    }

    /// Enter the currently scheduled test. Re-entry after completion or
    /// disqualification is refused with the server's message.
    pub async fn load(
        user_id: UserId,
        backend: Arc<dyn ExamBackend>,
        clock: Arc<dyn Clock>,
        config: &ProctorConfig,
    ) -> Result<Self, ControllerError> {
        let response = backend.active_test().await?;
        if let Some(message) = response.message {
            tracing::info!(user_id, "exam entry refused: {}", message);
            return Err(ControllerError::Refused(message));
        }
        let test = response.active_test.ok_or(ControllerError::NoActiveTest)?;
        tracing::info!(
            user_id,
            test_id = test.id,
            problems = test.problems.len(),
            "entering exam"
        );
        let session = ExamSession::from_active_test(test, &config.session.default_language)?;
        Ok(Self::new(user_id, session, backend, clock, config.retry))
    }

    fn lock(&self) -> MutexGuard<'_, ExamSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn test_id(&self) -> TestId {
        self.lock().test_id()
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status()
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_active()
    }

    /// Subject for violations raised right now
    pub fn subject(&self) -> Subject {
        let session = self.lock();
        Subject::new(self.user_id, session.test_id()).on_problem(Some(session.current_problem().id))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    pub fn with_session<R>(&self, f: impl FnOnce(&ExamSession) -> R) -> R {
        f(&self.lock())
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    pub fn time_left(&self) -> chrono::Duration {
        self.lock().remaining(self.clock.now())
    }

    pub fn edit_code(&self, problem_id: ProblemId, text: &str) -> Result<(), SessionError> {
        self.lock().edit(problem_id, text)
    }

    pub fn navigate(&self, direction: Direction) -> Result<usize, SessionError> {
        self.lock().navigate(direction)
    }

    pub fn set_language(&self, language: &str) {
        self.lock().set_language(language);
    }

    /// Dry run against the test cases. Never mutates submission state; an
    /// unreachable executor becomes an `Error` verdict.
    pub async fn run_code(
        &self,
        problem_id: ProblemId,
        code: &str,
        language: &str,
    ) -> Result<ExecutionResult, SessionError> {
        let test_id = {
            let session = self.lock();
            session.check_code(problem_id, code, crate::session::CodeAction::Run)?;
            session.test_id()
        };
        let request = ExecutionRequest {
            problem_id,
            language: language.to_string(),
            code: code.to_string(),
            test_id,
        };
        match self.backend.execute(&request).await {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!(problem_id, "execution failed: {}", e);
                Ok(ExecutionResult::unavailable(EXECUTION_UNAVAILABLE))
            }
        }
    }

    pub async fn submit_code(
        &self,
        problem_id: ProblemId,
        code: &str,
        language: &str,
    ) -> Result<SubmitReceipt, ControllerError> {
        let (ticket, test_id) = {
            let mut session = self.lock();
            let ticket = session.begin_submit(problem_id, code, language)?;
            (ticket, session.test_id())
        };

        match self.backend.execute(&ticket_request(&ticket, test_id)).await {
            Ok(result) => {
                let outcome = self.lock().finish_submit(&ticket, true);
                tracing::info!(problem_id, verdict = ?result.verdict, ?outcome, "problem submitted");
                if outcome == SubmitOutcome::Completed {
                    self.finalize_completion(false).await;
                }
                Ok(SubmitReceipt { result, outcome })
            }
            Err(e) => match self.settle_failed_submit(&ticket) {
                SubmitOutcome::Deferred => {
                    tracing::warn!(problem_id, "submission failed after the deadline locked it: {}", e);
                    self.persist_in_background(ticket_request(&ticket, test_id), "late-submit");
                    Ok(SubmitReceipt {
                        result: ExecutionResult::unavailable(TIME_UP_MESSAGE),
                        outcome: SubmitOutcome::Deferred,
                    })
                }
                _ => {
                    tracing::warn!(problem_id, "submission failed: {}", e);
                    Err(ControllerError::Backend(e))
                }
            },
        }
    }

    fn settle_failed_submit(&self, ticket: &SubmitTicket) -> SubmitOutcome {
        self.lock().finish_submit(ticket, false)
    }

    /// Called at 1 Hz by the deadline task
    pub async fn on_deadline_tick(&self) -> DeadlineTick {
        let (tick, test_id) = {
            let mut session = self.lock();
            (session.deadline_tick(self.clock.now()), session.test_id())
        };
        if let DeadlineTick::Expired { auto_submission } = &tick {
            tracing::info!(test_id, "deadline reached, auto-submitting");
            if let Some(ticket) = auto_submission {
                self.persist_auto_submission(ticket, test_id).await;
            }
            self.finalize_completion(true).await;
        }
        tick
    }

    async fn persist_auto_submission(&self, ticket: &SubmitTicket, test_id: TestId) {
        if ticket.code.trim().is_empty() {
            tracing::info!(problem_id = ticket.problem_id, "blank buffer locked without execution");
            return;
        }
        let request = ticket_request(ticket, test_id);
        if let Err(e) = self.backend.execute(&request).await {
            tracing::warn!(problem_id = ticket.problem_id, "auto-submission failed: {}", e);
            self.persist_in_background(request, "auto-submit");
        }
    }

    /// Keep executing a locked submission until it lands or retries run out
    fn persist_in_background(&self, request: ExecutionRequest, label: &'static str) {
        let backend = self.backend.clone();
        let retry = self.retry;
        tokio::spawn(async move {
            let _ = retry_with_backoff(retry, label, || {
                let backend = backend.clone();
                let request = request.clone();
                async move { backend.execute(&request).await }
            })
            .await;
        });
    }

    /// Report completion once, then hand off. A failed report is retried in
    /// the background and never delays the hand-off past one attempt.
    async fn finalize_completion(&self, auto: bool) {
        if self.completion_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        let (test_id, message) = {
            let session = self.lock();
            (
                session.test_id(),
                session.terminal_reason().unwrap_or_default().to_string(),
            )
        };

        if let Err(e) = self.backend.complete(test_id).await {
            tracing::warn!(test_id, "completion report failed: {}", e);
            let backend = self.backend.clone();
            let retry = self.retry;
            tokio::spawn(async move {
                let _ = retry_with_backoff(retry, "complete-test", || {
                    let backend = backend.clone();
                    async move { backend.complete(test_id).await }
                })
                .await;
            });
        }

        tracing::info!(test_id, auto, "exam completed");
        self.phase
            .send_replace(SessionPhase::Completed { auto, message });
    }

    /// Local lockout first-class; the remote report runs in the background
    /// with bounded retry. Returns false if the session was already terminal.
    pub fn disqualify(&self, reason: &str) -> bool {
        if !self.lock_out(reason) {
            return false;
        }
        self.report_disqualification(reason);
        true
    }

    /// Claim the DISQUALIFIED transition locally. Returns false if the session
    /// already ended some other way; nothing else happens in that case.
    pub fn lock_out(&self, reason: &str) -> bool {
        let locked = self.lock().disqualify(reason);
        if locked {
            tracing::warn!(
                test_id = self.test_id(),
                user_id = self.user_id,
                "candidate disqualified: {}",
                reason
            );
        }
        locked
    }

    /// Remote report and phase hand-off for a session already locked out
    pub fn report_disqualification(&self, reason: &str) {
        let backend = self.backend.clone();
        let retry = self.retry;
        let user_id = self.user_id;
        let test_id = self.test_id();
        tokio::spawn(async move {
            let _ = retry_with_backoff(retry, "disqualify-test", || {
                let backend = backend.clone();
                async move { backend.disqualify(test_id, user_id).await }
            })
            .await;
        });

        self.phase.send_replace(SessionPhase::Disqualified {
            reason: reason.to_string(),
        });
    }
}

fn ticket_request(ticket: &SubmitTicket, test_id: TestId) -> ExecutionRequest {
    ExecutionRequest {
        problem_id: ticket.problem_id,
        language: ticket.language.clone(),
        code: ticket.code.clone(),
        test_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fake_backend::{FakeBackend, Operation};
    use crate::session::tests::active_test;
    use chrono::{Duration, TimeZone, Utc};
    use proctor_core::{ActiveTestResponse, Verdict};

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn controller(ids: &[ProblemId]) -> (ExamSessionController, Arc<FakeBackend>, Arc<ManualClock>) {
        let backend = Arc::new(FakeBackend::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let session =
            ExamSession::from_active_test(active_test(ids, t0() + Duration::hours(1)), "javascript")
                .unwrap();
        let controller = ExamSessionController::new(
            5,
            session,
            backend.clone(),
            clock.clone(),
            RetryConfig::default(),
        );
        (controller, backend, clock)
    }

    #[tokio::test]
    async fn test_run_code_folds_infra_failure() {
        let (c, backend, _) = controller(&[1]);
        backend.fail_next(Operation::Execute, 1);
        let result = c.run_code(1, "print(1)", "python").await.unwrap();
        assert_eq!(result.verdict, Verdict::Error);
        assert_eq!(result.output_log, EXECUTION_UNAVAILABLE);
        assert!(!c.with_session(|s| s.is_submitted(1)));
    }

    #[tokio::test]
    async fn test_run_code_rejects_blank_without_network() {
        let (c, backend, _) = controller(&[1]);
        let err = c.run_code(1, "   ", "javascript").await.unwrap_err();
        assert_eq!(err.to_string(), "Please write some code before running");
        assert!(backend.execute_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_submit_completes_and_reports() {
        let (c, backend, _) = controller(&[1]);
        let mut phase = c.subscribe_phase();
        let receipt = c.submit_code(1, "answer", "javascript").await.unwrap();
        assert_eq!(receipt.outcome, SubmitOutcome::Completed);
        assert_eq!(backend.complete_count(), 1);
        phase.changed().await.unwrap();
        assert!(matches!(
            *phase.borrow(),
            SessionPhase::Completed { auto: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_submit_keeps_problem_open() {
        let (c, backend, _) = controller(&[1, 2]);
        backend.fail_next(Operation::Execute, 1);
        let err = c.submit_code(1, "answer", "javascript").await.unwrap_err();
        assert_eq!(err.report().message, SUBMIT_FAILED);
        assert!(!c.with_session(|s| s.is_submitted(1)));
        c.edit_code(1, "answer v2").unwrap();
        assert!(c.submit_code(1, "answer v2", "javascript").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_failure_does_not_trap() {
        let (c, backend, _) = controller(&[1]);
        backend.fail_next(Operation::Complete, 2);
        c.submit_code(1, "answer", "javascript").await.unwrap();
        assert!(c.phase().is_terminal());

        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        assert_eq!(backend.complete_count(), 1);
    }

    #[tokio::test]
    async fn test_load_refused_after_disqualification() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_active_test(ActiveTestResponse {
            active_test: None,
            message: Some(
                "You have been disqualified from this test for proctoring violations.".to_string(),
            ),
        });
        let result = ExamSessionController::load(
            5,
            backend,
            Arc::new(ManualClock::new(t0())),
            &ProctorConfig::default(),
        )
        .await;
        match result {
            Err(ControllerError::Refused(message)) => assert!(message.contains("disqualified")),
            _ => panic!("expected refusal"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disqualify_retries_remote_report() {
        let (c, backend, _) = controller(&[1]);
        backend.fail_next(Operation::Disqualify, 1);
        assert!(c.disqualify("Too many tab switches"));
        assert!(!c.disqualify("again"));
        assert_eq!(c.status(), SessionStatus::Disqualified);

        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        assert_eq!(backend.disqualify_count(), 1);
        assert_eq!(*backend.disqualify_calls.lock().unwrap(), vec![(42, 5)]);
    }

    #[tokio::test]
    async fn test_lockout_after_completion_is_refused() {
        let (c, backend, clock) = controller(&[1]);
        c.edit_code(1, "x").unwrap();
        clock.advance(Duration::hours(2));
        c.on_deadline_tick().await;
        let phase = c.phase();

        assert!(!c.lock_out("Too many tab switches"));
        assert!(!c.disqualify("Too many tab switches"));
        tokio::task::yield_now().await;

        assert_eq!(c.status(), SessionStatus::Completed);
        assert_eq!(c.phase(), phase);
        assert_eq!(backend.disqualify_count(), 0);
    }

    #[tokio::test]
    async fn test_deadline_auto_submits_once() {
        let (c, backend, clock) = controller(&[1, 2]);
        c.edit_code(1, "x").unwrap();
        clock.advance(Duration::hours(2));

        assert!(matches!(
            c.on_deadline_tick().await,
            DeadlineTick::Expired {
                auto_submission: Some(_)
            }
        ));
        assert_eq!(c.on_deadline_tick().await, DeadlineTick::Inactive);
        assert_eq!(backend.execute_calls.lock().unwrap().len(), 1);
        assert_eq!(backend.complete_count(), 1);
        assert_eq!(
            c.phase(),
            SessionPhase::Completed {
                auto: true,
                message: TIME_UP_MESSAGE.to_string()
            }
        );
    }
}
