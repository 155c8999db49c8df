//! Exam session state
//!
//! Per problem: `UNSUBMITTED -> SUBMITTED (locked)`.
//! Per session: `ACTIVE -> COMPLETED | DISQUALIFIED`, both terminal.
//!
//! `ExamSession` is plain data plus transitions; it never awaits. Remote
//! persistence happens between `begin_submit` and `finish_submit`, driven by
//! the controller.

use chrono::{DateTime, Duration, Utc};
use proctor_core::{ActiveTest, ErrorCode, ErrorReport, Problem, ProblemId, TestId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

pub const TIME_UP_MESSAGE: &str = "Time is up! Your test has been automatically submitted.";
pub const COMPLETED_MESSAGE: &str =
    "All problems submitted! Test completed. Redirecting to results...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Completed,
    Disqualified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Next,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeAction {
    Run,
    Submit,
}

impl CodeAction {
    fn gerund(&self) -> &'static str {
        match self {
            CodeAction::Run => "running",
            CodeAction::Submit => "submitting",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is no longer active ({0:?})")]
    NotActive(SessionStatus),

    #[error("problem {0} is not part of this test")]
    UnknownProblem(ProblemId),

    #[error("problem {0} has already been submitted")]
    Locked(ProblemId),

    #[error("problem {0} is being submitted")]
    InFlight(ProblemId),

    #[error("Please write some code before {}", .action.gerund())]
    EmptyCode {
        problem_id: ProblemId,
        action: CodeAction,
    },

    #[error("test {0} has no problems")]
    NoProblems(TestId),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::NotActive(_) | SessionError::NoProblems(_) => ErrorCode::SessionClosed,
            SessionError::UnknownProblem(_) => ErrorCode::UnknownProblem,
            SessionError::Locked(_) => ErrorCode::ProblemLocked,
            SessionError::InFlight(_) => ErrorCode::SubmissionInFlight,
            SessionError::EmptyCode { .. } => ErrorCode::EmptyCode,
        }
    }

    pub fn report(&self) -> ErrorReport {
        let report = ErrorReport::new(self.code(), self.to_string());
        match self {
            SessionError::UnknownProblem(id)
            | SessionError::Locked(id)
            | SessionError::InFlight(id)
            | SessionError::EmptyCode { problem_id: id, .. } => report.for_problem(*id),
            _ => report,
        }
    }
}

/// Captured submission awaiting remote persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTicket {
    pub problem_id: ProblemId,
    pub language: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Locked; moved on to the next unsubmitted problem
    Advanced { index: usize, problem_id: ProblemId },
    /// Locked; that was the last unsubmitted problem
    Completed,
    /// Locked, but the session had already ended meanwhile
    Recorded,
    /// Not persisted; the problem stays editable
    Failed,
    /// Not persisted, but the deadline already locked this code; persistence
    /// continues in the background
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadlineTick {
    Remaining(Duration),
    /// Fired exactly once; carries the auto-submission to persist, if any
    Expired { auto_submission: Option<SubmitTicket> },
    Inactive,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub test_id: TestId,
    pub status: SessionStatus,
    pub current_index: usize,
    pub current_problem_id: ProblemId,
    pub submitted: Vec<ProblemId>,
    pub language: String,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExamSession {
    test_id: TestId,
    title: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    problems: Vec<Problem>,
    current_index: usize,
    language: String,
    codes: HashMap<ProblemId, String>,
    submitted: BTreeMap<ProblemId, String>,
    in_flight: HashSet<ProblemId>,
    status: SessionStatus,
    deadline_fired: bool,
    terminal_reason: Option<String>,
}

impl ExamSession {
    pub fn from_active_test(test: ActiveTest, language: &str) -> Result<Self, SessionError> {
        if test.problems.is_empty() {
            return Err(SessionError::NoProblems(test.id));
        }
        Ok(Self {
            test_id: test.id,
            title: test.title,
            start_time: test.start_time,
            end_time: test.end_time,
            problems: test.problems,
            current_index: 0,
            language: language.to_string(),
            codes: HashMap::new(),
            submitted: BTreeMap::new(),
            in_flight: HashSet::new(),
            status: SessionStatus::Active,
            deadline_fired: false,
            terminal_reason: None,
        })
    }

    pub fn test_id(&self) -> TestId {
        self.test_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn terminal_reason(&self) -> Option<&str> {
        self.terminal_reason.as_deref()
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_problem(&self) -> &Problem {
        &self.problems[self.current_index]
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn set_language(&mut self, language: &str) {
        self.language = language.to_string();
    }

    pub fn is_submitted(&self, problem_id: ProblemId) -> bool {
        self.submitted.contains_key(&problem_id)
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.len()
    }

    fn index_of(&self, problem_id: ProblemId) -> Result<usize, SessionError> {
        self.problems
            .iter()
            .position(|p| p.id == problem_id)
            .ok_or(SessionError::UnknownProblem(problem_id))
    }

    fn require_active(&self) -> Result<(), SessionError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(SessionError::NotActive(self.status))
        }
    }

    /// What the editor shows: submitted code, else the buffer, else the
    /// starter code for the current language
    pub fn code_for(&self, problem_id: ProblemId) -> Result<String, SessionError> {
        if let Some(code) = self.submitted.get(&problem_id) {
            return Ok(code.clone());
        }
        if let Some(code) = self.codes.get(&problem_id) {
            return Ok(code.clone());
        }
        let index = self.index_of(problem_id)?;
        Ok(self.problems[index].starter_code(&self.language).to_string())
    }

    pub fn current_code(&self) -> String {
        self.code_for(self.current_problem().id).unwrap_or_default()
    }

    pub fn edit(&mut self, problem_id: ProblemId, text: &str) -> Result<(), SessionError> {
        self.require_active()?;
        self.index_of(problem_id)?;
        if self.is_submitted(problem_id) {
            return Err(SessionError::Locked(problem_id));
        }
        if self.in_flight.contains(&problem_id) {
            return Err(SessionError::InFlight(problem_id));
        }
        self.codes.insert(problem_id, text.to_string());
        Ok(())
    }

    /// Move within bounds; a no-op at either end
    pub fn navigate(&mut self, direction: Direction) -> Result<usize, SessionError> {
        self.require_active()?;
        self.current_index = match direction {
            Direction::Next => (self.current_index + 1).min(self.problems.len() - 1),
            Direction::Previous => self.current_index.saturating_sub(1),
        };
        Ok(self.current_index)
    }

    /// Checks shared by run and submit
    pub fn check_code(
        &self,
        problem_id: ProblemId,
        code: &str,
        action: CodeAction,
    ) -> Result<(), SessionError> {
        self.require_active()?;
        self.index_of(problem_id)?;
        if code.trim().is_empty() {
            return Err(SessionError::EmptyCode { problem_id, action });
        }
        Ok(())
    }

    pub fn begin_submit(
        &mut self,
        problem_id: ProblemId,
        code: &str,
        language: &str,
    ) -> Result<SubmitTicket, SessionError> {
        self.require_active()?;
        self.index_of(problem_id)?;
        if self.is_submitted(problem_id) {
            return Err(SessionError::Locked(problem_id));
        }
        if self.in_flight.contains(&problem_id) {
            return Err(SessionError::InFlight(problem_id));
        }
        self.check_code(problem_id, code, CodeAction::Submit)?;

        self.codes.insert(problem_id, code.to_string());
        self.in_flight.insert(problem_id);
        Ok(SubmitTicket {
            problem_id,
            language: language.to_string(),
            code: code.to_string(),
        })
    }

    pub fn finish_submit(&mut self, ticket: &SubmitTicket, persisted: bool) -> SubmitOutcome {
        self.in_flight.remove(&ticket.problem_id);
        if !persisted {
            if !self.is_active() && self.is_submitted(ticket.problem_id) {
                return SubmitOutcome::Deferred;
            }
            return SubmitOutcome::Failed;
        }
        self.submitted
            .insert(ticket.problem_id, ticket.code.clone());
        if !self.is_active() {
            return SubmitOutcome::Recorded;
        }

        let from = self.index_of(ticket.problem_id).unwrap_or(self.current_index);
        match self.next_unsubmitted(from) {
            Some(index) => {
                self.current_index = index;
                SubmitOutcome::Advanced {
                    index,
                    problem_id: self.problems[index].id,
                }
            }
            None => {
                self.status = SessionStatus::Completed;
                self.terminal_reason = Some(COMPLETED_MESSAGE.to_string());
                SubmitOutcome::Completed
            }
        }
    }

    /// Search forward from `from`, then wrap to the start
    fn next_unsubmitted(&self, from: usize) -> Option<usize> {
        let n = self.problems.len();
        (1..=n)
            .map(|offset| (from + offset) % n)
            .find(|&i| !self.is_submitted(self.problems[i].id))
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.end_time - now).max(Duration::zero())
    }

    pub fn deadline_tick(&mut self, now: DateTime<Utc>) -> DeadlineTick {
        if !self.is_active() || self.deadline_fired {
            return DeadlineTick::Inactive;
        }
        let remaining = self.end_time - now;
        if remaining > Duration::zero() {
            return DeadlineTick::Remaining(remaining);
        }

        self.deadline_fired = true;
        // Submits still in flight are locked with the code they carry
        for problem_id in &self.in_flight {
            if let Some(code) = self.codes.get(problem_id) {
                self.submitted.entry(*problem_id).or_insert_with(|| code.clone());
            }
        }
        let current = self.current_problem().id;
        let auto_submission = if self.is_submitted(current) || self.in_flight.contains(&current) {
            None
        } else {
            let code = self.current_code();
            self.submitted.insert(current, code.clone());
            Some(SubmitTicket {
                problem_id: current,
                language: self.language.clone(),
                code,
            })
        };
        self.status = SessionStatus::Completed;
        self.terminal_reason = Some(TIME_UP_MESSAGE.to_string());
        DeadlineTick::Expired { auto_submission }
    }

    /// Returns false if the session was already terminal
    pub fn disqualify(&mut self, reason: &str) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = SessionStatus::Disqualified;
        self.terminal_reason = Some(reason.to_string());
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            test_id: self.test_id,
            status: self.status,
            current_index: self.current_index,
            current_problem_id: self.current_problem().id,
            submitted: self.submitted.keys().copied().collect(),
            language: self.language.clone(),
            end_time: self.end_time,
            terminal_reason: self.terminal_reason.clone(),
        }
    }
}
