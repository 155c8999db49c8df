//! In-process exam backend for scenario replays and tests.
//! Records every call and can be told to fail or stall specific operations.

use async_trait::async_trait;
use proctor_core::{
    ActiveTestResponse, ExecutionRequest, ExecutionResult, TestId, UserId, Verdict,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::backend::{BackendError, BehaviorRecord, ExamBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    LogBehavior,
    Disqualify,
    Execute,
    Complete,
    ActiveTest,
}

#[derive(Default)]
struct Failures {
    log_behavior: AtomicU32,
    disqualify: AtomicU32,
    execute: AtomicU32,
    complete: AtomicU32,
    active_test: AtomicU32,
}

impl Failures {
    fn counter(&self, op: Operation) -> &AtomicU32 {
        match op {
            Operation::LogBehavior => &self.log_behavior,
            Operation::Disqualify => &self.disqualify,
            Operation::Execute => &self.execute,
            Operation::Complete => &self.complete,
            Operation::ActiveTest => &self.active_test,
        }
    }

    /// Consume one scheduled failure for `op`, if any
    fn take(&self, op: Operation) -> bool {
        self.counter(op)
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub struct FakeBackend {
    pub behavior_logs: Mutex<Vec<BehaviorRecord>>,
    pub disqualify_calls: Mutex<Vec<(TestId, UserId)>>,
    pub execute_calls: Mutex<Vec<ExecutionRequest>>,
    pub complete_calls: Mutex<Vec<TestId>>,
    pub active_test: Mutex<ActiveTestResponse>,
    pub execute_result: Mutex<ExecutionResult>,
    pub execute_delay: Mutex<Option<Duration>>,
    failures: Failures,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            behavior_logs: Mutex::new(Vec::new()),
            disqualify_calls: Mutex::new(Vec::new()),
            execute_calls: Mutex::new(Vec::new()),
            complete_calls: Mutex::new(Vec::new()),
            active_test: Mutex::new(ActiveTestResponse::default()),
            execute_result: Mutex::new(ExecutionResult {
                verdict: Verdict::Passed,
                passed_cases: 1,
                total_cases: 1,
                output_log: String::new(),
                execution_time: 0.01,
                case_results: Vec::new(),
            }),
            execute_delay: Mutex::new(None),
            failures: Failures::default(),
        }
    }

    /// Make the next `times` calls of `op` fail with a transport error
    pub fn fail_next(&self, op: Operation, times: u32) {
        self.failures.counter(op).fetch_add(times, Ordering::SeqCst);
    }

    pub fn set_execute_delay(&self, delay: Duration) {
        *self.execute_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn set_active_test(&self, response: ActiveTestResponse) {
        *self.active_test.lock().unwrap_or_else(PoisonError::into_inner) = response;
    }

    pub fn logged_categories(&self) -> Vec<String> {
        self.behavior_logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.event_type.as_str().to_string())
            .collect()
    }

    pub fn disqualify_count(&self) -> usize {
        self.disqualify_calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn complete_count(&self) -> usize {
        self.complete_calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn fail(&self, op: Operation) -> Result<(), BackendError> {
        if self.failures.take(op) {
            return Err(BackendError::Transport(format!("{:?} unavailable", op)));
        }
        Ok(())
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExamBackend for FakeBackend {
    async fn log_behavior(&self, record: &BehaviorRecord) -> Result<(), BackendError> {
        self.fail(Operation::LogBehavior)?;
        self.behavior_logs.lock().unwrap_or_else(PoisonError::into_inner).push(record.clone());
        Ok(())
    }

    async fn disqualify(&self, test_id: TestId, user_id: UserId) -> Result<(), BackendError> {
        self.fail(Operation::Disqualify)?;
        self.disqualify_calls.lock().unwrap_or_else(PoisonError::into_inner).push((test_id, user_id));
        Ok(())
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, BackendError> {
        let delay = *self.execute_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.fail(Operation::Execute)?;
        self.execute_calls.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());
        Ok(self.execute_result.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn complete(&self, test_id: TestId) -> Result<(), BackendError> {
        self.fail(Operation::Complete)?;
        self.complete_calls.lock().unwrap_or_else(PoisonError::into_inner).push(test_id);
        Ok(())
    }

    async fn active_test(&self) -> Result<ActiveTestResponse, BackendError> {
        self.fail(Operation::ActiveTest)?;
        Ok(self.active_test.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}
