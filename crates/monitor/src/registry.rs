//! One active exam session per candidate
//!
//! A `SessionLease` is held for as long as the proctor runtime runs; dropping
//! it frees the slot so a resumed session can start again.

use proctor_core::{ErrorCode, ErrorReport, TestId, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("candidate {user_id} already has test {test_id} in progress")]
    AlreadyActive { user_id: UserId, test_id: TestId },
}

impl RegistryError {
    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(ErrorCode::SessionAlreadyActive, self.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashMap<UserId, TestId>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, user_id: UserId, test_id: TestId) -> Result<SessionLease, RegistryError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(&existing) = active.get(&user_id) {
            return Err(RegistryError::AlreadyActive {
                user_id,
                test_id: existing,
            });
        }
        active.insert(user_id, test_id);
        Ok(SessionLease {
            registry: self.clone(),
            user_id,
            test_id,
        })
    }

    pub fn active_test(&self, user_id: UserId) -> Option<TestId> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .copied()
    }

    fn release(&self, user_id: UserId, test_id: TestId) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.get(&user_id) == Some(&test_id) {
            active.remove(&user_id);
        }
    }
}

#[derive(Debug)]
pub struct SessionLease {
    registry: SessionRegistry,
    user_id: UserId,
    test_id: TestId,
}

impl SessionLease {
    pub fn test_id(&self) -> TestId {
        self.test_id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.registry.release(self.user_id, self.test_id);
    }
}
