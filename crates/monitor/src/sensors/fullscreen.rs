//! Fullscreen state
//!
//! Only leaving fullscreen is reported. Entering fullscreen needs a user
//! gesture, so the adapter never re-requests it; a failed request made on the
//! candidate's behalf is logged and otherwise ignored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proctor_core::{event_keys, Category, Subject, ViolationEvent};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FullscreenError {
    #[error("fullscreen request needs a user gesture")]
    GestureRequired,

    #[error("fullscreen not supported: {0}")]
    Unsupported(String),
}

/// Host display control
#[async_trait]
pub trait FullscreenControl: Send + Sync {
    fn is_fullscreen(&self) -> bool;

    async fn request(&self) -> Result<(), FullscreenError>;

    async fn exit(&self) -> Result<(), FullscreenError>;
}

/// Ask the host to enter fullscreen from a user gesture. Failure is not a
/// violation.
pub async fn request_fullscreen(control: &dyn FullscreenControl) -> bool {
    match control.request().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("fullscreen request failed: {}", e);
            false
        }
    }
}

/// Release the fullscreen lock if the host still holds it
pub async fn release_fullscreen(control: &dyn FullscreenControl) {
    if !control.is_fullscreen() {
        return;
    }
    if let Err(e) = control.exit().await {
        tracing::warn!("failed to exit fullscreen: {}", e);
    }
}

#[derive(Debug, Default)]
pub struct FullscreenAdapter {
    is_fullscreen: bool,
}

impl FullscreenAdapter {
    pub fn new(initially_fullscreen: bool) -> Self {
        Self {
            is_fullscreen: initially_fullscreen,
        }
    }

    pub fn is_fullscreen(&self) -> bool {
        self.is_fullscreen
    }

    pub fn observe(
        &mut self,
        is_fullscreen: bool,
        subject: Subject,
        at: DateTime<Utc>,
    ) -> Option<ViolationEvent> {
        let was = std::mem::replace(&mut self.is_fullscreen, is_fullscreen);
        if !(was && !is_fullscreen) {
            return None;
        }
        Some(
            ViolationEvent::new(
                Category::ExitFullscreen,
                subject,
                "Student exited fullscreen mode",
                at,
            )
            .with_evidence(event_keys::WAS_FULLSCREEN, serde_json::json!(true)),
        )
    }
}
