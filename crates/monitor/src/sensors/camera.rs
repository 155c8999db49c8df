//! Camera availability and frame access
//!
//! The adapter is the only owner of the media stream. Acquisition happens once
//! at session start and again only when the candidate asks for a retry; a
//! failure emits one CAMERA_BLOCKED per attempt. `release` stops every track
//! and closes the adapter so a late acquisition cannot revive the stream.
//! Dropping the adapter releases as well.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proctor_core::{event_keys, Category, Subject, ViolationEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("no camera device found")]
    NotFound,

    #[error("camera busy: {0}")]
    Busy(String),

    #[error("camera error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy)]
pub struct VideoConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub user_facing: bool,
    pub audio: bool,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 640,
            ideal_height: 480,
            user_facing: true,
            audio: false,
        }
    }
}

/// One sampled video frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    pub pixels: Arc<[u8]>,
}

pub trait VideoStream: Send + Sync {
    /// Enough data buffered to sample a frame
    fn is_ready(&self) -> bool;

    fn current_frame(&self) -> Option<Frame>;

    /// Stop every track of the stream
    fn stop(&self);

    fn is_live(&self) -> bool;
}

#[async_trait]
pub trait CameraDevice: Send + Sync {
    async fn open(&self, constraints: &VideoConstraints)
        -> Result<Arc<dyn VideoStream>, CameraError>;
}

pub struct CameraAdapter {
    device: Arc<dyn CameraDevice>,
    constraints: VideoConstraints,
    stream: Mutex<Option<Arc<dyn VideoStream>>>,
    last_error: Mutex<Option<CameraError>>,
    closed: AtomicBool,
}

impl CameraAdapter {
    pub fn new(device: Arc<dyn CameraDevice>) -> Self {
        Self {
            device,
            constraints: VideoConstraints::default(),
            stream: Mutex::new(None),
            last_error: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Try to obtain the stream. Returns the CAMERA_BLOCKED violation when the
    /// device refuses; `None` on success or when the adapter is already
    /// closed.
    pub async fn acquire(&self, subject: Subject, at: DateTime<Utc>) -> Option<ViolationEvent> {
        if self.is_closed() || self.is_active() {
            return None;
        }

        match self.device.open(&self.constraints).await {
            Ok(stream) => {
                // `release` sets `closed` before taking this lock, so checking
                // under the lock cannot miss a concurrent teardown
                let mut slot = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
                if self.is_closed() {
                    drop(slot);
                    // Torn down while the permission prompt was open
                    stream.stop();
                    return None;
                }
                if let Some(previous) = slot.replace(stream) {
                    previous.stop();
                }
                drop(slot);
                self.set_last_error(None);
                tracing::info!("camera stream acquired");
                None
            }
            Err(e) => {
                tracing::warn!("camera access denied: {}", e);
                let detail = format!("Camera access was denied or blocked ({})", e);
                self.set_last_error(Some(e.clone()));
                Some(
                    ViolationEvent::new(Category::CameraBlocked, subject, detail, at)
                        .with_evidence(event_keys::CAMERA_ERROR, serde_json::json!(e.to_string())),
                )
            }
        }
    }

    /// Current frame, if the stream is live and ready
    pub fn grab_frame(&self) -> Option<Frame> {
        let slot = self.stream.lock().ok()?;
        let stream = slot.as_ref()?;
        if !stream.is_live() || !stream.is_ready() {
            return None;
        }
        stream.current_frame()
    }

    pub fn is_active(&self) -> bool {
        self.stream
            .lock()
            .map(|s| s.as_ref().is_some_and(|st| st.is_live()))
            .unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<CameraError> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// Stop all tracks and close the adapter. Idempotent.
    pub fn release(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let stream = match self.stream.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(stream) = stream {
            stream.stop();
            tracing::info!("camera stream released");
        }
    }

    fn set_last_error(&self, error: Option<CameraError>) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = error;
        }
    }
}

impl Drop for CameraAdapter {
    fn drop(&mut self) {
        self.release();
    }
}
