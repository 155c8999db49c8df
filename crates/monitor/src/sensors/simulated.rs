//! Simulated browser devices for headless hosts, scenario replays and tests

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::camera::{CameraDevice, CameraError, Frame, VideoConstraints, VideoStream};
use super::fullscreen::{FullscreenControl, FullscreenError};

/// Stream producing blank frames with an increasing sequence number
pub struct SimulatedStream {
    width: u32,
    height: u32,
    seq: AtomicU64,
    stopped: AtomicBool,
}

impl SimulatedStream {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            seq: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl VideoStream for SimulatedStream {
    fn is_ready(&self) -> bool {
        !self.is_stopped()
    }

    fn current_frame(&self) -> Option<Frame> {
        if self.is_stopped() {
            return None;
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        Some(Frame {
            seq,
            width: self.width,
            height: self.height,
            captured_at: Utc::now(),
            pixels: Arc::from(Vec::<u8>::new()),
        })
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        !self.is_stopped()
    }
}

/// Camera that refuses the first `deny` opens, then grants
pub struct SimulatedCamera {
    deny_remaining: AtomicU32,
    open_calls: AtomicU32,
    last_stream: Mutex<Option<Arc<SimulatedStream>>>,
}

impl SimulatedCamera {
    pub fn granting() -> Self {
        Self::denying(0)
    }

    pub fn denying(times: u32) -> Self {
        Self {
            deny_remaining: AtomicU32::new(times),
            open_calls: AtomicU32::new(0),
            last_stream: Mutex::new(None),
        }
    }

    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn last_stream(&self) -> Option<Arc<SimulatedStream>> {
        self.last_stream.lock().ok().and_then(|s| s.clone())
    }
}

#[async_trait]
impl CameraDevice for SimulatedCamera {
    async fn open(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Arc<dyn VideoStream>, CameraError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let denied = self
            .deny_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if denied {
            return Err(CameraError::PermissionDenied);
        }
        let stream = Arc::new(SimulatedStream::new(
            constraints.ideal_width,
            constraints.ideal_height,
        ));
        if let Ok(mut slot) = self.last_stream.lock() {
            *slot = Some(stream.clone());
        }
        Ok(stream as Arc<dyn VideoStream>)
    }
}

/// Display whose fullscreen state is toggled in-process
pub struct HeadlessDisplay {
    fullscreen: AtomicBool,
    gesture_required: bool,
    exit_calls: AtomicU32,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self {
            fullscreen: AtomicBool::new(false),
            gesture_required: false,
            exit_calls: AtomicU32::new(0),
        }
    }

    /// Every request fails, as a browser does without a user gesture
    pub fn requiring_gesture() -> Self {
        Self {
            gesture_required: true,
            ..Self::new()
        }
    }

    pub fn set_fullscreen(&self, on: bool) {
        self.fullscreen.store(on, Ordering::SeqCst);
    }

    pub fn exit_calls(&self) -> u32 {
        self.exit_calls.load(Ordering::SeqCst)
    }
}

impl Default for HeadlessDisplay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FullscreenControl for HeadlessDisplay {
    fn is_fullscreen(&self) -> bool {
        self.fullscreen.load(Ordering::SeqCst)
    }

    async fn request(&self) -> Result<(), FullscreenError> {
        if self.gesture_required {
            return Err(FullscreenError::GestureRequired);
        }
        self.fullscreen.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn exit(&self) -> Result<(), FullscreenError> {
        self.exit_calls.fetch_add(1, Ordering::SeqCst);
        self.fullscreen.store(false, Ordering::SeqCst);
        Ok(())
    }
}
