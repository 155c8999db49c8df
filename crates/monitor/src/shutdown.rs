//! One-shot shutdown signal shared by every proctor loop.
//! Triggering is idempotent; a dropped trigger counts as triggered.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Returns true for the call that actually flipped the signal
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub async fn wait(&mut self) {
        // Err means the trigger is gone
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}
