//! Webcam detection
//!
//! ```text
//!  CameraAdapter ──frame──▶ ObjectClassifier ──predictions──▶ DetectionPipeline
//!     (1 Hz sampler)          (async, model)                 (vocabulary + cooldown)
//!                                                                   │
//!                                                         ViolationEvent ▼
//!                                                              monitor task
//! ```

pub mod cooldown;
pub mod pipeline;
pub mod sampler;
pub mod scripted;
pub mod vocabulary;

pub use cooldown::{CooldownEntry, CooldownTracker};
pub use pipeline::{DetectionOutcome, DetectionPipeline};
pub use sampler::{DetectionSampler, DetectorStatus};
pub use scripted::{ScriptedClassifier, ScriptedModelLoader};
pub use vocabulary::ProhibitedVocabulary;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::sensors::Frame;

/// One classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

impl Prediction {
    pub fn new(label: &str, confidence: f32) -> Self {
        Self {
            label: label.to_string(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ClassifierError {
    #[error("model failed to load: {0}")]
    LoadFailed(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

#[async_trait]
pub trait ObjectClassifier: Send + Sync {
    /// Up to `max_results` predictions with confidence at least `min_confidence`
    async fn classify(
        &self,
        frame: &Frame,
        max_results: usize,
        min_confidence: f32,
    ) -> Result<Vec<Prediction>, ClassifierError>;
}

/// One-time model load, run in the background at session start
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn ObjectClassifier>, ClassifierError>;
}
