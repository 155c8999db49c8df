//! Scripted classifier used by scenario replays and tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ClassifierError, ModelLoader, ObjectClassifier, Prediction};
use crate::sensors::Frame;

/// Answers each call from a queue, then with a steady result
#[derive(Default)]
pub struct ScriptedClassifier {
    queue: Mutex<VecDeque<Vec<Prediction>>>,
    steady: Mutex<Vec<Prediction>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<u64>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, predictions: Vec<Prediction>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(predictions);
        }
    }

    /// Result returned once the queue is drained
    pub fn set_steady(&self, predictions: Vec<Prediction>) {
        if let Ok(mut steady) = self.steady.lock() {
            *steady = predictions;
        }
    }

    /// Simulate a slow model
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.delay.lock() {
            *slot = delay;
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.lock().map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl ObjectClassifier for ScriptedClassifier {
    async fn classify(
        &self,
        _frame: &Frame,
        _max_results: usize,
        _min_confidence: f32,
    ) -> Result<Vec<Prediction>, ClassifierError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        match queued {
            Some(predictions) => Ok(predictions),
            None => Ok(self.steady.lock().map(|s| s.clone()).unwrap_or_default()),
        }
    }
}

pub struct ScriptedModelLoader {
    classifier: Option<Arc<ScriptedClassifier>>,
    load_delay: Duration,
}

impl ScriptedModelLoader {
    pub fn ready(classifier: Arc<ScriptedClassifier>) -> Self {
        Self {
            classifier: Some(classifier),
            load_delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            classifier: None,
            load_delay: Duration::ZERO,
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }
}

#[async_trait]
impl ModelLoader for ScriptedModelLoader {
    async fn load(&self) -> Result<Arc<dyn ObjectClassifier>, ClassifierError> {
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        match &self.classifier {
            Some(classifier) => Ok(classifier.clone() as Arc<dyn ObjectClassifier>),
            None => Err(ClassifierError::LoadFailed(
                "model weights unavailable".to_string(),
            )),
        }
    }
}
