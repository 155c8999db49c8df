//! Background detection loop
//!
//! Loads the model once, then samples the camera on a fixed interval. Ticks
//! never overlap: an inference that outlives one interval is abandoned and
//! missed ticks are skipped rather than queued. Accepted violations go to the
//! monitor task over its input channel.

use proctor_core::Subject;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use super::pipeline::{DetectionPipeline, SCANNING};
use super::ModelLoader;
use crate::clock::Clock;
use crate::config::DetectionConfig;
use crate::runtime::MonitorInput;
use crate::sensors::CameraAdapter;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorStatus {
    Loading,
    /// Model loaded; carries the latest status line
    Active(String),
    /// Load failed; monitoring continues without detection
    ModelUnavailable,
    Stopped,
}

pub type SubjectSource = Arc<dyn Fn() -> Subject + Send + Sync>;

pub struct DetectionSampler {
    camera: Arc<CameraAdapter>,
    loader: Arc<dyn ModelLoader>,
    pipeline: DetectionPipeline,
    interval: Duration,
    max_predictions: usize,
    min_confidence: f32,
    clock: Arc<dyn Clock>,
    subject: SubjectSource,
    input: mpsc::Sender<MonitorInput>,
    status: watch::Sender<DetectorStatus>,
}

impl DetectionSampler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &DetectionConfig,
        camera: Arc<CameraAdapter>,
        loader: Arc<dyn ModelLoader>,
        clock: Arc<dyn Clock>,
        subject: SubjectSource,
        input: mpsc::Sender<MonitorInput>,
        status: watch::Sender<DetectorStatus>,
    ) -> Self {
        Self {
            camera,
            loader,
            pipeline: DetectionPipeline::new(config),
            interval: Duration::from_millis(config.sample_interval_ms),
            max_predictions: config.max_predictions,
            min_confidence: config.min_confidence,
            clock,
            subject,
            input,
            status,
        }
    }

    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        self.status.send_replace(DetectorStatus::Loading);

        let classifier = tokio::select! {
            loaded = self.loader.load() => match loaded {
                Ok(classifier) => classifier,
                Err(e) => {
                    tracing::warn!("object detection disabled: {}", e);
                    self.status.send_replace(DetectorStatus::ModelUnavailable);
                    return;
                }
            },
            _ = shutdown.wait() => {
                self.status.send_replace(DetectorStatus::Stopped);
                return;
            }
        };
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "detection model ready");
        self.status
            .send_replace(DetectorStatus::Active(SCANNING.to_string()));

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        'sampling: loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => break,
            }
            if self.camera.is_closed() {
                break;
            }
            let Some(frame) = self.camera.grab_frame() else {
                continue;
            };

            let inference = tokio::time::timeout(
                self.interval,
                classifier.classify(&frame, self.max_predictions, self.min_confidence),
            );
            let result = tokio::select! {
                result = inference => result,
                _ = shutdown.wait() => break,
            };
            let predictions = match result {
                Ok(Ok(predictions)) => predictions,
                Ok(Err(e)) => {
                    tracing::warn!(frame = frame.seq, "inference failed: {}", e);
                    continue;
                }
                Err(_) => {
                    tracing::debug!(frame = frame.seq, "inference abandoned after one interval");
                    continue;
                }
            };
            if shutdown.is_triggered() {
                break;
            }

            let subject = (self.subject)();
            let outcome = self
                .pipeline
                .evaluate(&predictions, &subject, self.clock.now());
            self.status
                .send_replace(DetectorStatus::Active(outcome.status_line));

            for event in outcome.events {
                tracing::info!(category = %event.category, "{}", event.detail);
                if self.input.send(MonitorInput::Violation(event)).await.is_err() {
                    break 'sampling;
                }
            }
        }

        self.status.send_replace(DetectorStatus::Stopped);
        tracing::debug!("detection sampler stopped");
    }
}
