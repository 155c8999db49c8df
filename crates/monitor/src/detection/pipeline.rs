//! Per-tick detection evaluation
//!
//! Pure with respect to I/O: predictions in, candidate violations out. The
//! sampler feeds it once per tick; tests feed it directly.

use chrono::{DateTime, Utc};
use proctor_core::{event_keys, Category, Subject, ViolationEvent};
use serde_json::json;

use super::cooldown::CooldownTracker;
use super::vocabulary::ProhibitedVocabulary;
use super::Prediction;
use crate::config::DetectionConfig;

pub const SCANNING: &str = "Scanning...";

#[derive(Debug, Clone, Default)]
pub struct DetectionOutcome {
    /// Accepted violations, at most one per category
    pub events: Vec<ViolationEvent>,
    /// Top prediction as "label (NN%)", or "Scanning..."
    pub status_line: String,
    /// Candidates dropped by the cooldown
    pub suppressed: Vec<Category>,
}

pub struct DetectionPipeline {
    min_confidence: f32,
    max_predictions: usize,
    person_label: String,
    vocabulary: ProhibitedVocabulary,
    cooldown: CooldownTracker,
}

impl DetectionPipeline {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            max_predictions: config.max_predictions,
            person_label: config.person_label.to_lowercase(),
            vocabulary: ProhibitedVocabulary::new(&config.prohibited_labels),
            cooldown: CooldownTracker::new(config.cooldown_ms),
        }
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    pub fn evaluate(
        &mut self,
        predictions: &[Prediction],
        subject: &Subject,
        at: DateTime<Utc>,
    ) -> DetectionOutcome {
        let mut kept: Vec<&Prediction> = predictions
            .iter()
            .filter(|p| p.confidence >= self.min_confidence)
            .collect();
        kept.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        kept.truncate(self.max_predictions);

        let mut outcome = DetectionOutcome {
            status_line: status_line(&kept),
            ..Default::default()
        };
        let now_ms = at.timestamp_millis();

        let person_count = kept
            .iter()
            .filter(|p| p.label.to_lowercase() == self.person_label)
            .count();

        if person_count > 1 {
            if self.cooldown.try_accept(Category::MultiplePersons, now_ms) {
                let detail = format!("{} persons detected in frame", person_count);
                outcome.events.push(
                    ViolationEvent::new(Category::MultiplePersons, *subject, detail, at)
                        .with_evidence(event_keys::PERSON_COUNT, json!(person_count)),
                );
            } else {
                outcome.suppressed.push(Category::MultiplePersons);
            }
        }

        let prohibited: Vec<&Prediction> = kept
            .iter()
            .copied()
            .filter(|p| self.vocabulary.is_prohibited(&p.label))
            .collect();

        if !prohibited.is_empty() {
            if self.cooldown.try_accept(Category::ObjectDetected, now_ms) {
                let labels: Vec<&str> = prohibited.iter().map(|p| p.label.as_str()).collect();
                let top = prohibited
                    .iter()
                    .map(|p| p.confidence)
                    .fold(0.0_f32, f32::max);
                let detail = format!("Detected: {}", labels.join(", "));
                outcome.events.push(
                    ViolationEvent::new(Category::ObjectDetected, *subject, detail, at)
                        .with_evidence(event_keys::LABELS, json!(labels))
                        .with_evidence(event_keys::TOP_CONFIDENCE, json!(top)),
                );
            } else {
                outcome.suppressed.push(Category::ObjectDetected);
            }
        }

        if !outcome.suppressed.is_empty() {
            tracing::debug!(suppressed = ?outcome.suppressed, "detection inside cooldown");
        }
        outcome
    }
}

fn status_line(kept: &[&Prediction]) -> String {
    match kept.first() {
        Some(top) => format!("{} ({}%)", top.label, (top.confidence * 100.0).round() as u32),
        None => SCANNING.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn pipeline() -> DetectionPipeline {
        DetectionPipeline::new(&DetectionConfig::default())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn subject() -> Subject {
        Subject::new(5, 77).on_problem(Some(1))
    }

    #[test]
    fn test_phone_detected() {
        let mut p = pipeline();
        let out = p.evaluate(&[Prediction::new("cell phone", 0.81)], &subject(), t0());
        assert_eq!(out.events.len(), 1);
        let event = &out.events[0];
        assert_eq!(event.category, Category::ObjectDetected);
        assert_eq!(event.detail, "Detected: cell phone");
        assert_eq!(event.evidence[event_keys::LABELS], json!(["cell phone"]));
        assert_eq!(out.status_line, "cell phone (81%)");
    }

    #[test]
    fn test_low_confidence_ignored() {
        let mut p = pipeline();
        let out = p.evaluate(&[Prediction::new("laptop", 0.2)], &subject(), t0());
        assert!(out.events.is_empty());
        assert_eq!(out.status_line, SCANNING);
    }

    #[test]
    fn test_single_person_is_fine() {
        let mut p = pipeline();
        let out = p.evaluate(
            &[Prediction::new("person", 0.95), Prediction::new("cup", 0.6)],
            &subject(),
            t0(),
        );
        assert!(out.events.is_empty());
        assert_eq!(out.status_line, "person (95%)");
    }

    #[test]
    fn test_two_persons_and_book_emit_both_categories() {
        let mut p = pipeline();
        let out = p.evaluate(
            &[
                Prediction::new("person", 0.9),
                Prediction::new("Person", 0.7),
                Prediction::new("book", 0.5),
            ],
            &subject(),
            t0(),
        );
        let categories: Vec<Category> = out.events.iter().map(|e| e.category).collect();
        assert_eq!(
            categories,
            vec![Category::MultiplePersons, Category::ObjectDetected]
        );
        assert_eq!(out.events[0].detail, "2 persons detected in frame");
        assert_eq!(out.events[0].evidence[event_keys::PERSON_COUNT], json!(2));
    }

    #[test]
    fn test_sustained_object_counts_once_within_window() {
        let mut p = pipeline();
        let phone = [Prediction::new("phone", 0.9)];
        let first = p.evaluate(&phone, &subject(), t0());
        let second = p.evaluate(&phone, &subject(), t0() + Duration::seconds(1));
        assert_eq!(first.events.len(), 1);
        assert!(second.events.is_empty());
        assert_eq!(second.suppressed, vec![Category::ObjectDetected]);

        let later = p.evaluate(&phone, &subject(), t0() + Duration::seconds(6));
        assert_eq!(later.events.len(), 1);
    }

    #[test]
    fn test_prediction_cap() {
        let mut config = DetectionConfig::default();
        config.max_predictions = 1;
        let mut p = DetectionPipeline::new(&config);
        let out = p.evaluate(
            &[Prediction::new("chair", 0.9), Prediction::new("book", 0.5)],
            &subject(),
            t0(),
        );
        assert!(out.events.is_empty());
    }
}
