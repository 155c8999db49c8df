//! Candidate-facing notices
//!
//! Warnings are transient banners that dismiss themselves; terminal notices
//! (disqualified, time up, completed) cannot be dismissed and redirect to the
//! results view. The runtime publishes both on a broadcast channel.

use chrono::{DateTime, Utc};
use proctor_core::{event_keys, Category, TestId, ViolationEvent};
use serde::Serialize;
use std::collections::VecDeque;

pub const FULLSCREEN_REQUIRED_MESSAGE: &str =
    "To maintain test integrity, this exam must be conducted in enforced full-screen mode.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    Disqualified,
    TimeUp,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiNotice {
    Warning {
        message: String,
        category: Category,
        occurred_at: DateTime<Utc>,
        dismiss_after_ms: u64,
    },
    Terminal {
        terminal: TerminalKind,
        message: String,
        redirect: String,
    },
    /// Editor-level feedback, e.g. a blocked paste
    Editor { message: String },
    /// Covers the exam while not fullscreen; cleared with `required: false`
    FullscreenRequired { required: bool, message: String },
}

impl UiNotice {
    pub fn terminal(kind: TerminalKind, message: &str, test_id: TestId) -> Self {
        UiNotice::Terminal {
            terminal: kind,
            message: message.to_string(),
            redirect: results_path(test_id),
        }
    }

    pub fn fullscreen_lock(required: bool) -> Self {
        UiNotice::FullscreenRequired {
            required,
            message: FULLSCREEN_REQUIRED_MESSAGE.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UiNotice::Terminal { .. })
    }
}

pub fn results_path(test_id: TestId) -> String {
    format!("/test/{}/results", test_id)
}

/// Short banner text for an accepted violation
pub fn warning_message(event: &ViolationEvent) -> String {
    match event.category {
        Category::TabSwitch => match event.evidence.get(event_keys::TAB_SWITCH_COUNT) {
            Some(count) => format!("Tab switch #{}", count),
            None => "Tab switch".to_string(),
        },
        Category::ExitFullscreen => "Fullscreen exited".to_string(),
        Category::CameraBlocked => "Camera access blocked".to_string(),
        Category::MultiplePersons => match event.evidence.get(event_keys::PERSON_COUNT) {
            Some(count) => format!("Multiple persons detected ({})", count),
            None => "Multiple persons detected".to_string(),
        },
        Category::ObjectDetected => {
            let labels = event
                .evidence
                .get(event_keys::LABELS)
                .and_then(|v| v.as_array())
                .map(|labels| {
                    labels
                        .iter()
                        .filter_map(|l| l.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            format!("Prohibited: {}", labels)
        }
        Category::PasteAttempt => "Paste attempt blocked".to_string(),
        Category::KickedOut => event.detail.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedEntry {
    pub message: String,
    /// Local wall time, HH:MM:SS
    pub time: String,
}

/// Recent-warnings panel; keeps only the newest entries
#[derive(Debug, Clone)]
pub struct WarningFeed {
    capacity: usize,
    entries: VecDeque<FeedEntry>,
}

impl WarningFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, message: &str, at: DateTime<Utc>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(FeedEntry {
            message: message.to_string(),
            time: at.format("%H:%M:%S").to_string(),
        });
    }

    pub fn entries(&self) -> Vec<FeedEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proctor_core::Subject;
    use serde_json::json;

    #[test]
    fn test_feed_keeps_last_three() {
        let mut feed = WarningFeed::new(3);
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 14, 3, 9).unwrap();
        for i in 1..=5 {
            feed.push(&format!("warning {}", i), at);
        }
        let messages: Vec<String> = feed.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["warning 3", "warning 4", "warning 5"]);
        assert_eq!(feed.entries()[0].time, "14:03:09");
    }

    #[test]
    fn test_warning_messages() {
        let subject = Subject::new(1, 2);
        let tab = ViolationEvent::new(Category::TabSwitch, subject, "Tab switch detected (count: 1)", Utc::now())
            .with_evidence(event_keys::TAB_SWITCH_COUNT, json!(1));
        assert_eq!(warning_message(&tab), "Tab switch #1");

        let objects = ViolationEvent::new(Category::ObjectDetected, subject, "Detected: book, laptop", Utc::now())
            .with_evidence(event_keys::LABELS, json!(["book", "laptop"]));
        assert_eq!(warning_message(&objects), "Prohibited: book, laptop");
    }

    #[test]
    fn test_terminal_notice_redirects_to_results() {
        let notice = UiNotice::terminal(TerminalKind::TimeUp, "Time is up!", 42);
        assert!(notice.is_terminal());
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["kind"], "terminal");
        assert_eq!(json["terminal"], "time_up");
        assert_eq!(json["redirect"], "/test/42/results");
    }

    #[test]
    fn test_fullscreen_lock_is_not_terminal() {
        let notice = UiNotice::fullscreen_lock(true);
        assert!(!notice.is_terminal());
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["kind"], "fullscreen_required");
        assert_eq!(json["required"], true);
        assert_eq!(json["message"], FULLSCREEN_REQUIRED_MESSAGE);
    }
}
