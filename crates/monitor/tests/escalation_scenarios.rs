//! Detection + escalation without the async runtime:
//! cooldown, merged counters and monotonic counts.

use chrono::{Duration, TimeZone, Utc};
use proctor_core::{Category, Subject, ViolationEvent};
use std::sync::Arc;

use proctor_monitor::config::{DetectionConfig, PolicyConfig};
use proctor_monitor::detection::{DetectionPipeline, Prediction};
use proctor_monitor::policy::{Decision, EscalationMachine};
use proctor_monitor::violation_log::{MemorySink, ViolationLog};

fn subject() -> Subject {
    Subject::new(7, 42).on_problem(Some(1))
}

struct Engine {
    pipeline: DetectionPipeline,
    machine: EscalationMachine,
    log: ViolationLog,
    sink: Arc<MemorySink>,
}

impl Engine {
    fn new() -> Self {
        let sink = Arc::new(MemorySink::new());
        let mut log = ViolationLog::new();
        log.add_sink(sink.clone());
        Self {
            pipeline: DetectionPipeline::new(&DetectionConfig::default()),
            machine: EscalationMachine::new(PolicyConfig::default()),
            log,
            sink,
        }
    }

    fn feed(&mut self, event: ViolationEvent) -> Decision {
        let decision = self.machine.apply(&event);
        if decision.is_accepted() {
            self.log.append(event);
        }
        decision
    }

    fn frame(&mut self, predictions: &[Prediction], at_s: i64) -> Vec<Decision> {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + Duration::seconds(at_s);
        let outcome = self.pipeline.evaluate(predictions, &subject(), at);
        outcome
            .events
            .into_iter()
            .map(|event| self.feed(event))
            .collect()
    }
}

#[test]
fn test_two_detections_one_second_apart_count_once() {
    let mut engine = Engine::new();
    let phone = [Prediction::new("cell phone", 0.88)];

    assert_eq!(engine.frame(&phone, 0).len(), 1);
    assert!(engine.frame(&phone, 1).is_empty());

    assert_eq!(engine.log.count_of(Category::ObjectDetected), 1);
    assert_eq!(engine.machine.count(Category::ObjectDetected), 1);
    assert!(!engine.machine.state().is_terminal());
}

#[test]
fn test_detection_after_window_is_second_strike() {
    let mut engine = Engine::new();
    let phone = [Prediction::new("phone", 0.9)];

    engine.frame(&phone, 0);
    engine.frame(&phone, 2);
    let decisions = engine.frame(&phone, 6);

    assert!(matches!(decisions.as_slice(), [Decision::Disqualify { count: 2, .. }]));
    assert_eq!(engine.sink.get_events().len(), 2);
}

#[test]
fn test_tab_switch_and_persons_stay_active() {
    let mut engine = Engine::new();
    let at = Utc::now();
    engine.feed(ViolationEvent::new(
        Category::TabSwitch,
        subject(),
        "Tab switch detected (count: 1)",
        at,
    ));
    let decisions = engine.frame(
        &[Prediction::new("person", 0.9), Prediction::new("person", 0.6)],
        0,
    );

    assert!(matches!(decisions.as_slice(), [Decision::Warn { .. }]));
    assert!(!engine.machine.state().is_terminal());
    assert_eq!(engine.machine.count(Category::TabSwitch), 1);
    assert_eq!(engine.machine.count(Category::MultiplePersons), 1);
}

#[test]
fn test_disqualification_is_idempotent() {
    let mut engine = Engine::new();
    let tab = || ViolationEvent::new(Category::TabSwitch, subject(), "tab", Utc::now());

    engine.feed(tab());
    assert!(matches!(engine.feed(tab()), Decision::Disqualify { .. }));
    for _ in 0..3 {
        assert_eq!(engine.feed(tab()), Decision::Ignored);
    }
    assert_eq!(engine.log.count_of(Category::TabSwitch), 2);
}

#[test]
fn test_counters_never_decrease() {
    let mut engine = Engine::new();
    let sequence = [
        Category::ExitFullscreen,
        Category::CameraBlocked,
        Category::TabSwitch,
        Category::ExitFullscreen,
        Category::PasteAttempt,
        Category::ObjectDetected,
        Category::ExitFullscreen,
        Category::TabSwitch,
        Category::MultiplePersons,
    ];

    let mut previous = engine.machine.category_counts().clone();
    for category in sequence {
        engine.feed(ViolationEvent::new(category, subject(), "observed", Utc::now()));
        let current = engine.machine.category_counts().clone();
        for (category, before) in &previous {
            assert!(current.get(category).copied().unwrap_or(0) >= *before);
        }
        previous = current;
    }
    assert!(engine.machine.state().is_terminal());
}
