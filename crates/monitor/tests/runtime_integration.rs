//! Full runtime: adapters, sampler, monitor task, deadline loop, teardown.
//! Time is paused; the manual clock drives cooldowns and deadlines.

mod common;

use chrono::Duration;
use common::{settle, Harness, TEST_ID, USER_ID};
use proctor_core::{Category, ErrorCode, Subject, ViolationEvent};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use proctor_monitor::detection::Prediction;
use proctor_monitor::editor_guard::{EditorCommand, EditorInput, GuardVerdict};
use proctor_monitor::registry::RegistryError;
use proctor_monitor::sensors::{SimulatedCamera, Visibility};
use proctor_monitor::notice::FULLSCREEN_REQUIRED_MESSAGE;
use proctor_monitor::{
    AuditSink, Clock, EscalationState, ExamSessionController, SessionPhase, SessionStatus,
    StartError, TeardownReason, TerminalKind, UiNotice,
};

fn drain(rx: &mut broadcast::Receiver<UiNotice>) -> Vec<UiNotice> {
    let mut notices = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        notices.push(notice);
    }
    notices
}

fn terminal_kinds(notices: &[UiNotice]) -> Vec<TerminalKind> {
    notices
        .iter()
        .filter_map(|n| match n {
            UiNotice::Terminal { terminal, .. } => Some(*terminal),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_second_tab_switch_disqualifies_and_tears_down() {
    let h = Harness::new(&[1, 2], Duration::hours(1));
    let handle = h.start();
    let mut notices = handle.subscribe();
    settle(10).await;
    assert!(handle.camera_active());

    handle.visibility_changed(Visibility::Hidden).await;
    handle.visibility_changed(Visibility::Visible).await;
    handle.visibility_changed(Visibility::Hidden).await;
    // Arrives after the lockout and must change nothing
    handle.visibility_changed(Visibility::Visible).await;
    handle.visibility_changed(Visibility::Hidden).await;

    let summary = handle.join().await.unwrap();
    settle(1_000).await;

    assert_eq!(
        h.logged(),
        vec![Category::TabSwitch, Category::TabSwitch, Category::KickedOut]
    );
    assert!(matches!(summary.state, EscalationState::Disqualified { .. }));
    assert_eq!(summary.teardown, Some(TeardownReason::Disqualified));
    assert_eq!(h.controller.status(), SessionStatus::Disqualified);
    assert_eq!(h.backend.disqualify_count(), 1);
    assert_eq!(*h.backend.disqualify_calls.lock().unwrap(), vec![(TEST_ID, USER_ID)]);

    // Sensors released
    assert!(h.camera.last_stream().unwrap().is_stopped());
    assert_eq!(h.display.exit_calls(), 1);

    let notices = drain(&mut notices);
    assert_eq!(terminal_kinds(&notices), vec![TerminalKind::Disqualified]);
    match notices.last() {
        Some(UiNotice::Terminal { message, redirect, .. }) => {
            assert!(message.contains("multiple tab switches"));
            assert_eq!(redirect, "/test/42/results");
        }
        other => panic!("terminal notice must come last, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_sustained_phone_counts_once_per_window() {
    let h = Harness::new(&[1], Duration::hours(1));
    h.classifier
        .set_steady(vec![Prediction::new("cell phone", 0.9)]);
    let handle = h.start();

    // Several samples at the same wall-clock instant: one acceptance
    settle(3_500).await;
    assert_eq!(h.logged(), vec![Category::ObjectDetected]);
    assert_eq!(h.controller.status(), SessionStatus::Active);

    h.clock.advance(Duration::seconds(6));
    let summary = handle.join().await.unwrap();

    assert_eq!(summary.category_counts.get(&Category::ObjectDetected), Some(&2));
    assert_eq!(
        h.logged(),
        vec![
            Category::ObjectDetected,
            Category::ObjectDetected,
            Category::KickedOut
        ]
    );
    assert_eq!(h.controller.status(), SessionStatus::Disqualified);
}

#[tokio::test(start_paused = true)]
async fn test_mixed_categories_keep_session_active() {
    let h = Harness::new(&[1], Duration::hours(1));
    let handle = h.start();
    settle(10).await;

    handle.visibility_changed(Visibility::Hidden).await;
    handle
        .report(
            ViolationEvent::new(
                Category::MultiplePersons,
                Subject::new(USER_ID, TEST_ID),
                "2 persons detected in frame",
                h.clock.now(),
            ),
        )
        .await;
    handle.fullscreen_changed(false).await;
    settle(100).await;

    assert_eq!(h.controller.status(), SessionStatus::Active);
    handle.unmount();
    let summary = handle.join().await.unwrap();

    assert_eq!(summary.teardown, Some(TeardownReason::Unmounted));
    assert_eq!(summary.events.len(), 3);
    assert_eq!(summary.feed.len(), 3);
    // Unmount is not the end of the exam
    assert_eq!(h.controller.status(), SessionStatus::Active);
    assert_eq!(h.controller.phase(), SessionPhase::Active);
    assert!(h.camera.last_stream().unwrap().is_stopped());
    assert_eq!(h.registry.active_test(USER_ID), None);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_camera_reported_once_then_retried() {
    let h = Harness::with_camera(&[1], Duration::hours(1), SimulatedCamera::denying(1));
    let handle = h.start();
    settle(10).await;

    assert!(!handle.camera_active());
    assert_eq!(
        handle.camera_report().map(|r| r.code),
        Some(ErrorCode::CameraBlocked)
    );
    settle(5_000).await;
    assert_eq!(h.camera.open_calls(), 1);

    handle.retry_camera().await.unwrap();
    assert!(handle.camera_active());
    assert!(handle.camera_report().is_none());

    handle.unmount();
    let summary = handle.join().await.unwrap();
    assert_eq!(summary.category_counts.get(&Category::CameraBlocked), Some(&1));
    assert_eq!(summary.state, EscalationState::Clean);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_completes_through_runtime() {
    let h = Harness::new(&[1], Duration::seconds(1));
    let handle = h.start();
    let mut notices = handle.subscribe();
    h.controller.edit_code(1, "x").unwrap();

    h.clock.advance(Duration::seconds(2));
    let summary = handle.join().await.unwrap();

    assert_eq!(summary.teardown, Some(TeardownReason::Completed));
    assert_eq!(h.controller.status(), SessionStatus::Completed);
    assert_eq!(h.backend.execute_calls.lock().unwrap()[0].code, "x");
    assert_eq!(h.backend.complete_count(), 1);
    assert_eq!(
        terminal_kinds(&drain(&mut notices)),
        vec![TerminalKind::TimeUp]
    );
}

#[tokio::test(start_paused = true)]
async fn test_paste_is_blocked_and_logged_without_escalation() {
    let h = Harness::new(&[1], Duration::hours(1));
    let handle = h.start();
    settle(10).await;

    let paste = EditorInput::Command {
        command: EditorCommand::Paste,
    };
    for _ in 0..3 {
        let verdict = handle.editor_input(&paste).await;
        assert!(matches!(verdict, GuardVerdict::Blocked { .. }));
    }
    settle(100).await;

    assert_eq!(h.logged(), vec![Category::PasteAttempt; 3]);
    assert_eq!(h.controller.status(), SessionStatus::Active);
    handle.unmount();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_one_active_session_per_candidate() {
    let h = Harness::new(&[1], Duration::hours(1));
    let first = h.start();

    let second = proctor_monitor::start(&h.config, h.controller.clone(), h.deps(Vec::new()), &h.registry);
    assert!(matches!(
        second.err(),
        Some(StartError::Registry(RegistryError::AlreadyActive { test_id: TEST_ID, .. }))
    ));

    drop(first);
    settle(10).await;
    assert_eq!(h.registry.active_test(USER_ID), None);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_refused_before_anything_starts() {
    let mut h = Harness::new(&[1], Duration::hours(1));
    h.config.detection.sample_interval_ms = 0;

    let result = proctor_monitor::start(
        &h.config,
        h.controller.clone(),
        h.deps(vec![h.sink.clone()]),
        &h.registry,
    );
    match result {
        Err(StartError::Config(e)) => assert!(e.to_string().contains("sample_interval_ms")),
        Err(other) => panic!("expected a config error, got {}", other),
        Ok(_) => panic!("zero sampling interval must be refused"),
    }

    settle(100).await;
    assert_eq!(h.registry.active_test(USER_ID), None);
    assert_eq!(h.camera.open_calls(), 0);
    assert_eq!(h.controller.status(), SessionStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn test_fullscreen_exit_locks_until_reentered() {
    let h = Harness::new(&[1], Duration::hours(1));
    let handle = h.start();
    let mut notices = handle.subscribe();
    settle(10).await;
    assert!(handle.is_fullscreen());

    handle.fullscreen_changed(false).await;
    settle(10).await;
    assert!(!handle.is_fullscreen());
    let seen = drain(&mut notices);
    assert!(seen.contains(&UiNotice::FullscreenRequired {
        required: true,
        message: FULLSCREEN_REQUIRED_MESSAGE.to_string(),
    }));
    assert!(seen
        .iter()
        .any(|n| matches!(n, UiNotice::Warning { category: Category::ExitFullscreen, .. })));

    handle.fullscreen_changed(true).await;
    // Repeated report with no change publishes nothing
    handle.fullscreen_changed(true).await;
    settle(10).await;
    assert!(handle.is_fullscreen());
    assert_eq!(
        drain(&mut notices),
        vec![UiNotice::FullscreenRequired {
            required: false,
            message: FULLSCREEN_REQUIRED_MESSAGE.to_string(),
        }]
    );

    assert_eq!(h.logged(), vec![Category::ExitFullscreen]);
    assert_eq!(h.controller.status(), SessionStatus::Active);
    handle.unmount();
    handle.join().await;
}

/// Ends the session from outside the policy while the second tab switch is
/// being recorded, i.e. between the monitor's activity check and its lockout
struct EndsSessionOnSecondTabSwitch {
    controller: Arc<ExamSessionController>,
    tab_switches: AtomicU32,
}

impl AuditSink for EndsSessionOnSecondTabSwitch {
    fn forward(&self, event: &ViolationEvent) -> Result<(), String> {
        if event.category == Category::TabSwitch
            && self.tab_switches.fetch_add(1, Ordering::SeqCst) == 1
        {
            self.controller.disqualify("Removed by the proctor");
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), String> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_policy_lockout_skipped_when_session_already_ended() {
    let h = Harness::new(&[1], Duration::hours(1));
    let recording: Arc<dyn AuditSink> = h.sink.clone();
    let ending: Arc<dyn AuditSink> = Arc::new(EndsSessionOnSecondTabSwitch {
        controller: h.controller.clone(),
        tab_switches: AtomicU32::new(0),
    });
    let handle = proctor_monitor::start(
        &h.config,
        h.controller.clone(),
        h.deps(vec![recording, ending]),
        &h.registry,
    )
    .unwrap();
    let mut notices = handle.subscribe();
    settle(10).await;

    handle.visibility_changed(Visibility::Hidden).await;
    handle.visibility_changed(Visibility::Visible).await;
    handle.visibility_changed(Visibility::Hidden).await;

    let summary = handle.join().await.unwrap();
    settle(1_000).await;

    // No KICKED_OUT and no second report for the policy's own decision
    assert_eq!(h.logged(), vec![Category::TabSwitch, Category::TabSwitch]);
    assert_eq!(h.backend.disqualify_count(), 1);
    assert_eq!(summary.teardown, Some(TeardownReason::Disqualified));
    assert_eq!(
        h.controller.phase(),
        SessionPhase::Disqualified {
            reason: "Removed by the proctor".to_string()
        }
    );

    let notices = drain(&mut notices);
    assert_eq!(terminal_kinds(&notices), vec![TerminalKind::Disqualified]);
    match notices.last() {
        Some(UiNotice::Terminal { message, .. }) => assert_eq!(message, "Removed by the proctor"),
        other => panic!("terminal notice must come last, got {:?}", other),
    }
}
