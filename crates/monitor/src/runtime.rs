//! Proctor runtime
//!
//! ```text
//!   host events ──┐
//!   sampler ──────┼──▶ mpsc ──▶ monitor task ──▶ EscalationMachine ──▶ Decision
//!   camera check ─┘             (serial)              │                  │
//!                                  │                  ▼                  ▼
//!                                  ├──▶ ViolationLog ──▶ sinks    effects: KICKED_OUT,
//!                                  └──▶ broadcast<UiNotice>       remote disqualify,
//!                                                                 teardown, terminal notice
//!   deadline task ──▶ ExamSessionController ──phase (watch)──▶ monitor task
//! ```
//!
//! One shutdown signal stops the sampler and the deadline loop on every
//! teardown path: completion, disqualification and unmount.

use chrono::{DateTime, Utc};
use proctor_core::{Category, ErrorCode, ErrorReport, Subject, ViolationEvent};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::ExamBackend;
use crate::clock::Clock;
use crate::config::{ConfigError, ProctorConfig};
use crate::controller::{ExamSessionController, SessionPhase};
use crate::detection::{DetectionSampler, DetectorStatus, ModelLoader};
use crate::editor_guard::{EditorGuard, EditorInput, GuardVerdict};
use crate::notice::{warning_message, FeedEntry, TerminalKind, UiNotice, WarningFeed};
use crate::policy::{kicked_out_event, Decision, EscalationMachine, EscalationState};
use crate::registry::{RegistryError, SessionLease, SessionRegistry};
use crate::sensors::fullscreen::{release_fullscreen, request_fullscreen};
use crate::sensors::{
    CameraAdapter, CameraDevice, FullscreenAdapter, FullscreenControl, Visibility,
    VisibilityAdapter,
};
use crate::session::{DeadlineTick, TIME_UP_MESSAGE};
use crate::shutdown::{ShutdownSignal, ShutdownTrigger};
use crate::violation_log::{AuditSink, BackendSink, LogSink, ViolationLog};

#[derive(Debug)]
pub enum MonitorInput {
    Visibility(Visibility),
    Fullscreen(bool),
    /// Already-normalized violation (detector, camera check, editor guard)
    Violation(ViolationEvent),
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownReason {
    Completed,
    Disqualified,
    Unmounted,
}

/// Host-side collaborators
pub struct ProctorDeps {
    pub backend: Arc<dyn ExamBackend>,
    pub camera: Arc<dyn CameraDevice>,
    pub model_loader: Arc<dyn ModelLoader>,
    pub display: Arc<dyn FullscreenControl>,
    pub clock: Arc<dyn Clock>,
    pub extra_sinks: Vec<Arc<dyn AuditSink>>,
}

/// What the monitor saw, returned when it stops
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSummary {
    pub state: EscalationState,
    pub category_counts: BTreeMap<Category, u32>,
    pub events: Vec<ViolationEvent>,
    pub feed: Vec<FeedEntry>,
    pub teardown: Option<TeardownReason>,
    pub forward_errors: u64,
}

struct Monitor {
    controller: Arc<ExamSessionController>,
    machine: EscalationMachine,
    log: ViolationLog,
    visibility: VisibilityAdapter,
    fullscreen: FullscreenAdapter,
    fullscreen_state: watch::Sender<bool>,
    feed: WarningFeed,
    notices: broadcast::Sender<UiNotice>,
    camera: Arc<CameraAdapter>,
    display: Arc<dyn FullscreenControl>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownTrigger,
    dismiss_after_ms: u64,
    teardown: Option<TeardownReason>,
    _lease: SessionLease,
}

impl Monitor {
    async fn run(
        mut self,
        mut input: mpsc::Receiver<MonitorInput>,
        mut phase: watch::Receiver<SessionPhase>,
        mut shutdown: ShutdownSignal,
    ) -> MonitorSummary {
        tracing::info!(
            user_id = self.controller.user_id(),
            test_id = self.controller.test_id(),
            "proctor monitor started"
        );

        while self.teardown.is_none() {
            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    self.teardown(TeardownReason::Unmounted).await;
                }
                changed = phase.changed() => {
                    if changed.is_err() {
                        self.teardown(TeardownReason::Unmounted).await;
                        continue;
                    }
                    let current = phase.borrow_and_update().clone();
                    self.on_phase(current).await;
                }
                next = input.recv() => match next {
                    Some(next) => self.handle(next).await,
                    None => self.teardown(TeardownReason::Unmounted).await,
                },
            }
        }

        self.summary()
    }

    async fn handle(&mut self, input: MonitorInput) {
        let subject = self.controller.subject();
        let now = self.clock.now();
        let event = match input {
            MonitorInput::Visibility(state) => self.visibility.observe(state, subject, now),
            MonitorInput::Fullscreen(on) => {
                let event = self.fullscreen.observe(on, subject, now);
                if self
                    .fullscreen_state
                    .send_if_modified(|state| std::mem::replace(state, on) != on)
                {
                    self.publish(UiNotice::fullscreen_lock(!on));
                }
                event
            }
            MonitorInput::Violation(event) => Some(event),
        };
        if let Some(event) = event {
            self.accept(event).await;
        }
    }

    async fn accept(&mut self, event: ViolationEvent) {
        if !self.controller.is_active() {
            self.machine.seal();
            tracing::debug!(category = %event.category, "violation after session end ignored");
            return;
        }

        let decision = self.machine.apply(&event);
        if !decision.is_accepted() {
            return;
        }
        if let Err(e) = event.validate_basic() {
            tracing::warn!(category = %event.category, "malformed violation: {}", e);
        }

        self.publish_warning(&event);
        let subject = event.subject;
        let event_category = event.category;
        self.log.append(event);

        if let Decision::Disqualify { reason, .. } = &decision {
            // The session may have ended since the check above; the phase
            // change then drives teardown.
            if !self.controller.lock_out(reason) {
                self.machine.seal();
                tracing::info!(category = %event_category, "session ended before lockout");
                return;
            }
            // (a) audit, (b) remote report, (c) sensors released
            if let Some(kicked) = kicked_out_event(&decision, subject, self.clock.now()) {
                self.log.append(kicked);
            }
            self.controller.report_disqualification(reason);
            self.teardown(TeardownReason::Disqualified).await;
            // (d)
            let test_id = self.controller.test_id();
            self.publish(UiNotice::terminal(TerminalKind::Disqualified, reason, test_id));
        }
    }

    async fn on_phase(&mut self, phase: SessionPhase) {
        let test_id = self.controller.test_id();
        match phase {
            SessionPhase::Active => {}
            SessionPhase::Completed { auto, message } => {
                self.teardown(TeardownReason::Completed).await;
                let (kind, message) = if auto {
                    (TerminalKind::TimeUp, TIME_UP_MESSAGE.to_string())
                } else {
                    (TerminalKind::Completed, message)
                };
                self.publish(UiNotice::terminal(kind, &message, test_id));
            }
            SessionPhase::Disqualified { reason } => {
                // Disqualified outside the policy path
                self.teardown(TeardownReason::Disqualified).await;
                self.publish(UiNotice::terminal(TerminalKind::Disqualified, &reason, test_id));
            }
        }
    }

    fn publish_warning(&mut self, event: &ViolationEvent) {
        let message = warning_message(event);
        self.feed.push(&message, event.occurred_at);
        self.publish(UiNotice::Warning {
            message,
            category: event.category,
            occurred_at: event.occurred_at,
            dismiss_after_ms: self.dismiss_after_ms,
        });
    }

    fn publish(&self, notice: UiNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }

    async fn teardown(&mut self, reason: TeardownReason) {
        if self.teardown.is_some() {
            return;
        }
        self.teardown = Some(reason);
        self.shutdown.trigger();
        self.machine.seal();
        self.camera.release();
        release_fullscreen(self.display.as_ref()).await;
        if let Err(e) = self.log.flush() {
            tracing::warn!("audit flush failed: {}", e);
        }
        tracing::info!(?reason, accepted = self.log.len(), "proctor torn down");
    }

    fn summary(&self) -> MonitorSummary {
        MonitorSummary {
            state: self.machine.state().clone(),
            category_counts: self.machine.category_counts().clone(),
            events: self.log.entries().to_vec(),
            feed: self.feed.entries(),
            teardown: self.teardown,
            forward_errors: self.log.stats().forward_errors,
        }
    }
}

/// Handle held by the host page for the lifetime of the exam view.
/// Dropping it is an unmount: every loop stops and the camera is released.
pub struct ProctorHandle {
    input: mpsc::Sender<MonitorInput>,
    notices: broadcast::Sender<UiNotice>,
    detector: watch::Receiver<DetectorStatus>,
    time_left: watch::Receiver<chrono::Duration>,
    fullscreen: watch::Receiver<bool>,
    shutdown: ShutdownTrigger,
    camera: Arc<CameraAdapter>,
    display: Arc<dyn FullscreenControl>,
    controller: Arc<ExamSessionController>,
    clock: Arc<dyn Clock>,
    editor: Mutex<EditorGuard>,
    monitor: Option<JoinHandle<MonitorSummary>>,
    workers: Vec<JoinHandle<()>>,
}

/// Start proctoring an active session. Must be called inside a tokio runtime.
/// Nothing is spawned when the configuration is invalid.
pub fn start(
    config: &ProctorConfig,
    controller: Arc<ExamSessionController>,
    deps: ProctorDeps,
    registry: &SessionRegistry,
) -> Result<ProctorHandle, StartError> {
    config.validate()?;
    let lease = registry.begin(controller.user_id(), controller.test_id())?;

    let shutdown = ShutdownTrigger::new();
    let (input_tx, input_rx) = mpsc::channel(config.notices.channel_capacity.max(1));
    let (notice_tx, _) = broadcast::channel(config.notices.channel_capacity.max(1));
    let (detector_tx, detector_rx) = watch::channel(DetectorStatus::Loading);
    let (time_tx, time_rx) = watch::channel(controller.time_left());
    let (fullscreen_tx, fullscreen_rx) = watch::channel(deps.display.is_fullscreen());

    let camera = Arc::new(CameraAdapter::new(deps.camera));

    let mut log = ViolationLog::new();
    log.add_sink(Arc::new(LogSink));
    log.add_sink(Arc::new(BackendSink::new(deps.backend.clone())));
    for sink in deps.extra_sinks {
        log.add_sink(sink);
    }

    let monitor = Monitor {
        controller: controller.clone(),
        machine: EscalationMachine::new(config.policy.clone()),
        log,
        visibility: VisibilityAdapter::new(),
        fullscreen: FullscreenAdapter::new(deps.display.is_fullscreen()),
        fullscreen_state: fullscreen_tx,
        feed: WarningFeed::new(config.notices.feed_len),
        notices: notice_tx.clone(),
        camera: camera.clone(),
        display: deps.display.clone(),
        clock: deps.clock.clone(),
        shutdown: shutdown.clone(),
        dismiss_after_ms: config.notices.warning_dismiss_ms,
        teardown: None,
        _lease: lease,
    };
    let monitor = tokio::spawn(monitor.run(
        input_rx,
        controller.subscribe_phase(),
        shutdown.signal(),
    ));

    let mut workers = Vec::new();
    workers.push(spawn_camera_check(
        camera.clone(),
        controller.clone(),
        deps.clock.clone(),
        input_tx.clone(),
    ));

    let subject_controller = controller.clone();
    let sampler = DetectionSampler::new(
        &config.detection,
        camera.clone(),
        deps.model_loader,
        deps.clock.clone(),
        Arc::new(move || subject_controller.subject()),
        input_tx.clone(),
        detector_tx,
    );
    workers.push(tokio::spawn(sampler.run(shutdown.signal())));

    workers.push(tokio::spawn(deadline_loop(
        controller.clone(),
        Duration::from_millis(config.session.deadline_tick_ms),
        time_tx,
        shutdown.signal(),
    )));

    Ok(ProctorHandle {
        input: input_tx,
        notices: notice_tx,
        detector: detector_rx,
        time_left: time_rx,
        fullscreen: fullscreen_rx,
        shutdown,
        camera,
        display: deps.display,
        controller,
        clock: deps.clock,
        editor: Mutex::new(EditorGuard::new()),
        monitor: Some(monitor),
        workers,
    })
}

fn spawn_camera_check(
    camera: Arc<CameraAdapter>,
    controller: Arc<ExamSessionController>,
    clock: Arc<dyn Clock>,
    input: mpsc::Sender<MonitorInput>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(event) = camera.acquire(controller.subject(), clock.now()).await {
            let _ = input.send(MonitorInput::Violation(event)).await;
        }
    })
}

async fn deadline_loop(
    controller: Arc<ExamSessionController>,
    period: Duration,
    time_left: watch::Sender<chrono::Duration>,
    mut shutdown: ShutdownSignal,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait() => break,
        }
        match controller.on_deadline_tick().await {
            DeadlineTick::Remaining(left) => {
                time_left.send_replace(left);
            }
            DeadlineTick::Expired { .. } | DeadlineTick::Inactive => {
                time_left.send_replace(chrono::Duration::zero());
                break;
            }
        }
    }
    tracing::debug!("deadline loop stopped");
}

impl ProctorHandle {
    pub fn controller(&self) -> &Arc<ExamSessionController> {
        &self.controller
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiNotice> {
        self.notices.subscribe()
    }

    pub fn detector_status(&self) -> DetectorStatus {
        self.detector.borrow().clone()
    }

    pub fn time_left(&self) -> chrono::Duration {
        *self.time_left.borrow()
    }

    /// False while the fullscreen lockout should cover the exam
    pub fn is_fullscreen(&self) -> bool {
        *self.fullscreen.borrow()
    }

    pub fn camera_active(&self) -> bool {
        self.camera.is_active()
    }

    /// Camera state for the preview panel, if the camera is unavailable
    pub fn camera_report(&self) -> Option<ErrorReport> {
        self.camera
            .last_error()
            .map(|e| ErrorReport::new(ErrorCode::CameraBlocked, e.to_string()))
    }

    async fn send(&self, input: MonitorInput) {
        if self.input.send(input).await.is_err() {
            tracing::debug!("monitor already stopped");
        }
    }

    pub async fn visibility_changed(&self, state: Visibility) {
        self.send(MonitorInput::Visibility(state)).await;
    }

    pub async fn fullscreen_changed(&self, is_fullscreen: bool) {
        self.send(MonitorInput::Fullscreen(is_fullscreen)).await;
    }

    /// Route an externally produced violation through the policy
    pub async fn report(&self, event: ViolationEvent) {
        self.send(MonitorInput::Violation(event)).await;
    }

    /// Manual retry after a blocked camera
    pub fn retry_camera(&self) -> JoinHandle<()> {
        spawn_camera_check(
            self.camera.clone(),
            self.controller.clone(),
            self.clock.clone(),
            self.input.clone(),
        )
    }

    /// From a user gesture only
    pub async fn request_fullscreen(&self) -> bool {
        request_fullscreen(self.display.as_ref()).await
    }

    pub async fn editor_input(&self, input: &EditorInput) -> GuardVerdict {
        let subject: Subject = self.controller.subject();
        let at: DateTime<Utc> = self.clock.now();
        let (verdict, violation) = self
            .editor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .inspect(input, &subject, at);

        if let GuardVerdict::Blocked { message, .. } = &verdict {
            let _ = self.notices.send(UiNotice::Editor {
                message: message.to_string(),
            });
        }
        if let Some(violation) = violation {
            self.send(MonitorInput::Violation(violation)).await;
        }
        verdict
    }

    /// Host is navigating away. The session stays ACTIVE and resumable.
    pub fn unmount(&self) {
        if self.shutdown.trigger() {
            tracing::info!("proctor unmounted");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Wait for the monitor to finish its teardown and collect the summary
    pub async fn join(mut self) -> Option<MonitorSummary> {
        let summary = match self.monitor.take() {
            Some(monitor) => monitor.await.ok(),
            None => None,
        };
        for worker in std::mem::take(&mut self.workers) {
            let _ = worker.await;
        }
        summary
    }
}

impl Drop for ProctorHandle {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
