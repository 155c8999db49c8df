//! Scenario replay
//!
//! A scenario is a YAML script of timed host inputs (visibility, fullscreen,
//! camera predictions, editor actions, submissions) replayed against the full
//! runtime with an in-process backend, simulated devices and a manual clock.
//! Scenario time drives the clock; real time runs `speed` times faster.

use proctor_core::{ActiveTest, ActiveTestResponse, ProblemId, UserId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::TryRecvError;

use crate::clock::ManualClock;
use crate::config::ProctorConfig;
use crate::controller::{ControllerError, ExamSessionController};
use crate::detection::{ModelLoader, Prediction, ScriptedClassifier, ScriptedModelLoader};
use crate::editor_guard::EditorInput;
use crate::fake_backend::FakeBackend;
use crate::notice::UiNotice;
use crate::registry::SessionRegistry;
use crate::runtime::{self, MonitorSummary, ProctorDeps, ProctorHandle, StartError};
use crate::sensors::{HeadlessDisplay, SimulatedCamera, Visibility};
use crate::session::{Direction, SessionSnapshot};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse scenario: {0}")]
    Parse(String),

    #[error("could not enter exam: {0}")]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Start(#[from] StartError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_user_id")]
    pub user_id: UserId,

    pub test: ActiveTest,

    /// Camera opens refused before one succeeds
    #[serde(default)]
    pub camera_denials: u32,

    #[serde(default = "default_true")]
    pub model_available: bool,

    #[serde(default = "default_true")]
    pub start_fullscreen: bool,

    #[serde(default)]
    pub steps: Vec<ScenarioStep>,

    /// Scenario time to keep running after the last step
    #[serde(default = "default_settle_ms")]
    pub settle_ms: i64,
}

fn default_user_id() -> UserId {
    1
}

fn default_true() -> bool {
    true
}

fn default_settle_ms() -> i64 {
    2_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    /// Offset from the test start time
    pub at_ms: i64,
    pub action: ScenarioAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAction {
    Visibility { state: Visibility },
    Fullscreen { on: bool },
    /// What the classifier reports from now on
    Predictions { predictions: Vec<Prediction> },
    Edit { problem_id: ProblemId, text: String },
    Run { problem_id: ProblemId, code: String },
    Submit { problem_id: ProblemId, code: String },
    Navigate { direction: Direction },
    Editor { input: EditorInput },
    RetryCamera,
    Unmount,
}

impl Scenario {
    pub fn from_yaml_str(content: &str) -> Result<Self, ScenarioError> {
        serde_yaml::from_str(content).map_err(|e| ScenarioError::Parse(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub scenario: String,
    pub session: SessionSnapshot,
    pub monitor: Option<MonitorSummary>,
    pub audit_categories: Vec<String>,
    pub disqualify_calls: usize,
    pub complete_calls: usize,
    pub notices: Vec<UiNotice>,
    pub step_log: Vec<String>,
}

struct Replay {
    clock: Arc<ManualClock>,
    classifier: Arc<ScriptedClassifier>,
    display: Arc<HeadlessDisplay>,
    handle: ProctorHandle,
    elapsed_ms: i64,
    tick_ms: i64,
    real_tick: Duration,
    step_log: Vec<String>,
}

impl Replay {
    /// Move scenario time forward one sampling period at a time so the
    /// runtime's timers get a chance to run in between
    async fn advance_to(&mut self, target_ms: i64) {
        while self.elapsed_ms < target_ms {
            let step = self.tick_ms.min(target_ms - self.elapsed_ms);
            self.clock.advance(chrono::Duration::milliseconds(step));
            self.elapsed_ms += step;
            tokio::time::sleep(self.real_tick).await;
        }
    }

    async fn apply(&mut self, action: &ScenarioAction) {
        let controller = self.handle.controller().clone();
        let entry = match action {
            ScenarioAction::Visibility { state } => {
                self.handle.visibility_changed(*state).await;
                format!("visibility {:?}", state)
            }
            ScenarioAction::Fullscreen { on } => {
                self.display.set_fullscreen(*on);
                self.handle.fullscreen_changed(*on).await;
                format!("fullscreen {}", on)
            }
            ScenarioAction::Predictions { predictions } => {
                self.classifier.set_steady(predictions.clone());
                format!("camera sees {} object(s)", predictions.len())
            }
            ScenarioAction::Edit { problem_id, text } => {
                match controller.edit_code(*problem_id, text) {
                    Ok(()) => format!("edit {}", problem_id),
                    Err(e) => format!("edit {} rejected: {}", problem_id, e),
                }
            }
            ScenarioAction::Run { problem_id, code } => {
                let language = controller.with_session(|s| s.language().to_string());
                match controller.run_code(*problem_id, code, &language).await {
                    Ok(result) => format!("run {}: {:?}", problem_id, result.verdict),
                    Err(e) => format!("run {} rejected: {}", problem_id, e),
                }
            }
            ScenarioAction::Submit { problem_id, code } => {
                let language = controller.with_session(|s| s.language().to_string());
                match controller.submit_code(*problem_id, code, &language).await {
                    Ok(receipt) => format!("submit {}: {:?}", problem_id, receipt.outcome),
                    Err(e) => format!("submit {} rejected: {}", problem_id, e),
                }
            }
            ScenarioAction::Navigate { direction } => match controller.navigate(*direction) {
                Ok(index) => format!("navigate {:?} -> {}", direction, index),
                Err(e) => format!("navigate rejected: {}", e),
            },
            ScenarioAction::Editor { input } => {
                let verdict = self.handle.editor_input(input).await;
                format!("editor {:?}", verdict)
            }
            ScenarioAction::RetryCamera => {
                let _ = self.handle.retry_camera().await;
                "camera retry".to_string()
            }
            ScenarioAction::Unmount => {
                self.handle.unmount();
                "unmount".to_string()
            }
        };
        tracing::debug!(at_ms = self.elapsed_ms, "{}", entry);
        self.step_log.push(format!("{:>7}ms {}", self.elapsed_ms, entry));
    }
}

pub async fn run_scenario(
    scenario: &Scenario,
    config: &ProctorConfig,
    speed: u32,
) -> Result<ReplayReport, ScenarioError> {
    let speed = u64::from(speed.max(1));
    let tick_ms = config.detection.sample_interval_ms.max(1);
    let mut config = config.clone();
    config.detection.sample_interval_ms = (tick_ms / speed).max(1);
    config.session.deadline_tick_ms = (config.session.deadline_tick_ms / speed).max(1);

    let clock = Arc::new(ManualClock::new(scenario.test.start_time));
    let backend = Arc::new(FakeBackend::new());
    backend.set_active_test(ActiveTestResponse {
        active_test: Some(scenario.test.clone()),
        message: None,
    });
    let controller = Arc::new(
        ExamSessionController::load(scenario.user_id, backend.clone(), clock.clone(), &config)
            .await?,
    );

    let classifier = Arc::new(ScriptedClassifier::new());
    let loader: Arc<dyn ModelLoader> = if scenario.model_available {
        Arc::new(ScriptedModelLoader::ready(classifier.clone()))
    } else {
        Arc::new(ScriptedModelLoader::failing())
    };
    let display = Arc::new(HeadlessDisplay::new());
    display.set_fullscreen(scenario.start_fullscreen);

    let deps = ProctorDeps {
        backend: backend.clone(),
        camera: Arc::new(SimulatedCamera::denying(scenario.camera_denials)),
        model_loader: loader,
        display: display.clone(),
        clock: clock.clone(),
        extra_sinks: Vec::new(),
    };
    let registry = SessionRegistry::new();
    let handle = runtime::start(&config, controller.clone(), deps, &registry)?;
    let mut notices = handle.subscribe();

    tracing::info!(
        scenario = %scenario.name,
        steps = scenario.steps.len(),
        "replaying scenario"
    );

    let mut replay = Replay {
        clock,
        classifier,
        display,
        handle,
        elapsed_ms: 0,
        tick_ms: tick_ms as i64,
        real_tick: Duration::from_millis((tick_ms / speed).max(1)),
        step_log: Vec::new(),
    };

    let mut last_ms = 0;
    for step in &scenario.steps {
        replay.advance_to(step.at_ms).await;
        replay.apply(&step.action).await;
        last_ms = last_ms.max(step.at_ms);
    }
    replay.advance_to(last_ms + scenario.settle_ms).await;

    let Replay {
        handle, step_log, ..
    } = replay;
    handle.unmount();
    let monitor = handle.join().await;

    let mut collected = Vec::new();
    loop {
        match notices.try_recv() {
            Ok(notice) => collected.push(notice),
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "replay dropped notices");
            }
            Err(_) => break,
        }
    }

    Ok(ReplayReport {
        scenario: scenario.name.clone(),
        session: controller.snapshot(),
        monitor,
        audit_categories: backend.logged_categories(),
        disqualify_calls: backend.disqualify_count(),
        complete_calls: backend.complete_count(),
        notices: collected,
        step_log,
    })
}
