//! Shared fixtures for monitor integration tests
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use proctor_core::{ActiveTest, Problem, ProblemId};
use std::sync::Arc;

use proctor_monitor::config::{ProctorConfig, RetryConfig};
use proctor_monitor::detection::{ScriptedClassifier, ScriptedModelLoader};
use proctor_monitor::fake_backend::FakeBackend;
use proctor_monitor::sensors::{HeadlessDisplay, SimulatedCamera};
use proctor_monitor::{
    start, AuditSink, ExamSession, ExamSessionController, ManualClock, MemorySink, ProctorDeps,
    ProctorHandle, SessionRegistry,
};

pub const USER_ID: i64 = 7;
pub const TEST_ID: i64 = 42;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

pub fn problem(id: ProblemId) -> Problem {
    Problem {
        id,
        title: format!("Problem {}", id),
        description: "Read input, print output".to_string(),
        difficulty: "medium".to_string(),
        starter_codes: [("javascript".to_string(), String::new())]
            .into_iter()
            .collect(),
        test_cases: Vec::new(),
    }
}

pub fn active_test(problem_ids: &[ProblemId], duration: Duration) -> ActiveTest {
    ActiveTest {
        id: TEST_ID,
        title: "Data Structures Midterm".to_string(),
        start_time: t0(),
        end_time: t0() + duration,
        problems: problem_ids.iter().map(|&id| problem(id)).collect(),
    }
}

pub struct Harness {
    pub config: ProctorConfig,
    pub backend: Arc<FakeBackend>,
    pub clock: Arc<ManualClock>,
    pub camera: Arc<SimulatedCamera>,
    pub display: Arc<HeadlessDisplay>,
    pub classifier: Arc<ScriptedClassifier>,
    pub sink: Arc<MemorySink>,
    pub registry: SessionRegistry,
    pub controller: Arc<ExamSessionController>,
}

impl Harness {
    pub fn new(problem_ids: &[ProblemId], duration: Duration) -> Self {
        Self::with_camera(problem_ids, duration, SimulatedCamera::granting())
    }

    pub fn with_camera(
        problem_ids: &[ProblemId],
        duration: Duration,
        camera: SimulatedCamera,
    ) -> Self {
        let config = ProctorConfig::default();
        let backend = Arc::new(FakeBackend::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let session =
            ExamSession::from_active_test(active_test(problem_ids, duration), "javascript")
                .unwrap();
        let controller = Arc::new(ExamSessionController::new(
            USER_ID,
            session,
            backend.clone(),
            clock.clone(),
            RetryConfig::default(),
        ));
        let display = Arc::new(HeadlessDisplay::new());
        display.set_fullscreen(true);

        Self {
            config,
            backend,
            clock,
            camera: Arc::new(camera),
            display,
            classifier: Arc::new(ScriptedClassifier::new()),
            sink: Arc::new(MemorySink::new()),
            registry: SessionRegistry::new(),
            controller,
        }
    }

    pub fn deps(&self, extra_sinks: Vec<Arc<dyn AuditSink>>) -> ProctorDeps {
        ProctorDeps {
            backend: self.backend.clone(),
            camera: self.camera.clone(),
            model_loader: Arc::new(ScriptedModelLoader::ready(self.classifier.clone())),
            display: self.display.clone(),
            clock: self.clock.clone(),
            extra_sinks,
        }
    }

    pub fn start(&self) -> ProctorHandle {
        let deps = self.deps(vec![self.sink.clone()]);
        start(&self.config, self.controller.clone(), deps, &self.registry).unwrap()
    }

    pub fn logged(&self) -> Vec<proctor_core::Category> {
        self.sink.get_events().iter().map(|e| e.category).collect()
    }
}

/// Let spawned tasks run; with paused time this also advances the timers
pub async fn settle(ms: u64) {
    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
}
