//! Proctoring and exam-session integrity engine
//!
//! ```text
//!  ┌──────────── host (browser shell / kiosk) ─────────────┐
//!  │ visibility   fullscreen   camera frames   editor keys  │
//!  └─────┬────────────┬─────────────┬──────────────┬────────┘
//!        ▼            ▼             ▼              ▼
//!   VisibilityAdapter  FullscreenAdapter  DetectionSampler  EditorGuard
//!        └────────────┴──────┬──────┴──────────────┘
//!                            ▼  mpsc (single serialized path)
//!                     monitor task: EscalationMachine ─▶ ViolationLog ─▶ audit sinks
//!                            │
//!              Decision::Disqualify │ phase changes
//!                            ▼
//!                 ExamSessionController ◀── deadline task (1 Hz)
//!                            │
//!                            ▼
//!                     ExamBackend (HTTP): execute, complete, disqualify
//! ```
//!
//! Pure pieces (`policy`, `session`, `detection::pipeline`, the sensor
//! adapters) hold no I/O; `runtime` and `controller` execute their effects.

pub mod backend;
pub mod clock;
pub mod config;
pub mod controller;
pub mod detection;
pub mod editor_guard;
pub mod fake_backend;
pub mod notice;
pub mod policy;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod scenario;
pub mod sensors;
pub mod session;
pub mod shutdown;
pub mod violation_log;

pub use backend::{BackendError, BehaviorRecord, ExamBackend, HttpExamBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, CounterRule, ProctorConfig};
pub use controller::{ControllerError, ExamSessionController, SessionPhase, SubmitReceipt};
pub use detection::{DetectionPipeline, DetectorStatus, ObjectClassifier, Prediction};
pub use editor_guard::{EditorCommand, EditorGuard, EditorInput, GuardVerdict};
pub use notice::{TerminalKind, UiNotice, WarningFeed};
pub use policy::{Decision, EscalationMachine, EscalationState};
pub use registry::{SessionLease, SessionRegistry};
pub use runtime::{start, MonitorSummary, ProctorDeps, ProctorHandle, StartError, TeardownReason};
pub use session::{Direction, ExamSession, SessionError, SessionStatus};
pub use violation_log::{AuditSink, MemorySink, ViolationLog};
