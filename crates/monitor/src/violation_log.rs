//! Violation Log
//!
//! Append-only local record of every violation the monitor accepted, plus
//! forwarding to one or more audit sinks. The log knows nothing about
//! detection or escalation; it is written from the monitor task only.
//!
//! ```text
//!   ViolationEvent ──▶ ViolationLog ──┬──▶ MemorySink  (tests, replays)
//!                     (append-only)   ├──▶ LogSink     (tracing)
//!                                     └──▶ BackendSink (POST /student/log-behavior)
//! ```

use proctor_core::{Category, ViolationEvent};
use std::sync::Arc;

use crate::backend::{BehaviorRecord, ExamBackend};

/// Trait for audit persistence and forwarding
pub trait AuditSink: Send + Sync {
    /// Persist or forward one violation
    fn forward(&self, event: &ViolationEvent) -> Result<(), String>;

    /// Flush any buffered records
    fn flush(&self) -> Result<(), String>;
}

/// In-memory audit sink for testing
pub struct MemorySink {
    events: std::sync::Mutex<Vec<ViolationEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn get_events(&self) -> Vec<ViolationEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemorySink {
    fn forward(&self, event: &ViolationEvent) -> Result<(), String> {
        self.events
            .lock()
            .map_err(|e| e.to_string())?
            .push(event.clone());
        Ok(())
    }

    fn flush(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Sink that writes each violation to the tracing log
pub struct LogSink;

impl AuditSink for LogSink {
    fn forward(&self, event: &ViolationEvent) -> Result<(), String> {
        tracing::warn!(
            category = %event.category,
            severity = %event.severity,
            user_id = event.subject.user_id,
            test_id = event.subject.test_id,
            problem_id = ?event.subject.problem_id,
            "violation: {}",
            event.detail
        );
        Ok(())
    }

    fn flush(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Forwards to the remote audit endpoint. Best-effort: the request is
/// spawned and a failure is only logged.
pub struct BackendSink {
    backend: Arc<dyn ExamBackend>,
}

impl BackendSink {
    pub fn new(backend: Arc<dyn ExamBackend>) -> Self {
        Self { backend }
    }
}

impl AuditSink for BackendSink {
    fn forward(&self, event: &ViolationEvent) -> Result<(), String> {
        let backend = self.backend.clone();
        let record = BehaviorRecord::from(event);

        tokio::spawn(async move {
            if let Err(e) = backend.log_behavior(&record).await {
                tracing::debug!(
                    event_type = %record.event_type,
                    "audit record dropped: {}",
                    e
                );
            }
        });

        Ok(())
    }

    fn flush(&self) -> Result<(), String> {
        // Fire-and-forget, nothing to flush
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct LogStats {
    pub recorded: u64,
    pub forward_errors: u64,
}

pub struct ViolationLog {
    entries: Vec<ViolationEvent>,
    sinks: Vec<Arc<dyn AuditSink>>,
    stats: LogStats,
}

impl ViolationLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            sinks: Vec::new(),
            stats: LogStats::default(),
        }
    }

    /// Add an audit sink
    pub fn add_sink(&mut self, sink: Arc<dyn AuditSink>) {
        self.sinks.push(sink);
    }

    /// Record a violation and forward it to every sink
    pub fn append(&mut self, event: ViolationEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.forward(&event) {
                tracing::warn!("audit sink error: {}", e);
                self.stats.forward_errors += 1;
            }
        }
        self.stats.recorded += 1;
        self.entries.push(event);
    }

    pub fn entries(&self) -> &[ViolationEvent] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_of(&self, category: Category) -> usize {
        self.entries
            .iter()
            .filter(|e| e.category == category)
            .count()
    }

    pub fn stats(&self) -> &LogStats {
        &self.stats
    }

    /// Flush all sinks
    pub fn flush(&self) -> Result<(), String> {
        for sink in &self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

impl Default for ViolationLog {
    fn default() -> Self {
        Self::new()
    }
}
