//! Escalation state machine
//!
//! ```text
//!   CLEAN ──counted event below threshold──▶ WARNED(category)
//!     │                                          │
//!     └────────── counter reaches threshold ─────┴──▶ DISQUALIFIED (terminal)
//! ```
//!
//! `apply` is a pure reducer over `(state, event)`; it returns a `Decision`
//! and performs no I/O. The runtime observes decisions and executes the
//! effects (audit, remote disqualify, teardown, notices). Every counter
//! mutation goes through `apply`, which is only ever called from the single
//! monitor task.

use chrono::{DateTime, Utc};
use proctor_core::{event_keys, Category, Subject, ViolationEvent};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

use crate::config::{CounterRule, PolicyConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationState {
    Clean,
    Warned {
        category: Category,
    },
    Disqualified {
        rule: String,
        category: Category,
        reason: String,
    },
}

impl EscalationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscalationState::Disqualified { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Arrived after termination; nothing changed
    Ignored,
    /// Logged and surfaced, not counted toward disqualification
    Recorded { category: Category },
    Warn {
        category: Category,
        rule: String,
        count: u32,
        threshold: u32,
    },
    Disqualify {
        category: Category,
        rule: String,
        count: u32,
        threshold: u32,
        reason: String,
    },
}

impl Decision {
    /// Whether the event should reach the log and the UI
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Decision::Ignored)
    }
}

pub struct EscalationMachine {
    config: PolicyConfig,
    state: EscalationState,
    category_counts: BTreeMap<Category, u32>,
    rule_counts: BTreeMap<String, u32>,
    sealed: bool,
}

impl EscalationMachine {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            state: EscalationState::Clean,
            category_counts: BTreeMap::new(),
            rule_counts: BTreeMap::new(),
            sealed: false,
        }
    }

    pub fn apply(&mut self, event: &ViolationEvent) -> Decision {
        if self.sealed || self.state.is_terminal() {
            return Decision::Ignored;
        }

        let category = event.category;
        // Policy output, never counted
        if category == Category::KickedOut {
            return Decision::Recorded { category };
        }

        *self.category_counts.entry(category).or_insert(0) += 1;

        let Some(rule) = self.config.rule_for(category).cloned() else {
            return Decision::Recorded { category };
        };
        let count = {
            let slot = self.rule_counts.entry(rule.name.clone()).or_insert(0);
            *slot += 1;
            *slot
        };
        let Some(threshold) = rule.disqualify_at else {
            return Decision::Recorded { category };
        };

        if count >= threshold {
            let reason = disqualify_reason(&rule, count);
            tracing::warn!(
                rule = %rule.name,
                category = %category,
                count,
                threshold,
                "escalation threshold reached"
            );
            self.state = EscalationState::Disqualified {
                rule: rule.name.clone(),
                category,
                reason: reason.clone(),
            };
            Decision::Disqualify {
                category,
                rule: rule.name,
                count,
                threshold,
                reason,
            }
        } else {
            self.state = EscalationState::Warned { category };
            Decision::Warn {
                category,
                rule: rule.name,
                count,
                threshold,
            }
        }
    }

    /// Stop accepting events; used when the session ends for any other reason
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Fresh counters for a new session
    pub fn reset(&mut self) {
        self.state = EscalationState::Clean;
        self.category_counts.clear();
        self.rule_counts.clear();
        self.sealed = false;
    }

    pub fn state(&self) -> &EscalationState {
        &self.state
    }

    pub fn count(&self, category: Category) -> u32 {
        self.category_counts.get(&category).copied().unwrap_or(0)
    }

    pub fn rule_count(&self, rule: &str) -> u32 {
        self.rule_counts.get(rule).copied().unwrap_or(0)
    }

    pub fn category_counts(&self) -> &BTreeMap<Category, u32> {
        &self.category_counts
    }
}

fn disqualify_reason(rule: &CounterRule, count: u32) -> String {
    rule.reason.clone().unwrap_or_else(|| {
        format!(
            "Exam terminated: {} limit reached ({} violations).",
            rule.name, count
        )
    })
}

/// The CRITICAL audit record emitted for a disqualification
pub fn kicked_out_event(
    decision: &Decision,
    subject: Subject,
    at: DateTime<Utc>,
) -> Option<ViolationEvent> {
    match decision {
        Decision::Disqualify {
            category,
            rule,
            count,
            threshold,
            reason,
        } => Some(
            ViolationEvent::new(Category::KickedOut, subject, reason.clone(), at)
                .with_evidence(event_keys::COUNTER_RULE, json!(rule))
                .with_evidence(event_keys::COUNTER_VALUE, json!(count))
                .with_evidence(event_keys::THRESHOLD, json!(threshold))
                .with_evidence(event_keys::TRIGGER_CATEGORY, json!(category.as_str())),
        ),
        _ => None,
    }
}
