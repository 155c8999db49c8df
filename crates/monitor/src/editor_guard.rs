//! Exam editor guard
//!
//! Clipboard shortcuts and the context menu are blocked while the exam runs.
//! A paste attempt becomes a PASTE_ATTEMPT violation; large single-line
//! insertions are only flagged for telemetry.

use chrono::{DateTime, Utc};
use proctor_core::{event_keys, Category, Subject, ViolationEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const CLIPBOARD_DISABLED: &str = "Copy/Paste is disabled. Type it out to learn!";
pub const PASTE_BLOCKED: &str = "Paste attempt blocked.";
pub const CONTEXT_MENU_DISABLED: &str = "Context menu is disabled during the exam.";

const BULK_INSERT_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorCommand {
    Copy,
    Cut,
    Paste,
    ContextMenu,
}

impl EditorCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditorCommand::Copy => "copy",
            EditorCommand::Cut => "cut",
            EditorCommand::Paste => "paste",
            EditorCommand::ContextMenu => "context_menu",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditorInput {
    Command { command: EditorCommand },
    Insert { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Allow,
    Blocked {
        command: EditorCommand,
        message: &'static str,
    },
    /// Allowed, but looks like text arriving from outside the editor
    Suspicious { chars: usize },
}

#[derive(Debug, Clone, Default)]
pub struct EditorGuard {
    blocked: u32,
    suspicious: u32,
}

impl EditorGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inspect(
        &mut self,
        input: &EditorInput,
        subject: &Subject,
        at: DateTime<Utc>,
    ) -> (GuardVerdict, Option<ViolationEvent>) {
        match input {
            EditorInput::Command { command } => {
                self.blocked += 1;
                let message = match command {
                    EditorCommand::Copy | EditorCommand::Cut => CLIPBOARD_DISABLED,
                    EditorCommand::Paste => PASTE_BLOCKED,
                    EditorCommand::ContextMenu => CONTEXT_MENU_DISABLED,
                };
                let violation = (*command == EditorCommand::Paste).then(|| {
                    ViolationEvent::new(
                        Category::PasteAttempt,
                        *subject,
                        "Paste attempt blocked in exam editor",
                        at,
                    )
                    .with_evidence(event_keys::EDITOR_COMMAND, json!(command.as_str()))
                });
                (
                    GuardVerdict::Blocked {
                        command: *command,
                        message,
                    },
                    violation,
                )
            }
            EditorInput::Insert { text } => {
                let chars = text.chars().count();
                if chars > BULK_INSERT_CHARS && !text.contains('\n') {
                    self.suspicious += 1;
                    tracing::debug!(
                        chars,
                        problem_id = ?subject.problem_id,
                        "suspicious bulk insertion"
                    );
                    (GuardVerdict::Suspicious { chars }, None)
                } else {
                    (GuardVerdict::Allow, None)
                }
            }
        }
    }

    pub fn blocked_count(&self) -> u32 {
        self.blocked
    }

    pub fn suspicious_count(&self) -> u32 {
        self.suspicious
    }
}
