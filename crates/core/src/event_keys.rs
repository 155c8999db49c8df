//! Canonical evidence field keys for violation events
//! Adapters must use these constants for the structured evidence map
//! so the audit trail can be reconstructed without parsing free text

// === VISIBILITY ===
pub const TAB_SWITCH_COUNT: &str = "tab_switch_count";

// === FULLSCREEN ===
pub const WAS_FULLSCREEN: &str = "was_fullscreen";

// === CAMERA ===
pub const CAMERA_ERROR: &str = "camera_error";

// === DETECTION ===
pub const PERSON_COUNT: &str = "person_count";
pub const LABELS: &str = "labels";
pub const TOP_CONFIDENCE: &str = "top_confidence";

// === ESCALATION ===
pub const COUNTER_RULE: &str = "counter_rule";
pub const COUNTER_VALUE: &str = "counter_value";
pub const THRESHOLD: &str = "threshold";
pub const TRIGGER_CATEGORY: &str = "trigger_category";

// === EDITOR ===
pub const EDITOR_COMMAND: &str = "editor_command";
pub const INSERTED_CHARS: &str = "inserted_chars";

/// Every key accepted in `ViolationEvent::evidence`
pub fn all_valid_keys() -> Vec<&'static str> {
    vec![
        TAB_SWITCH_COUNT,
        WAS_FULLSCREEN,
        CAMERA_ERROR,
        PERSON_COUNT,
        LABELS,
        TOP_CONFIDENCE,
        COUNTER_RULE,
        COUNTER_VALUE,
        THRESHOLD,
        TRIGGER_CATEGORY,
        EDITOR_COMMAND,
        INSERTED_CHARS,
    ]
}
