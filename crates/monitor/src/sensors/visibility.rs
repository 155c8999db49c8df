//! Page visibility / tab focus
//!
//! Fires once per visible→hidden transition. Returning to the page is not a
//! violation and repeated "hidden" notifications without an intervening
//! "visible" are collapsed.

use chrono::{DateTime, Utc};
use proctor_core::{event_keys, Category, Subject, ViolationEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug)]
pub struct VisibilityAdapter {
    last: Visibility,
    tab_switches: u32,
}

impl VisibilityAdapter {
    pub fn new() -> Self {
        Self {
            last: Visibility::Visible,
            tab_switches: 0,
        }
    }

    pub fn tab_switches(&self) -> u32 {
        self.tab_switches
    }

    pub fn observe(
        &mut self,
        state: Visibility,
        subject: Subject,
        at: DateTime<Utc>,
    ) -> Option<ViolationEvent> {
        let previous = std::mem::replace(&mut self.last, state);
        if previous != Visibility::Visible || state != Visibility::Hidden {
            return None;
        }

        self.tab_switches += 1;
        let count = self.tab_switches;
        Some(
            ViolationEvent::new(
                Category::TabSwitch,
                subject,
                format!("Tab switch detected (count: {})", count),
                at,
            )
            .with_evidence(event_keys::TAB_SWITCH_COUNT, serde_json::json!(count)),
        )
    }
}

impl Default for VisibilityAdapter {
    fn default() -> Self {
        Self::new()
    }
}
