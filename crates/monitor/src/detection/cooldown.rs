//! Per-category detection cooldown
//!
//! One sustained physical condition (a phone lying in frame) must count once,
//! not once per sample. An acceptance stamps the category; further candidates
//! of that category are suppressed until `window_ms` has elapsed.

use proctor_core::Category;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownEntry {
    pub category: Category,
    pub last_fired_ms: i64,
}

#[derive(Debug, Clone)]
pub struct CooldownTracker {
    window_ms: i64,
    entries: HashMap<Category, CooldownEntry>,
}

impl CooldownTracker {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            entries: HashMap::new(),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    pub fn should_fire(&self, category: Category, now_ms: i64) -> bool {
        match self.entries.get(&category) {
            Some(entry) => now_ms - entry.last_fired_ms >= self.window_ms,
            None => true,
        }
    }

    pub fn record_fired(&mut self, category: Category, now_ms: i64) {
        self.entries.insert(
            category,
            CooldownEntry {
                category,
                last_fired_ms: now_ms,
            },
        );
    }

    /// Accept and stamp, or suppress
    pub fn try_accept(&mut self, category: Category, now_ms: i64) -> bool {
        if !self.should_fire(category, now_ms) {
            return false;
        }
        self.record_fired(category, now_ms);
        true
    }

    pub fn entry(&self, category: Category) -> Option<&CooldownEntry> {
        self.entries.get(&category)
    }
}
