//! Per-session suppression of repeat check-ins.
//!
//! Querying and committing are separate steps: a caller asks
//! [`CooldownTracker::should_record`], performs its write, and only then
//! calls [`CooldownTracker::record`]. A failed write therefore never starts
//! a cooldown window.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_accepted: HashMap<String, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `identity` has no committed check-in, or the last one is at
    /// least `window` before `now`.
    pub fn should_record(&self, identity: &str, now: DateTime<Utc>, window: Duration) -> bool {
        match self.last_accepted.get(identity) {
            None => true,
            Some(last) => now.signed_duration_since(*last) >= window,
        }
    }

    /// Commit a check-in for `identity` at `now`.
    pub fn record(&mut self, identity: &str, now: DateTime<Utc>) {
        self.last_accepted.insert(identity.to_string(), now);
    }

    pub fn last_accepted(&self, identity: &str) -> Option<DateTime<Utc>> {
        self.last_accepted.get(identity).copied()
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_accepted.clear();
    }
}
