// ── Reporting cache ──
//
// Last reported value per (event type, sub-key), and the strategy that
// decides whether a new report is due.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use fimpkit_api::Value;
use tokio::time::Instant;

/// When an outbound state report should be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportingStrategy {
    /// Emit unconditionally.
    Always,
    /// Emit iff the value differs from the last report.
    #[default]
    OnChange,
    /// Emit on change, or when the last report is older than the interval.
    AtLeastEvery(Duration),
}

impl ReportingStrategy {
    /// Decide given whether the value changed and when it was last
    /// reported.
    pub fn report_required(self, changed: bool, last_reported: Instant) -> bool {
        match self {
            Self::Always => true,
            Self::OnChange => changed,
            Self::AtLeastEvery(interval) => changed || last_reported.elapsed() > interval,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    reported_at: Instant,
    value: Value,
}

/// Two-level map: event type → sub-key → last report.
#[derive(Debug, Default)]
pub struct ReportingCache {
    entries: RwLock<HashMap<String, HashMap<String, Entry>>>,
}

impl ReportingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing was reported yet, otherwise per `strategy`.
    pub fn report_required(
        &self,
        strategy: ReportingStrategy,
        event: &str,
        sub_key: &str,
        value: &Value,
    ) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(event).and_then(|inner| inner.get(sub_key)) {
            None => true,
            Some(entry) => strategy.report_required(entry.value != *value, entry.reported_at),
        }
    }

    /// Structural comparison against the last report; true if none.
    pub fn has_changed(&self, event: &str, sub_key: &str, value: &Value) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(event)
            .and_then(|inner| inner.get(sub_key))
            .is_none_or(|entry| entry.value != *value)
    }

    /// Record a report of `value` at the current time.
    pub fn reported(&self, event: &str, sub_key: &str, value: Value) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(event.to_owned()).or_default().insert(
            sub_key.to_owned(),
            Entry {
                reported_at: Instant::now(),
                value,
            },
        );
    }

    /// Last reported value, if any.
    pub fn last_value(&self, event: &str, sub_key: &str) -> Option<Value> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(event)
            .and_then(|inner| inner.get(sub_key))
            .map(|entry| entry.value.clone())
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
