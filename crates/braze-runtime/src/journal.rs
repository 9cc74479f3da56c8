//! Attributed fault journal.
//!
//! Plugin failures are contained rather than propagated, which makes the
//! journal the only channel through which operators can see them: every
//! contained fault is recorded here with plugin attribution and a
//! classification. The journal is a bounded in-memory ring — the resource
//! reclaimer prunes old entries, and the capacity cap bounds growth even
//! between reclaimer passes.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Default maximum number of retained records.
const DEFAULT_CAPACITY: usize = 1000;

/// Classification of a journalled fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A plugin's initialization routine failed during load.
    Initialization,
    /// A recurring-schedule expression was rejected.
    ScheduleInvalid,
    /// A handler failed during live event dispatch.
    HandlerFault,
    /// A scheduled-task callback failed.
    TaskFault,
    /// The on-disk plugin set could not be updated.
    Persistence,
    /// A façade call made by the plugin failed.
    Facade,
    /// Rollback after a partially failed enable itself failed.
    Rollback,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Initialization => "initialization",
            FaultKind::ScheduleInvalid => "schedule-invalid",
            FaultKind::HandlerFault => "handler-fault",
            FaultKind::TaskFault => "task-fault",
            FaultKind::Persistence => "persistence",
            FaultKind::Facade => "facade",
            FaultKind::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attributed fault record.
#[derive(Debug, Clone)]
pub struct FaultRecord {
    pub at: DateTime<Utc>,
    pub plugin: String,
    pub kind: FaultKind,
    pub message: String,
}

/// Bounded journal of attributed plugin faults.
#[derive(Debug)]
pub struct ErrorJournal {
    records: Mutex<VecDeque<FaultRecord>>,
    capacity: usize,
}

impl ErrorJournal {
    /// Creates a journal with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a journal retaining at most `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Appends a record, evicting the oldest when over capacity.
    pub fn record(&self, plugin: &str, kind: FaultKind, message: impl Into<String>) {
        let mut records = self.records.lock();
        records.push_back(FaultRecord {
            at: Utc::now(),
            plugin: plugin.to_string(),
            kind,
            message: message.into(),
        });
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    /// Snapshot of all retained records, oldest first.
    pub fn records(&self) -> Vec<FaultRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Records attributed to one plugin, oldest first.
    pub fn for_plugin(&self, plugin: &str) -> Vec<FaultRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.plugin == plugin)
            .cloned()
            .collect()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drops records older than `max_age`.
    pub fn prune_older_than(&self, max_age: Duration) {
        let cutoff = Utc::now() - max_age;
        self.records.lock().retain(|r| r.at >= cutoff);
    }
}

impl Default for ErrorJournal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_evicts_oldest() {
        let journal = ErrorJournal::with_capacity(3);
        for i in 0..5 {
            journal.record("p", FaultKind::HandlerFault, format!("fault {i}"));
        }
        let records = journal.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].message, "fault 2");
        assert_eq!(records[2].message, "fault 4");
    }

    #[test]
    fn filters_by_plugin() {
        let journal = ErrorJournal::new();
        journal.record("a", FaultKind::HandlerFault, "one");
        journal.record("b", FaultKind::TaskFault, "two");
        journal.record("a", FaultKind::ScheduleInvalid, "three");

        let for_a = journal.for_plugin("a");
        assert_eq!(for_a.len(), 2);
        assert!(for_a.iter().all(|r| r.plugin == "a"));
    }

    #[test]
    fn prune_keeps_recent_records() {
        let journal = ErrorJournal::new();
        journal.record("a", FaultKind::Persistence, "recent");
        journal.prune_older_than(Duration::hours(1));
        assert_eq!(journal.len(), 1);
        journal.prune_older_than(Duration::zero() - Duration::seconds(1));
        assert!(journal.is_empty());
    }
}
