//! Run events
//!
//! Append-only record of what a run did and how long each step took.
//! - Event: envelope with id + timestamp + kind
//! - EventKind: run-level, task-level and signal events
//! - EventLog: thread-safe, cheap to clone (clones share the log)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Single event in a run's log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        dag: Arc<str>,
        run_id: String,
        run_folder: String,
        task_count: usize,
    },
    RunCompleted {
        dag: Arc<str>,
        total_duration_ms: u64,
    },
    RunFailed {
        dag: Arc<str>,
        error: String,
        failed_task: Option<Arc<str>>,
    },

    // ═══════════════════════════════════════════
    // TASK LEVEL
    // ═══════════════════════════════════════════
    TaskStarted {
        task: Arc<str>,
    },
    TaskCompleted {
        task: Arc<str>,
        duration_ms: u64,
    },
    TaskFailed {
        task: Arc<str>,
        error: String,
        duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // COMPLETION SIGNALS
    // ═══════════════════════════════════════════
    SignalWritten {
        path: String,
        success: bool,
    },
}

impl EventKind {
    /// Task label if the event is task-related
    pub fn task(&self) -> Option<&str> {
        match self {
            Self::TaskStarted { task }
            | Self::TaskCompleted { task, .. }
            | Self::TaskFailed { task, .. } => Some(task),
            Self::RunStarted { .. }
            | Self::RunCompleted { .. }
            | Self::RunFailed { .. }
            | Self::SignalWritten { .. } => None,
        }
    }

    pub fn is_run_event(&self) -> bool {
        matches!(
            self,
            Self::RunStarted { .. } | Self::RunCompleted { .. } | Self::RunFailed { .. }
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append an event, returning its ID
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn filter_task(&self, task: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.task() == Some(task))
            .collect()
    }

    pub fn run_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_run_event())
            .collect()
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.events()).unwrap_or(serde_json::Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_label_extraction() {
        let started = EventKind::TaskStarted {
            task: "extract".into(),
        };
        assert_eq!(started.task(), Some("extract"));

        let signal = EventKind::SignalWritten {
            path: "runs/x/.dag_success".into(),
            success: true,
        };
        assert_eq!(signal.task(), None);
        assert!(!signal.is_run_event());
    }

    #[test]
    fn serializes_with_type_tag() {
        let kind = EventKind::TaskCompleted {
            task: "load".into(),
            duration_ms: 150,
        };

        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["type"], "task_completed");
        assert_eq!(value["task"], "load");
        assert_eq!(value["duration_ms"], 150);
    }

    #[test]
    fn deserializes_from_tagged_json() {
        let kind: EventKind = serde_json::from_value(json!({
            "type": "task_failed",
            "task": "load",
            "error": "boom",
            "duration_ms": 3
        }))
        .unwrap();
        assert_eq!(
            kind,
            EventKind::TaskFailed {
                task: "load".into(),
                error: "boom".into(),
                duration_ms: 3,
            }
        );
    }

    #[test]
    fn emit_returns_monotonic_ids() {
        let log = EventLog::new();
        let first = log.emit(EventKind::TaskStarted { task: "a".into() });
        let second = log.emit(EventKind::TaskStarted { task: "b".into() });
        assert_eq!((first, second), (0, 1));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn filters_by_task_and_level() {
        let log = EventLog::new();
        log.emit(EventKind::RunStarted {
            dag: "daily".into(),
            run_id: "r".into(),
            run_folder: "runs/r".into(),
            task_count: 2,
        });
        log.emit(EventKind::TaskStarted { task: "a".into() });
        log.emit(EventKind::TaskCompleted {
            task: "a".into(),
            duration_ms: 1,
        });
        log.emit(EventKind::TaskStarted { task: "b".into() });

        assert_eq!(log.filter_task("a").len(), 2);
        assert_eq!(log.run_events().len(), 1);
        assert_eq!(log.to_json()[1]["kind"]["type"], "task_started");
    }

    #[test]
    fn clones_share_the_log() {
        let log = EventLog::new();
        let cloned = log.clone();
        log.emit(EventKind::TaskStarted { task: "a".into() });
        assert_eq!(cloned.len(), 1);
    }
}
