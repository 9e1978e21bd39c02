//! Change notifications for the presentation layer.
//!
//! Every mutation of a task's status, progress or CPU estimate is published as
//! a `TaskEvent` on a broadcast channel. Events are sent while the emitting
//! task holds its own lock, so delivery is ordered per task. Nothing is
//! ordered across tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::worker::state::{TaskId, TaskStatus};

/// The field that changed and its new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum TaskChange {
    Status {
        status: TaskStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Progress {
        value: u8,
    },
    CpuUsage {
        value: f64,
    },
}

/// A single change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub change: TaskChange,
}

impl TaskEvent {
    /// The field name, matching the serde tag.
    pub fn field(&self) -> &'static str {
        match self.change {
            TaskChange::Status { .. } => "status",
            TaskChange::Progress { .. } => "progress",
            TaskChange::CpuUsage { .. } => "cpu_usage",
        }
    }

    /// The new status, if this is a status change.
    pub fn status(&self) -> Option<TaskStatus> {
        match self.change {
            TaskChange::Status { status, .. } => Some(status),
            _ => None,
        }
    }
}

/// Fan-out of task events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Publish a change. Never blocks; ok if nobody is listening.
    pub fn emit(&self, task_id: TaskId, change: TaskChange) {
        let _ = self.tx.send(TaskEvent {
            task_id,
            at: Utc::now(),
            change,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(TaskId(1), TaskChange::Progress { value: 3 });
        bus.emit(
            TaskId(1),
            TaskChange::Status {
                status: TaskStatus::Paused,
                error: None,
            },
        );

        let first = rx.recv().await.unwrap();
        assert_eq!(first.field(), "progress");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.status(), Some(TaskStatus::Paused));
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(TaskId(2), TaskChange::CpuUsage { value: 1.5 });
    }

    #[test]
    fn event_wire_format() {
        let event = TaskEvent {
            task_id: TaskId(9),
            at: Utc::now(),
            change: TaskChange::Status {
                status: TaskStatus::Error,
                error: Some("scratch setup failed".to_string()),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["task_id"], 9);
        assert_eq!(json["field"], "status");
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "scratch setup failed");

        let progress = TaskEvent {
            task_id: TaskId(9),
            at: Utc::now(),
            change: TaskChange::Progress { value: 40 },
        };
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["field"], "progress");
        assert_eq!(json["value"], 40);
        assert!(json.get("error").is_none());
    }
}
