//! Lifecycle notifications for observers

use chrono::{DateTime, Utc};
use kiln_core::TaskStatus;
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// What changed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleKind {
    StatusChanged { status: TaskStatus },
    StepStarted { index: usize, step_id: String },
    StepCompleted { index: usize, progress: f32 },
    StepFailed { index: usize, error: String },
    ConfirmationRequested { confirmation_id: String },
    ConfirmationResolved { confirmation_id: String, approved: bool },
    Finished { status: TaskStatus },
}

/// Emitted after every status, step or progress mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    pub task_id: String,
    pub kind: LifecycleKind,
    pub at: DateTime<Utc>,
}

/// Fan-out of lifecycle events. Sending never blocks and never fails the
/// task; lagging receivers drop old events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, task_id: &str, kind: LifecycleKind) {
        // No receivers is fine
        let _ = self.tx.send(LifecycleEvent {
            task_id: task_id.to_string(),
            kind,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        bus.publish("t-0", LifecycleKind::Finished {
            status: TaskStatus::Completed,
        });

        let mut rx = bus.subscribe();
        bus.publish(
            "t-1",
            LifecycleKind::StatusChanged {
                status: TaskStatus::Planning,
            },
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.task_id, "t-1");
        assert_eq!(
            serde_json::to_value(&event.kind).unwrap(),
            serde_json::json!({"type": "status_changed", "status": "planning"})
        );
    }
}
