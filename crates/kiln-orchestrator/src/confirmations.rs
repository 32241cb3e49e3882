//! Pending file-change approvals

use chrono::{DateTime, Utc};
use kiln_core::FileOperationKind;
use kiln_executor::ConfirmationRequest;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

/// A change waiting for `Orchestrator::resolve_confirmation`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingConfirmation {
    pub id: String,
    pub task_id: String,
    pub step_id: String,
    pub path: PathBuf,
    pub operation: FileOperationKind,
    pub diff: String,
    pub requested_at: DateTime<Utc>,
}

struct Waiter {
    pending: PendingConfirmation,
    tx: oneshot::Sender<bool>,
}

#[derive(Default)]
pub(crate) struct Confirmations {
    waiters: Mutex<HashMap<String, Waiter>>,
}

impl Confirmations {
    pub async fn register(
        &self,
        task_id: &str,
        request: &ConfirmationRequest,
    ) -> (PendingConfirmation, oneshot::Receiver<bool>) {
        let pending = PendingConfirmation {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            step_id: request.step_id.clone(),
            path: request.path.clone(),
            operation: request.operation,
            diff: request.diff.clone(),
            requested_at: Utc::now(),
        };
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(
            pending.id.clone(),
            Waiter {
                pending: pending.clone(),
                tx,
            },
        );
        (pending, rx)
    }

    /// Deliver a decision. Returns false for unknown or already resolved ids.
    pub async fn resolve(&self, id: &str, approved: bool) -> bool {
        match self.waiters.lock().await.remove(id) {
            Some(waiter) => waiter.tx.send(approved).is_ok(),
            None => false,
        }
    }

    pub async fn remove(&self, id: &str) {
        self.waiters.lock().await.remove(id);
    }

    pub async fn list(&self) -> Vec<PendingConfirmation> {
        let mut pending: Vec<_> = self
            .waiters
            .lock()
            .await
            .values()
            .map(|w| w.pending.clone())
            .collect();
        pending.sort_by_key(|p| p.requested_at);
        pending
    }
}
