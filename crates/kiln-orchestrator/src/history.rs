//! Bounded task history

use kiln_core::{Result, TaskResult};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

use crate::store::KeyValueStore;

/// Store key holding the serialized history array
pub const HISTORY_KEY: &str = "kiln.taskHistory";

/// Default number of results kept
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// FIFO-bounded list of finished tasks, oldest first
#[derive(Debug, Clone)]
pub struct TaskHistory {
    entries: VecDeque<TaskResult>,
    max_entries: usize,
}

impl TaskHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Append a result, evicting the oldest entries past the bound.
    /// Returns the evicted results.
    pub fn push(&mut self, result: TaskResult) -> Vec<TaskResult> {
        self.entries.push_back(result);
        let mut evicted = Vec::new();
        while self.entries.len() > self.max_entries {
            if let Some(old) = self.entries.pop_front() {
                debug!("Evicted task {} from history", old.task_id);
                evicted.push(old);
            }
        }
        evicted
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskResult> {
        self.entries.iter().find(|r| r.task_id == task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<TaskResult> {
        self.entries.iter().cloned().collect()
    }

    /// Load from the store; entries beyond the bound keep the newest
    pub async fn load(store: &dyn KeyValueStore, max_entries: usize) -> Result<Self> {
        let mut history = Self::new(max_entries);
        if let Some(value) = store.get(HISTORY_KEY).await? {
            let results: Vec<TaskResult> = serde_json::from_value(value)?;
            for result in results {
                history.push(result);
            }
            info!("Loaded {} task results from history", history.len());
        }
        Ok(history)
    }

    pub async fn persist(&self, store: &dyn KeyValueStore) -> Result<()> {
        let value = serde_json::to_value(&self.entries)?;
        store.set(HISTORY_KEY, value).await
    }
}

/// History snapshot plus the store it is written through
pub(crate) struct PersistedHistory {
    pub history: TaskHistory,
    pub store: Arc<dyn KeyValueStore>,
}
