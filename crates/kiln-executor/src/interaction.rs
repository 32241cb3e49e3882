//! Caller-facing prompts raised during execution

use async_trait::async_trait;
use kiln_core::{FileOperationKind, Result, TaskStep};
use serde_json::json;
use std::path::PathBuf;

/// A pending file change waiting for approval
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationRequest {
    pub step_id: String,
    pub path: PathBuf,
    pub operation: FileOperationKind,
    /// Rendered diff between the current and proposed content
    pub diff: String,
}

impl ConfirmationRequest {
    /// JSON payload for UI surfaces
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "stepId": self.step_id,
            "path": self.path,
            "operation": self.operation,
            "diff": self.diff,
        })
    }
}

/// Yes/no approval and interactive path lookup, supplied by the UI.
///
/// Implementations may wait as long as they like; the orchestrator races
/// them against task cancellation.
#[async_trait]
pub trait ConfirmationChannel: Send + Sync {
    /// Approve (`true`) or decline (`false`) a change
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<bool>;

    /// Ask the user for the file a step should operate on
    async fn request_file_path(&self, _step: &TaskStep) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Approves every change
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationChannel for AutoApprove {
    async fn confirm(&self, _request: &ConfirmationRequest) -> Result<bool> {
        Ok(true)
    }
}

/// Declines every change
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDecline;

#[async_trait]
impl ConfirmationChannel for AutoDecline {
    async fn confirm(&self, _request: &ConfirmationRequest) -> Result<bool> {
        Ok(false)
    }
}
