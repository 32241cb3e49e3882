//! File mutations with the diff/confirmation workflow

use kiln_core::{FileOperationKind, KilnError, Result, StepOutput};
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::diff::render_diff;
use crate::interaction::{ConfirmationChannel, ConfirmationRequest};

/// One resolved file change
pub(crate) struct FileChange<'a> {
    pub step_id: &'a str,
    /// `None` infers `replace` for an existing file and `create` otherwise
    pub operation: Option<FileOperationKind>,
    pub path: &'a Path,
    pub content: Option<&'a str>,
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> KilnError {
    KilnError::execution(format!("Failed to {} {}: {}", action, path.display(), e))
}

/// Apply a file change.
///
/// Writes over existing content (modify, replace, or create on a file that
/// already exists) render a diff and, when `require_confirmation` is set,
/// wait for approval. A declined change returns `ChangeDeclined` and leaves
/// the file untouched. Delete applies without confirmation.
pub(crate) async fn apply(
    change: FileChange<'_>,
    require_confirmation: bool,
    channel: &dyn ConfirmationChannel,
) -> Result<StepOutput> {
    let path = change.path;
    let exists = fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false);
    let operation = change.operation.unwrap_or(if exists {
        FileOperationKind::Replace
    } else {
        FileOperationKind::Create
    });

    if operation == FileOperationKind::Delete {
        if !exists {
            return Err(KilnError::execution(format!(
                "Cannot delete missing file {}",
                path.display()
            )));
        }
        fs::remove_file(path)
            .await
            .map_err(|e| io_error("delete", path, e))?;
        info!("Deleted file: {}", path.display());
        return Ok(StepOutput::FileDeleted {
            path: path.to_path_buf(),
        });
    }

    if operation == FileOperationKind::Modify && !exists {
        return Err(KilnError::execution(format!(
            "Cannot modify missing file {}",
            path.display()
        )));
    }

    let content = change.content.ok_or_else(|| {
        KilnError::UserInput(format!(
            "file_operation {} on {} requires content",
            operation,
            path.display()
        ))
    })?;

    let diff = if exists {
        let existing = fs::read_to_string(path)
            .await
            .map_err(|e| io_error("read", path, e))?;
        let (diff, summary) = render_diff(path, &existing, content);

        if require_confirmation {
            let request = ConfirmationRequest {
                step_id: change.step_id.to_string(),
                path: path.to_path_buf(),
                operation,
                diff: diff.clone(),
            };
            if !channel.confirm(&request).await? {
                info!("Change to {} declined ({})", path.display(), summary);
                return Ok(StepOutput::ChangeDeclined {
                    path: path.to_path_buf(),
                    cancelled: true,
                });
            }
        }
        Some(diff)
    } else {
        None
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directory", parent, e))?;
        }
    }
    fs::write(path, content)
        .await
        .map_err(|e| io_error("write", path, e))?;

    if exists {
        info!("Modified file: {}", path.display());
    } else {
        info!("Created file: {}", path.display());
    }

    Ok(StepOutput::FileChanged {
        operation,
        path: path.to_path_buf(),
        bytes_written: content.len(),
        diff,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AutoApprove, AutoDecline};
    use tempfile::TempDir;

    fn change<'a>(
        operation: Option<FileOperationKind>,
        path: &'a Path,
        content: Option<&'a str>,
    ) -> FileChange<'a> {
        FileChange {
            step_id: "step-1",
            operation,
            path,
            content,
        }
    }

    #[tokio::test]
    async fn test_create_writes_new_file_with_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("src/new.rs");

        let out = apply(change(None, &path, Some("fn main() {}\n")), true, &AutoDecline)
            .await
            .unwrap();
        assert!(matches!(
            out,
            StepOutput::FileChanged {
                operation: FileOperationKind::Create,
                diff: None,
                ..
            }
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fn main() {}\n");
    }

    #[tokio::test]
    async fn test_replace_declined_leaves_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "old\n").unwrap();

        let out = apply(change(None, &path, Some("new\n")), true, &AutoDecline)
            .await
            .unwrap();
        assert_eq!(
            out,
            StepOutput::ChangeDeclined {
                path: path.clone(),
                cancelled: true
            }
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\n");
    }

    #[tokio::test]
    async fn test_modify_approved_carries_diff() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "old\n").unwrap();

        let out = apply(
            change(Some(FileOperationKind::Modify), &path, Some("new\n")),
            true,
            &AutoApprove,
        )
        .await
        .unwrap();
        match out {
            StepOutput::FileChanged { diff, operation, .. } => {
                assert_eq!(operation, FileOperationKind::Modify);
                assert!(diff.unwrap().contains("- old"));
            }
            other => panic!("unexpected output: {:?}", other),
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\n");
    }

    #[tokio::test]
    async fn test_confirmation_disabled_applies_directly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "old\n").unwrap();

        apply(
            change(Some(FileOperationKind::Replace), &path, Some("new\n")),
            false,
            &AutoDecline,
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\n");
    }

    #[tokio::test]
    async fn test_delete_skips_confirmation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.txt");
        std::fs::write(&path, "bye").unwrap();

        let out = apply(
            change(Some(FileOperationKind::Delete), &path, None),
            true,
            &AutoDecline,
        )
        .await
        .unwrap();
        assert!(matches!(out, StepOutput::FileDeleted { .. }));
        assert!(!path.exists());

        let err = apply(
            change(Some(FileOperationKind::Delete), &path, None),
            true,
            &AutoApprove,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, KilnError::Execution { .. }));
    }

    #[tokio::test]
    async fn test_missing_content_and_missing_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");

        let err = apply(change(None, &path, None), true, &AutoApprove)
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::UserInput(_)));

        let err = apply(
            change(Some(FileOperationKind::Modify), &path, Some("x")),
            true,
            &AutoApprove,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, KilnError::Execution { .. }));
    }
}
