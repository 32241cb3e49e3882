//! Shell command steps

use kiln_core::{KilnError, Result, StepOutput, TaskContext, TerminalCommandParams};
use kiln_workspace::CommandRunner;

/// Run the command through `sh -c`, in `cwd` or the workspace root.
///
/// Exit code 0 yields a `Command` output; anything else is an `Execution`
/// error carrying stderr and the exit code.
pub(crate) async fn run(
    runner: &dyn CommandRunner,
    params: &TerminalCommandParams,
    context: &TaskContext,
) -> Result<StepOutput> {
    if params.command.trim().is_empty() {
        return Err(KilnError::UserInput(
            "terminal_command requires a non-empty command".to_string(),
        ));
    }

    let cwd = match &params.cwd {
        Some(cwd) if cwd.is_absolute() => cwd.clone(),
        Some(cwd) => context.workspace_root.join(cwd),
        None => context.workspace_root.clone(),
    };

    tracing::info!("Running `{}` in {}", params.command, cwd.display());
    let output = runner.shell(&params.command, &cwd).await?;

    if output.is_success() {
        Ok(StepOutput::Command {
            success: true,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
        })
    } else {
        let stderr = output.stderr.trim();
        Err(KilnError::Execution {
            message: if stderr.is_empty() {
                format!("`{}` failed", params.command)
            } else {
                stderr.to_string()
            },
            exit_code: Some(output.exit_code),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_workspace::{CommandOutput, MockCommandRunner};

    #[tokio::test]
    async fn test_success_and_failure() {
        let runner = MockCommandRunner::new()
            .with_shell_response("cargo build", CommandOutput::success("Finished\n"))
            .with_shell_response("cargo test", CommandOutput::failure(101, "test failed\n"));
        let context = TaskContext::new("/work");

        let out = run(
            &runner,
            &TerminalCommandParams::new("cargo build", None).unwrap(),
            &context,
        )
        .await
        .unwrap();
        assert_eq!(
            out,
            StepOutput::Command {
                success: true,
                stdout: "Finished\n".to_string(),
                stderr: String::new(),
                exit_code: 0
            }
        );

        let err = run(
            &runner,
            &TerminalCommandParams::new("cargo test", None).unwrap(),
            &context,
        )
        .await
        .unwrap_err();
        match err {
            KilnError::Execution { message, exit_code } => {
                assert_eq!(message, "test failed");
                assert_eq!(exit_code, Some(101));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_real_command_in_workspace_root() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let runner = kiln_workspace::ShellCommandRunner::new();
        let context = TaskContext::new(dir.path());

        let out = run(
            &runner,
            &TerminalCommandParams::new("ls", None).unwrap(),
            &context,
        )
        .await
        .unwrap();
        match out {
            StepOutput::Command { stdout, .. } => assert!(stdout.contains("marker.txt")),
            other => panic!("unexpected output: {:?}", other),
        }
    }
}
