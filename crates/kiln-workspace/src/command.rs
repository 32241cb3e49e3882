//! Subprocess execution abstraction

use async_trait::async_trait;
use kiln_core::{KilnError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process::Output;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Captured output of a finished process
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `-1` when the process was killed by a signal
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        }
    }
}

/// Trait for running subprocesses (allows mocking in tests)
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` in `cwd` and wait for it to exit.
    ///
    /// A non-zero exit is not an error here; only a failure to spawn is.
    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<CommandOutput>;

    /// Run a command line through `sh -c`
    async fn shell(&self, command_line: &str, cwd: &Path) -> Result<CommandOutput> {
        self.run("sh", &["-c", command_line], cwd).await
    }
}

/// Runs real processes with tokio
#[derive(Debug, Clone, Default)]
pub struct ShellCommandRunner;

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    #[instrument(skip(self), fields(cwd = %cwd.display()))]
    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<CommandOutput> {
        debug!("Executing {} {:?}", program, args);

        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| KilnError::execution(format!("Failed to spawn {}: {}", program, e)))?;

        let output = CommandOutput::from(output);
        if !output.is_success() {
            debug!("{} exited with {}: {}", program, output.exit_code, output.stderr.trim());
        }
        Ok(output)
    }
}

/// Mock runner for testing
///
/// Responses are keyed by the full command line (`program arg1 arg2`);
/// shell commands are keyed as `sh -c <command line>`.
#[derive(Clone, Default)]
pub struct MockCommandRunner {
    responses: HashMap<String, CommandOutput>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, command: &str, output: CommandOutput) -> Self {
        self.responses.insert(command.to_string(), output);
        self
    }

    pub fn with_shell_response(self, command_line: &str, output: CommandOutput) -> Self {
        self.with_response(&format!("sh -c {}", command_line), output)
    }

    /// Command lines run so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, program: &str, args: &[&str], _cwd: &Path) -> Result<CommandOutput> {
        let key = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.clone());
        }
        self.responses
            .get(&key)
            .cloned()
            .ok_or_else(|| KilnError::execution(format!("No mock response for: {}", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_runner() {
        let runner = MockCommandRunner::new()
            .with_response("git status --porcelain", CommandOutput::success(" M src/lib.rs\n"))
            .with_shell_response("make", CommandOutput::failure(2, "no rule"));

        let out = runner
            .run("git", &["status", "--porcelain"], Path::new("/repo"))
            .await
            .unwrap();
        assert!(out.is_success());
        assert_eq!(out.stdout, " M src/lib.rs\n");

        let out = runner.shell("make", Path::new("/repo")).await.unwrap();
        assert_eq!(out.exit_code, 2);

        assert!(runner.run("ls", &[], Path::new("/repo")).await.is_err());
        assert_eq!(
            runner.calls(),
            vec!["git status --porcelain", "sh -c make", "ls"]
        );
    }

    #[tokio::test]
    async fn test_shell_runner_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellCommandRunner::new();

        let out = runner.shell("echo hello", dir.path()).await.unwrap();
        assert!(out.is_success());
        assert_eq!(out.stdout.trim(), "hello");

        let out = runner
            .shell("echo oops >&2; exit 3", dir.path())
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "oops");
    }
}
