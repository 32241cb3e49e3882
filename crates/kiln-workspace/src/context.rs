//! Task context gathering

use async_trait::async_trait;
use kiln_core::fail_open::fail_open;
use kiln_core::{ProjectType, Result, TaskContext, TaskParams, VcsState};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{CommandRunner, Manifest};

const RECENT_COMMITS: &str = "10";

/// Produces the workspace snapshot a task runs against
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn analyze(&self, params: &TaskParams) -> Result<TaskContext>;
}

/// Gathers context from the filesystem and git
pub struct WorkspaceContextProvider {
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    preferences: BTreeMap<String, String>,
}

impl WorkspaceContextProvider {
    pub fn new(root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            root: root.into(),
            runner,
            preferences: BTreeMap::new(),
        }
    }

    pub fn with_preferences(mut self, preferences: BTreeMap<String, String>) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    async fn git(&self, args: &[&str]) -> Result<Option<String>> {
        let output = self.runner.run("git", args, &self.root).await?;
        Ok(output.is_success().then_some(output.stdout))
    }

    /// `Ok(None)` outside a git work tree
    async fn vcs_state(&self) -> Result<Option<VcsState>> {
        if self
            .git(&["rev-parse", "--is-inside-work-tree"])
            .await?
            .is_none()
        {
            return Ok(None);
        }

        let branch = self
            .git(&["rev-parse", "--abbrev-ref", "HEAD"])
            .await?
            .map(|s| s.trim().to_string())
            .filter(|b| !b.is_empty() && b != "HEAD");

        let changed_files: Vec<String> = self
            .git(&["status", "--porcelain"])
            .await?
            .unwrap_or_default()
            .lines()
            .filter(|l| l.len() > 3)
            .map(|l| l[3..].trim().to_string())
            .collect();

        Ok(Some(VcsState {
            branch,
            has_uncommitted_changes: !changed_files.is_empty(),
            changed_files,
        }))
    }

    async fn recent_changes(&self) -> Result<Vec<String>> {
        Ok(self
            .git(&["log", "--oneline", "-n", RECENT_COMMITS])
            .await?
            .unwrap_or_default()
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

/// Language implied by a file extension
fn language_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    let language = match ext.to_lowercase().as_str() {
        "rs" => "rust",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "py" => "python",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "md" => "markdown",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "sh" => "shell",
        _ => return None,
    };
    Some(language)
}

#[async_trait]
impl ContextProvider for WorkspaceContextProvider {
    async fn analyze(&self, params: &TaskParams) -> Result<TaskContext> {
        let mut context = TaskContext::new(self.root.clone());
        context.project_type = ProjectType::detect(&self.root);
        context.active_file = params.target_file.as_deref().map(|p| self.resolve(p));
        context.open_files = params.open_files.iter().map(|p| self.resolve(p)).collect();
        context.user_preferences = self.preferences.clone();

        context.language = params
            .language
            .clone()
            .or_else(|| {
                context
                    .active_file
                    .as_deref()
                    .and_then(language_for)
                    .map(String::from)
            })
            .or_else(|| context.project_type.primary_language().map(String::from));

        let root = self.root.clone();
        if let Some(Some(manifest)) =
            fail_open("context::manifest", || async move { Manifest::load(&root) }).await
        {
            context.dependencies = manifest.all_dependencies();
            context.build_scripts = manifest.scripts;
        }

        context.vcs = fail_open("context::vcs", || self.vcs_state()).await.flatten();
        if context.vcs.is_some() {
            context.recent_changes = fail_open("context::recent_changes", || self.recent_changes())
                .await
                .unwrap_or_default();
        }

        tracing::debug!(
            "Analyzed workspace {} ({}, {} deps)",
            self.root.display(),
            context.project_type,
            context.dependencies.len()
        );
        Ok(context)
    }
}

/// Returns a fixed context, filling in the task's files and language
#[derive(Debug, Clone)]
pub struct StaticContextProvider {
    context: TaskContext,
}

impl StaticContextProvider {
    pub fn new(context: TaskContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ContextProvider for StaticContextProvider {
    async fn analyze(&self, params: &TaskParams) -> Result<TaskContext> {
        let mut context = self.context.clone();
        if let Some(file) = &params.target_file {
            context.active_file = Some(if file.is_absolute() {
                file.clone()
            } else {
                context.workspace_root.join(file)
            });
        }
        if params.language.is_some() {
            context.language = params.language.clone();
        }
        if !params.open_files.is_empty() {
            context.open_files = params.open_files.clone();
        }
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandOutput, MockCommandRunner};
    use std::fs;
    use tempfile::TempDir;

    fn git_repo_runner() -> MockCommandRunner {
        MockCommandRunner::new()
            .with_response(
                "git rev-parse --is-inside-work-tree",
                CommandOutput::success("true\n"),
            )
            .with_response("git rev-parse --abbrev-ref HEAD", CommandOutput::success("main\n"))
            .with_response(
                "git status --porcelain",
                CommandOutput::success(" M src/index.ts\n?? notes.txt\n"),
            )
            .with_response(
                "git log --oneline -n 10",
                CommandOutput::success("abc123 Add index\ndef456 Initial commit\n"),
            )
    }

    #[tokio::test]
    async fn test_analyze_node_workspace() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name":"app","scripts":{"test":"jest"},"dependencies":{"express":"4"}}"#,
        )
        .unwrap();

        let mut prefs = BTreeMap::new();
        prefs.insert("style".to_string(), "functional".to_string());
        let provider = WorkspaceContextProvider::new(dir.path(), Arc::new(git_repo_runner()))
            .with_preferences(prefs);

        let params = TaskParams::new("add a route").with_target_file("src/index.ts");
        let context = provider.analyze(&params).await.unwrap();

        assert_eq!(context.project_type, ProjectType::Node);
        assert_eq!(context.language.as_deref(), Some("typescript"));
        assert_eq!(context.active_file, Some(dir.path().join("src/index.ts")));
        assert_eq!(context.dependencies, vec!["express"]);
        assert_eq!(context.build_scripts.get("test").map(String::as_str), Some("jest"));
        assert_eq!(context.user_preferences.get("style").map(String::as_str), Some("functional"));

        let vcs = context.vcs.as_ref().unwrap();
        assert_eq!(vcs.branch.as_deref(), Some("main"));
        assert_eq!(vcs.changed_files, vec!["src/index.ts", "notes.txt"]);
        assert!(context.has_uncommitted_changes());
        assert_eq!(context.recent_changes.len(), 2);
    }

    #[tokio::test]
    async fn test_analyze_outside_git() {
        let dir = TempDir::new().unwrap();
        let runner = MockCommandRunner::new().with_response(
            "git rev-parse --is-inside-work-tree",
            CommandOutput::failure(128, "fatal: not a git repository"),
        );
        let provider = WorkspaceContextProvider::new(dir.path(), Arc::new(runner));

        let context = provider.analyze(&TaskParams::new("explain")).await.unwrap();
        assert_eq!(context.project_type, ProjectType::Unknown);
        assert!(context.vcs.is_none());
        assert!(context.recent_changes.is_empty());
        assert!(context.language.is_none());
    }

    #[tokio::test]
    async fn test_static_provider_applies_params() {
        let provider = StaticContextProvider::new(TaskContext::new("/work"));
        let params = TaskParams::new("x").with_target_file("lib.rs");
        let context = provider.analyze(&params).await.unwrap();
        assert_eq!(context.active_file, Some(PathBuf::from("/work/lib.rs")));
    }
}
