//! Core type definitions for kiln orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::{KilnError, Result};

/// Seconds budgeted per step when no better estimate exists
pub const SECONDS_PER_STEP: u64 = 60;

/// Kind of goal a task pursues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Implement,
    Refactor,
    Fix,
    Test,
    Document,
    Review,
    Explain,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        Self::Implement,
        Self::Refactor,
        Self::Fix,
        Self::Test,
        Self::Document,
        Self::Review,
        Self::Explain,
    ];
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Implement => write!(f, "implement"),
            Self::Refactor => write!(f, "refactor"),
            Self::Fix => write!(f, "fix"),
            Self::Test => write!(f, "test"),
            Self::Document => write!(f, "document"),
            Self::Review => write!(f, "review"),
            Self::Explain => write!(f, "explain"),
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "implement" | "feature" | "generate" => Ok(Self::Implement),
            "refactor" => Ok(Self::Refactor),
            "fix" | "bugfix" | "bug_fix" => Ok(Self::Fix),
            "test" | "tests" => Ok(Self::Test),
            "document" | "docs" | "documentation" => Ok(Self::Document),
            "review" => Ok(Self::Review),
            "explain" => Ok(Self::Explain),
            _ => Err(format!("Invalid task type: {}", s)),
        }
    }
}

/// Task lifecycle status
///
/// `Analyzing` gathers context, `Planning` builds the step list, and
/// `Executing` runs it. `AwaitingConfirmation` is entered while a file
/// mutation waits for approval and returns to `Executing` afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Analyzing,
    Planning,
    Executing,
    AwaitingConfirmation,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Analyzing => write!(f, "analyzing"),
            Self::Planning => write!(f, "planning"),
            Self::Executing => write!(f, "executing"),
            Self::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Step status. Only ever moves forward:
/// `Pending -> Running -> Completed | Failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Discriminant of a [`StepAction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    CodeGeneration,
    FileOperation,
    TerminalCommand,
    Analysis,
    Design,
    Test,
    Documentation,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CodeGeneration => write!(f, "code_generation"),
            Self::FileOperation => write!(f, "file_operation"),
            Self::TerminalCommand => write!(f, "terminal_command"),
            Self::Analysis => write!(f, "analysis"),
            Self::Design => write!(f, "design"),
            Self::Test => write!(f, "test"),
            Self::Documentation => write!(f, "documentation"),
        }
    }
}

/// What a file operation does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperationKind {
    Create,
    Modify,
    Delete,
    Replace,
}

impl FileOperationKind {
    /// Operations that overwrite existing content and therefore need approval
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, Self::Modify | Self::Replace)
    }
}

impl std::fmt::Display for FileOperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Modify => write!(f, "modify"),
            Self::Delete => write!(f, "delete"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CodeGenerationParams {
    pub language: Option<String>,
    #[serde(alias = "file_path", alias = "filePath")]
    pub target_file: Option<PathBuf>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileOperationParams {
    pub operation: Option<FileOperationKind>,
    #[serde(alias = "file_path", alias = "path")]
    pub file_path: Option<PathBuf>,
    pub content: Option<String>,
}

/// A shell command. Construct through [`TerminalCommandParams::new`] so an
/// empty command is rejected up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalCommandParams {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl TerminalCommandParams {
    pub fn new(command: impl Into<String>, cwd: Option<PathBuf>) -> Result<Self> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(KilnError::UserInput(
                "terminal_command requires a non-empty command".to_string(),
            ));
        }
        Ok(Self { command, cwd })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoteParams {
    pub focus: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestParams {
    pub target: Option<String>,
    pub framework: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DocumentationParams {
    #[serde(alias = "file_path", alias = "path")]
    pub file_path: Option<PathBuf>,
}

/// What a step does, with a payload typed per kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "snake_case")]
pub enum StepAction {
    CodeGeneration(CodeGenerationParams),
    FileOperation(FileOperationParams),
    TerminalCommand(TerminalCommandParams),
    Analysis(NoteParams),
    Design(NoteParams),
    Test(TestParams),
    Documentation(DocumentationParams),
}

impl StepAction {
    /// Build an action from a loosely typed kind name and JSON parameters.
    ///
    /// Unknown kinds degrade to `analysis` with a warning. A known kind whose
    /// parameters do not validate is a `UserInput` error.
    pub fn from_parts(kind: &str, parameters: serde_json::Value) -> Result<Self> {
        let parameters = match parameters {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };

        let normalized = kind.trim().to_lowercase().replace('-', "_");
        let action = match normalized.as_str() {
            "code_generation" | "codegen" | "generate" => {
                Self::CodeGeneration(serde_json::from_value(parameters)?)
            }
            "file_operation" | "file" => Self::FileOperation(serde_json::from_value(parameters)?),
            "terminal_command" | "terminal" | "command" | "shell" => {
                let command = parameters
                    .get("command")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let cwd = parameters
                    .get("cwd")
                    .and_then(|v| v.as_str())
                    .map(PathBuf::from);
                Self::TerminalCommand(TerminalCommandParams::new(command, cwd)?)
            }
            "analysis" | "analyze" => Self::Analysis(serde_json::from_value(parameters)?),
            "design" => Self::Design(serde_json::from_value(parameters)?),
            "test" | "testing" => Self::Test(serde_json::from_value(parameters)?),
            "documentation" | "docs" => Self::Documentation(serde_json::from_value(parameters)?),
            other => {
                tracing::warn!("Unknown step type '{}', treating as analysis", other);
                Self::Analysis(NoteParams {
                    focus: Some(format!("unrecognized step type: {}", other)),
                })
            }
        };
        Ok(action)
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Self::CodeGeneration(_) => StepKind::CodeGeneration,
            Self::FileOperation(_) => StepKind::FileOperation,
            Self::TerminalCommand(_) => StepKind::TerminalCommand,
            Self::Analysis(_) => StepKind::Analysis,
            Self::Design(_) => StepKind::Design,
            Self::Test(_) => StepKind::Test,
            Self::Documentation(_) => StepKind::Documentation,
        }
    }

    pub fn analysis() -> Self {
        Self::Analysis(NoteParams::default())
    }
}

/// One atomic unit of work within a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: String,
    pub name: String,
    pub description: String,
    pub action: StepAction,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<StepOutput>,
    pub error: Option<String>,
}

impl TaskStep {
    pub fn new(id: impl Into<String>, name: impl Into<String>, action: StepAction) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            action,
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }

    /// `Pending -> Running`
    pub fn start(&mut self) -> Result<()> {
        self.advance(StepStatus::Pending, StepStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// `Running -> Completed`
    pub fn complete(&mut self, output: StepOutput) -> Result<()> {
        self.advance(StepStatus::Running, StepStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        self.result = Some(output);
        Ok(())
    }

    /// `Running -> Failed`
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.advance(StepStatus::Running, StepStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        Ok(())
    }

    fn advance(&mut self, from: StepStatus, to: StepStatus) -> Result<()> {
        if self.status != from {
            return Err(KilnError::Other(format!(
                "Step {} cannot move from {} to {}",
                self.id, self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }
}

/// Caller-supplied parameters of a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskParams {
    /// Natural-language goal
    pub goal: String,
    /// File the goal is about, if any
    pub target_file: Option<PathBuf>,
    /// Code selection the goal refers to
    pub selection: Option<String>,
    pub language: Option<String>,
    pub open_files: Vec<PathBuf>,
}

impl TaskParams {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Self::default()
        }
    }

    pub fn with_target_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_file = Some(path.into());
        self
    }

    pub fn with_selection(mut self, selection: impl Into<String>) -> Self {
        self.selection = Some(selection.into());
        self
    }
}

/// Kind of project found at the workspace root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Rust,
    Node,
    Python,
    Go,
    #[default]
    Unknown,
}

impl ProjectType {
    /// Detect the project type from manifest files at the root
    pub fn detect(root: &Path) -> Self {
        if root.join("Cargo.toml").exists() {
            Self::Rust
        } else if root.join("package.json").exists() {
            Self::Node
        } else if root.join("pyproject.toml").exists() || root.join("requirements.txt").exists() {
            Self::Python
        } else if root.join("go.mod").exists() {
            Self::Go
        } else {
            Self::Unknown
        }
    }

    pub fn primary_language(&self) -> Option<&'static str> {
        match self {
            Self::Rust => Some("rust"),
            Self::Node => Some("javascript"),
            Self::Python => Some("python"),
            Self::Go => Some("go"),
            Self::Unknown => None,
        }
    }
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rust => write!(f, "rust"),
            Self::Node => write!(f, "node"),
            Self::Python => write!(f, "python"),
            Self::Go => write!(f, "go"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Version control state at analysis time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VcsState {
    pub branch: Option<String>,
    pub has_uncommitted_changes: bool,
    pub changed_files: Vec<String>,
}

/// Snapshot of the workspace, captured once per task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskContext {
    pub workspace_root: PathBuf,
    pub active_file: Option<PathBuf>,
    pub language: Option<String>,
    pub project_type: ProjectType,
    pub dependencies: Vec<String>,
    pub vcs: Option<VcsState>,
    pub user_preferences: BTreeMap<String, String>,
    pub open_files: Vec<PathBuf>,
    pub build_scripts: BTreeMap<String, String>,
    pub recent_changes: Vec<String>,
}

impl TaskContext {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            ..Self::default()
        }
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        self.vcs
            .as_ref()
            .map(|v| v.has_uncommitted_changes)
            .unwrap_or(false)
    }

    /// Short human-readable summary for prompts
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Workspace: {}", self.workspace_root.display()),
            format!("Project type: {}", self.project_type),
        ];
        if let Some(language) = &self.language {
            lines.push(format!("Language: {}", language));
        }
        if let Some(file) = &self.active_file {
            lines.push(format!("Active file: {}", file.display()));
        }
        if !self.dependencies.is_empty() {
            let shown: Vec<&str> = self.dependencies.iter().take(20).map(String::as_str).collect();
            lines.push(format!("Dependencies: {}", shown.join(", ")));
        }
        if !self.build_scripts.is_empty() {
            let names: Vec<&str> = self.build_scripts.keys().map(String::as_str).collect();
            lines.push(format!("Scripts: {}", names.join(", ")));
        }
        if let Some(vcs) = &self.vcs {
            lines.push(format!(
                "Branch: {} ({})",
                vcs.branch.as_deref().unwrap_or("detached"),
                if vcs.has_uncommitted_changes {
                    "uncommitted changes"
                } else {
                    "clean"
                }
            ));
        }
        lines.join("\n")
    }
}

/// Ordered steps plus a duration estimate, produced by the planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<TaskStep>,
    /// Estimated duration in seconds
    pub estimated_duration: u64,
}

impl Plan {
    /// Plan with the default per-step estimate
    pub fn new(steps: Vec<TaskStep>) -> Self {
        let estimated_duration = steps.len() as u64 * SECONDS_PER_STEP;
        Self {
            steps,
            estimated_duration,
        }
    }
}

/// Outcome of the safety gate for one step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyValidation {
    pub safe: bool,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl SafetyValidation {
    pub fn safe() -> Self {
        Self {
            safe: true,
            ..Self::default()
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            safe: false,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }
}

/// Structured result of one executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutput {
    CodeGenerated {
        generated_code: String,
        tokens: usize,
        duration_ms: u64,
        /// Advisory findings from the code checks
        #[serde(default)]
        warnings: Vec<String>,
    },
    FileChanged {
        operation: FileOperationKind,
        path: PathBuf,
        bytes_written: usize,
        diff: Option<String>,
    },
    FileDeleted {
        path: PathBuf,
    },
    /// The user declined a confirmed change; nothing was written
    ChangeDeclined {
        path: PathBuf,
        cancelled: bool,
    },
    Command {
        success: bool,
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
    Note {
        message: String,
    },
    TestSummary {
        passed: u32,
        failed: u32,
        coverage: Option<f32>,
        note: String,
    },
}

/// A task while it is owned by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub params: TaskParams,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub steps: Vec<TaskStep>,
    pub context: Option<TaskContext>,
    /// Estimated duration in seconds
    pub estimated_duration: Option<u64>,
    pub current_step: Option<usize>,
    /// Percentage of steps completed, 0-100
    pub progress: Option<f32>,
}

impl Task {
    pub fn new(task_type: TaskType, params: TaskParams) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type,
            params,
            status: TaskStatus::default(),
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            steps: Vec::new(),
            context: None,
            estimated_duration: None,
            current_step: None,
            progress: None,
        }
    }

    /// Attach the workspace snapshot. Allowed exactly once.
    pub fn set_context(&mut self, context: TaskContext) -> Result<()> {
        if self.context.is_some() {
            return Err(KilnError::Other(format!(
                "Context already captured for task {}",
                self.id
            )));
        }
        self.context = Some(context);
        Ok(())
    }

    pub fn apply_plan(&mut self, plan: Plan) {
        self.estimated_duration = Some(plan.estimated_duration);
        self.steps = plan.steps;
        self.progress = Some(0.0);
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// Recompute progress after step `index` completed
    pub fn record_progress(&mut self, index: usize) {
        self.current_step = Some(index);
        let total = self.steps.len();
        if total > 0 {
            self.progress = Some(self.completed_steps() as f32 / total as f32 * 100.0);
        }
    }

    /// Close the task and produce its immutable history record
    pub fn finish(
        &mut self,
        status: TaskStatus,
        results: Vec<StepOutput>,
        error: Option<String>,
    ) -> TaskResult {
        let completed_at = Utc::now();
        self.status = status;
        self.completed_at = Some(completed_at);
        self.error = error.clone();

        TaskResult {
            task_id: self.id.clone(),
            task_type: self.task_type,
            status,
            success: status == TaskStatus::Completed,
            results,
            steps: self.steps.clone(),
            error,
            context: self.context.clone(),
            duration_ms: (completed_at - self.created_at).num_milliseconds().max(0) as u64,
            params: self.params.clone(),
            created_at: self.created_at,
            completed_at,
        }
    }
}

/// Durable record of a finished task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub success: bool,
    #[serde(default)]
    pub results: Vec<StepOutput>,
    #[serde(default)]
    pub steps: Vec<TaskStep>,
    pub error: Option<String>,
    pub context: Option<TaskContext>,
    pub duration_ms: u64,
    pub params: TaskParams,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_parsing() {
        assert_eq!("refactor".parse::<TaskType>().unwrap(), TaskType::Refactor);
        assert_eq!("DOCS".parse::<TaskType>().unwrap(), TaskType::Document);
        assert!("deploy".parse::<TaskType>().is_err());
        for task_type in TaskType::ALL {
            assert_eq!(task_type.to_string().parse::<TaskType>().unwrap(), task_type);
        }
    }

    #[test]
    fn test_step_status_is_monotonic() {
        let mut step = TaskStep::new("step-1", "Analyze", StepAction::analysis());
        assert!(step.complete(StepOutput::Note { message: "x".into() }).is_err());

        step.start().unwrap();
        assert_eq!(step.status, StepStatus::Running);
        assert!(step.start().is_err());

        step.fail("broken").unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert!(step.complete(StepOutput::Note { message: "x".into() }).is_err());
        assert_eq!(step.error.as_deref(), Some("broken"));
    }

    #[test]
    fn test_step_status_order() {
        assert!(StepStatus::Pending < StepStatus::Running);
        assert!(StepStatus::Running < StepStatus::Completed);
        assert!(StepStatus::Running < StepStatus::Failed);
    }

    #[test]
    fn test_action_from_parts() {
        let action = StepAction::from_parts(
            "file_operation",
            serde_json::json!({"operation": "replace", "filePath": "src/lib.rs", "content": "x"}),
        )
        .unwrap();
        match action {
            StepAction::FileOperation(params) => {
                assert_eq!(params.operation, Some(FileOperationKind::Replace));
                assert_eq!(params.file_path, Some(PathBuf::from("src/lib.rs")));
            }
            other => panic!("unexpected action {:?}", other),
        }

        let action = StepAction::from_parts("teleport", serde_json::Value::Null).unwrap();
        assert_eq!(action.kind(), StepKind::Analysis);

        let err = StepAction::from_parts("terminal_command", serde_json::json!({"command": "  "}));
        assert!(matches!(err, Err(KilnError::UserInput(_))));
    }

    #[test]
    fn test_plan_estimate() {
        let steps = (1..=3)
            .map(|i| TaskStep::new(format!("step-{}", i), "s", StepAction::analysis()))
            .collect();
        assert_eq!(Plan::new(steps).estimated_duration, 180);
    }

    #[test]
    fn test_context_set_once() {
        let mut task = Task::new(TaskType::Implement, TaskParams::new("goal"));
        task.set_context(TaskContext::new("/repo")).unwrap();
        assert!(task.set_context(TaskContext::new("/other")).is_err());
        assert_eq!(
            task.context.as_ref().unwrap().workspace_root,
            PathBuf::from("/repo")
        );
    }

    #[test]
    fn test_progress_and_finish() {
        let mut task = Task::new(TaskType::Fix, TaskParams::new("goal"));
        task.apply_plan(Plan::new(vec![
            TaskStep::new("step-1", "a", StepAction::analysis()),
            TaskStep::new("step-2", "b", StepAction::analysis()),
        ]));
        task.steps[0].start().unwrap();
        task.steps[0]
            .complete(StepOutput::Note { message: "ok".into() })
            .unwrap();
        task.record_progress(0);
        assert_eq!(task.progress, Some(50.0));

        let result = task.finish(TaskStatus::Failed, vec![], Some("boom".into()));
        assert!(!result.success);
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.steps.len(), 2);
        assert!(task.status.is_terminal());
    }
}
