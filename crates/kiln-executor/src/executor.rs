//! Step dispatch

use chrono::Utc;
use kiln_core::{
    CodeGenerationParams, DocumentationParams, FileOperationKind, FileOperationParams, KilnError,
    NoteParams,
    Result, StepAction, StepOutput, TaskContext, TaskStep, TestParams,
};
use kiln_llm::{GenerateOptions, LlmProvider};
use kiln_safety::{is_within, SafetyPolicy};
use kiln_workspace::CommandRunner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::documentation::synthesize_readme;
use crate::file_ops::{self, FileChange};
use crate::interaction::ConfirmationChannel;
use crate::terminal;

/// Existing file content above this size is left out of generation prompts
const MAX_PROMPT_FILE_BYTES: u64 = 100_000;

const CODEGEN_SYSTEM: &str =
    "You are a senior software engineer. Return only code, in a single fenced block.";

/// Extract the first fenced code block, or the trimmed text if there is none
pub fn strip_code_fences(text: &str) -> String {
    let Some(open) = text.find("```") else {
        return text.trim().to_string();
    };
    let after_open = &text[open + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(after_open.len());
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => body[..close].to_string(),
        None => body.to_string(),
    }
}

/// Executes single steps against the workspace
pub struct Executor {
    provider: Arc<dyn LlmProvider>,
    runner: Arc<dyn CommandRunner>,
    policy: Option<Arc<dyn SafetyPolicy>>,
    require_confirmation: bool,
}

impl Executor {
    pub fn new(provider: Arc<dyn LlmProvider>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            provider,
            runner,
            policy: None,
            require_confirmation: true,
        }
    }

    /// Ask before overwriting existing content (default `true`)
    pub fn with_confirmation(mut self, require_confirmation: bool) -> Self {
        self.require_confirmation = require_confirmation;
        self
    }

    /// Run the advisory code checks on generated code
    pub fn with_policy(mut self, policy: Arc<dyn SafetyPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Execute one step.
    ///
    /// `prior` holds the outputs of the steps already completed in this
    /// task; a file operation without content writes the most recent
    /// generated code.
    pub async fn execute_step(
        &self,
        step: &TaskStep,
        context: &TaskContext,
        prior: &[StepOutput],
        channel: &dyn ConfirmationChannel,
    ) -> Result<StepOutput> {
        debug!("Executing step {} ({})", step.id, step.kind());
        match &step.action {
            StepAction::CodeGeneration(params) => {
                self.generate_code(step, params, context).await
            }
            StepAction::FileOperation(params) => {
                self.file_operation(step, params, context, prior, channel)
                    .await
            }
            StepAction::TerminalCommand(params) => {
                terminal::run(self.runner.as_ref(), params, context).await
            }
            StepAction::Analysis(params) => Ok(note("Analysis", step, params, context)),
            StepAction::Design(params) => Ok(note("Design", step, params, context)),
            StepAction::Test(params) => Ok(test_summary(params, context)),
            StepAction::Documentation(params) => {
                self.documentation(step, params, context, channel).await
            }
        }
    }

    async fn generate_code(
        &self,
        step: &TaskStep,
        params: &CodeGenerationParams,
        context: &TaskContext,
    ) -> Result<StepOutput> {
        let target = params
            .target_file
            .as_deref()
            .map(|p| resolve(&context.workspace_root, p))
            .or_else(|| context.active_file.clone());
        let original = match &target {
            Some(path) => read_for_prompt(path).await,
            None => None,
        };

        let mut prompt = format!("Step: {}\n", step.name);
        if !step.description.is_empty() {
            prompt.push_str(&format!("Description: {}\n", step.description));
        }
        if let Some(instructions) = &params.instructions {
            prompt.push_str(&format!("Instructions: {}\n", instructions));
        }
        if let Some(language) = params.language.as_ref().or(context.language.as_ref()) {
            prompt.push_str(&format!("Language: {}\n", language));
        }
        prompt.push_str(&format!(
            "Parameters: {}\n\n## Workspace\n{}\n",
            serde_json::to_string(params)?,
            context.summary()
        ));
        if let (Some(path), Some(content)) = (&target, &original) {
            prompt.push_str(&format!(
                "\n## Current content of {}\n```\n{}\n```\n",
                path.display(),
                content
            ));
        }

        let options = GenerateOptions {
            system: Some(CODEGEN_SYSTEM.to_string()),
            ..GenerateOptions::default()
        };
        let started = Instant::now();
        let generated_code = self.provider.generate(&prompt, Some(&options)).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut warnings = Vec::new();
        if let Some(policy) = &self.policy {
            let code = strip_code_fences(&generated_code);
            warnings.extend(policy.validate_code_generation(&code).warnings);
            if let Some(original) = &original {
                warnings.extend(policy.validate_refactoring(original, &code).warnings);
            }
            for warning in &warnings {
                warn!("Step {}: {}", step.id, warning);
            }
        }

        Ok(StepOutput::CodeGenerated {
            tokens: generated_code.len().div_ceil(4),
            generated_code,
            duration_ms,
            warnings,
        })
    }

    async fn file_operation(
        &self,
        step: &TaskStep,
        params: &FileOperationParams,
        context: &TaskContext,
        prior: &[StepOutput],
        channel: &dyn ConfirmationChannel,
    ) -> Result<StepOutput> {
        let path = match params.file_path.clone().or_else(|| context.active_file.clone()) {
            Some(path) => path,
            None => channel
                .request_file_path(step)
                .await?
                .ok_or_else(|| KilnError::UserInput("missing file path".to_string()))?,
        };
        let path = self.checked_path(&path, params.operation, context)?;

        let generated = match &params.content {
            Some(_) => None,
            None => last_generated_code(prior),
        };
        let content = params.content.as_deref().or(generated.as_deref());

        file_ops::apply(
            FileChange {
                step_id: &step.id,
                operation: params.operation,
                path: &path,
                content,
            },
            self.require_confirmation,
            channel,
        )
        .await
    }

    async fn documentation(
        &self,
        step: &TaskStep,
        params: &DocumentationParams,
        context: &TaskContext,
        channel: &dyn ConfirmationChannel,
    ) -> Result<StepOutput> {
        let root = &context.workspace_root;
        let path = match &params.file_path {
            Some(path) => self.checked_path(path, None, context)?,
            None => root.join("README.md"),
        };
        let readme = synthesize_readme(root, Utc::now())?;

        file_ops::apply(
            FileChange {
                step_id: &step.id,
                operation: None,
                path: &path,
                content: Some(&readme),
            },
            self.require_confirmation,
            channel,
        )
        .await
    }

    /// Resolve against the workspace root and re-check it, since a path
    /// supplied interactively was never seen by the safety gate.
    fn checked_path(
        &self,
        path: &Path,
        operation: Option<FileOperationKind>,
        context: &TaskContext,
    ) -> Result<PathBuf> {
        let resolved = resolve(&context.workspace_root, path);
        if let Some(policy) = &self.policy {
            let validation = policy.validate_file_path(&resolved, operation, context);
            if !validation.safe {
                return Err(KilnError::SafetyViolation(
                    validation
                        .reason
                        .unwrap_or_else(|| format!("Unsafe path {}", resolved.display())),
                ));
            }
        }
        if !is_within(&context.workspace_root, &resolved) {
            return Err(KilnError::SafetyViolation(format!(
                "Path {} is outside the workspace root {}",
                resolved.display(),
                context.workspace_root.display()
            )));
        }
        Ok(resolved)
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

async fn read_for_prompt(path: &Path) -> Option<String> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    if !meta.is_file() || meta.len() > MAX_PROMPT_FILE_BYTES {
        return None;
    }
    tokio::fs::read_to_string(path).await.ok()
}

fn last_generated_code(prior: &[StepOutput]) -> Option<String> {
    prior.iter().rev().find_map(|output| match output {
        StepOutput::CodeGenerated { generated_code, .. } => Some(strip_code_fences(generated_code)),
        _ => None,
    })
}

fn note(label: &str, step: &TaskStep, params: &NoteParams, context: &TaskContext) -> StepOutput {
    let subject = params.focus.as_deref().unwrap_or(&step.name);
    StepOutput::Note {
        message: format!(
            "{} complete: {} ({} project)",
            label, subject, context.project_type
        ),
    }
}

fn test_summary(params: &TestParams, context: &TaskContext) -> StepOutput {
    let mut note = "No test runner invoked".to_string();
    if let Some(target) = &params.target {
        note.push_str(&format!(" for {}", target));
    }
    if let Some(script) = context.build_scripts.get("test") {
        note.push_str(&format!("; run `{}` to verify", script));
    }
    StepOutput::TestSummary {
        passed: 0,
        failed: 0,
        coverage: None,
        note,
    }
}
