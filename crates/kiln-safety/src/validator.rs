//! Step validation against the rule table

use kiln_core::config::SafetyConfig;
use kiln_core::{
    FileOperationKind, Result, SafetyValidation, StepAction, TaskContext, TaskStep,
};
use std::path::Path;
use tracing::warn;

use crate::code::{check_code, check_refactoring};
use crate::paths::{is_within, normalize};
use crate::{RuleSet, RuleTarget};

/// Pre-execution screening of steps and generated code.
///
/// `validate_step` may block (`safe = false`); the code checks are advisory
/// only.
pub trait SafetyPolicy: Send + Sync {
    fn validate_step(&self, step: &TaskStep, context: &TaskContext) -> SafetyValidation;

    fn validate_code_generation(&self, code: &str) -> SafetyValidation;

    fn validate_refactoring(&self, original: &str, refactored: &str) -> SafetyValidation;

    /// Check a resolved file path before `operation` touches it.
    ///
    /// Used for paths that are only known at execution time, such as one
    /// picked interactively.
    fn validate_file_path(
        &self,
        path: &Path,
        operation: Option<FileOperationKind>,
        context: &TaskContext,
    ) -> SafetyValidation;
}

/// [`SafetyPolicy`] backed by a [`RuleSet`]
#[derive(Debug, Clone)]
pub struct RuleBasedPolicy {
    rules: RuleSet,
    max_payload_bytes: usize,
}

impl RuleBasedPolicy {
    pub fn new(rules: RuleSet, max_payload_bytes: usize) -> Self {
        Self {
            rules,
            max_payload_bytes,
        }
    }

    /// Built-in rules plus configured additions
    pub fn from_config(config: &SafetyConfig) -> Result<Self> {
        Ok(Self::new(
            RuleSet::from_config(config)?,
            config.max_payload_bytes,
        ))
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn check_boundary(&self, path: &Path, context: &TaskContext) -> Option<SafetyValidation> {
        if is_within(&context.workspace_root, path) {
            return None;
        }
        Some(SafetyValidation::blocked(format!(
            "Path {} is outside the workspace root {}",
            normalize(&context.workspace_root, path).display(),
            context.workspace_root.display()
        )))
    }

    /// Boundary check, plus the sensitive-path rules for operations that
    /// destroy existing content
    fn check_path(
        &self,
        path: &Path,
        operation: Option<FileOperationKind>,
        context: &TaskContext,
    ) -> Option<SafetyValidation> {
        if let Some(blocked) = self.check_boundary(path, context) {
            return Some(blocked);
        }

        // An unspecified operation may turn out to be a replace
        let destructive = matches!(
            operation,
            None | Some(FileOperationKind::Delete) | Some(FileOperationKind::Replace)
        );
        if !destructive {
            return None;
        }
        let resolved = normalize(&context.workspace_root, path);
        let text = resolved.to_string_lossy();
        let rule = self.rules.first_blocking(RuleTarget::SensitivePath, &text)?;
        Some(SafetyValidation::blocked(format!(
            "Refusing to {} sensitive path {}: {}",
            operation
                .map(|o| o.to_string())
                .unwrap_or_else(|| "overwrite".to_string()),
            resolved.display(),
            rule.description
        )))
    }

    fn validate_command(
        &self,
        command: &str,
        cwd: Option<&Path>,
        context: &TaskContext,
        mut validation: SafetyValidation,
    ) -> SafetyValidation {
        if let Some(rule) = self.rules.first_blocking(RuleTarget::Command, command) {
            return SafetyValidation::blocked(format!(
                "Dangerous operation detected: {}",
                rule.description
            ));
        }
        if let Some(cwd) = cwd {
            if let Some(blocked) = self.check_boundary(cwd, context) {
                return blocked;
            }
        }
        for rule in self
            .rules
            .matching(RuleTarget::Command, command)
            .filter(|r| !r.blocking)
        {
            validation = validation
                .with_warning(format!("Command uses a {}", rule.description))
                .with_recommendation("Narrow the command to explicit paths");
        }
        validation
    }

    fn validate_file_operation(
        &self,
        operation: Option<FileOperationKind>,
        path: Option<&Path>,
        content: Option<&str>,
        context: &TaskContext,
        mut validation: SafetyValidation,
    ) -> SafetyValidation {
        let Some(path) = path.or(context.active_file.as_deref()) else {
            return validation;
        };

        if let Some(blocked) = self.check_path(path, operation, context) {
            return blocked;
        }

        if let Some(content) = content {
            if content.len() > self.max_payload_bytes {
                validation = validation
                    .with_warning(format!(
                        "Payload is {} bytes (limit {})",
                        content.len(),
                        self.max_payload_bytes
                    ))
                    .with_recommendation("Split large changes into smaller steps");
            }
        }
        validation
    }
}

impl SafetyPolicy for RuleBasedPolicy {
    fn validate_step(&self, step: &TaskStep, context: &TaskContext) -> SafetyValidation {
        let mut validation = SafetyValidation::safe();
        let mutating = !matches!(
            step.action,
            StepAction::Analysis(_)
                | StepAction::Design(_)
                | StepAction::Test(_)
                | StepAction::CodeGeneration(_)
        );
        if mutating && context.has_uncommitted_changes() {
            validation = validation
                .with_warning("Workspace has uncommitted changes")
                .with_recommendation("Commit or stash your changes before running this task");
        }

        let result = match &step.action {
            StepAction::TerminalCommand(params) => {
                self.validate_command(&params.command, params.cwd.as_deref(), context, validation)
            }
            StepAction::FileOperation(params) => self.validate_file_operation(
                params.operation,
                params.file_path.as_deref(),
                params.content.as_deref(),
                context,
                validation,
            ),
            StepAction::Documentation(params) => {
                let path = params
                    .file_path
                    .clone()
                    .unwrap_or_else(|| context.workspace_root.join("README.md"));
                self.check_boundary(&path, context).unwrap_or(validation)
            }
            StepAction::CodeGeneration(params) => match &params.target_file {
                Some(path) => self.check_boundary(path, context).unwrap_or(validation),
                None => validation,
            },
            StepAction::Analysis(_) | StepAction::Design(_) | StepAction::Test(_) => validation,
        };

        if !result.safe {
            warn!(
                "Step {} blocked: {}",
                step.id,
                result.reason.as_deref().unwrap_or("unsafe")
            );
        }
        result
    }

    fn validate_code_generation(&self, code: &str) -> SafetyValidation {
        check_code(&self.rules, code)
    }

    fn validate_refactoring(&self, original: &str, refactored: &str) -> SafetyValidation {
        check_refactoring(original, refactored)
    }

    fn validate_file_path(
        &self,
        path: &Path,
        operation: Option<FileOperationKind>,
        context: &TaskContext,
    ) -> SafetyValidation {
        match self.check_path(path, operation, context) {
            Some(blocked) => {
                warn!(
                    "File path {} blocked: {}",
                    path.display(),
                    blocked.reason.as_deref().unwrap_or("unsafe")
                );
                blocked
            }
            None => SafetyValidation::safe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{
        CodeGenerationParams, FileOperationParams, TerminalCommandParams, VcsState,
    };
    use std::path::PathBuf;

    fn policy() -> RuleBasedPolicy {
        RuleBasedPolicy::from_config(&SafetyConfig::default()).unwrap()
    }

    fn context() -> TaskContext {
        TaskContext::new("/home/u/proj")
    }

    fn command_step(command: &str) -> TaskStep {
        TaskStep::new(
            "step-1",
            "Run",
            StepAction::TerminalCommand(TerminalCommandParams::new(command, None).unwrap()),
        )
    }

    fn file_step(operation: FileOperationKind, path: &str) -> TaskStep {
        TaskStep::new(
            "step-1",
            "Write",
            StepAction::FileOperation(FileOperationParams {
                operation: Some(operation),
                file_path: Some(PathBuf::from(path)),
                content: Some("x".to_string()),
            }),
        )
    }

    #[test]
    fn test_rm_rf_blocked() {
        let result = policy().validate_step(&command_step("rm -rf /tmp/x"), &context());
        assert!(!result.safe);
        assert!(result.reason.unwrap().contains("rm -rf"));
    }

    #[test]
    fn test_safe_command_with_glob_warning() {
        let result = policy().validate_step(&command_step("ls src/**"), &context());
        assert!(result.safe);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_env_replace_blocked_but_create_allowed() {
        let p = policy();
        let result = p.validate_step(
            &file_step(FileOperationKind::Replace, "/home/u/proj/.env"),
            &context(),
        );
        assert!(!result.safe);

        let result = p.validate_step(
            &file_step(FileOperationKind::Create, "/home/u/proj/src/new_module.rs"),
            &context(),
        );
        assert!(result.safe);
        assert!(result.reason.is_none());
    }

    #[test]
    fn test_lockfile_delete_blocked() {
        let result = policy().validate_step(
            &file_step(FileOperationKind::Delete, "Cargo.lock"),
            &context(),
        );
        assert!(!result.safe);
    }

    #[test]
    fn test_outside_workspace_blocked() {
        let result = policy().validate_step(
            &file_step(FileOperationKind::Create, "/etc/passwd"),
            &context(),
        );
        assert!(!result.safe);
        assert!(result.reason.unwrap().contains("outside the workspace"));

        let result = policy().validate_step(
            &file_step(FileOperationKind::Modify, "../escape.txt"),
            &context(),
        );
        assert!(!result.safe);
    }

    #[test]
    fn test_command_cwd_outside_workspace_blocked() {
        let step = TaskStep::new(
            "step-1",
            "Run",
            StepAction::TerminalCommand(
                TerminalCommandParams::new("ls", Some(PathBuf::from("/var"))).unwrap(),
            ),
        );
        assert!(!policy().validate_step(&step, &context()).safe);
    }

    #[test]
    fn test_advisories() {
        let mut ctx = context();
        ctx.vcs = Some(VcsState {
            branch: Some("main".to_string()),
            has_uncommitted_changes: true,
            changed_files: vec!["a.rs".to_string()],
        });
        let p = RuleBasedPolicy::new(RuleSet::builtin().unwrap(), 4);
        let step = TaskStep::new(
            "step-1",
            "Write",
            StepAction::FileOperation(FileOperationParams {
                operation: Some(FileOperationKind::Create),
                file_path: Some(PathBuf::from("src/big.rs")),
                content: Some("0123456789".to_string()),
            }),
        );

        let result = p.validate_step(&step, &ctx);
        assert!(result.safe);
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.recommendations.len(), 2);

        let analysis = TaskStep::new("step-2", "Look", StepAction::analysis());
        assert!(p.validate_step(&analysis, &ctx).warnings.is_empty());
    }

    #[test]
    fn test_resolved_path_checks() {
        let p = policy();
        let ctx = context();
        let env = Path::new("/home/u/proj/.env");
        assert!(!p.validate_file_path(env, None, &ctx).safe);
        assert!(!p.validate_file_path(env, Some(FileOperationKind::Replace), &ctx).safe);
        let git_config = Path::new(".git/config");
        assert!(
            !p.validate_file_path(git_config, Some(FileOperationKind::Delete), &ctx)
                .safe
        );
        assert!(p.validate_file_path(env, Some(FileOperationKind::Modify), &ctx).safe);
        assert!(p.validate_file_path(Path::new("src/lib.rs"), None, &ctx).safe);
        let outside = Path::new("/etc/hosts");
        assert!(
            !p.validate_file_path(outside, Some(FileOperationKind::Create), &ctx)
                .safe
        );
    }

    #[test]
    fn test_code_generation_skips_uncommitted_warning() {
        let mut ctx = context();
        ctx.vcs = Some(VcsState {
            branch: Some("main".to_string()),
            has_uncommitted_changes: true,
            changed_files: vec!["a.rs".to_string()],
        });
        let step = TaskStep::new(
            "step-1",
            "Generate",
            StepAction::CodeGeneration(CodeGenerationParams::default()),
        );
        let result = policy().validate_step(&step, &ctx);
        assert!(result.safe);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_code_checks_never_block() {
        let p = policy();
        assert!(p.validate_code_generation("eval(x)").safe);
        assert!(p.validate_refactoring("a\nb\nc\n", "").safe);
    }
}
