//! Deterministic fallback plans, one per task type

use kiln_core::{
    CodeGenerationParams, DocumentationParams, FileOperationKind, FileOperationParams, NoteParams,
    Plan, StepAction, TaskParams, TaskStep, TaskType, TestParams,
};

fn note(focus: &str) -> NoteParams {
    NoteParams {
        focus: Some(focus.to_string()),
    }
}

fn generate(params: &TaskParams, instructions: &str) -> StepAction {
    StepAction::CodeGeneration(CodeGenerationParams {
        language: params.language.clone(),
        target_file: params.target_file.clone(),
        instructions: Some(instructions.to_string()),
    })
}

/// Write the most recent generated code back to the target file
fn apply(params: &TaskParams) -> StepAction {
    StepAction::FileOperation(FileOperationParams {
        operation: Some(FileOperationKind::Modify),
        file_path: params.target_file.clone(),
        content: None,
    })
}

fn test(params: &TaskParams) -> StepAction {
    StepAction::Test(TestParams {
        target: params
            .target_file
            .as_ref()
            .map(|p| p.display().to_string()),
        framework: None,
    })
}

/// The fixed step sequence for `task_type`
pub fn fallback_plan(task_type: TaskType, params: &TaskParams) -> Plan {
    let steps: Vec<(&str, &str, StepAction)> = match task_type {
        TaskType::Implement => vec![
            (
                "Analyze requirements",
                "Work out what the feature needs to do",
                StepAction::Analysis(note("requirements")),
            ),
            (
                "Design solution",
                "Sketch the structure of the implementation",
                StepAction::Design(note("solution design")),
            ),
            (
                "Generate code",
                "Write the implementation",
                generate(params, &params.goal),
            ),
            ("Test", "Check the implementation", test(params)),
            (
                "Document",
                "Refresh the project documentation",
                StepAction::Documentation(DocumentationParams::default()),
            ),
        ],
        TaskType::Refactor => vec![
            (
                "Analyze code",
                "Identify what should change and what must stay",
                StepAction::Analysis(note("refactoring targets")),
            ),
            (
                "Generate refactored code",
                "Produce the refactored version",
                generate(params, &params.goal),
            ),
            (
                "Apply changes",
                "Replace the original with the refactored code",
                apply(params),
            ),
        ],
        TaskType::Fix => vec![
            (
                "Analyze bug",
                "Locate the cause of the problem",
                StepAction::Analysis(note("root cause")),
            ),
            (
                "Generate fix",
                "Write the corrected code",
                generate(params, &params.goal),
            ),
            ("Apply fix", "Write the fix to the file", apply(params)),
            ("Verify fix", "Check the fix", test(params)),
        ],
        TaskType::Test => vec![
            (
                "Analyze code under test",
                "Find the behavior that needs coverage",
                StepAction::Analysis(note("test targets")),
            ),
            (
                "Generate tests",
                "Write the test cases",
                generate(params, &format!("Write tests: {}", params.goal)),
            ),
            ("Run tests", "Execute the new tests", test(params)),
        ],
        TaskType::Document => vec![
            (
                "Analyze project",
                "Collect manifest metadata and layout",
                StepAction::Analysis(note("project structure")),
            ),
            (
                "Update documentation",
                "Synthesize the README",
                StepAction::Documentation(DocumentationParams::default()),
            ),
        ],
        TaskType::Review => vec![
            (
                "Analyze code",
                "Read the code under review",
                StepAction::Analysis(note("code review")),
            ),
            (
                "Review design",
                "Assess structure and naming",
                StepAction::Design(note("design review")),
            ),
            (
                "Summarize findings",
                "Collect review comments",
                StepAction::Analysis(note("review summary")),
            ),
        ],
        TaskType::Explain => vec![
            (
                "Analyze code",
                "Read the code to explain",
                StepAction::Analysis(note("code reading")),
            ),
            (
                "Explain",
                "Describe what the code does",
                StepAction::Analysis(note("explanation")),
            ),
        ],
    };

    Plan::new(
        steps
            .into_iter()
            .enumerate()
            .map(|(i, (name, description, action))| {
                TaskStep::new(format!("step-{}", i + 1), name, action).with_description(description)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{StepKind, StepStatus, SECONDS_PER_STEP};

    #[test]
    fn test_refactor_template() {
        let params = TaskParams::new("extract helper").with_target_file("src/lib.rs");
        let plan = fallback_plan(TaskType::Refactor, &params);
        let kinds: Vec<StepKind> = plan.steps.iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                StepKind::Analysis,
                StepKind::CodeGeneration,
                StepKind::FileOperation
            ]
        );
        assert_eq!(plan.estimated_duration, 3 * SECONDS_PER_STEP);
    }

    #[test]
    fn test_implement_template() {
        let plan = fallback_plan(TaskType::Implement, &TaskParams::new("add login"));
        let kinds: Vec<StepKind> = plan.steps.iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                StepKind::Analysis,
                StepKind::Design,
                StepKind::CodeGeneration,
                StepKind::Test,
                StepKind::Documentation
            ]
        );
    }

    #[test]
    fn test_every_type_has_pending_sequential_steps() {
        for task_type in TaskType::ALL {
            let plan = fallback_plan(task_type, &TaskParams::new("goal"));
            assert!(!plan.steps.is_empty());
            assert_eq!(
                plan.estimated_duration,
                plan.steps.len() as u64 * SECONDS_PER_STEP
            );
            for (i, step) in plan.steps.iter().enumerate() {
                assert_eq!(step.id, format!("step-{}", i + 1));
                assert_eq!(step.status, StepStatus::Pending);
            }
        }
    }
}
