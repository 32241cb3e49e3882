//! Plan prompts

use kiln_core::{TaskContext, TaskParams, TaskType};

fn focus(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Implement => {
            "Implement the requested feature. Analyze requirements, design the solution, \
             generate the code, test it and update documentation."
        }
        TaskType::Refactor => {
            "Refactor the code without changing its behavior. Analyze it, generate the \
             refactored version and apply it to the file."
        }
        TaskType::Fix => {
            "Fix the described bug. Find the root cause, generate a minimal fix, apply it \
             and verify it."
        }
        TaskType::Test => "Write tests that cover the described behavior and run them.",
        TaskType::Document => {
            "Write or refresh project documentation from the manifest and source layout."
        }
        TaskType::Review => {
            "Review the code for correctness, safety and maintainability. Do not modify files."
        }
        TaskType::Explain => "Explain what the code does. Do not modify files.",
    }
}

const PLAN_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{
  "steps": [
    {
      "id": "step-1",
      "name": "short name",
      "description": "what this step does",
      "type": "analysis | design | code_generation | file_operation | terminal_command | test | documentation",
      "parameters": {}
    }
  ],
  "estimatedDuration": 300
}

Parameters by type:
- code_generation: {"language": "...", "targetFile": "...", "instructions": "..."}
- file_operation: {"operation": "create | modify | delete | replace", "filePath": "...", "content": "..."}
- terminal_command: {"command": "...", "cwd": "..."}
- documentation: {"filePath": "README.md"}
- test: {"target": "...", "framework": "..."}
- analysis / design: {"focus": "..."}

estimatedDuration is in seconds. Keep every path inside the workspace."#;

/// Build the planning prompt for a task
pub fn build_plan_prompt(task_type: TaskType, params: &TaskParams, context: &TaskContext) -> String {
    let mut prompt = format!(
        "You are planning a {} task for a coding assistant.\n\n{}\n\nGoal: {}\n",
        task_type,
        focus(task_type),
        params.goal
    );

    if let Some(file) = &params.target_file {
        prompt.push_str(&format!("Target file: {}\n", file.display()));
    }
    if let Some(selection) = &params.selection {
        prompt.push_str(&format!("Selected code:\n```\n{}\n```\n", selection));
    }

    prompt.push_str(&format!("\n## Workspace\n{}\n", context.summary()));
    if !context.recent_changes.is_empty() {
        prompt.push_str("Recent commits:\n");
        for change in context.recent_changes.iter().take(5) {
            prompt.push_str(&format!("- {}\n", change));
        }
    }
    if !context.user_preferences.is_empty() {
        prompt.push_str("Preferences:\n");
        for (key, value) in &context.user_preferences {
            prompt.push_str(&format!("- {}: {}\n", key, value));
        }
    }

    prompt.push('\n');
    prompt.push_str(PLAN_FORMAT);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_includes_goal_and_context() {
        let mut context = TaskContext::new("/work");
        context.user_preferences.insert("indent".into(), "2 spaces".into());
        let params = TaskParams::new("split the parser")
            .with_target_file("src/parser.rs")
            .with_selection("fn parse() {}");

        let prompt = build_plan_prompt(TaskType::Refactor, &params, &context);
        assert!(prompt.contains("refactor task"));
        assert!(prompt.contains("Goal: split the parser"));
        assert!(prompt.contains("Target file: src/parser.rs"));
        assert!(prompt.contains("fn parse() {}"));
        assert!(prompt.contains("Workspace: /work"));
        assert!(prompt.contains("indent: 2 spaces"));
        assert!(prompt.contains("\"steps\""));
    }

    #[test]
    fn test_prompt_focus_differs_by_type() {
        let context = TaskContext::new("/work");
        let params = TaskParams::new("x");
        let review = build_plan_prompt(TaskType::Review, &params, &context);
        let fix = build_plan_prompt(TaskType::Fix, &params, &context);
        assert!(review.contains("Do not modify files"));
        assert!(fix.contains("root cause"));
    }
}
