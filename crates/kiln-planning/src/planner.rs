//! LLM-backed planner with a deterministic fallback

use kiln_core::{Plan, TaskContext, TaskParams, TaskType};
use kiln_llm::{GenerateOptions, LlmProvider};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{build_plan_prompt, fallback_plan, parse_plan};

const PLANNER_SYSTEM: &str =
    "You break coding goals into small, ordered, verifiable steps. Output JSON only.";

/// Builds plans for tasks
pub struct Planner {
    provider: Arc<dyn LlmProvider>,
    options: GenerateOptions,
}

impl Planner {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            options: GenerateOptions {
                system: Some(PLANNER_SYSTEM.to_string()),
                ..GenerateOptions::default()
            },
        }
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    /// Create a plan for the task.
    ///
    /// Provider errors and unusable responses are recovered locally with the
    /// task type's fallback plan, so this never fails.
    pub async fn create_plan(
        &self,
        task_type: TaskType,
        params: &TaskParams,
        context: &TaskContext,
    ) -> Plan {
        let prompt = build_plan_prompt(task_type, params, context);
        debug!("Requesting {} plan from {}", task_type, self.provider.name());

        let response = match self.provider.generate(&prompt, Some(&self.options)).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Plan generation failed, using fallback plan: {}", e);
                return fallback_plan(task_type, params);
            }
        };

        match parse_plan(&response) {
            Ok(plan) => {
                info!(
                    "Planned {} task with {} steps (~{}s)",
                    task_type,
                    plan.steps.len(),
                    plan.estimated_duration
                );
                plan
            }
            Err(e) => {
                warn!("Unusable plan from model, using fallback plan: {}", e);
                fallback_plan(task_type, params)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{ProviderError, StepKind, SECONDS_PER_STEP};
    use kiln_llm::ScriptedProvider;

    fn context() -> TaskContext {
        TaskContext::new("/work")
    }

    #[tokio::test]
    async fn test_uses_model_plan() {
        let provider = Arc::new(ScriptedProvider::new().with_response(
            r#"Sure! {"steps": [
                {"id": "s1", "name": "Inspect", "type": "analysis"},
                {"id": "s2", "name": "Build", "type": "terminal_command", "parameters": {"command": "cargo build"}}
            ], "estimatedDuration": 120}"#,
        ));
        let planner = Planner::new(provider.clone());

        let plan = planner
            .create_plan(TaskType::Fix, &TaskParams::new("fix build"), &context())
            .await;
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].kind(), StepKind::TerminalCommand);
        assert_eq!(plan.estimated_duration, 120);
        assert!(provider.prompts()[0].contains("Goal: fix build"));
    }

    #[tokio::test]
    async fn test_non_json_response_falls_back() {
        let provider = Arc::new(ScriptedProvider::new().with_response("I'd refactor it nicely."));
        let planner = Planner::new(provider);

        let params = TaskParams::new("tidy").with_target_file("src/a.rs");
        let plan = planner
            .create_plan(TaskType::Refactor, &params, &context())
            .await;
        assert_eq!(plan, fallback_plan(TaskType::Refactor, &params));
        assert_eq!(plan.estimated_duration, 3 * SECONDS_PER_STEP);
    }

    #[tokio::test]
    async fn test_empty_steps_falls_back() {
        let provider = Arc::new(ScriptedProvider::new().with_response(r#"{"steps": []}"#));
        let planner = Planner::new(provider);

        let params = TaskParams::new("add search");
        let plan = planner
            .create_plan(TaskType::Implement, &params, &context())
            .await;
        assert_eq!(plan.steps.len(), 5);
        assert_eq!(plan.estimated_duration, 5 * SECONDS_PER_STEP);
    }

    #[tokio::test]
    async fn test_provider_error_falls_back() {
        let provider = Arc::new(ScriptedProvider::new().with_error(ProviderError::Connection {
            endpoint: "http://localhost:11434".to_string(),
            message: "connection refused".to_string(),
        }));
        let planner = Planner::new(provider);

        let params = TaskParams::new("explain this");
        let plan = planner
            .create_plan(TaskType::Explain, &params, &context())
            .await;
        assert_eq!(plan, fallback_plan(TaskType::Explain, &params));
    }
}
