//! Tolerant parsing of model-written plans

use kiln_core::{KilnError, Plan, Result, StepAction, TaskStep, SECONDS_PER_STEP};
use serde::Deserialize;
use std::collections::HashSet;

/// First balanced `{...}` span in `text`, skipping braces inside JSON strings
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    steps: Option<Vec<RawStep>>,
    #[serde(default, alias = "estimatedDuration")]
    estimated_duration: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStep {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    #[serde(rename = "type", alias = "kind")]
    step_type: Option<String>,
    parameters: serde_json::Value,
}

/// Parse a model response into a plan.
///
/// Fails on a missing or unbalanced JSON object, a missing or empty `steps`
/// array, or a step whose parameters do not validate for its type.
pub fn parse_plan(response: &str) -> Result<Plan> {
    let json = extract_json_object(response)
        .ok_or_else(|| KilnError::Other("No JSON object in plan response".to_string()))?;
    let raw: RawPlan = serde_json::from_str(json)?;

    let raw_steps = raw
        .steps
        .filter(|s| !s.is_empty())
        .ok_or_else(|| KilnError::Other("Plan has no steps".to_string()))?;

    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(raw_steps.len());
    for (i, raw_step) in raw_steps.into_iter().enumerate() {
        let sequential = format!("step-{}", i + 1);
        let id = raw_step
            .id
            .filter(|id| !id.trim().is_empty() && !seen.contains(id))
            .unwrap_or(sequential);
        seen.insert(id.clone());

        let action = match raw_step.step_type.as_deref() {
            Some(kind) => StepAction::from_parts(kind, raw_step.parameters)?,
            None => StepAction::analysis(),
        };
        let name = raw_step
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Step {}", i + 1));

        steps.push(TaskStep::new(id, name, action).with_description(
            raw_step.description.unwrap_or_default(),
        ));
    }

    let estimated_duration = raw
        .estimated_duration
        .filter(|d| *d > 0)
        .unwrap_or(steps.len() as u64 * SECONDS_PER_STEP);

    Ok(Plan {
        steps,
        estimated_duration,
    })
}
