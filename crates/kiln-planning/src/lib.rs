//! Kiln Planning - turning a goal into an ordered step list
//!
//! The [`Planner`] asks the language model for a JSON plan and falls back to
//! a fixed per-task-type template whenever the model fails or answers with
//! something unusable. Planning never fails from the caller's point of view.

pub mod parse;
pub mod planner;
pub mod prompts;
pub mod templates;

pub use parse::{extract_json_object, parse_plan};
pub use planner::Planner;
pub use prompts::build_plan_prompt;
pub use templates::fallback_plan;
