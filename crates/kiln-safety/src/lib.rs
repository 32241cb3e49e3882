//! # kiln-safety
//!
//! The pre-execution safety gate.
//!
//! Rules live in a data-driven [`RuleSet`] (pattern, target, severity,
//! blocking-or-advisory) so they can be tested and extended without touching
//! orchestration. [`RuleBasedPolicy`] applies them through the
//! [`SafetyPolicy`] trait that the orchestrator consumes.
//!
//! Only three things ever block a step: a dangerous shell command, a
//! delete/replace of a sensitive path, and a path outside the workspace
//! root. Everything else is advisory.

mod code;
mod paths;
mod rules;
mod validator;

pub use code::{check_code, check_refactoring};
pub use paths::{is_within, normalize};
pub use rules::{RulePattern, RuleSet, RuleTarget, SafetyRule, Severity};
pub use validator::{RuleBasedPolicy, SafetyPolicy};
