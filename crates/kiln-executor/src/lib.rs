//! # kiln-executor
//!
//! Performs the side effect of one task step, dispatching on the step's
//! [`kiln_core::StepAction`]:
//!
//! - `code_generation` asks the language model for code
//! - `file_operation` creates, modifies, replaces or deletes a file; changes
//!   that overwrite existing content render a diff and wait for approval
//!   through a [`ConfirmationChannel`]
//! - `terminal_command` runs a shell command in the workspace
//! - `documentation` synthesizes a README from the project manifest
//! - `analysis`, `design` and `test` produce placeholder results

mod diff;
mod documentation;
mod executor;
mod file_ops;
mod interaction;
mod terminal;

pub use diff::{render_diff, DiffSummary};
pub use documentation::synthesize_readme;
pub use executor::{strip_code_fences, Executor};
pub use interaction::{AutoApprove, AutoDecline, ConfirmationChannel, ConfirmationRequest};
