//! # kiln-core
//!
//! Core types for the kiln coding-task orchestrator.
//!
//! A task is one user goal. It is decomposed into an ordered list of steps,
//! each step is screened by the safety gate and then executed against the
//! workspace, and the terminal outcome lands in a bounded history.
//!
//! ## Core Paradigm
//!
//! - Tasks own their steps; step order is fixed at plan time
//! - Step parameters are a tagged union keyed by step kind
//! - A task's context is captured once, before the first step runs
//! - Results are immutable once written to history

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::KilnConfig;
pub use error::{KilnError, ProviderError, Result};
pub use types::*;
