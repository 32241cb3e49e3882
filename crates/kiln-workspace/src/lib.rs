//! # kiln-workspace
//!
//! Everything kiln knows about the workspace it runs in:
//!
//! - [`CommandRunner`] abstracts subprocess execution so callers can be
//!   tested against [`MockCommandRunner`]
//! - [`Manifest`] reads package metadata from `Cargo.toml`, `package.json`,
//!   `pyproject.toml` or `go.mod`
//! - [`ContextProvider`] produces the [`kiln_core::TaskContext`] snapshot a
//!   task runs against

mod command;
mod context;
mod listing;
mod manifest;

pub use command::{CommandOutput, CommandRunner, MockCommandRunner, ShellCommandRunner};
pub use context::{ContextProvider, StaticContextProvider, WorkspaceContextProvider};
pub use listing::{directory_listing, IGNORED_DIRS};
pub use manifest::Manifest;
