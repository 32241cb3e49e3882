//! # kiln-orchestrator
//!
//! Task orchestration engine for kiln.
//!
//! This crate provides:
//! - [`Orchestrator`]: submit, cancel, retry and observe tasks
//! - Pure lifecycle state machine driving task status
//! - Bounded task history persisted through a [`KeyValueStore`]
//! - Lifecycle events and pending file-change confirmations for UIs

mod confirmations;
mod events;
mod history;
mod orchestrator;
mod state_machine;
mod store;

pub use confirmations::PendingConfirmation;
pub use events::{EventBus, LifecycleEvent, LifecycleKind};
pub use history::{TaskHistory, DEFAULT_MAX_HISTORY, HISTORY_KEY};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use state_machine::{transition, Action, Event, State};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
