//! Pure state machine for the task lifecycle
//!
//! This module has NO I/O. The orchestrator feeds it events and performs the
//! returned actions.
//!
//! - Pure function: transition(state, event) -> (state, actions)
//! - Invalid transitions go to Failed state (never panic)
//! - Context is gathered before the plan is built

use kiln_core::TaskStatus;

/// Lifecycle state of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Created, nothing started yet
    Pending,
    /// Gathering the workspace context
    Analyzing,
    /// Building the step list
    Planning,
    /// Running steps
    Executing { completed: usize, total: usize },
    /// A file change is waiting for approval
    AwaitingConfirmation {
        completed: usize,
        total: usize,
        path: String,
    },
    Completed,
    Failed { error: String },
    Cancelled,
}

impl State {
    /// Status reported on the task for this state
    pub fn status(&self) -> TaskStatus {
        match self {
            State::Pending | State::Analyzing => TaskStatus::Analyzing,
            State::Planning => TaskStatus::Planning,
            State::Executing { .. } => TaskStatus::Executing,
            State::AwaitingConfirmation { .. } => TaskStatus::AwaitingConfirmation,
            State::Completed => TaskStatus::Completed,
            State::Failed { .. } => TaskStatus::Failed,
            State::Cancelled => TaskStatus::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::Completed | State::Failed { .. } | State::Cancelled
        )
    }

    /// Error message carried by a failed or cancelled state
    pub fn error(&self) -> Option<String> {
        match self {
            State::Failed { error } => Some(error.clone()),
            State::Cancelled => Some("Task cancelled".to_string()),
            _ => None,
        }
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    ContextReady,
    PlanReady { step_count: usize },
    StepCompleted,
    ConfirmationRequested { path: String },
    ConfirmationResolved { approved: bool },
    StepFailed { step_id: String, error: String },
    AllStepsComplete,
    Cancel,
    Error { message: String },
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    LogActivity { message: String },
    /// Move the task out of the active set and into history
    RecordResult,
}

fn terminal(state: State, message: String) -> (State, Vec<Action>) {
    (
        state,
        vec![Action::LogActivity { message }, Action::RecordResult],
    )
}

/// Pure state transition function
///
/// Any invalid transition from a live state fails the task and records it.
/// Terminal states reject every event without actions.
pub fn transition(state: State, event: Event) -> (State, Vec<Action>) {
    match (state, event) {
        (State::Pending, Event::Start) => (
            State::Analyzing,
            vec![Action::LogActivity {
                message: "Gathering workspace context".to_string(),
            }],
        ),

        (State::Analyzing, Event::ContextReady) => (
            State::Planning,
            vec![Action::LogActivity {
                message: "Context captured, planning".to_string(),
            }],
        ),

        (State::Planning, Event::PlanReady { step_count }) => {
            if step_count == 0 {
                terminal(State::Completed, "Plan has no steps".to_string())
            } else {
                (
                    State::Executing {
                        completed: 0,
                        total: step_count,
                    },
                    vec![Action::LogActivity {
                        message: format!("Executing {} steps", step_count),
                    }],
                )
            }
        }

        (State::Executing { completed, total }, Event::StepCompleted) => (
            State::Executing {
                completed: completed + 1,
                total,
            },
            vec![Action::LogActivity {
                message: format!("Step {}/{} complete", completed + 1, total),
            }],
        ),

        (State::Executing { completed, total }, Event::ConfirmationRequested { path }) => (
            State::AwaitingConfirmation {
                completed,
                total,
                path: path.clone(),
            },
            vec![Action::LogActivity {
                message: format!("Awaiting confirmation for {}", path),
            }],
        ),

        (
            State::AwaitingConfirmation {
                completed,
                total,
                path,
            },
            Event::ConfirmationResolved { approved },
        ) => (
            State::Executing { completed, total },
            vec![Action::LogActivity {
                message: format!(
                    "Change to {} {}",
                    path,
                    if approved { "approved" } else { "declined" }
                ),
            }],
        ),

        (State::Executing { completed, total }, Event::AllStepsComplete) => {
            if completed == total {
                terminal(
                    State::Completed,
                    format!("All {} steps complete", total),
                )
            } else {
                let error = format!("Only {} of {} steps completed", completed, total);
                terminal(State::Failed { error: error.clone() }, error)
            }
        }

        (State::Executing { .. }, Event::StepFailed { step_id, error })
        | (State::AwaitingConfirmation { .. }, Event::StepFailed { step_id, error }) => {
            let message = format!("Step {} failed: {}", step_id, error);
            terminal(State::Failed { error }, message)
        }

        (state, Event::Cancel) if !state.is_terminal() => {
            terminal(State::Cancelled, "Task cancelled".to_string())
        }

        (state, Event::Error { message }) if !state.is_terminal() => {
            let log = format!("Error: {}", message);
            terminal(State::Failed { error: message }, log)
        }

        // Terminal states - no valid transitions
        (State::Completed, event) => (
            State::Failed {
                error: format!("Invalid transition from Completed on event: {:?}", event),
            },
            vec![],
        ),

        (State::Failed { error }, event) => (
            State::Failed {
                error: format!(
                    "Invalid transition from Failed state (error: {}) on event: {:?}",
                    error, event
                ),
            },
            vec![],
        ),

        (State::Cancelled, event) => (
            State::Failed {
                error: format!("Invalid transition from Cancelled on event: {:?}", event),
            },
            vec![],
        ),

        // All other invalid transitions
        (state, event) => {
            let error = format!(
                "Invalid state transition: {:?} cannot handle event {:?}",
                state, event
            );
            terminal(State::Failed { error: error.clone() }, error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executing(total: usize) -> State {
        let (state, _) = transition(State::Pending, Event::Start);
        let (state, _) = transition(state, Event::ContextReady);
        let (state, _) = transition(state, Event::PlanReady { step_count: total });
        state
    }

    #[test]
    fn test_happy_path_full_flow() {
        let (state, actions) = transition(State::Pending, Event::Start);
        assert_eq!(state.status(), TaskStatus::Analyzing);
        assert_eq!(actions.len(), 1);

        let (state, _) = transition(state, Event::ContextReady);
        assert_eq!(state.status(), TaskStatus::Planning);

        let (state, _) = transition(state, Event::PlanReady { step_count: 2 });
        assert_eq!(
            state,
            State::Executing {
                completed: 0,
                total: 2
            }
        );

        let (state, _) = transition(state, Event::StepCompleted);
        let (state, _) = transition(state, Event::StepCompleted);
        let (state, actions) = transition(state, Event::AllStepsComplete);
        assert_eq!(state, State::Completed);
        assert_eq!(actions.last(), Some(&Action::RecordResult));
    }

    #[test]
    fn test_empty_plan_completes() {
        let (state, _) = transition(State::Planning, Event::PlanReady { step_count: 0 });
        assert_eq!(state, State::Completed);
    }

    #[test]
    fn test_confirmation_round_trip() {
        let state = executing(3);
        let (state, _) = transition(
            state,
            Event::ConfirmationRequested {
                path: "src/lib.rs".to_string(),
            },
        );
        assert_eq!(state.status(), TaskStatus::AwaitingConfirmation);

        let (state, _) = transition(state, Event::ConfirmationResolved { approved: false });
        assert_eq!(
            state,
            State::Executing {
                completed: 0,
                total: 3
            }
        );
    }

    #[test]
    fn test_cancel_while_awaiting_confirmation() {
        let (state, _) = transition(
            executing(1),
            Event::ConfirmationRequested {
                path: "a".to_string(),
            },
        );
        let (state, actions) = transition(state, Event::Cancel);
        assert_eq!(state, State::Cancelled);
        assert_eq!(state.error().as_deref(), Some("Task cancelled"));
        assert!(actions.contains(&Action::RecordResult));
    }

    #[test]
    fn test_step_failure_fails_task() {
        let (state, actions) = transition(
            executing(4),
            Event::StepFailed {
                step_id: "step-2".to_string(),
                error: "boom".to_string(),
            },
        );
        assert_eq!(
            state,
            State::Failed {
                error: "boom".to_string()
            }
        );
        assert!(actions.contains(&Action::RecordResult));
    }

    #[test]
    fn test_premature_completion_fails() {
        let (state, _) = transition(executing(2), Event::AllStepsComplete);
        assert!(matches!(state, State::Failed { ref error } if error.contains("Only 0 of 2")));
    }

    #[test]
    fn test_error_from_context_gathering() {
        let (state, _) = transition(State::Pending, Event::Start);
        let (state, actions) = transition(
            state,
            Event::Error {
                message: "git missing".to_string(),
            },
        );
        assert_eq!(state.status(), TaskStatus::Failed);
        assert!(actions.contains(&Action::RecordResult));
    }

    #[test]
    fn test_invalid_transition_never_panics() {
        let (state, actions) = transition(State::Pending, Event::StepCompleted);
        assert!(matches!(state, State::Failed { .. }));
        assert!(actions.contains(&Action::RecordResult));

        let (state, _) = transition(State::Analyzing, Event::PlanReady { step_count: 3 });
        assert!(matches!(state, State::Failed { .. }));
    }

    #[test]
    fn test_terminal_states_reject_all_events() {
        for terminal_state in [
            State::Completed,
            State::Cancelled,
            State::Failed {
                error: "x".to_string(),
            },
        ] {
            let (state, actions) = transition(terminal_state, Event::Cancel);
            assert!(matches!(state, State::Failed { .. }));
            assert!(actions.is_empty());
        }
    }
}
