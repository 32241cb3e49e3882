//! Task orchestrator: owns active tasks, drives the step loop and records
//! history.

use async_trait::async_trait;
use kiln_core::{
    config::ExecutionConfig, fail_open::fail_open, KilnError, Plan, Result, StepOutput, Task,
    TaskParams, TaskResult, TaskStep, TaskType,
};
use kiln_executor::{ConfirmationChannel, ConfirmationRequest, Executor};
use kiln_llm::LlmProvider;
use kiln_planning::Planner;
use kiln_safety::SafetyPolicy;
use kiln_workspace::{CommandRunner, ContextProvider, ShellCommandRunner};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::confirmations::{Confirmations, PendingConfirmation};
use crate::events::{EventBus, LifecycleEvent, LifecycleKind};
use crate::history::{PersistedHistory, TaskHistory, DEFAULT_MAX_HISTORY};
use crate::state_machine::{transition, Action, Event, State};
use crate::store::{KeyValueStore, MemoryStore};

/// Entry in the active set
struct ActiveTask {
    /// Latest published copy of the task
    snapshot: Task,
    cancel: CancellationToken,
}

/// Working state of one task, shared by the step loop and its
/// confirmation gate
struct Run {
    task: Task,
    state: State,
    results: Vec<StepOutput>,
}

enum PlanSource {
    Planner,
    Custom(Vec<TaskStep>),
}

struct Inner {
    planner: Planner,
    executor: Executor,
    policy: Arc<dyn SafetyPolicy>,
    context_provider: Arc<dyn ContextProvider>,
    channel: Option<Arc<dyn ConfirmationChannel>>,
    active: Mutex<HashMap<String, ActiveTask>>,
    history: Mutex<PersistedHistory>,
    confirmations: Confirmations,
    events: EventBus,
}

/// Builder for [`Orchestrator`]. The provider, safety policy and context
/// provider are required; everything else has a default.
pub struct OrchestratorBuilder {
    provider: Arc<dyn LlmProvider>,
    policy: Arc<dyn SafetyPolicy>,
    context_provider: Arc<dyn ContextProvider>,
    runner: Option<Arc<dyn CommandRunner>>,
    store: Option<Arc<dyn KeyValueStore>>,
    channel: Option<Arc<dyn ConfirmationChannel>>,
    require_confirmation: bool,
    max_history: usize,
}

impl OrchestratorBuilder {
    /// Command runner for terminal steps (default: real shell)
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// History store (default: in memory)
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Interactive channel raced against `resolve_confirmation`
    pub fn with_confirmation_channel(mut self, channel: Arc<dyn ConfirmationChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_confirmation(mut self, require_confirmation: bool) -> Self {
        self.require_confirmation = require_confirmation;
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// Apply the `[execution]` configuration section
    pub fn with_execution_config(self, config: &ExecutionConfig) -> Self {
        self.with_confirmation(config.require_confirmation)
            .with_max_history(config.max_history)
    }

    /// Build the orchestrator, loading persisted history.
    ///
    /// Unreadable history is logged and replaced by an empty one.
    pub async fn build(self) -> Orchestrator {
        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(ShellCommandRunner::new()));
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));

        let max_history = self.max_history;
        let history = fail_open("history::load", || {
            TaskHistory::load(store.as_ref(), max_history)
        })
        .await
        .unwrap_or_else(|| TaskHistory::new(max_history));

        let executor = Executor::new(Arc::clone(&self.provider), runner)
            .with_policy(Arc::clone(&self.policy))
            .with_confirmation(self.require_confirmation);

        Orchestrator {
            inner: Arc::new(Inner {
                planner: Planner::new(self.provider),
                executor,
                policy: self.policy,
                context_provider: self.context_provider,
                channel: self.channel,
                active: Mutex::new(HashMap::new()),
                history: Mutex::new(PersistedHistory { history, store }),
                confirmations: Confirmations::default(),
                events: EventBus::new(),
            }),
        }
    }
}

/// Runs tasks from submission to history.
///
/// Cloning is cheap; clones share the active set, history and event bus.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(
        provider: Arc<dyn LlmProvider>,
        policy: Arc<dyn SafetyPolicy>,
        context_provider: Arc<dyn ContextProvider>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            provider,
            policy,
            context_provider,
            runner: None,
            store: None,
            channel: None,
            require_confirmation: true,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    /// Gather context, plan and execute a new task.
    ///
    /// Returns the terminal result on success. A failed or cancelled task is
    /// still recorded in history; the error that stopped it is returned.
    pub async fn submit_task(&self, task_type: TaskType, params: TaskParams) -> Result<TaskResult> {
        self.inner.run(task_type, params, PlanSource::Planner).await
    }

    /// Execute a caller-supplied step list instead of asking the planner.
    /// Step statuses and results are reset before execution.
    pub async fn run_custom_plan(
        &self,
        task_type: TaskType,
        params: TaskParams,
        steps: Vec<TaskStep>,
    ) -> Result<TaskResult> {
        if steps.is_empty() {
            return Err(KilnError::UserInput("custom plan has no steps".to_string()));
        }
        let steps = steps
            .into_iter()
            .map(|s| TaskStep::new(s.id, s.name, s.action).with_description(s.description))
            .collect();
        self.inner
            .run(task_type, params, PlanSource::Custom(steps))
            .await
    }

    /// Submit a finished task again with its original type and parameters.
    /// This re-plans from scratch.
    pub async fn retry_task(&self, task_id: &str) -> Result<TaskResult> {
        let (task_type, params) = {
            let history = self.inner.history.lock().await;
            let result = history
                .history
                .get(task_id)
                .ok_or_else(|| KilnError::TaskNotFound(task_id.to_string()))?;
            (result.task_type, result.params.clone())
        };
        info!("Retrying task {}", task_id);
        self.submit_task(task_type, params).await
    }

    /// Remove an active task and signal cancellation.
    ///
    /// A step already running finishes; the loop stops before the next one.
    /// A pending confirmation is abandoned immediately. Returns false when
    /// the task is not active.
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        let removed = self.inner.active.lock().await.remove(task_id);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                info!("Cancelled task {}", task_id);
                true
            }
            None => false,
        }
    }

    /// Snapshots of active tasks, oldest first
    pub async fn get_active_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .inner
            .active
            .lock()
            .await
            .values()
            .map(|entry| entry.snapshot.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Finished tasks, oldest first
    pub async fn get_task_history(&self) -> Vec<TaskResult> {
        self.inner.history.lock().await.history.to_vec()
    }

    /// Active task by id; `None` once the task has finished
    pub async fn get_task_by_id(&self, task_id: &str) -> Option<Task> {
        self.inner
            .active
            .lock()
            .await
            .get(task_id)
            .map(|entry| entry.snapshot.clone())
    }

    pub async fn pending_confirmations(&self) -> Vec<PendingConfirmation> {
        self.inner.confirmations.list().await
    }

    /// Approve or decline a pending change. Returns false for unknown ids.
    pub async fn resolve_confirmation(&self, confirmation_id: &str, approved: bool) -> bool {
        self.inner
            .confirmations
            .resolve(confirmation_id, approved)
            .await
    }

    /// Lifecycle events for every task
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    async fn run(
        self: &Arc<Self>,
        task_type: TaskType,
        params: TaskParams,
        source: PlanSource,
    ) -> Result<TaskResult> {
        let task = Task::new(task_type, params);
        let task_id = task.id.clone();
        let cancel = CancellationToken::new();
        info!("Submitted {} task {}: {}", task_type, task_id, task.params.goal);

        self.active.lock().await.insert(
            task_id.clone(),
            ActiveTask {
                snapshot: task.clone(),
                cancel: cancel.clone(),
            },
        );

        let run = Arc::new(Mutex::new(Run {
            task,
            state: State::Pending,
            results: Vec::new(),
        }));
        let gate = ConfirmationGate {
            inner: Arc::clone(self),
            run: Arc::clone(&run),
            task_id: task_id.clone(),
            cancel,
        };
        self.drive(&run, &gate, source).await
    }

    async fn drive(
        &self,
        run: &Mutex<Run>,
        gate: &ConfirmationGate,
        source: PlanSource,
    ) -> Result<TaskResult> {
        let task_id = gate.task_id.as_str();
        let (task_type, params) = {
            let mut guard = run.lock().await;
            self.advance(&mut guard, Event::Start).await;
            (guard.task.task_type, guard.task.params.clone())
        };

        let context = match self.context_provider.analyze(&params).await {
            Ok(context) => context,
            Err(e) => return self.fail(&mut *run.lock().await, e).await,
        };
        {
            let mut guard = run.lock().await;
            if let Err(e) = guard.task.set_context(context.clone()) {
                return self.fail(&mut guard, e).await;
            }
            self.advance(&mut guard, Event::ContextReady).await;
        }

        let plan = match source {
            PlanSource::Planner => self.planner.create_plan(task_type, &params, &context).await,
            PlanSource::Custom(steps) => Plan::new(steps),
        };
        let total = plan.steps.len();
        {
            let mut guard = run.lock().await;
            guard.task.apply_plan(plan);
            if let Some(result) = self
                .advance(&mut guard, Event::PlanReady { step_count: total })
                .await
            {
                return Ok(result);
            }
        }

        for index in 0..total {
            if !self.active.lock().await.contains_key(task_id) {
                info!("Task {} no longer active, stopping before step {}", task_id, index + 1);
                return self.cancelled(&mut *run.lock().await).await;
            }

            let (step, prior) = {
                let mut guard = run.lock().await;
                if let Err(e) = guard.task.steps[index].start() {
                    return self.fail(&mut guard, e).await;
                }
                let step = guard.task.steps[index].clone();
                self.publish(&guard.task).await;
                (step, guard.results.clone())
            };
            self.events.publish(
                task_id,
                LifecycleKind::StepStarted {
                    index,
                    step_id: step.id.clone(),
                },
            );
            info!("Step {}/{}: {} ({})", index + 1, total, step.name, step.kind());

            let validation = self.policy.validate_step(&step, &context);
            for warning in &validation.warnings {
                warn!("Step {}: {}", step.id, warning);
            }
            for recommendation in &validation.recommendations {
                debug!("Step {}: {}", step.id, recommendation);
            }
            if !validation.safe {
                let reason = validation
                    .reason
                    .unwrap_or_else(|| "Step blocked by safety policy".to_string());
                let mut guard = run.lock().await;
                return self
                    .step_failed(&mut guard, index, KilnError::SafetyViolation(reason))
                    .await;
            }

            match self.executor.execute_step(&step, &context, &prior, gate).await {
                Ok(output) => {
                    let mut guard = run.lock().await;
                    if let Err(e) = guard.task.steps[index].complete(output.clone()) {
                        return self.fail(&mut guard, e).await;
                    }
                    guard.results.push(output);
                    guard.task.record_progress(index);
                    let progress = guard.task.progress.unwrap_or_default();
                    self.advance(&mut guard, Event::StepCompleted).await;
                    self.events
                        .publish(task_id, LifecycleKind::StepCompleted { index, progress });
                }
                Err(e) if e.is_cancelled() => {
                    let mut guard = run.lock().await;
                    if let Err(step_err) = guard.task.steps[index].fail(e.to_string()) {
                        warn!("Could not mark step {} failed: {}", step.id, step_err);
                    }
                    return self.cancelled(&mut guard).await;
                }
                Err(e) => {
                    let mut guard = run.lock().await;
                    return self.step_failed(&mut guard, index, e).await;
                }
            }
        }

        let mut guard = run.lock().await;
        match self.advance(&mut guard, Event::AllStepsComplete).await {
            Some(result) if result.success => Ok(result),
            Some(result) => Err(KilnError::Other(
                result.error.unwrap_or_else(|| "Task failed".to_string()),
            )),
            None => Err(KilnError::Other(format!(
                "Task {} ended in unexpected state {}",
                task_id, guard.task.status
            ))),
        }
    }

    /// Feed an event to the state machine and perform its actions.
    /// Returns the history record when the transition was terminal.
    async fn advance(&self, run: &mut Run, event: Event) -> Option<TaskResult> {
        let previous = run.task.status;
        let starting = event == Event::Start;
        let current = std::mem::replace(&mut run.state, State::Pending);
        let (next, actions) = transition(current, event);
        run.state = next;
        run.task.status = run.state.status();

        if starting || run.task.status != previous {
            self.events.publish(
                &run.task.id,
                LifecycleKind::StatusChanged {
                    status: run.task.status,
                },
            );
        }

        let mut record = false;
        for action in actions {
            match action {
                Action::LogActivity { message } => info!("[{}] {}", short_id(&run.task.id), message),
                Action::RecordResult => record = true,
            }
        }

        if record {
            Some(self.record(run).await)
        } else {
            self.publish(&run.task).await;
            None
        }
    }

    /// Move a finished task from the active set into history
    async fn record(&self, run: &mut Run) -> TaskResult {
        let status = run.state.status();
        let result = run
            .task
            .finish(status, run.results.clone(), run.state.error());

        self.active.lock().await.remove(&result.task_id);
        {
            let mut persisted = self.history.lock().await;
            persisted.history.push(result.clone());
            let persisted = &*persisted;
            fail_open("history::persist", || {
                persisted.history.persist(persisted.store.as_ref())
            })
            .await;
        }

        info!(
            "Task {} {} in {}ms",
            result.task_id, result.status, result.duration_ms
        );
        self.events
            .publish(&result.task_id, LifecycleKind::Finished { status });
        result
    }

    async fn fail(&self, run: &mut Run, error: KilnError) -> Result<TaskResult> {
        self.advance(
            run,
            Event::Error {
                message: error.to_string(),
            },
        )
        .await;
        Err(error)
    }

    async fn step_failed(&self, run: &mut Run, index: usize, error: KilnError) -> Result<TaskResult> {
        let message = error.to_string();
        let step_id = run.task.steps[index].id.clone();
        if let Err(e) = run.task.steps[index].fail(message.clone()) {
            warn!("Could not mark step {} failed: {}", step_id, e);
        }
        self.events.publish(
            &run.task.id,
            LifecycleKind::StepFailed {
                index,
                error: message.clone(),
            },
        );
        self.advance(
            run,
            Event::StepFailed {
                step_id,
                error: message,
            },
        )
        .await;
        Err(error)
    }

    async fn cancelled(&self, run: &mut Run) -> Result<TaskResult> {
        self.advance(run, Event::Cancel).await;
        Err(KilnError::Cancelled(run.task.id.clone()))
    }

    /// Refresh the active-set snapshot, unless the task was removed
    async fn publish(&self, task: &Task) {
        if let Some(entry) = self.active.lock().await.get_mut(&task.id) {
            entry.snapshot = task.clone();
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Confirmation channel handed to the executor for one task.
///
/// Puts the task into `AwaitingConfirmation` and waits for whichever comes
/// first: `resolve_confirmation`, the injected channel, or cancellation.
struct ConfirmationGate {
    inner: Arc<Inner>,
    run: Arc<Mutex<Run>>,
    task_id: String,
    cancel: CancellationToken,
}

#[async_trait]
impl ConfirmationChannel for ConfirmationGate {
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<bool> {
        {
            let mut run = self.run.lock().await;
            self.inner
                .advance(
                    &mut run,
                    Event::ConfirmationRequested {
                        path: request.path.display().to_string(),
                    },
                )
                .await;
        }
        let (pending, rx) = self
            .inner
            .confirmations
            .register(&self.task_id, request)
            .await;
        self.inner.events.publish(
            &self.task_id,
            LifecycleKind::ConfirmationRequested {
                confirmation_id: pending.id.clone(),
            },
        );

        let external = async {
            match &self.inner.channel {
                Some(channel) => channel.confirm(request).await,
                None => std::future::pending().await,
            }
        };
        let decision = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(KilnError::Cancelled(format!(
                "{} cancelled while awaiting confirmation",
                self.task_id
            ))),
            answer = rx => answer.map_err(|_| KilnError::Other(
                "Confirmation dropped without an answer".to_string()
            )),
            answer = external => answer,
        };
        self.inner.confirmations.remove(&pending.id).await;
        let approved = decision?;

        {
            let mut run = self.run.lock().await;
            self.inner
                .advance(&mut run, Event::ConfirmationResolved { approved })
                .await;
        }
        self.inner.events.publish(
            &self.task_id,
            LifecycleKind::ConfirmationResolved {
                confirmation_id: pending.id,
                approved,
            },
        );
        Ok(approved)
    }

    async fn request_file_path(&self, step: &TaskStep) -> Result<Option<PathBuf>> {
        match &self.inner.channel {
            Some(channel) => channel.request_file_path(step).await,
            None => Ok(None),
        }
    }
}
