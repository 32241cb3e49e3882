//! kiln CLI - autonomous coding tasks in a local workspace
//!
//! Usage:
//!   kiln init                          Write a default .kiln/config.toml
//!   kiln submit <type> <goal>          Plan and execute a task
//!   kiln run-plan <type> <plan.json>   Execute a hand-written plan
//!   kiln retry <task-id>               Re-run a task from history
//!   kiln history                       Show finished tasks
//!   kiln models                        List models of the configured provider

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use kiln_core::{
    KilnConfig, KilnError, StepOutput, StepStatus, TaskParams, TaskResult, TaskStep, TaskType,
};
use kiln_executor::{AutoApprove, ConfirmationChannel, ConfirmationRequest};
use kiln_llm::provider_from_config;
use kiln_orchestrator::{JsonFileStore, LifecycleKind, Orchestrator};
use kiln_planning::parse_plan;
use kiln_safety::RuleBasedPolicy;
use kiln_workspace::{CommandRunner, ShellCommandRunner, WorkspaceContextProvider};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "Autonomous coding tasks for your workspace")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Workspace root
    #[arg(short = 'C', long, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration to .kiln/config.toml
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Plan and execute a task
    Submit {
        /// Task type (implement, refactor, fix, test, document, review, explain)
        task_type: String,

        /// What the task should achieve
        goal: String,

        /// File the task is about
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Approve every file change without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Execute a plan file instead of asking the model for one
    RunPlan {
        /// Task type
        task_type: String,

        /// Plan JSON with a `steps` array
        plan: PathBuf,

        /// Goal recorded with the task
        #[arg(long)]
        goal: Option<String>,

        /// Approve every file change without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Re-plan and re-run a task from history
    Retry {
        /// Task ID (a unique prefix is enough)
        id: String,

        /// Approve every file change without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Show finished tasks
    History {
        /// Show at most this many entries
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// List models offered by the configured provider
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let root = std::fs::canonicalize(&cli.workspace)
        .with_context(|| format!("Workspace {} not found", cli.workspace.display()))?;

    match cli.command {
        Commands::Init { force } => cmd_init(&root, force),
        Commands::Submit {
            task_type,
            goal,
            file,
            yes,
        } => cmd_submit(&root, &task_type, goal, file, yes).await,
        Commands::RunPlan {
            task_type,
            plan,
            goal,
            yes,
        } => cmd_run_plan(&root, &task_type, plan, goal, yes).await,
        Commands::Retry { id, yes } => cmd_retry(&root, &id, yes).await,
        Commands::History { limit, json } => cmd_history(&root, limit, json).await,
        Commands::Models => cmd_models(&root).await,
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<()> {
    let config_path = root.join(kiln_core::config::KILN_DIR).join("config.toml");
    if config_path.exists() && !force {
        println!("Config already exists: {}", config_path.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    let path = KilnConfig::write_default(root).context("Failed to write config")?;
    println!("Initialized kiln in {}", root.display());
    println!("Created:");
    println!("  {}", path.display());
    Ok(())
}

async fn cmd_submit(
    root: &Path,
    task_type: &str,
    goal: String,
    file: Option<PathBuf>,
    yes: bool,
) -> Result<()> {
    let task_type = parse_task_type(task_type)?;
    let mut params = TaskParams::new(goal);
    if let Some(file) = file {
        params = params.with_target_file(file);
    }

    let orchestrator = build_orchestrator(root, yes).await?;
    let outcome = with_interrupt(&orchestrator, orchestrator.submit_task(task_type, params)).await;
    report(&orchestrator, outcome).await
}

async fn cmd_run_plan(
    root: &Path,
    task_type: &str,
    plan_path: PathBuf,
    goal: Option<String>,
    yes: bool,
) -> Result<()> {
    let task_type = parse_task_type(task_type)?;
    let content = tokio::fs::read_to_string(&plan_path)
        .await
        .with_context(|| format!("Failed to read plan file {}", plan_path.display()))?;
    let plan = parse_plan(&content).context("Failed to parse plan")?;
    info!("Loaded {} steps from {}", plan.steps.len(), plan_path.display());

    let goal = goal.unwrap_or_else(|| format!("Run plan {}", plan_path.display()));
    let orchestrator = build_orchestrator(root, yes).await?;
    let outcome = with_interrupt(
        &orchestrator,
        orchestrator.run_custom_plan(task_type, TaskParams::new(goal), plan.steps),
    )
    .await;
    report(&orchestrator, outcome).await
}

async fn cmd_retry(root: &Path, id: &str, yes: bool) -> Result<()> {
    let orchestrator = build_orchestrator(root, yes).await?;
    let task_id = resolve_task_id(&orchestrator.get_task_history().await, id)?;
    let outcome = with_interrupt(&orchestrator, orchestrator.retry_task(&task_id)).await;
    report(&orchestrator, outcome).await
}

async fn cmd_history(root: &Path, limit: usize, json: bool) -> Result<()> {
    let config = KilnConfig::load_or_default(root).context("Failed to load config")?;
    let store = JsonFileStore::new(config.history_path(root));
    let history = kiln_orchestrator::TaskHistory::load(&store, config.execution.max_history)
        .await
        .context("Failed to load task history")?
        .to_vec();
    let recent: Vec<&TaskResult> = history.iter().rev().take(limit).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&recent)?);
        return Ok(());
    }

    if recent.is_empty() {
        println!("No tasks in history.");
        return Ok(());
    }

    println!(
        "{:<10} {:<10} {:<10} {:>7} {:>9}  GOAL",
        "ID", "TYPE", "STATUS", "STEPS", "DURATION"
    );
    for result in recent {
        let completed = result
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        println!(
            "{:<10} {:<10} {:<10} {:>7} {:>8}s  {}",
            &result.task_id[..8.min(result.task_id.len())],
            result.task_type.to_string(),
            result.status.to_string(),
            format!("{}/{}", completed, result.steps.len()),
            result.duration_ms / 1000,
            result.params.goal
        );
    }
    Ok(())
}

async fn cmd_models(root: &Path) -> Result<()> {
    let config = KilnConfig::load_or_default(root).context("Failed to load config")?;
    let provider =
        provider_from_config(&config.provider).context("Failed to create provider")?;
    let models = provider
        .list_models()
        .await
        .with_context(|| format!("Failed to list models from {}", provider.name()))?;

    if models.is_empty() {
        println!("Provider {} does not list models.", provider.name());
        println!("Configured model: {}", provider.config().model);
    } else {
        for model in models {
            let marker = if model == config.provider.model { "*" } else { " " };
            println!("{} {}", marker, model);
        }
    }
    provider.dispose().await;
    Ok(())
}

/// Wire configured collaborators into an orchestrator
async fn build_orchestrator(root: &Path, yes: bool) -> Result<Orchestrator> {
    let config = KilnConfig::load_or_default(root).context("Failed to load config")?;

    let provider =
        provider_from_config(&config.provider).context("Failed to create provider")?;
    let policy = Arc::new(
        RuleBasedPolicy::from_config(&config.safety).context("Invalid safety configuration")?,
    );
    let runner: Arc<dyn CommandRunner> = Arc::new(ShellCommandRunner::new());
    let context = Arc::new(
        WorkspaceContextProvider::new(root, Arc::clone(&runner))
            .with_preferences(config.preferences.clone()),
    );
    let channel: Arc<dyn ConfirmationChannel> = if yes {
        Arc::new(AutoApprove)
    } else {
        Arc::new(StdinConfirmation)
    };

    let orchestrator = Orchestrator::builder(provider, policy, context)
        .with_runner(runner)
        .with_store(Arc::new(JsonFileStore::new(config.history_path(root))))
        .with_confirmation_channel(channel)
        .with_execution_config(&config.execution)
        .build()
        .await;

    spawn_progress_printer(&orchestrator);
    Ok(orchestrator)
}

/// Print step progress as lifecycle events arrive
fn spawn_progress_printer(orchestrator: &Orchestrator) {
    let mut rx = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event.kind {
                LifecycleKind::StatusChanged { status } => println!("== {}", status),
                LifecycleKind::StepStarted { index, step_id } => {
                    println!("-> step {} ({})", index + 1, step_id)
                }
                LifecycleKind::StepCompleted { progress, .. } => {
                    println!("   done ({:.0}%)", progress)
                }
                LifecycleKind::StepFailed { error, .. } => println!("   failed: {}", error),
                _ => {}
            }
        }
    });
}

/// Run the task, cancelling it on Ctrl-C
async fn with_interrupt<F>(orchestrator: &Orchestrator, task: F) -> kiln_core::Result<TaskResult>
where
    F: std::future::Future<Output = kiln_core::Result<TaskResult>>,
{
    let watcher = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling after the current step");
                for task in orchestrator.get_active_tasks().await {
                    orchestrator.cancel_task(&task.id).await;
                }
            }
        })
    };
    let outcome = task.await;
    watcher.abort();
    outcome
}

async fn report(
    orchestrator: &Orchestrator,
    outcome: kiln_core::Result<TaskResult>,
) -> Result<()> {
    match outcome {
        Ok(result) => {
            print_result(&result);
            Ok(())
        }
        Err(e) => {
            if let Some(result) = orchestrator.get_task_history().await.pop() {
                print_result(&result);
            }
            Err(anyhow!(e))
        }
    }
}

fn print_result(result: &TaskResult) {
    println!();
    println!(
        "Task {} {} ({} steps, {}ms)",
        result.task_id,
        result.status,
        result.steps.len(),
        result.duration_ms
    );
    for step in &result.steps {
        print_step(step);
    }
    if let Some(error) = &result.error {
        println!("Error: {}", error);
    }
}

fn print_step(step: &TaskStep) {
    let mark = match step.status {
        StepStatus::Completed => "x",
        StepStatus::Failed => "!",
        StepStatus::Running => ">",
        StepStatus::Pending => " ",
    };
    println!("  [{}] {} ({})", mark, step.name, step.kind());

    match &step.result {
        Some(StepOutput::CodeGenerated {
            tokens, warnings, ..
        }) => {
            println!("      generated ~{} tokens", tokens);
            for warning in warnings {
                println!("      warning: {}", warning);
            }
        }
        Some(StepOutput::FileChanged {
            operation, path, ..
        }) => println!("      {} {}", operation, path.display()),
        Some(StepOutput::FileDeleted { path }) => println!("      deleted {}", path.display()),
        Some(StepOutput::ChangeDeclined { path, .. }) => {
            println!("      declined change to {}", path.display())
        }
        Some(StepOutput::Command { stdout, .. }) => {
            for line in stdout.lines().take(20) {
                println!("      | {}", line);
            }
        }
        Some(StepOutput::Note { message }) => println!("      {}", message),
        Some(StepOutput::TestSummary { note, .. }) => println!("      {}", note),
        None => {
            if let Some(error) = &step.error {
                println!("      {}", error);
            }
        }
    }
}

fn parse_task_type(s: &str) -> Result<TaskType> {
    s.parse::<TaskType>().map_err(|e| {
        let known: Vec<String> = TaskType::ALL.iter().map(|t| t.to_string()).collect();
        anyhow!("{} (expected one of: {})", e, known.join(", "))
    })
}

/// Match a full task id or a unique prefix
fn resolve_task_id(history: &[TaskResult], id: &str) -> Result<String> {
    let matches: Vec<&TaskResult> = history
        .iter()
        .filter(|r| r.task_id.starts_with(id))
        .collect();
    match matches.as_slice() {
        [only] => Ok(only.task_id.clone()),
        [] => Err(anyhow!("No task in history matches {}", id)),
        _ => Err(anyhow!("Task id prefix {} is ambiguous", id)),
    }
}

/// Asks on the terminal
struct StdinConfirmation;

#[async_trait]
impl ConfirmationChannel for StdinConfirmation {
    async fn confirm(&self, request: &ConfirmationRequest) -> kiln_core::Result<bool> {
        println!();
        println!("{} {}", request.operation, request.path.display());
        println!("{}", request.diff);
        let answer = prompt("Apply this change? [y/N] ").await?;
        Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
    }

    async fn request_file_path(&self, step: &TaskStep) -> kiln_core::Result<Option<PathBuf>> {
        let answer = prompt(&format!("File for step '{}' (empty to skip): ", step.name)).await?;
        Ok(if answer.is_empty() {
            None
        } else {
            Some(PathBuf::from(answer))
        })
    }
}

async fn prompt(question: &str) -> kiln_core::Result<String> {
    let question = question.to_string();
    tokio::task::spawn_blocking(move || -> kiln_core::Result<String> {
        let mut stdout = std::io::stdout();
        stdout.write_all(question.as_bytes())?;
        stdout.flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await
    .map_err(|e| KilnError::Other(format!("Prompt failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{Task, TaskStatus};

    fn finished(goal: &str) -> TaskResult {
        Task::new(TaskType::Fix, TaskParams::new(goal)).finish(TaskStatus::Completed, Vec::new(), None)
    }

    #[test]
    fn test_parse_task_type() {
        assert_eq!(parse_task_type("refactor").unwrap(), TaskType::Refactor);
        let err = parse_task_type("deploy").unwrap_err().to_string();
        assert!(err.contains("expected one of"));
        assert!(err.contains("implement"));
    }

    #[test]
    fn test_resolve_task_id_prefix() {
        let a = finished("a");
        let b = finished("b");
        let history = vec![a.clone(), b.clone()];

        assert_eq!(resolve_task_id(&history, &a.task_id).unwrap(), a.task_id);
        assert_eq!(resolve_task_id(&history, &b.task_id[..12]).unwrap(), b.task_id);
        assert!(resolve_task_id(&history, "zzzz").is_err());
        assert!(resolve_task_id(&history, "").is_err());
    }

    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::try_parse_from([
            "kiln", "-C", "/tmp", "submit", "fix", "null check", "--file", "src/a.rs", "--yes",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit {
                task_type,
                goal,
                file,
                yes,
            } => {
                assert_eq!(task_type, "fix");
                assert_eq!(goal, "null check");
                assert_eq!(file, Some(PathBuf::from("src/a.rs")));
                assert!(yes);
            }
            _ => panic!("expected submit"),
        }
    }
}
