use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use autosolve::agent::AgentClient;
use autosolve::bridge::{EvalBridge, EvalResult};
use autosolve::config::Config;
use autosolve::lock::ExecutionLock;
use autosolve::orchestrator::{ProgressionController, RunOutcome, StageOutcome};
use autosolve::state::RunStateStore;
use autosolve::workbench::CommandWorkbench;

#[derive(Parser)]
#[command(name = "autosolve")]
#[command(version, about = "Resumable auto-solver for staged grading exercises")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Solve the current stage once, without progressing
    Run,
    /// Solve stage after stage until done, failed, or the ceiling
    RunAll {
        /// Continue the run saved by a previous invocation
        #[arg(long)]
        resume: bool,
    },
    /// Drop the saved run and release the execution lock
    Abort,
    /// Show the saved run and lock state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = Config::load(project_dir, cli.verbose)?;
    config.ensure_state_dir()?;

    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::RunAll { resume } => cmd_run_all(config, resume).await,
        Commands::Abort => cmd_abort(config),
        Commands::Status => cmd_status(config),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "autosolve=debug,info"
    } else {
        "autosolve=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_controller(
    config: Config,
) -> Result<ProgressionController<AgentClient, CommandWorkbench>> {
    let bridge = EvalBridge::new(Duration::from_secs(config.result_timeout_secs));
    let workbench = CommandWorkbench::new(config.workbench.clone(), bridge.handle());
    let generator = AgentClient::new(config.clone())?;
    Ok(ProgressionController::new(
        config, generator, workbench, bridge,
    ))
}

async fn cmd_run(config: Config) -> Result<()> {
    let mut controller = build_controller(config)?;
    match controller.run_one().await? {
        StageOutcome::Passed(result) => {
            println!("{} stage passed", style("✓").green().bold());
            if let Some(next) = result.next_stage() {
                println!("  next stage available: {}", next);
            }
            Ok(())
        }
        StageOutcome::Failed {
            attempts,
            last_result,
        } => {
            println!(
                "{} stage failed after {} attempt(s)",
                style("✗").red().bold(),
                attempts
            );
            print_failure_details(last_result.as_ref());
            anyhow::bail!("stage not solved");
        }
    }
}

async fn cmd_run_all(config: Config, resume: bool) -> Result<()> {
    let mut controller = build_controller(config)?;
    match controller.run_all(resume).await? {
        RunOutcome::Completed { stages_completed } => {
            println!(
                "{} all stages complete ({} solved)",
                style("✓").green().bold(),
                stages_completed
            );
            Ok(())
        }
        RunOutcome::RestartPending { stages_completed } => {
            println!(
                "{} {} stage(s) solved; the workbench is restarting",
                style("…").cyan().bold(),
                stages_completed
            );
            println!("  continue with: autosolve run-all --resume");
            Ok(())
        }
        RunOutcome::StageFailed {
            stage,
            attempts,
            last_result,
        } => {
            println!(
                "{} stage {} failed after {} attempt(s)",
                style("✗").red().bold(),
                stage,
                attempts
            );
            print_failure_details(last_result.as_ref());
            anyhow::bail!("run ended on a failed stage");
        }
        RunOutcome::StageLimitReached { stages_completed } => {
            println!(
                "{} stage ceiling reached after {} stage(s)",
                style("!").yellow().bold(),
                stages_completed
            );
            Ok(())
        }
    }
}

/// Summarize the last grading result of a failed stage.
fn print_failure_details(result: Option<&EvalResult>) {
    let Some(result) = result else {
        println!("  no grading result was received");
        return;
    };
    if let Some(errors) = result.sets_error_count {
        println!("  errors reported: {}", errors);
    }
    for (i, case) in result.test_sets.iter().enumerate() {
        if !case.compiled() {
            println!("  test case {}: compile failed", i + 1);
            continue;
        }
        if case.output != case.actual_output {
            println!(
                "  test case {}: expected {:?}, got {:?}",
                i + 1,
                case.output.as_deref().unwrap_or(""),
                case.actual_output.as_deref().unwrap_or("")
            );
        }
    }
    if let Some(compile_output) = &result.last_compile_output {
        println!("  compiler output: {}", compile_output);
    }
}

// `abort` and `status` never generate or submit anything; they work on the
// durable pieces directly instead of building the full controller.

fn cmd_abort(config: Config) -> Result<()> {
    RunStateStore::new(config.run_state_path()).clear()?;
    ExecutionLock::new(config.lock_path()).release();
    println!("{} saved run dropped, lock released", style("✓").green());
    Ok(())
}

fn cmd_status(config: Config) -> Result<()> {
    match RunStateStore::new(config.run_state_path()).load() {
        Some(state) => {
            println!("saved run: {} stage(s) completed", state.completed_stages);
            println!("  started: {}", state.start_time);
            println!("  enabled: {}", state.enabled);
        }
        None => println!("no saved run"),
    }
    match ExecutionLock::new(config.lock_path()).current_age() {
        Some(age) => println!("lock: held for {}s", age.num_seconds()),
        None => println!("lock: free"),
    }
    Ok(())
}
