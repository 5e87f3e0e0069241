//! Command-line front end for the buildflow pipeline.

use anyhow::{Context, Result};
use buildflow::prelude::*;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "buildflow")]
#[command(version, about = "Autonomous multi-stage build pipeline")]
struct Cli {
    /// Directory for the built project, session files and results
    #[arg(long, default_value = "buildflow-output", global = true)]
    output_dir: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a new pipeline session for a requirement
    Run {
        /// The requirement description to build from
        requirement: String,

        /// Pause after planning instead of executing immediately
        #[arg(long)]
        no_auto_advance: bool,

        /// Disable checkpoint creation during execution
        #[arg(long)]
        no_checkpoints: bool,

        /// Keep executing remaining sub-tasks after an unrecoverable one
        #[arg(long)]
        continue_on_failure: bool,

        /// Upper bound on concurrently running independent sub-tasks
        #[arg(long, default_value = "1")]
        max_parallel: usize,
    },
    /// Resume a paused session by id
    Resume {
        /// The session id printed when the run paused
        session_id: Uuid,
    },
}

struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        info!(
            stage = %event.stage,
            percent = event.overall_percent,
            "{}",
            event.message
        );
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn summarize(result: &PipelineResult) {
    info!(
        session_id = %result.session.id,
        status = %result.status,
        total_ms = result.metrics.total_ms,
        tasks_completed = result.metrics.tasks_completed,
        tasks_failed = result.metrics.tasks_failed,
        errors = result.metrics.errors_total,
        "Run finished"
    );
    if result.status == SessionStatus::Paused {
        info!(
            session_id = %result.session.id,
            "Session paused; resume with: buildflow resume {}",
            result.session.id
        );
    }
    for error in &result.session.errors {
        info!(
            stage = %error.stage,
            category = %error.category,
            "{}: {}",
            error.message,
            error.suggested_action
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let result = match cli.command {
        Commands::Run {
            requirement,
            no_auto_advance,
            no_checkpoints,
            continue_on_failure,
            max_parallel,
        } => {
            let config = PipelineConfig::new(&cli.output_dir)
                .auto_advance(!no_auto_advance)
                .checkpoints(!no_checkpoints)
                .continue_on_failure(continue_on_failure)
                .max_parallel(max_parallel);
            let coordinator = PipelineCoordinator::new(config);
            coordinator.add_observer(Arc::new(LogObserver));
            coordinator
                .run(requirement)
                .await
                .context("pipeline run failed")?
        }
        Commands::Resume { session_id } => {
            let coordinator = PipelineCoordinator::new(PipelineConfig::new(&cli.output_dir));
            coordinator.add_observer(Arc::new(LogObserver));
            coordinator
                .resume(session_id)
                .await
                .context("pipeline resume failed")?
        }
    };

    summarize(&result);

    if result.status == SessionStatus::Completed {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
