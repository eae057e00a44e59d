#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pixelbench::config::{BenchConfig, ExecutionMode};
use pixelbench::pipeline::{CancelFlag, PipelineOrchestrator};
use pixelbench::provider::create_provider;

#[derive(Parser)]
#[command(name = "pixelbench", version, about = "Generative UI model benchmark")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliMode {
    GenerationOnly,
    EvaluationOnly,
    Full,
}

impl From<CliMode> for ExecutionMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::GenerationOnly => ExecutionMode::GenerationOnly,
            CliMode::EvaluationOnly => ExecutionMode::EvaluationOnly,
            CliMode::Full => ExecutionMode::Full,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark matrix
    Run {
        #[arg(long, default_value = "pixelbench.yaml")]
        config: PathBuf,
        /// Override the execution mode from the config file
        #[arg(long, value_enum)]
        mode: Option<CliMode>,
    },
    /// List models the configured provider can serve
    Models {
        #[arg(long, default_value = "pixelbench.yaml")]
        config: PathBuf,
    },
    /// Parse and validate a config file without running anything
    Validate {
        #[arg(long, default_value = "pixelbench.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, mode } => {
            let mut config = BenchConfig::from_yaml(&config)?;
            if let Some(mode) = mode {
                config.mode = mode.into();
            }

            let cancel = CancelFlag::new();
            let ctrl_c_flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing the current pair then stopping");
                    ctrl_c_flag.cancel();
                }
            });

            let mut orchestrator = PipelineOrchestrator::from_config(config, cancel).await?;
            let report = orchestrator.run().await?;

            info!(
                total = report.pairs_total,
                completed = report.pairs_completed,
                failed = report.pairs_failed,
                cancelled = report.cancelled,
                "benchmark finished"
            );
            for summary in &report.summaries {
                println!(
                    "{:<30} {:<20} final {:.2}  improvement {:+.2}  agreement {:.2}",
                    summary.model,
                    summary.task,
                    summary.final_score,
                    summary.total_improvement,
                    summary.judge_agreement
                );
            }
        }
        Commands::Models { config } => {
            let config = BenchConfig::from_yaml(&config)?;
            let provider = create_provider(&config.provider)?;
            for model in provider.list_models().await? {
                println!("{model}");
            }
        }
        Commands::Validate { config } => {
            let parsed = BenchConfig::from_yaml(&config)?;
            println!(
                "ok: {} models, {} tasks, {} judges, {} iterations",
                parsed.models.len(),
                parsed.tasks.len(),
                parsed.resolved_judges().len(),
                parsed.iterations
            );
        }
    }

    Ok(())
}
