//! comment-sync CLI - post or retract automation review comments on a PR.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use comment_sync::{
    AnnotationSource, Config, DispatchConfig, Dispatcher, JsonFileSource, Retractor, SyncError,
    SyncMode,
};

/// Reconcile automation review comments on a pull request.
#[derive(Parser)]
#[command(name = "comment-sync")]
#[command(about = "Post or retract automation review comments on a pull request")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(
        long,
        global = true,
        value_enum,
        env = "COMMENT_SYNC_LOG_FORMAT",
        default_value_t = LogFormat::Text
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile desired comments against the pull request
    Post {
        #[command(flatten)]
        config: Config,

        /// JSON file with the desired comments
        #[arg(long, env = "COMMENT_SYNC_INPUT")]
        input: PathBuf,

        /// Commit new comments are anchored to
        #[arg(long, env = "COMMIT_SHA")]
        commit_sha: String,

        /// How existing comments are treated
        #[arg(long, value_enum, env = "COMMENT_SYNC_MODE", default_value_t = SyncMode::Override)]
        mode: SyncMode,

        /// Maximum concurrent remote mutations
        #[arg(
            long,
            env = "COMMENT_SYNC_MAX_IN_FLIGHT",
            default_value_t = comment_sync::dispatch::DEFAULT_MAX_IN_FLIGHT
        )]
        max_in_flight: usize,
    },

    /// Delete every automation-owned comment on the pull request
    Clear {
        #[command(flatten)]
        config: Config,

        /// Login of the user asking for the retraction
        #[arg(long, env = "COMMENT_SYNC_REQUESTER")]
        requester: String,
    },
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling in-flight operations");
            trigger.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match run(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<ExitCode> {
    let cancel = cancel_on_ctrl_c();

    match command {
        Commands::Post {
            config,
            input,
            commit_sha,
            mode,
            max_in_flight,
        } => {
            if commit_sha.trim().is_empty() {
                return Err(SyncError::Validation("commit SHA is empty".to_string()).into());
            }
            let client = config
                .github_client()
                .context("Invalid configuration")?
                .with_commit(commit_sha.trim());
            let desired = JsonFileSource::new(&input)
                .desired()
                .with_context(|| format!("Failed to load {}", input.display()))?;

            info!(
                repository = %config.repository,
                pr = config.pr_number,
                %mode,
                comments = desired.len(),
                "Posting review comments"
            );

            let dispatcher = Dispatcher::new(Arc::new(client), cancel).with_config(DispatchConfig {
                max_in_flight,
                ..DispatchConfig::default()
            });
            let report = dispatcher
                .post(desired, mode)
                .await
                .context("Post flow aborted")?;

            for message in report.errors() {
                warn!("{message}");
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Clear { config, requester } => {
            let client = Arc::new(config.github_client().context("Invalid configuration")?);
            let retractor = Retractor::new(client.clone(), client, cancel)
                .with_config(config.retract_config());

            match retractor.clear(&requester).await {
                Ok(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(failure) => {
                    error!(error = %failure.source, "Retraction did not run");
                    println!("{}", serde_json::to_string_pretty(&failure.report)?);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}
