//! Stowage command-line archiver.

mod app;
mod config;
mod prompt;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use stowage_archive::ArchiveFormat;
use stowage_job::JobOutcome;
use stowage_transfer::TransferState;
use tracing_subscriber::EnvFilter;

use crate::config::{CollisionPolicy, Config, ErrorPolicy};
use crate::prompt::Policies;

/// Packs files and folders into an archive.
#[derive(Debug, Parser)]
#[command(name = "stowage", version, about)]
struct Cli {
    /// Files and folders to archive.
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Destination archive.
    #[arg(short, long)]
    output: PathBuf,

    /// Archive format: zip, tar or tar.gz. Guessed from the output name.
    #[arg(short, long)]
    format: Option<ArchiveFormat>,

    /// Folder entry names are relative to (default: parent of the first source).
    #[arg(long)]
    base: Option<PathBuf>,

    /// Archive comment.
    #[arg(long)]
    comment: Option<String>,

    /// Throughput limit in bytes per second (0 = unlimited).
    #[arg(long)]
    limit: Option<u64>,

    #[arg(long, value_enum)]
    on_collision: Option<CollisionPolicy>,

    #[arg(long, value_enum)]
    on_error: Option<ErrorPolicy>,

    /// Print progress snapshots as JSON lines on stdout.
    #[arg(long)]
    json: bool,

    /// Configuration file to use instead of the default one.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Resolves the job plan, command-line flags taking precedence.
    fn plan(self, config: Config) -> app::Plan {
        let format = self
            .format
            .or_else(|| {
                self.output
                    .file_name()
                    .and_then(|n| ArchiveFormat::from_file_name(&n.to_string_lossy()))
            })
            .unwrap_or(config.format);
        let comment = self.comment.or_else(|| {
            (!config.comment.is_empty()).then(|| config.comment.clone())
        });
        app::Plan {
            sources: self.sources,
            base: self.base,
            output: self.output,
            format,
            comment,
            throughput_limit: self.limit.unwrap_or(config.throughput_limit),
            buffer_size: config.buffer_size,
            progress_interval: Duration::from_millis(config.progress_interval_ms.max(10)),
            policies: Policies {
                on_collision: self.on_collision.unwrap_or(config.on_collision),
                on_error: self.on_error.unwrap_or(config.on_error),
            },
            json: self.json,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so that --json output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting stowage");

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let plan = cli.plan(config);

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(app::run(plan))?;

    tracing::info!(
        files = outcome.files_processed,
        failures = outcome.failures,
        bytes = outcome.total_bytes,
        elapsed_ms = outcome.elapsed_ms,
        "done"
    );
    check_outcome(&outcome)
}

/// Maps a job outcome to the process result.
fn check_outcome(outcome: &JobOutcome) -> anyhow::Result<()> {
    match outcome.state {
        TransferState::Finished if outcome.end_date <= 0 => {
            anyhow::bail!("archive could not be finalized")
        }
        TransferState::Finished if outcome.failures > 0 => {
            anyhow::bail!("{} file(s) skipped", outcome.failures)
        }
        TransferState::Finished => Ok(()),
        state => anyhow::bail!("archive not completed ({state:?})"),
    }
}
