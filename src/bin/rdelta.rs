//! rdelta CLI - fingerprint, diff, and patch files against a base.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rdelta::{BlockSize, Session, SessionBuilder, Sink, Source};

/// rdelta - streaming rsync-style delta encoding
#[derive(Parser, Debug)]
#[command(name = "rdelta")]
#[command(version)]
#[command(about = "rsync-style delta encoding of files against a base")]
#[command(long_about = None)]
struct Cli {
    /// Base file; its fingerprint lives at <FILE>.fingerprint
    #[arg(short, long, required = true)]
    file: PathBuf,

    /// Input path (default: stdin). Target for diff, patch for patch
    #[arg(long = "in", value_name = "PATH")]
    input: Option<PathBuf>,

    /// Output path (default: stdout). Patch for diff, target for patch
    #[arg(long = "out", value_name = "PATH")]
    output: Option<PathBuf>,

    /// Block size in bytes (1024 to 8388608)
    #[arg(short, long = "blocksize", default_value_t = BlockSize::DEFAULT, value_parser = parse_block_size)]
    block_size: usize,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log progress once per second
    #[arg(long)]
    progress: bool,

    /// Operation to perform
    #[arg(value_enum)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    /// Write the base file's fingerprint
    Fpgen,
    /// Encode the input against the base, writing a patch
    Diff,
    /// Apply the input patch to the base, writing the target
    Patch,
}

fn parse_block_size(s: &str) -> Result<usize, String> {
    let size: usize = s.parse().map_err(|e| format!("{e}"))?;
    BlockSize::new(size)
        .map(BlockSize::get)
        .map_err(|e| e.to_string())
}

fn init_tracing(cli: &Cli) {
    let default = if cli.debug {
        "debug"
    } else if cli.progress {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> rdelta::Result<()> {
    let config = SessionBuilder::new()
        .block_size(cli.block_size)
        .progress(cli.progress)
        .build()?;
    let session = Session::new(config);

    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling session");
            cancel.cancel();
        }
    });

    let source = Source::from_path(cli.input);
    let sink = Sink::from_path(cli.output);

    match cli.command {
        Command::Fpgen => {
            let summary = session.fingerprint(&cli.file).await?;
            info!(
                path = %summary.path.display(),
                blocks = summary.blocks,
                "fingerprint written"
            );
        }
        Command::Diff => {
            let summary = session.diff(&cli.file, source, sink).await?;
            info!(
                ops = summary.stats.op_count(),
                reuse = %format!("{:.1}%", summary.stats.reuse_ratio(summary.target_len) * 100.0),
                "diff written"
            );
        }
        Command::Patch => {
            let summary = session.patch(&cli.file, source, sink).await?;
            info!(bytes = summary.bytes, "target reconstructed");
        }
    }
    Ok(())
}
