use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use imgfetch::config::{self, Config};
use imgfetch::download::Downloader;
use imgfetch::supervisor::{self, Supervisor};
use imgfetch::sweep::Sweeper;
use imgfetch::Error;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "imgfetch", version, about = "Download large image lists concurrently")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download every image of a URL list into a target directory
    Fetch(FetchArgs),
    /// Move empty and placeholder images out of an image directory
    Sweep(SweepArgs),
}

#[derive(Debug, Args)]
struct FetchArgs {
    /// Target directory for images
    #[arg(short = 't', long = "target", default_value = config::DEFAULT_TARGET_DIR)]
    target: PathBuf,

    /// URL list file, one `<destination> <url>` pair per line
    #[arg(short = 'u', long = "url-list", default_value = config::DEFAULT_URL_LIST)]
    url_list: PathBuf,

    /// Number of download workers
    #[arg(short = 'j', long = "threads", default_value_t = config::DEFAULT_WORKERS)]
    workers: NonZeroUsize,

    /// Maximum number of queued downloads
    #[arg(short = 'q', long = "queue-size", default_value_t = config::DEFAULT_CAPACITY)]
    capacity: NonZeroUsize,

    /// Number of leading URL list entries to skip
    #[arg(long = "skip", default_value_t = 0)]
    skip: usize,

    /// Per-request timeout, in seconds
    #[arg(long = "timeout", default_value_t = config::DEFAULT_REQUEST_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Grace period for workers to stop once interrupted, in seconds
    #[arg(long = "join-timeout", default_value_t = config::DEFAULT_JOIN_TIMEOUT.as_secs())]
    join_timeout_secs: u64,
}

impl From<FetchArgs> for Config {
    fn from(args: FetchArgs) -> Self {
        Self {
            target_dir: args.target,
            url_list: args.url_list,
            workers: args.workers,
            capacity: args.capacity,
            skip: args.skip,
            request_timeout: Duration::from_secs(args.timeout_secs),
            join_timeout: Duration::from_secs(args.join_timeout_secs),
        }
    }
}

#[derive(Debug, Args)]
struct SweepArgs {
    /// Image directory
    #[arg(short = 'i', long = "img-dir", default_value = config::DEFAULT_TARGET_DIR)]
    img_dir: PathBuf,

    /// Destination directory for error images
    #[arg(short = 'e', long = "err-img-dir", default_value = "err_imgs2")]
    err_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Fetch(args) => fetch(args.into()).await,
        Command::Sweep(args) => sweep(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn fetch(config: Config) -> Result<(), Error> {
    let entries = supervisor::prepare(&config).await?;
    let downloader = Downloader::new(config.request_timeout)?;

    let summary = Supervisor::new(config, downloader).run(entries, interrupt()).await;

    if summary.crashed_workers > 0 || summary.aborted_workers > 0 {
        tracing::warn!(
            "{} worker(s) crashed, {} worker(s) aborted",
            summary.crashed_workers,
            summary.aborted_workers
        );
    }

    Ok(())
}

async fn sweep(args: SweepArgs) -> Result<(), Error> {
    let start = std::time::Instant::now();

    let report = Sweeper::new(args.img_dir, args.err_dir).run().await?;

    tracing::info!("Swept {} of {} image(s)", report.moved.len(), report.scanned);
    tracing::info!("Elapsed time: {:?}", start.elapsed());

    Ok(())
}

/// Resolve on the first termination signal.
///
/// Never resolves if the signal handlers cannot be installed, the run then simply goes on to completion.
async fn interrupt() {
    if let Err(err) = shutdown_signal().await {
        tracing::error!("{err}");
        std::future::pending::<()>().await;
    }
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    #[cfg(unix)]
    {
        let mut term = signal(SignalKind::terminate())?;
        let mut hup = signal(SignalKind::hangup())?;

        tokio::select! {
            res = &mut ctrl_c => res?,
            _ = term.recv() => {},
            _ = hup.recv() => {},
        }

        return Ok(());
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await
    }
}
