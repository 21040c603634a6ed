use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use skyhose::bluesky::client::XrpcClient;
use skyhose::bluesky::profiles::{ProfileEnricher, ProfileLookup};
use skyhose::bluesky::rate_limit::RateLimiter;
use skyhose::bluesky::repos::PdsRepoFetcher;
use skyhose::bluesky::session::{SessionHandle, SessionStore};
use skyhose::config::Config;
use skyhose::firehose::stream::FirehoseStream;
use skyhose::output::sink::LogSink;
use skyhose::output::{terminal, Emitter};
use skyhose::pipeline::dispatch::{DispatchOptions, Dispatcher};
use skyhose::pipeline::likes::LikeResolver;
use skyhose::pipeline::workers::WorkerPool;
use skyhose::stats::Counters;

/// Time the log writer gets to flush after the stream stops.
const SINK_GRACE: Duration = Duration::from_secs(5);

/// Skyhose: watch the Bluesky firehose.
///
/// Prints every new post on the relay stream as JSON. With --authed, posts
/// are enriched with author profiles, and those profiles plus a post URL are
/// shown for authors above the --mf follower threshold.
#[derive(Parser)]
#[command(name = "skyhose", version, about)]
struct Cli {
    /// Look up author profiles through a logged-in session
    #[arg(long)]
    authed: bool,

    /// Minimum follower count to include profiles and a post URL
    #[arg(long, default_value = "0")]
    mf: i64,

    /// Also show posts as they are liked
    #[arg(long)]
    likes: bool,

    /// Append emitted records to post_data_<n>.log
    #[arg(long)]
    save: bool,

    /// Stop after emitting this many records
    #[arg(long)]
    max_records: Option<u64>,

    /// Worker tasks (overrides SKYHOSE_WORKERS)
    #[arg(long)]
    workers: Option<usize>,

    /// Handle to log in with (only needed when no session is saved)
    handle: Option<String>,

    /// App password for the handle
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("skyhose=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate()?;

    let counters = Arc::new(Counters::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    tokio::spawn(watch_signals(Arc::clone(&shutdown_tx)));

    let base = XrpcClient::new(&config.pds_host, config.http_timeout)?;
    let limiter = Arc::new(RateLimiter::appview());

    let profiles: Option<Arc<dyn ProfileLookup>> = if cli.authed {
        let credentials = match (&cli.handle, &cli.password) {
            (Some(handle), Some(password)) => Some((handle.as_str(), password.as_str())),
            _ => None,
        };
        let store = SessionStore::new(&config.auth_file);
        let session = Arc::new(SessionHandle::open(base.clone(), store, credentials).await?);
        info!(handle = %session.session().handle, "Authenticated");
        Some(Arc::new(ProfileEnricher::new(session, Arc::clone(&limiter))))
    } else {
        None
    };

    let likes = cli.likes.then(|| {
        let fetcher = PdsRepoFetcher::new(base.clone(), &config.plc_url, Arc::clone(&limiter));
        LikeResolver::new(Arc::new(fetcher), config.fetch_concurrency)
    });

    let (sink, writer) = if cli.save {
        let (sink, writer) = LogSink::spawn(
            &config.output_dir,
            config.records_per_file,
            config.sink_buffer,
            Arc::clone(&counters),
        )?;
        info!(dir = %config.output_dir.display(), "Saving records to disk");
        (Some(sink), Some(writer))
    } else {
        (None, None)
    };

    let dispatcher = Arc::new(Dispatcher::new(
        DispatchOptions {
            threshold: cli.mf,
            show_likes: cli.likes,
            web_host: config.web_host.clone(),
        },
        profiles,
        likes,
        Arc::clone(&counters),
    ));
    let emitter = Arc::new(Emitter::new(
        sink,
        Arc::clone(&counters),
        cli.max_records,
        Arc::clone(&shutdown_tx),
    ));
    let pool = WorkerPool::spawn(config.workers, dispatcher, Arc::clone(&emitter));

    let mut stream = FirehoseStream::new(&config.relay_url, Arc::clone(&counters), shutdown_rx);
    let result = stream.run(pool).await;

    // The writer exits once the last sink handle is gone.
    drop(emitter);
    if let Some(writer) = writer {
        match tokio::time::timeout(SINK_GRACE, writer).await {
            Ok(Ok(written)) => info!(written = written, "Log sink closed"),
            Ok(Err(e)) => warn!(error = %e, "Log sink writer failed"),
            Err(_) => warn!("Log sink did not flush in time"),
        }
    }

    terminal::display_summary(&counters);
    result
}

/// Flip the shutdown flag on SIGINT (Ctrl+C) or SIGTERM.
async fn watch_signals(shutdown: Arc<watch::Sender<bool>>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, draining stream"),
        () = terminate => info!("Received SIGTERM, draining stream"),
    }
    shutdown.send_replace(true);
}
