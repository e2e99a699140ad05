use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, ValueEnum};
use highscore::{
    feed::{DEFAULT_FEED_TIMEOUT_SECS, HttpFeedSource},
    transport::{DEFAULT_HTTP_WORKERS, HighscoreRuntime, serve_http_with_workers},
};
use schema::LeaderboardId;
use store::{FileWal, InMemoryStore, LeaderboardStore, PersistentStore, WalWritePolicy};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(name = "highscore", about = "Leaderboard submit-and-list service")]
struct Args {
    /// Run the HTTP transport instead of printing store stats.
    #[arg(long)]
    serve: bool,

    #[arg(long, env = "HIGHSCORE_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Worker threads; defaults to available parallelism.
    #[arg(long, env = "HIGHSCORE_HTTP_WORKERS")]
    http_workers: Option<usize>,

    #[arg(long, env = "HIGHSCORE_TRANSPORT", value_enum, default_value = "std")]
    transport: TransportRuntime,

    /// Append-only log of accepted entries. Without it the store is in-memory.
    #[arg(long, env = "HIGHSCORE_WAL_PATH")]
    wal_path: Option<PathBuf>,

    #[arg(long, env = "HIGHSCORE_WAL_SYNC_EVERY_RECORDS", default_value_t = 1)]
    wal_sync_every_records: usize,

    #[arg(long, env = "HIGHSCORE_FEED_TIMEOUT_SECS", default_value_t = DEFAULT_FEED_TIMEOUT_SECS)]
    feed_timeout_secs: u64,

    #[arg(long, env = "HIGHSCORE_LOG_JSON")]
    log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportRuntime {
    Std,
    Axum,
}

impl TransportRuntime {
    fn as_str(self) -> &'static str {
        match self {
            Self::Std => "std",
            Self::Axum => "axum",
        }
    }
}

fn main() {
    let args = Args::parse();
    if let Err(err) = init_logging(args.log_json) {
        eprintln!("highscore failed to initialise logging: {err}");
        std::process::exit(1);
    }

    let store: Arc<dyn LeaderboardStore> = match &args.wal_path {
        Some(wal_path) => {
            let policy = WalWritePolicy {
                sync_every_records: args.wal_sync_every_records.max(1),
            };
            let wal = match FileWal::open_with_policy(wal_path, policy) {
                Ok(wal) => wal,
                Err(err) => {
                    tracing::error!(path = %wal_path.display(), error = %err, "failed opening WAL");
                    std::process::exit(1);
                }
            };
            let (store, load_stats) = match PersistentStore::load(wal) {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(path = %wal_path.display(), error = %err, "failed replaying WAL");
                    std::process::exit(1);
                }
            };
            tracing::info!(
                path = %wal_path.display(),
                entries_loaded = load_stats.entries_loaded,
                sync_every_records = args.wal_sync_every_records.max(1),
                "startup replay complete"
            );
            match store.wal_record_count() {
                Ok(wal_records) => tracing::debug!(wal_records, "wal opened"),
                Err(err) => tracing::warn!(error = %err, "wal record count unavailable"),
            }
            for (list, count) in &load_stats.per_leaderboard {
                tracing::debug!(list = %list, entries = count, "replayed list");
            }
            Arc::new(store)
        }
        None => Arc::new(InMemoryStore::new()),
    };

    if !args.serve {
        print_stats(store.as_ref());
        return;
    }

    let feeds = Arc::new(HttpFeedSource::new(Duration::from_secs(args.feed_timeout_secs)));
    let runtime = HighscoreRuntime::new(store, feeds);
    let http_workers = args
        .http_workers
        .filter(|workers| *workers > 0)
        .unwrap_or_else(default_http_workers);
    tracing::info!(
        bind = %args.bind,
        transport = args.transport.as_str(),
        workers = http_workers,
        "starting highscore service"
    );

    match args.transport {
        TransportRuntime::Std => {
            if let Err(err) = serve_http_with_workers(runtime, &args.bind, http_workers) {
                tracing::error!(error = %err, "highscore transport failed");
                std::process::exit(1);
            }
        }
        TransportRuntime::Axum => {
            #[cfg(feature = "async-transport")]
            {
                if let Err(err) = highscore::transport_axum::serve_http_with_axum(
                    runtime,
                    &args.bind,
                    http_workers,
                ) {
                    tracing::error!(error = %err, "highscore axum transport failed");
                    std::process::exit(1);
                }
            }
            #[cfg(not(feature = "async-transport"))]
            {
                drop(runtime);
                tracing::error!(
                    "highscore transport runtime 'axum' requires build feature 'async-transport'"
                );
                std::process::exit(2);
            }
        }
    }
}

fn init_logging(log_json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    }
    Ok(())
}

fn print_stats(store: &dyn LeaderboardStore) {
    println!("highscore registry: lists={}", LeaderboardId::all().count());
    for leaderboard in LeaderboardId::all() {
        let entries = match store.entry_count(leaderboard) {
            Ok(count) => count.to_string(),
            Err(err) => format!("unavailable ({err})"),
        };
        println!(
            "  {leaderboard}: fields={} legacy_import={} entries={entries}",
            leaderboard.schema().field_names().collect::<Vec<_>>().join(","),
            leaderboard.accepts_legacy_import(),
        );
    }
}

fn default_http_workers() -> usize {
    std::thread::available_parallelism()
        .map(|parallelism| parallelism.get().clamp(1, 32))
        .unwrap_or(DEFAULT_HTTP_WORKERS)
}
