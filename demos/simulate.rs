//! Simulation of many clients sharing one switch.
//!
//! Run with:
//! ```bash
//! cargo run --example simulate --features demo -- --help
//! RUST_LOG=interruttore=debug cargo run --example simulate --features demo -- --clients 4
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use interruttore::adapters::Delayed;
use interruttore::backend::LocalBackend;
use interruttore::client::{ClientHandle, SwitchClient};
use interruttore::config::Config;
use interruttore::faults::FaultPoint;
use interruttore::leaderboard::LeaderboardPanel;
use interruttore::observers::json::JsonObserver;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Simulates concurrent clients flipping a shared switch, then prints the
/// board as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of signed-in clients
    #[arg(short, long, default_value = "8")]
    clients: usize,

    /// Clicks per client
    #[arg(short = 'n', long, default_value = "25")]
    clicks: usize,

    /// Anonymous watchers that only observe
    #[arg(long, default_value = "2")]
    watchers: usize,

    /// Request latency of every backend call, in milliseconds
    #[arg(long, default_value = "0")]
    latency_ms: u64,

    /// Response latency; defaults to the request latency
    #[arg(long)]
    response_latency_ms: Option<u64>,

    /// Fail this many per-user record updates
    #[arg(long, default_value = "0")]
    fail_derived: u32,

    /// Fail this many global increments
    #[arg(long, default_value = "0")]
    fail_increments: u32,

    /// Start the counter at this total
    #[arg(long, default_value = "0")]
    initial: u64,

    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,

    /// Include timestamp in JSON output
    #[arg(long)]
    timestamp: bool,
}

async fn run_clicker(client: ClientHandle, clicks: usize) -> usize {
    let mut landed = 0;
    for _ in 0..clicks {
        match client.click().await {
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "click refused");
                continue;
            }
        }
        match client.wait_until(|v| v.enabled).await {
            Ok(view) if view.last_error.is_none() => landed += 1,
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "session ended");
                break;
            }
        }
    }
    landed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let local = LocalBackend::with_initial(&config, args.initial);
    local
        .faults()
        .fail_next(FaultPoint::UserRecord, args.fail_derived);
    local
        .faults()
        .fail_next(FaultPoint::Increment, args.fail_increments);

    let request = Duration::from_millis(args.latency_ms);
    let response = args
        .response_latency_ms
        .map(Duration::from_millis)
        .unwrap_or(request);
    let backend = Arc::new(Delayed::new(local, request).with_response_latency(response));

    let panel = LeaderboardPanel::open(backend.clone(), config.leaderboard_limit).await;

    let mut watchers = Vec::with_capacity(args.watchers);
    for _ in 0..args.watchers {
        watchers.push(SwitchClient::connect(backend.clone(), None, &config).await?);
    }

    let mut tasks = Vec::with_capacity(args.clients);
    for i in 0..args.clients {
        let user = format!("user-{i:02}").into();
        let client = SwitchClient::connect(backend.clone(), Some(user), &config).await?;
        tasks.push(tokio::spawn(run_clicker(client, args.clicks)));
    }

    let mut landed = 0;
    for task in tasks {
        landed += task.await?;
    }

    let expected = backend.counters().reading(&config.button)?;
    for watcher in &watchers {
        watcher
            .wait_until(|v| v.reading == Some(expected))
            .await?;
    }
    info!(landed, total = %expected, on = expected.is_on(), "all clicks resolved");

    let board = panel.refresh().await?;
    info!(rows = board.len(), "leaderboard refreshed");

    let json = JsonObserver::new()
        .pretty(args.pretty)
        .include_timestamp(args.timestamp)
        .render_board(backend.inner(), config.leaderboard_limit)?;
    println!("{json}");

    Ok(())
}
