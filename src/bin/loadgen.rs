//! Load generator that fires bursts of requests at a Tollgate server.

use chrono::Timelike;
use clap::Parser;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, warn};

use tollgate::ratelimit::{RateLimiter, TokenBucket};

/// Pause after each answered request before the task finishes.
const RESPONSE_PAUSE: Duration = Duration::from_millis(100);

/// Send periodic request bursts and report each response status.
#[derive(Debug, Parser)]
#[command(name = "loadgen", version, about)]
struct Args {
    /// Target URL
    #[arg(long, default_value = "http://127.0.0.1:8080/")]
    url: String,

    /// Requests attempted per tick
    #[arg(long, default_value_t = 50)]
    burst: usize,

    /// Milliseconds between bursts
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Total run time in seconds
    #[arg(long, default_value_t = 5)]
    duration_secs: u64,

    /// Client-side pacing: tokens added per second
    #[arg(long, default_value_t = 1.0)]
    client_rate: f64,

    /// Client-side pacing: burst capacity
    #[arg(long, default_value_t = 10)]
    client_burst: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();
    let pacer = TokenBucket::new(args.client_rate, args.client_burst)?;
    let client = reqwest::Client::new();

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let deadline = tokio::time::sleep(Duration::from_secs(args.duration_secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("{} seconds elapsed", args.duration_secs);
                return Ok(());
            }
            _ = ticker.tick() => {
                let mut in_flight = JoinSet::new();

                for i in 0..args.burst {
                    if !pacer.allow() {
                        report(i, "skipped");
                        continue;
                    }

                    let client = client.clone();
                    let url = args.url.clone();
                    in_flight.spawn(async move {
                        match client.get(&url).send().await {
                            Ok(response) => {
                                report(i, response.status().as_u16());
                                tokio::time::sleep(RESPONSE_PAUSE).await;
                            }
                            Err(e) => warn!(request = i + 1, error = %e, "Request failed"),
                        }
                    });
                }

                while in_flight.join_next().await.is_some() {}
            }
        }
    }
}

fn report(index: usize, status: impl std::fmt::Display) {
    println!(
        "Request {:2}: Status: {} Time: {}",
        index + 1,
        status,
        chrono::Local::now().second()
    );
}
