// src/bin/store_bench.rs

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use resilient_store::config;
use resilient_store::{RateWindow, ResilientStoreClient};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "store_bench",
    about = "Concurrent load generator for the resilient store"
)]
struct Opt {
    /// Redis URL; falls back to REDIS_URL, and to fallback-only mode when unset
    #[structopt(long)]
    redis_url: Option<String>,

    /// Workload to run
    #[structopt(short, long, possible_values = &["kv", "ratelimit"], default_value = "kv")]
    workload: String,

    /// Number of concurrent users to simulate
    #[structopt(short = "u", long, default_value = "10")]
    num_users: usize,

    /// Number of requests per user
    #[structopt(short = "r", long, default_value = "1000")]
    requests_per_user: usize,

    /// Maximum concurrency level
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// Rate limit per user (ratelimit workload)
    #[structopt(short, long, default_value = "500")]
    max_requests: u64,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct UserResult {
    ok: u64,
    denied: u64,
    errors: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "store_bench={},resilient_store={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (env_url, client_config) = config::from_env()?;
    let url = opt.redis_url.clone().or(env_url);
    let client = Arc::new(ResilientStoreClient::new(url.as_deref(), client_config).await?);
    info!(connected = client.is_connected(), workload = %opt.workload, "Starting benchmark");

    // Ctrl-C lets in-flight requests finish and still prints the report
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    let total = (opt.num_users * opt.requests_per_user) as u64;
    let progress = ProgressBar::new(total);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {per_sec} {msg}")?
            .progress_chars("█▉▊▋▌▍▎▏ "),
    );
    progress.set_message(opt.workload.clone());

    let barrier = Arc::new(Barrier::new(opt.num_users));
    let semaphore = Arc::new(Semaphore::new(opt.concurrency.max(1)));
    let started = Instant::now();

    let handles: Vec<_> = (0..opt.num_users)
        .map(|user_id| {
            let client = Arc::clone(&client);
            let barrier = Arc::clone(&barrier);
            let semaphore = Arc::clone(&semaphore);
            let stop = Arc::clone(&stop);
            let progress = progress.clone();
            let opt = opt.clone();

            tokio::spawn(async move {
                barrier.wait().await;
                let mut result = UserResult::default();

                for i in 0..opt.requests_per_user {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(_permit) = semaphore.acquire().await else {
                        break;
                    };

                    let outcome = match opt.workload.as_str() {
                        "ratelimit" => client
                            .check_rate_limit(
                                &format!("bench_user_{}", user_id),
                                opt.max_requests,
                                RateWindow::Minute,
                            )
                            .await
                            .map(|status| status.allowed),
                        _ => {
                            let key = format!("bench:{}:{}", user_id, i % 100);
                            match client.set(&key, b"payload", Some(Duration::from_secs(60))).await {
                                Ok(()) => client.get(&key).await.map(|v| v.is_some()),
                                Err(e) => Err(e),
                            }
                        }
                    };

                    match outcome {
                        Ok(true) => result.ok += 1,
                        Ok(false) => result.denied += 1,
                        Err(e) => {
                            result.errors += 1;
                            warn!(error = %e, "Benchmark request failed");
                        }
                    }
                    progress.inc(1);
                }

                result
            })
        })
        .collect();

    let mut totals = UserResult::default();
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(user) => {
                totals.ok += user.ok;
                totals.denied += user.denied;
                totals.errors += user.errors;
            }
            Err(e) => warn!(error = %e, "Benchmark worker panicked"),
        }
    }
    let elapsed = started.elapsed();

    if stop.load(Ordering::SeqCst) {
        progress.abandon_with_message("interrupted");
    } else {
        progress.finish_with_message("done");
    }

    let completed = totals.ok + totals.denied + totals.errors;
    let metrics = client.get_comprehensive_metrics();

    let mut table = Table::new();
    table.add_row(row!["Metric", "Value"]);
    table.add_row(row!["requests", completed]);
    table.add_row(row!["ok", totals.ok]);
    table.add_row(row!["denied", totals.denied]);
    table.add_row(row!["errors", totals.errors]);
    table.add_row(row!["elapsed", format!("{:.2?}", elapsed)]);
    table.add_row(row![
        "throughput",
        format!("{:.0} req/s", completed as f64 / elapsed.as_secs_f64().max(f64::EPSILON))
    ]);
    table.add_row(row![
        "avg_response",
        format!(
            "{:.2} ms ({})",
            metrics.metrics.avg_response_time_ms, metrics.metrics.response_category
        )
    ]);
    table.add_row(row!["redis_hits", metrics.metrics.redis_hits]);
    table.add_row(row!["fallback_hits", metrics.metrics.fallback_hits]);
    table.add_row(row!["circuit", metrics.circuit_breaker.state]);
    table.printstd();

    client.close().await;
    Ok(())
}
