// src/bin/store_cli.rs

use prettytable::{row, Table};
use std::time::Duration;
use structopt::StructOpt;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use resilient_store::config::{self, ClientConfig};
use resilient_store::{RateWindow, ResilientStoreClient};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "store_cli",
    about = "One-shot commands against the resilient store"
)]
struct Opt {
    /// Redis URL; falls back to REDIS_URL, and to fallback-only mode when unset
    #[structopt(long)]
    redis_url: Option<String>,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Read a key
    Get { key: String },
    /// Write a key
    Set {
        key: String,
        value: String,
        /// Expiry in seconds
        #[structopt(long)]
        ttl: Option<u64>,
    },
    /// Delete a key
    Del { key: String },
    /// Increment a counter
    Incr {
        key: String,
        #[structopt(default_value = "1")]
        amount: i64,
    },
    /// Read a hash field
    Hget { key: String, field: String },
    /// Write a hash field
    Hset {
        key: String,
        field: String,
        value: String,
    },
    /// Show the health report
    Health,
    /// Show the metrics snapshot
    Metrics,
    /// Count one request against a fixed-window rate limit
    Ratelimit {
        identifier: String,
        #[structopt(short, long, default_value = "10")]
        max: u64,
        #[structopt(short, long, default_value = "minute", possible_values = &["second", "minute", "hour", "day"])]
        window: RateWindow,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "store_cli={},resilient_store={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (env_url, env_config) = config::from_env()?;
    let url = opt.redis_url.clone().or(env_url);
    let client_config = ClientConfig {
        // One-shot process, no need for the purge task
        fallback: resilient_store::config::FallbackConfig {
            cleanup_interval: None,
            ..env_config.fallback.clone()
        },
        ..env_config
    };

    let client = ResilientStoreClient::new(url.as_deref(), client_config).await?;
    info!(connected = client.is_connected(), "Client ready");

    let outcome = run(&client, opt.command).await;
    client.close().await;

    if let Err(e) = &outcome {
        error!(error = %e, "Command failed");
    }
    outcome
}

async fn run(
    client: &ResilientStoreClient,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Get { key } => print_value(&key, client.get(&key).await?),
        Command::Set { key, value, ttl } => {
            client
                .set(&key, value.as_bytes(), ttl.map(Duration::from_secs))
                .await?;
            println!("OK");
        }
        Command::Del { key } => println!("(integer) {}", client.delete(&key).await?),
        Command::Incr { key, amount } => println!("(integer) {}", client.incr(&key, amount).await?),
        Command::Hget { key, field } => print_value(&field, client.hget(&key, &field).await?),
        Command::Hset { key, field, value } => {
            println!("(integer) {}", client.hset(&key, &field, value.as_bytes()).await?)
        }
        Command::Health => {
            let health = client.health_check().await;
            let mut table = Table::new();
            table.add_row(row!["Check", "Value"]);
            table.add_row(row!["redis_available", health.redis_available]);
            table.add_row(row![
                "response_time_ms",
                health
                    .response_time_ms
                    .map(|ms| format!("{:.2}", ms))
                    .unwrap_or_else(|| "-".to_string())
            ]);
            table.add_row(row![
                "response_category",
                health
                    .response_category
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string())
            ]);
            table.add_row(row!["circuit_breaker", health.circuit_breaker_state]);
            table.add_row(row!["fallback_active", health.fallback_active]);
            table.add_row(row!["fallback_entries", health.fallback_entries]);
            table.add_row(row!["checked_at", health.checked_at.to_rfc3339()]);
            table.printstd();
        }
        Command::Metrics => {
            let metrics = client.get_comprehensive_metrics();
            let mut table = Table::new();
            table.add_row(row!["Operation", "Requests", "Redis", "Fallback", "Failures"]);
            for (name, stats) in &metrics.metrics.operations {
                table.add_row(row![
                    name,
                    stats.requests,
                    stats.redis_hits,
                    stats.fallback_hits,
                    stats.failures
                ]);
            }
            table.add_row(row![
                "total",
                metrics.metrics.total_requests,
                metrics.metrics.redis_hits,
                metrics.metrics.fallback_hits,
                metrics.metrics.failures
            ]);
            table.printstd();
            println!(
                "availability {:.1}%, fallback dependency {:.1}%, circuit {}",
                metrics.availability_percent,
                metrics.fallback_dependency_percent,
                metrics.circuit_breaker.state
            );
        }
        Command::Ratelimit {
            identifier,
            max,
            window,
        } => {
            let status = client.check_rate_limit(&identifier, max, window).await?;
            let mut table = Table::new();
            table.add_row(row!["Identifier", "Allowed", "Count", "Limit", "Remaining", "Resets in"]);
            table.add_row(row![
                identifier,
                status.allowed,
                status.current_count,
                status.limit,
                status.remaining,
                format!("{}s", status.reset_after.as_secs())
            ]);
            table.printstd();
        }
    }

    Ok(())
}

fn print_value(name: &str, value: Option<Vec<u8>>) {
    match value {
        Some(bytes) => println!("{}: {}", name, String::from_utf8_lossy(&bytes)),
        None => println!("(nil)"),
    }
}
