use dotenv::dotenv;
use resilient_store::config;
use resilient_store::{init_logging, ResilientStoreClient};
use tracing::{debug, error, info, warn};

// Startup probe: build a client from the environment and report its health
#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();
    info!("Resilient store probe starting up");

    let (url, config) = match config::from_env() {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(2);
        }
    };
    debug!(key_prefix = %config.key_prefix, redis_configured = url.is_some(), "Configuration loaded");

    let client = match ResilientStoreClient::new(url.as_deref(), config).await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Could not build store client");
            std::process::exit(2);
        }
    };

    let health = client.health_check().await;
    if health.fallback_active {
        warn!(
            circuit = %health.circuit_breaker_state,
            "Redis unavailable, the client will serve from its fallback cache"
        );
    }

    match serde_json::to_string_pretty(&health) {
        Ok(json) => println!("{}", json),
        Err(e) => error!(error = %e, "Could not encode health report"),
    }

    if let Some(info) = client.server_info().await {
        info!(
            redis_version = info.get("redis_version").map(String::as_str).unwrap_or("unknown"),
            connected_clients = info.get("connected_clients").map(String::as_str).unwrap_or("unknown"),
            "Redis server info"
        );
    }

    info!(
        client_id = %client.client_id(),
        operation = "startup",
        redis_available = health.redis_available,
        "Resilient store probe finished"
    );
    client.close().await;
}
