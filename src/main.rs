//! Rotor - Entry Point
//!
//! Loads the proxy list, validates it and reports the resulting pool.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rotor::config::LogConfig;
use rotor::models::list_entries;
use rotor::{ClientCache, Config, NetworkProber, ProxyPool, ProxyValidator, RotorError};

#[tokio::main]
async fn main() -> rotor::Result<()> {
    // Load configuration first so it can shape logging
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Rotor");

    let content = tokio::fs::read_to_string(&config.proxy_file)
        .await
        .map_err(|e| {
            error!("Failed to read proxy list {}: {}", config.proxy_file, e);
            RotorError::Io(e)
        })?;
    let entries = list_entries(&content);
    info!("Read {} proxy entries from {}", entries.len(), config.proxy_file);

    let clients = Arc::new(ClientCache::new(config.validator.probe_timeout)?);
    let prober = Arc::new(NetworkProber::new(clients));
    let validator = Arc::new(ProxyValidator::new(config.validator.clone(), prober));

    let pool = ProxyPool::new(&config.pool, validator);
    let admitted = pool.initialize(&entries).await?;

    if admitted == 0 {
        error!("No usable proxies in {}", config.proxy_file);
        return Err(RotorError::ProxyUnavailable);
    }

    info!(
        "Proxy pool ready: {} endpoints, {} eligible now, cooldown {:?}",
        pool.len(),
        pool.eligible_count(),
        pool.cooldown()
    );
    Ok(())
}

/// Install the global subscriber; `RUST_LOG` overrides `LOG_LEVEL`
fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rotor={}", log.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
