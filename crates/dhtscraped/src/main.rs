//! dhtscraped — DHT scrape daemon.
//!
//! Usage: `dhtscraped [PORT]` or `dhtscraped --port PORT`. The port falls
//! back to `[api] port` from the config file.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use dhtscrape_api::ApiState;
use dhtscrape_core::config::DhtScrapeConfig;
use dhtscrape_core::version::USER_AGENT;
use dhtscrape_lp2p::Lp2pNetwork;
use dhtscrape_services::{backoff, AggregatingScraper, DhtScraper, ScrapeStats, ScrapeTuning, Scraper};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = DhtScrapeConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = DhtScrapeConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        DhtScrapeConfig::default()
    });

    let port = port_from_args(std::env::args().skip(1))?.unwrap_or(config.api.port);
    tracing::info!(version = USER_AGENT, port, "dhtscraped starting");

    // ── Scraper ──────────────────────────────────────────────────────────────
    let stats = ScrapeStats::new();
    let network = Arc::new(Lp2pNetwork::from_config(&config.network));
    let dht_scraper = DhtScraper::new(
        network,
        config.network.bootstrap_addrs.clone(),
        ScrapeTuning::from(&config.scrape),
    )
    .with_boxed_backoff(backoff::from_millis(
        config.scrape.restart_backoff_ms,
        config.scrape.restart_backoff_max_ms,
    ))
    .with_stats(stats.clone());

    let scraper: Arc<dyn Scraper> = if config.api.aggregate {
        tracing::info!(capacity = config.api.subscription_capacity, "sharing one scrape across requests");
        Arc::new(
            AggregatingScraper::builder(Arc::new(dht_scraper))
                .capacity(config.api.subscription_capacity)
                .stats(stats.clone())
                .build(),
        )
    } else {
        Arc::new(dht_scraper)
    };

    // ── Shutdown ─────────────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    // ── API ──────────────────────────────────────────────────────────────────
    let state = ApiState::new(scraper, stats);
    dhtscrape_api::serve(state, port, shutdown)
        .await
        .with_context(|| format!("API server on port {port} failed"))?;

    tracing::info!("dhtscraped stopped");
    Ok(())
}

/// Accepts a bare port or `--port <n>` / `--port=<n>`.
fn port_from_args(mut args: impl Iterator<Item = String>) -> Result<Option<u16>> {
    let Some(first) = args.next() else {
        return Ok(None);
    };
    let raw = match first.as_str() {
        "--port" | "-port" => args.next().context("--port needs a value")?,
        other => match other.split_once('=') {
            Some(("--port" | "-port", value)) => value.to_string(),
            _ => other.to_string(),
        },
    };
    let port = raw
        .parse::<u16>()
        .with_context(|| format!("invalid port: {raw}"))?;
    Ok(Some(port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(a: &[&str]) -> impl Iterator<Item = String> {
        a.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn no_args_defers_to_config() {
        assert_eq!(port_from_args(args(&[])).unwrap(), None);
    }

    #[test]
    fn port_forms() {
        assert_eq!(port_from_args(args(&["8080"])).unwrap(), Some(8080));
        assert_eq!(port_from_args(args(&["--port", "8081"])).unwrap(), Some(8081));
        assert_eq!(port_from_args(args(&["--port=8082"])).unwrap(), Some(8082));
        assert_eq!(port_from_args(args(&["-port", "8083"])).unwrap(), Some(8083));
    }

    #[test]
    fn bad_ports_are_errors() {
        assert!(port_from_args(args(&["http"])).is_err());
        assert!(port_from_args(args(&["70000"])).is_err());
        assert!(port_from_args(args(&["--port"])).is_err());
    }
}
