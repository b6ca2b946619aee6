//! dhtscrape integration test harness.
//!
//! Every test serves the real HTTP API on an ephemeral localhost port and
//! drives it with reqwest. The network underneath is the in-memory fake, so
//! no test touches the public DHT.
//!
//!   cargo test --test integration

mod aggregate;
mod streaming;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dhtscrape_api::ApiState;
use dhtscrape_core::config::DebouncePolicy;
use dhtscrape_core::PeerObservation;
use dhtscrape_services::{ScrapeStats, ScrapeTuning, Scraper};

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct TestServer {
    pub base: String,
    pub shutdown: CancellationToken,
    pub task: JoinHandle<Result<()>>,
}

/// Serve `scraper` on 127.0.0.1 with an OS-assigned port.
pub async fn start_server(scraper: Arc<dyn Scraper>, stats: ScrapeStats) -> Result<TestServer> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    let shutdown = CancellationToken::new();
    let state = ApiState::new(scraper, stats);
    let task = tokio::spawn(dhtscrape_api::serve_on(listener, state, shutdown.clone()));
    Ok(TestServer {
        base,
        shutdown,
        task,
    })
}

/// Short rounds and quiet periods so a scrape produces output within
/// milliseconds.
pub fn fast_tuning() -> ScrapeTuning {
    ScrapeTuning {
        total_rounds: 2,
        round_interval: Duration::from_millis(100),
        total_keys: 3,
        lookup_concurrency: 2,
        lookup_timeout: Duration::from_secs(1),
        quiet_period: Duration::from_millis(50),
        debounce_policy: DebouncePolicy::Fixed,
        channel_capacity: 16,
    }
}

/// Reads NDJSON observations off a streaming response.
pub struct LineReader {
    resp: reqwest::Response,
    buf: Vec<u8>,
}

impl LineReader {
    pub fn new(resp: reqwest::Response) -> Self {
        Self {
            resp,
            buf: Vec::new(),
        }
    }

    /// Next observation, or `None` once the server ends the stream.
    pub async fn next(&mut self) -> Result<Option<PeerObservation>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                let obs = serde_json::from_slice(&line[..line.len() - 1])
                    .context("line is not a peer observation")?;
                return Ok(Some(obs));
            }
            match self.resp.chunk().await? {
                Some(chunk) => self.buf.extend_from_slice(&chunk),
                None if self.buf.is_empty() => return Ok(None),
                None => bail!("stream ended mid-line"),
            }
        }
    }

    /// Like `next`, but fails if nothing arrives within `limit`.
    pub async fn next_within(&mut self, limit: Duration) -> Result<Option<PeerObservation>> {
        tokio::time::timeout(limit, self.next())
            .await
            .context("timed out waiting for an observation")?
    }
}

/// Poll `cond` until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
