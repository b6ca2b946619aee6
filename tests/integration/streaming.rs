use crate::*;

use std::collections::HashSet;

use dhtscrape_core::version::USER_AGENT;
use dhtscrape_services::testing::FakeNetwork;
use dhtscrape_services::DhtScraper;

fn scraper(network: &Arc<FakeNetwork>, stats: &ScrapeStats) -> Arc<dyn Scraper> {
    Arc::new(DhtScraper::new(network.clone(), vec![], fast_tuning()).with_stats(stats.clone()))
}

/// /peers streams NDJSON with permissive CORS, one line per discovered peer.
#[tokio::test]
async fn test_peers_stream_ndjson() -> Result<()> {
    let network = Arc::new(FakeNetwork::new(&["QmA", "QmB", "QmC"]));
    let stats = ScrapeStats::new();
    let server = start_server(scraper(&network, &stats), stats).await?;

    let resp = reqwest::Client::new()
        .get(format!("{}/peers", server.base))
        .header("Origin", "http://dashboard.example")
        .send()
        .await?;
    assert!(resp.status().is_success());
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    assert_eq!(resp.headers()["content-type"], "application/x-ndjson");

    let mut lines = LineReader::new(resp);
    let mut seen = HashSet::new();
    while seen.len() < 3 {
        let obs = lines
            .next_within(Duration::from_secs(5))
            .await?
            .context("stream ended early")?;
        assert_eq!(obs.agent_version, "fake/1.0");
        assert!(!obs.addresses.is_empty());
        seen.insert(obs.peer_id);
    }
    assert_eq!(seen, HashSet::from(["QmA".into(), "QmB".into(), "QmC".into()]));

    server.shutdown.cancel();
    server.task.await??;
    Ok(())
}

/// Closing the connection cancels the request's scrape and its host.
#[tokio::test]
async fn test_disconnect_stops_session() -> Result<()> {
    let network = Arc::new(FakeNetwork::new(&["QmA"]));
    let stats = ScrapeStats::new();
    let server = start_server(scraper(&network, &stats), stats).await?;

    // No Origin header: the CORS header is still there.
    let resp = reqwest::get(format!("{}/peers", server.base)).await?;
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    let mut lines = LineReader::new(resp);
    lines.next_within(Duration::from_secs(5)).await?;
    assert!(eventually(Duration::from_secs(1), || network.live_sessions() == 1).await);

    drop(lines);
    assert!(
        eventually(Duration::from_secs(2), || network.live_sessions() == 0).await,
        "session still alive after client disconnect"
    );

    let attempts = network.attempts();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(network.attempts(), attempts, "driver kept restarting");

    server.shutdown.cancel();
    server.task.await??;
    Ok(())
}

/// Each request gets an independent scrape.
#[tokio::test]
async fn test_concurrent_requests_are_independent() -> Result<()> {
    let network = Arc::new(FakeNetwork::new(&["QmA"]));
    let stats = ScrapeStats::new();
    let server = start_server(scraper(&network, &stats), stats).await?;

    let mut a = LineReader::new(reqwest::get(format!("{}/peers", server.base)).await?);
    let mut b = LineReader::new(reqwest::get(format!("{}/peers", server.base)).await?);
    a.next_within(Duration::from_secs(5)).await?;
    b.next_within(Duration::from_secs(5)).await?;
    assert!(eventually(Duration::from_secs(1), || network.live_sessions() == 2).await);

    drop(a);
    assert!(eventually(Duration::from_secs(2), || network.live_sessions() == 1).await);
    assert!(b.next_within(Duration::from_secs(5)).await?.is_some());

    server.shutdown.cancel();
    server.task.await??;
    Ok(())
}

/// /status reflects the counters the scrape updated.
#[tokio::test]
async fn test_status_and_version() -> Result<()> {
    let network = Arc::new(FakeNetwork::new(&["QmA"]).failing_first(2));
    let stats = ScrapeStats::new();
    let server = start_server(scraper(&network, &stats), stats).await?;

    let mut lines = LineReader::new(reqwest::get(format!("{}/peers", server.base)).await?);
    lines.next_within(Duration::from_secs(5)).await?;

    let status: serde_json::Value = reqwest::get(format!("{}/status", server.base))
        .await?
        .json()
        .await?;
    assert_eq!(status["version"], USER_AGENT);
    assert_eq!(status["session_failures"], 2);
    assert!(status["sessions_started"].as_u64().unwrap_or(0) >= 3);
    assert!(status["observations_emitted"].as_u64().unwrap_or(0) >= 1);

    let version = reqwest::get(format!("{}/version", server.base))
        .await?
        .text()
        .await?;
    assert_eq!(version, USER_AGENT);

    drop(lines);
    server.shutdown.cancel();
    server.task.await??;
    Ok(())
}

/// Shutting the server down ends open streams instead of hanging on them.
#[tokio::test]
async fn test_shutdown_ends_open_streams() -> Result<()> {
    let network = Arc::new(FakeNetwork::new(&["QmA"]));
    let stats = ScrapeStats::new();
    let server = start_server(scraper(&network, &stats), stats).await?;

    let mut lines = LineReader::new(reqwest::get(format!("{}/peers", server.base)).await?);
    lines.next_within(Duration::from_secs(5)).await?;

    server.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .context("server did not shut down")???;

    // Anything still buffered drains, then the stream ends.
    while lines.next_within(Duration::from_secs(5)).await?.is_some() {}
    assert!(eventually(Duration::from_secs(2), || network.live_sessions() == 0).await);
    Ok(())
}
