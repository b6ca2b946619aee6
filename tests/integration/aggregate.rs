use crate::*;

use dhtscrape_services::testing::{observation, ChannelScraper};
use dhtscrape_services::AggregatingScraper;

fn shared(upstream: &Arc<ChannelScraper>, stats: &ScrapeStats) -> Arc<dyn Scraper> {
    Arc::new(
        AggregatingScraper::builder(upstream.clone())
            .capacity(8)
            .stats(stats.clone())
            .build(),
    )
}

/// Two HTTP clients share one upstream scrape and both see every observation.
#[tokio::test]
async fn test_clients_share_one_upstream() -> Result<()> {
    let upstream = Arc::new(ChannelScraper::new(8));
    let stats = ScrapeStats::new();
    let server = start_server(shared(&upstream, &stats), stats.clone()).await?;

    let mut a = LineReader::new(reqwest::get(format!("{}/peers", server.base)).await?);
    let mut b = LineReader::new(reqwest::get(format!("{}/peers", server.base)).await?);
    assert!(eventually(Duration::from_secs(2), || stats.snapshot().active_subscriptions == 2).await);
    assert_eq!(upstream.calls(), 1);

    upstream.push(observation("QmShared")).await;
    for reader in [&mut a, &mut b] {
        let obs = reader
            .next_within(Duration::from_secs(5))
            .await?
            .context("stream ended early")?;
        assert_eq!(obs.peer_id, "QmShared");
    }

    server.shutdown.cancel();
    server.task.await??;
    Ok(())
}

/// The upstream stops when the last client leaves and restarts on the next.
#[tokio::test]
async fn test_upstream_follows_subscribers() -> Result<()> {
    let upstream = Arc::new(ChannelScraper::new(8));
    let stats = ScrapeStats::new();
    let server = start_server(shared(&upstream, &stats), stats.clone()).await?;

    let first = reqwest::get(format!("{}/peers", server.base)).await?;
    assert!(eventually(Duration::from_secs(2), || upstream.live() == 1).await);

    drop(first);
    assert!(
        eventually(Duration::from_secs(2), || upstream.live() == 0).await,
        "upstream kept running with no subscribers"
    );
    assert_eq!(stats.snapshot().active_subscriptions, 0);

    let _second = reqwest::get(format!("{}/peers", server.base)).await?;
    assert!(eventually(Duration::from_secs(2), || upstream.live() == 1).await);
    assert_eq!(upstream.calls(), 2);

    server.shutdown.cancel();
    server.task.await??;
    Ok(())
}
