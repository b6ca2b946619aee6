//! /peers — newline-delimited JSON, one observation per line, for as long as
//! the client stays connected.

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use dhtscrape_core::PeerObservation;

use super::ApiState;

const NDJSON: &str = "application/x-ndjson";

pub async fn handle_peers(State(state): State<ApiState>) -> Response {
    let cancel = state.shutdown.child_token();
    let observations = state.scraper.scrape(cancel.clone());
    tracing::info!("peers stream opened");

    // Hyper drops the body when the client goes away; the guard goes with it
    // and stops the scrape.
    let guard = cancel.drop_guard();
    let lines = futures::stream::unfold((observations, guard), |(mut rx, guard)| async move {
        let obs = rx.recv().await?;
        Some((encode_line(&obs), (rx, guard)))
    });

    // Sent on every response, whether or not the request carried an Origin.
    (
        [
            (header::CONTENT_TYPE, NDJSON),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Body::from_stream(lines),
    )
        .into_response()
}

fn encode_line(obs: &PeerObservation) -> Result<Bytes, serde_json::Error> {
    let mut line = serde_json::to_vec(obs)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}
