use thiserror::Error;

use crate::network::NetworkError;
use dhtscrape_core::KeyError;

/// Why a round or session ended early.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("network: {0}")]
    Network(#[from] NetworkError),
    #[error("key sampling: {0}")]
    Key(#[from] KeyError),
    #[error("cancelled")]
    Cancelled,
}
