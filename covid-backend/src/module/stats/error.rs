//! Error types for the refresh path and the snapshot store

use std::time::Duration;

/// Why a single refresh attempt produced no dataset.
///
/// None of these are retried within a cycle; the next scheduled tick is
/// the retry.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection, TLS or body read failure talking to the provider
    #[error("request to scraping provider failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The refresh did not finish within its deadline
    #[error("refresh timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The provider answered with something other than 200
    #[error("scraping provider returned HTTP {status}: {body}")]
    Protocol { status: u16, body: String },

    /// The body is not a JSON array of flat string objects
    #[error("failed to parse scraping provider response: {0}")]
    Parse(#[from] serde_json::Error),

    /// The body parsed but holds no records, so there is no World row
    #[error("scraping provider returned an empty dataset")]
    EmptyDataset,
}

impl FetchError {
    /// Short class name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) | Self::Timeout(_) => "transport",
            Self::Protocol { .. } => "protocol",
            Self::Parse(_) | Self::EmptyDataset => "parse",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Nothing has been published yet
    #[error("Currently statistic is unavailable. Try later")]
    Unavailable,
}
