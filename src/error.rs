//! Error types for playback and the price feed

use crate::station::StationId;

/// Errors surfaced to the UI by the playback engine
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// The stream could not be opened or produced no audio
    #[error("could not open {station}: {reason}")]
    StreamOpen { station: StationId, reason: String },

    /// The audio output device could not be used
    #[error("audio output unavailable: {0}")]
    Output(String),

    /// The requested operation is not valid from the current state
    #[error("cannot {op} while {state}")]
    InvalidTransition { op: &'static str, state: &'static str },
}

impl PlaybackError {
    pub fn stream_open(station: StationId, reason: impl Into<String>) -> Self {
        Self::StreamOpen {
            station,
            reason: reason.into(),
        }
    }
}

/// Errors from one price feed fetch; logged and otherwise absorbed
#[derive(Debug, thiserror::Error)]
pub enum PriceFetchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The feed answered with a non-success status
    #[error("price feed returned status {0}")]
    Status(reqwest::StatusCode),

    /// The response did not carry a price for a declared asset
    #[error("no USD price for {0}")]
    MissingAsset(String),
}
