//! Error types for the preview engine

use thiserror::Error;

use crate::player::PlaybackStatus;

/// Fetching the raw bytes of an asset failed
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// Server answered with a non-success status
    #[error("HTTP {0}")]
    Status(u16),

    /// Connection, TLS or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Local file could not be read
    #[error("IO error: {0}")]
    Io(String),
}

impl From<ureq::Error> for FetchError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::Status(code),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Why a decode did not produce an asset
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeCause {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Payload is not audio we can read
    #[error("malformed audio: {0}")]
    Malformed(String),

    /// Payload decoded to zero frames
    #[error("no audio frames")]
    Empty,
}

impl From<symphonia::core::errors::Error> for DecodeCause {
    fn from(err: symphonia::core::errors::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Failure of `DecodeCache::decode`, shared by every waiter of the same URL
#[derive(Debug, Clone, Error, PartialEq)]
#[error("failed to decode {url}: {cause}")]
pub struct DecodeError {
    pub url: String,
    #[source]
    pub cause: DecodeCause,
}

impl DecodeError {
    pub fn new(url: impl Into<String>, cause: impl Into<DecodeCause>) -> Self {
        Self {
            url: url.into(),
            cause: cause.into(),
        }
    }

    /// True when the server (or filesystem) did not have the asset yet.
    pub fn is_missing(&self) -> bool {
        matches!(
            self.cause,
            DecodeCause::Fetch(FetchError::Status(404)) | DecodeCause::Fetch(FetchError::Io(_))
        )
    }
}

/// The audio context cannot build or run a playback graph
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphError {
    #[error("audio context is closed")]
    ContextClosed,

    #[error("audio device error: {0}")]
    Device(String),

    #[error("no asset loaded")]
    NotLoaded,
}

impl From<rodio::StreamError> for GraphError {
    fn from(err: rodio::StreamError) -> Self {
        Self::Device(err.to_string())
    }
}

/// Track player operation rejected by the state machine
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlayerError {
    #[error("cannot {op} while {status:?}")]
    InvalidTransition {
        op: &'static str,
        status: PlaybackStatus,
    },

    #[error("player has been destroyed")]
    Destroyed,
}

/// Config file could not be read or written
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("HOME is not set")]
    NoHome,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for track player operations
pub type Result<T> = std::result::Result<T, PlayerError>;
