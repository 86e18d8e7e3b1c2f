//! Error types for the frame pipeline.

use std::time::Duration;
use thiserror::Error;

/// Failure producing a pixel buffer for a single timestamp.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleError {
    /// Timestamp outside `0..=duration`. Caller error, never retried.
    #[error("invalid time {time:.3}s (source duration {duration:.3}s)")]
    InvalidTime { time: f64, duration: f64 },

    /// The source has no decodable data.
    #[error("source not ready after waiting {waited:?}")]
    NotReady { waited: Duration },

    /// No frame was produced before the adaptive deadline.
    #[error("frame not produced within {after:?}")]
    Timeout { after: Duration },

    /// The source handle became invalid mid-operation.
    #[error("media source lost: {0}")]
    SourceLost(String),

    /// The source failed to decode or render the requested frame.
    #[error("decode error: {0}")]
    Decode(String),

    /// Every retry attempt failed; carries the last error.
    #[error("sampling {time:.2}s failed after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        time: f64,
        attempts: u32,
        last: Box<SampleError>,
    },
}

impl SampleError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady { .. } | Self::Timeout { .. } | Self::Decode(_))
    }

    /// Whether the error ends the playback session rather than a single frame.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::SourceLost(_) => true,
            Self::RetriesExhausted { last, .. } => last.is_terminal(),
            _ => false,
        }
    }
}

/// Main error type for pipeline and playback operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Sample(#[from] SampleError),

    #[error("cannot {action} while {state}")]
    InvalidState { state: String, action: &'static str },

    #[error("no media source loaded")]
    NoSource,

    #[error("load failed: {0}")]
    Load(String),

    #[error("audio error: {0}")]
    Audio(String),

    #[error("recorder error: {0}")]
    Recorder(String),

    #[error("serialized size {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
