//! Error types for payload generation, transport and probing runs

use thiserror::Error;

/// Failure while generating an upload payload
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("random source failed: {0}")]
    RandomSource(#[from] rand::Error),
}

/// Failure reported by a [`Transport`](crate::transport::Transport)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP error: {status}")]
    Status { status: u16 },

    #[error("payload generation failed: {0}")]
    Payload(#[from] PayloadError),

    #[error("request cancelled")]
    Cancelled,
}

/// Failure of a single probe task, or of a whole run when every task failed
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("upload to {url:?} failed: {source}")]
    Upload {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("probe task panicked: {0}")]
    TaskPanicked(String),
}

/// Invalid configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("server_url cannot be empty")]
    EmptyUrl,

    #[error("invalid server_url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("upload_sizes cannot be empty")]
    NoUploadSizes,

    #[error("upload size {size} must be larger than the {header_len}-byte form header")]
    UploadSizeTooSmall { size: usize, header_len: usize },

    #[error("{sizes} upload sizes x {repeats} repeats exceeds the limit of {max} uploads")]
    TooManyUploads {
        sizes: usize,
        repeats: usize,
        max: usize,
    },

    #[error("{field} must be at least 1")]
    Zero { field: &'static str },
}
