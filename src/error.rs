//! Error types for the relay

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Upstream connection and multipart parsing errors.
///
/// Every variant is recoverable: the capture worker logs it, backs off and retries.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Timeout")]
    Timeout,

    #[error("Upstream returned HTTP status {0}")]
    BadStatus(u16),

    #[error("Unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),

    #[error("Stream truncated")]
    Truncated,

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Upstream could not be reached or refused the request
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CaptureError::ConnectFailed(_)
                | CaptureError::Timeout
                | CaptureError::BadStatus(_)
                | CaptureError::InvalidUrl(_)
                | CaptureError::UnsupportedTransferEncoding(_)
        )
    }

    /// The stream ended or failed in the middle of a part
    pub fn is_truncation(&self) -> bool {
        matches!(self, CaptureError::Truncated | CaptureError::Io(_))
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
