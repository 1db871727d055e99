//! Error Types
//!
//! Failure taxonomy for everything that talks to the device.
//!
//! - [`TransportError`]: the request never produced a usable response
//!   (unreachable, timeout, non-2xx status)
//! - [`DecodeError`]: a response arrived but its body could not be parsed
//!   (malformed JSON, undecodable raster)
//! - [`DeviceError`]: what every [`DeviceApi`](crate::device::DeviceApi)
//!   operation returns; wraps the two above plus locally rejected arguments
//!
//! Nothing in this crate retries. Errors travel unchanged to the caller and
//! the affected view keeps its last-known-good value.

use thiserror::Error;

/// The request did not complete with a 2xx response
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP client itself could not be built or used
    #[error("HTTP client error: {0}")]
    Client(#[source] reqwest::Error),

    /// Connection refused, DNS failure, reset mid-body, etc.
    #[error("device unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    /// The request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,

    /// The device answered with a non-2xx status
    #[error("device returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (the firmware sends a short plain-text reason)
        body: String,
    },
}

impl TransportError {
    /// Classify a `reqwest` failure
    #[must_use]
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_builder() {
            Self::Client(err)
        } else {
            Self::Unreachable(err)
        }
    }
}

/// A response body could not be turned into client state
#[derive(Debug, Error)]
pub enum DecodeError {
    /// JSON body did not match the expected shape
    #[error("malformed JSON response: {0}")]
    Json(#[from] serde_json::Error),

    /// Raster bytes were not a decodable image
    #[error("undecodable image: {0}")]
    Image(#[from] image::ImageError),
}

/// Error returned by every device operation
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Network or HTTP-level failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response body could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Arguments rejected before any request was sent
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DeviceError {
    /// Whether this is a transport-level failure
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether this is a decode failure
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Shorthand for a non-2xx status error
    #[must_use]
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Transport(TransportError::Status {
            status,
            body: body.into(),
        })
    }
}

impl From<serde_json::Error> for DeviceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(DecodeError::Json(err))
    }
}

impl From<image::ImageError> for DeviceError {
    fn from(err: image::ImageError) -> Self {
        Self::Decode(DecodeError::Image(err))
    }
}

/// Convenience alias for device results
pub type DeviceResult<T> = Result<T, DeviceError>;
