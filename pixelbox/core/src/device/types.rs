//! Device Data Types
//!
//! Wire-level values exchanged with the device.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an image stored on the device
///
/// Opaque; equality is exact string match. The device lists files in its own
/// directory order, which the client never relies on across calls.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageName(String);

impl ImageName {
    /// Wrap a name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name is empty (the firmware's "no selection" marker)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ImageName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for ImageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Body of `GET /images`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageListResponse {
    /// Stored images in device order
    pub images: Vec<ImageName>,
}

/// Body of `GET /fs_status`
///
/// Sizes are kilobytes, heap is bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemStatus {
    /// Filesystem capacity in KB
    pub total_size: u64,
    /// Filesystem usage in KB
    pub allocated_size: u64,
    /// Free heap on the device in bytes
    pub free_heap: u64,
}

/// Opaque per-request value appended as `?t=<token>` to defeat caching
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheToken(u64);

impl CacheToken {
    /// Wrap a raw token value
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw token value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CacheToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Largest brightness the device accepts
pub const MAX_BRIGHTNESS_PERCENT: u8 = 100;
