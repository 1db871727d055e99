//! Device Traits
//!
//! The seam between the synchronization engine and whatever answers the
//! device's HTTP surface. [`HttpDevice`](super::HttpDevice) talks to real
//! hardware; [`SimulatedDevice`](super::SimulatedDevice) keeps everything in
//! memory for headless runs and tests.
//!
//! Every method is a single request. Implementations never retry and never
//! cache; failures propagate unchanged.

use async_trait::async_trait;

use super::types::{CacheToken, FilesystemStatus, ImageName};
use crate::error::{DeviceError, DeviceResult};

/// One operation per device capability
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Human-readable name for logs (e.g. the device URL)
    fn name(&self) -> &str;

    /// `GET /images`
    async fn list_images(&self) -> DeviceResult<Vec<ImageName>>;

    /// `POST /image` (multipart, field `file`)
    async fn upload_image(&self, bytes: Vec<u8>, file_name: &str) -> DeviceResult<()>;

    /// `DELETE /image` (`image=<name>`)
    async fn delete_image(&self, name: &ImageName) -> DeviceResult<()>;

    /// `GET /displayed_image?t=<token>`
    ///
    /// Resolves to `None` when the device reports that nothing is selected.
    async fn displayed_image(&self, token: CacheToken) -> DeviceResult<Option<Vec<u8>>>;

    /// `POST /displayed_image` (`displayed_image=<name>`)
    async fn set_displayed_image(&self, name: &ImageName) -> DeviceResult<()>;

    /// `GET /fs_status`
    async fn status(&self) -> DeviceResult<FilesystemStatus>;

    /// `POST /set_brightness` (`brightness=<0..100>`)
    async fn set_brightness(&self, percent: u8) -> DeviceResult<()>;

    /// `POST /set_max_current` (`max_current=<mA>`)
    async fn set_max_current(&self, milliamps: u32) -> DeviceResult<()>;
}

/// Reject an upload before it leaves the client
///
/// # Errors
///
/// Returns [`DeviceError::InvalidRequest`] for empty contents or file name.
pub fn validate_upload(bytes: &[u8], file_name: &str) -> DeviceResult<()> {
    if bytes.is_empty() {
        return Err(DeviceError::InvalidRequest(format!(
            "refusing to upload empty file {file_name:?}"
        )));
    }
    if file_name.trim().is_empty() {
        return Err(DeviceError::InvalidRequest(
            "upload needs a file name".to_string(),
        ));
    }
    Ok(())
}

/// Reject a brightness outside `0..=100`
///
/// # Errors
///
/// Returns [`DeviceError::InvalidRequest`] when `percent > 100`.
pub fn validate_brightness(percent: u8) -> DeviceResult<()> {
    if percent > super::types::MAX_BRIGHTNESS_PERCENT {
        return Err(DeviceError::InvalidRequest(format!(
            "brightness must be 0-100, got {percent}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_upload() {
        assert!(validate_upload(b"\x89PNG", "cat.png").is_ok());
        assert!(matches!(
            validate_upload(b"", "cat.png"),
            Err(DeviceError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_upload(b"x", "  "),
            Err(DeviceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_validate_brightness_bounds() {
        assert!(validate_brightness(0).is_ok());
        assert!(validate_brightness(100).is_ok());
        assert!(validate_brightness(101).is_err());
    }
}
