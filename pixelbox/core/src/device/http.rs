//! HTTP Device Implementation
//!
//! [`DeviceApi`] over the device's HTTP surface:
//!
//! | Operation | Method | Path | Body |
//! |---|---|---|---|
//! | list images | GET | `images` | - |
//! | upload image | POST | `image` | multipart, field `file` |
//! | delete image | DELETE | `image` | `image=<name>` |
//! | displayed image | GET | `displayed_image?t=<token>` | - |
//! | select image | POST | `displayed_image` | `displayed_image=<name>` |
//! | fs status | GET | `fs_status` | - |
//! | brightness | POST | `set_brightness` | `brightness=<0..100>` |
//! | max current | POST | `set_max_current` | `max_current=<mA>` |
//!
//! Paths are resolved relative to the configured base URL, so a device
//! mounted under a sub-path works the same as one at the origin root.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, StatusCode, Url};
use tracing::{debug, warn};

use super::traits::{validate_brightness, validate_upload, DeviceApi};
use super::types::{CacheToken, FilesystemStatus, ImageListResponse, ImageName};
use crate::error::{DeviceError, DeviceResult, TransportError};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Device reached over HTTP
#[derive(Clone, Debug)]
pub struct HttpDevice {
    /// Base URL, always ending in `/`
    base: Url,
    /// Display name for logs
    name: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl HttpDevice {
    /// Create a client for the device at `base` with the given request timeout
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] if the HTTP client cannot be built.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self::with_client(base, http_client))
    }

    /// Create a client reusing an existing `reqwest::Client`
    #[must_use]
    pub fn with_client(base: Url, http_client: reqwest::Client) -> Self {
        let base = normalize_base(base);
        Self {
            name: base.to_string(),
            base,
            http_client,
        }
    }

    /// Base URL requests are resolved against
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Resolve an endpoint path
    fn endpoint(&self, path: &str) -> DeviceResult<Url> {
        self.base
            .join(path)
            .map_err(|e| DeviceError::InvalidRequest(format!("bad endpoint {path:?}: {e}")))
    }

    /// URL for the displayed image with its cache token
    fn displayed_image_url(&self, token: CacheToken) -> DeviceResult<Url> {
        let mut url = self.endpoint("displayed_image")?;
        url.query_pairs_mut()
            .append_pair("t", &token.to_string());
        Ok(url)
    }

    /// POST a single form field and require a 2xx
    async fn post_form(&self, path: &str, field: &str, value: &str) -> DeviceResult<()> {
        let url = self.endpoint(path)?;
        debug!(device = %self.name, %url, field, "POST");
        let response = self
            .http_client
            .post(url)
            .form(&[(field, value)])
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;
        ensure_success(response).await?;
        Ok(())
    }

    /// GET an endpoint and return the raw body of a 2xx response
    async fn get_bytes(&self, path: &str) -> DeviceResult<Vec<u8>> {
        let url = self.endpoint(path)?;
        debug!(device = %self.name, %url, "GET");
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;
        read_body(ensure_success(response).await?).await
    }
}

/// Make sure the base URL is treated as a directory by `Url::join`
fn normalize_base(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.set_query(None);
    base.set_fragment(None);
    base
}

/// Turn a non-2xx response into [`TransportError::Status`]
async fn ensure_success(response: reqwest::Response) -> DeviceResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DeviceError::status(status.as_u16(), body.trim()))
}

/// A bare 404 on the displayed image reads as "nothing selected"
///
/// A 404 carrying a body came from something else (an error page from a
/// proxy, a wrong base path) and stays a transport error so the rendered
/// surface is kept.
async fn not_found_as_none(response: reqwest::Response) -> DeviceResult<Option<Vec<u8>>> {
    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        warn!(%url, "Displayed image not found, treating as no selection");
        return Ok(None);
    }
    Err(DeviceError::status(StatusCode::NOT_FOUND.as_u16(), body))
}

async fn read_body(response: reqwest::Response) -> DeviceResult<Vec<u8>> {
    let bytes = response
        .bytes()
        .await
        .map_err(TransportError::from_reqwest)?;
    Ok(bytes.to_vec())
}

/// Parse the `GET /images` body
///
/// # Errors
///
/// Returns a decode error if the body is not `{ "images": [string] }`.
pub fn parse_image_list(body: &[u8]) -> DeviceResult<Vec<ImageName>> {
    let list: ImageListResponse = serde_json::from_slice(body)?;
    Ok(list.images)
}

/// Parse the `GET /fs_status` body
///
/// # Errors
///
/// Returns a decode error if a field is missing, negative, or not a number.
pub fn parse_status(body: &[u8]) -> DeviceResult<FilesystemStatus> {
    Ok(serde_json::from_slice(body)?)
}

/// MIME type the firmware expects for a stored image
fn content_type_for(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else {
        "application/octet-stream"
    }
}

#[async_trait]
impl DeviceApi for HttpDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_images(&self) -> DeviceResult<Vec<ImageName>> {
        let body = self.get_bytes("images").await?;
        parse_image_list(&body)
    }

    async fn upload_image(&self, bytes: Vec<u8>, file_name: &str) -> DeviceResult<()> {
        validate_upload(&bytes, file_name)?;
        let url = self.endpoint("image")?;
        debug!(device = %self.name, %url, file_name, size = bytes.len(), "POST multipart");

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type_for(file_name))
            .map_err(TransportError::Client)?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http_client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn delete_image(&self, name: &ImageName) -> DeviceResult<()> {
        let url = self.endpoint("image")?;
        debug!(device = %self.name, %url, image = %name, "DELETE");
        let response = self
            .http_client
            .delete(url)
            .form(&[("image", name.as_str())])
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn displayed_image(&self, token: CacheToken) -> DeviceResult<Option<Vec<u8>>> {
        let url = self.displayed_image_url(token)?;
        debug!(device = %self.name, %url, "GET");
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        if response.status() == StatusCode::NOT_FOUND {
            return not_found_as_none(response).await;
        }
        let body = read_body(ensure_success(response).await?).await?;
        Ok(Some(body))
    }

    async fn set_displayed_image(&self, name: &ImageName) -> DeviceResult<()> {
        self.post_form("displayed_image", "displayed_image", name.as_str())
            .await
    }

    async fn status(&self) -> DeviceResult<FilesystemStatus> {
        let body = self.get_bytes("fs_status").await?;
        parse_status(&body)
    }

    async fn set_brightness(&self, percent: u8) -> DeviceResult<()> {
        validate_brightness(percent)?;
        self.post_form("set_brightness", "brightness", &percent.to_string())
            .await
    }

    async fn set_max_current(&self, milliamps: u32) -> DeviceResult<()> {
        self.post_form("set_max_current", "max_current", &milliamps.to_string())
            .await
    }
}
