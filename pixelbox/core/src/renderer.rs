//! Display Renderer
//!
//! Mirrors the image currently shown on the device's screen into a local
//! raster surface.
//!
//! The device can swap the bytes behind `displayed_image` without the URL
//! changing (re-upload under the same name, selection moved after a delete,
//! eviction). Every fetch therefore carries a fresh [`CacheToken`], and every
//! successful fetch repaints the surface even when the bytes look the same.
//!
//! On transport or decode failure the surface keeps whatever it showed last.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use image::RgbaImage;
use parking_lot::RwLock;
use tracing::{info, trace, warn};

use crate::device::{CacheToken, DeviceApi};
use crate::error::DeviceResult;
use crate::events::{Component, EventSink, SyncEvent};

/// Hands out strictly increasing cache tokens
///
/// Tokens follow wall-clock milliseconds, but never repeat: two calls in the
/// same millisecond (or after the clock steps back) still get distinct values.
#[derive(Debug, Default)]
pub struct CacheTokenSource {
    last: AtomicU64,
}

impl CacheTokenSource {
    /// Create a source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next token, strictly greater than every previous one
    pub fn next(&self) -> CacheToken {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self.next_at(now)
    }

    /// Next token given the current time in milliseconds
    fn next_at(&self, now_ms: u64) -> CacheToken {
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now_ms.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return CacheToken::new(candidate),
                Err(actual) => last = actual,
            }
        }
    }
}

/// Decoded pixels of the displayed image
#[derive(Clone, PartialEq, Eq)]
pub struct RasterSurface {
    pixels: RgbaImage,
    token: CacheToken,
}

impl RasterSurface {
    /// Decode PNG or GIF bytes (first frame for animations)
    ///
    /// # Errors
    ///
    /// Returns a decode error if the bytes are not a supported image.
    pub fn decode(bytes: &[u8], token: CacheToken) -> DeviceResult<Self> {
        let pixels = image::load_from_memory(bytes)?.to_rgba8();
        Ok(Self { pixels, token })
    }

    /// Width in pixels
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// RGBA value at `(x, y)`, `None` outside the surface
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.pixels.get_pixel_checked(x, y).map(|p| p.0)
    }

    /// Underlying pixel buffer
    #[must_use]
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Token of the request that produced this surface
    #[must_use]
    pub fn token(&self) -> CacheToken {
        self.token
    }

    /// Whether two surfaces hold the same pixels, regardless of token
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.pixels == other.pixels
    }
}

impl std::fmt::Debug for RasterSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterSurface")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// What the renderer currently shows
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DisplayedImage {
    /// Nothing fetched yet, or the device reports no selection
    #[default]
    None,
    /// The decoded displayed image
    Shown(Arc<RasterSurface>),
}

impl DisplayedImage {
    /// The surface, if any
    #[must_use]
    pub fn surface(&self) -> Option<&RasterSurface> {
        match self {
            Self::None => None,
            Self::Shown(surface) => Some(surface),
        }
    }
}

#[derive(Debug, Default)]
struct RenderState {
    displayed: DisplayedImage,
    repaints: u64,
}

/// Component owning the rendered raster surface
#[derive(Clone)]
pub struct DisplayRenderer {
    device: Arc<dyn DeviceApi>,
    state: Arc<RwLock<RenderState>>,
    tokens: Arc<CacheTokenSource>,
    events: EventSink,
}

impl DisplayRenderer {
    /// Create a renderer with an empty surface
    #[must_use]
    pub fn new(device: Arc<dyn DeviceApi>, events: EventSink) -> Self {
        Self {
            device,
            state: Arc::new(RwLock::new(RenderState::default())),
            tokens: Arc::new(CacheTokenSource::new()),
            events,
        }
    }

    /// Fetch the displayed image with a fresh cache token and repaint
    ///
    /// # Errors
    ///
    /// Returns the transport or decode error; the previous surface is kept.
    pub async fn refresh(&self) -> DeviceResult<DisplayedImage> {
        let token = self.tokens.next();
        trace!(device = self.device.name(), %token, "Fetching displayed image");

        match self.fetch(token).await {
            Ok(displayed) => {
                {
                    let mut state = self.state.write();
                    state.displayed = displayed.clone();
                    state.repaints += 1;
                }
                match displayed.surface() {
                    Some(surface) => info!(
                        device = self.device.name(),
                        width = surface.width(),
                        height = surface.height(),
                        %token,
                        "Displayed image repainted"
                    ),
                    None => info!(device = self.device.name(), "Device reports no displayed image"),
                }
                self.events
                    .publish(SyncEvent::DisplayUpdated(displayed.clone()));
                Ok(displayed)
            }
            Err(e) => {
                warn!(device = self.device.name(), error = %e, %token, "Display refresh failed");
                self.events.publish(SyncEvent::RefreshFailed {
                    component: Component::Display,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn fetch(&self, token: CacheToken) -> DeviceResult<DisplayedImage> {
        match self.device.displayed_image(token).await? {
            Some(bytes) => {
                let surface = RasterSurface::decode(&bytes, token)?;
                Ok(DisplayedImage::Shown(Arc::new(surface)))
            }
            None => Ok(DisplayedImage::None),
        }
    }

    /// Current surface snapshot
    #[must_use]
    pub fn displayed(&self) -> DisplayedImage {
        self.state.read().displayed.clone()
    }

    /// Number of successful repaints so far
    #[must_use]
    pub fn repaint_count(&self) -> u64 {
        self.state.read().repaints
    }
}

impl std::fmt::Debug for DisplayRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayRenderer")
            .field("device", &self.device.name())
            .field("displayed", &self.state.read().displayed)
            .finish()
    }
}

/// Encode a solid-colour PNG (used by tests and the simulator seed data)
///
/// # Errors
///
/// Returns a decode error if encoding fails.
pub fn solid_png(width: u32, height: u32, rgba: [u8; 4]) -> DeviceResult<Vec<u8>> {
    let img = RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)?;
    Ok(out.into_inner())
}
