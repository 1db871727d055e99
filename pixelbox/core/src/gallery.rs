//! Image Gallery
//!
//! Owns the list of images known to be stored on the device and the
//! renderable row-set derived from it.
//!
//! Every successful [`ImageGallery::refresh`] replaces the list wholesale. A
//! failed refresh leaves the previous list in place. Mutations (`upload`,
//! `delete`) only forward to the device; the caller decides when to refresh.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::device::{DeviceApi, ImageName};
use crate::error::DeviceResult;
use crate::events::{Component, EventSink, SyncEvent};

/// Text shown instead of a table when the device holds no images
pub const NO_IMAGES_PLACEHOLDER: &str = "No images.";

/// Action offered on every gallery row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RowAction {
    /// Make this image the displayed one
    Select,
    /// Remove this image from the device
    Delete,
}

impl RowAction {
    /// Link text for the action
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Delete => "delete",
        }
    }
}

/// One rendered gallery row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GalleryRow {
    /// Image this row stands for
    pub name: ImageName,
    /// Actions, in display order
    pub actions: [RowAction; 2],
}

impl GalleryRow {
    /// Row for `name` with the standard actions
    #[must_use]
    pub fn new(name: ImageName) -> Self {
        Self {
            name,
            actions: [RowAction::Select, RowAction::Delete],
        }
    }
}

/// Immutable snapshot of the gallery as it should be presented
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum GalleryView {
    /// No images; show [`NO_IMAGES_PLACEHOLDER`] and no table
    #[default]
    Placeholder,
    /// One row per image, in the order the device listed them
    Rows(Vec<GalleryRow>),
}

impl GalleryView {
    /// Build the view for a listing
    #[must_use]
    pub fn from_names(names: &[ImageName]) -> Self {
        if names.is_empty() {
            Self::Placeholder
        } else {
            Self::Rows(names.iter().cloned().map(GalleryRow::new).collect())
        }
    }

    /// Whether the placeholder is shown
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder)
    }

    /// Table rows (empty for the placeholder)
    #[must_use]
    pub fn rows(&self) -> &[GalleryRow] {
        match self {
            Self::Placeholder => &[],
            Self::Rows(rows) => rows,
        }
    }

    /// Plain-text rendering, one line per row
    #[must_use]
    pub fn render_lines(&self) -> Vec<String> {
        match self {
            Self::Placeholder => vec![NO_IMAGES_PLACEHOLDER.to_string()],
            Self::Rows(rows) => {
                let width = rows
                    .iter()
                    .map(|r| r.name.as_str().chars().count())
                    .max()
                    .unwrap_or(0);
                rows.iter()
                    .map(|row| {
                        let actions: Vec<String> = row
                            .actions
                            .iter()
                            .map(|a| format!("[{}]", a.label()))
                            .collect();
                        format!("{:<width$}  {}", row.name.as_str(), actions.join(" "))
                    })
                    .collect()
            }
        }
    }
}

#[derive(Debug, Default)]
struct GalleryState {
    images: Vec<ImageName>,
    view: GalleryView,
    loaded: bool,
}

/// Component owning the image list
#[derive(Clone)]
pub struct ImageGallery {
    device: Arc<dyn DeviceApi>,
    state: Arc<RwLock<GalleryState>>,
    events: EventSink,
}

impl ImageGallery {
    /// Create an empty gallery backed by `device`
    #[must_use]
    pub fn new(device: Arc<dyn DeviceApi>, events: EventSink) -> Self {
        Self {
            device,
            state: Arc::new(RwLock::new(GalleryState::default())),
            events,
        }
    }

    /// Fetch the list and replace local state with it
    ///
    /// # Errors
    ///
    /// Returns the device error; the previous list is kept.
    pub async fn refresh(&self) -> DeviceResult<GalleryView> {
        match self.device.list_images().await {
            Ok(names) => {
                let view = GalleryView::from_names(&names);
                {
                    let mut state = self.state.write();
                    state.images = names;
                    state.view = view.clone();
                    state.loaded = true;
                }
                info!(
                    device = self.device.name(),
                    count = view.rows().len(),
                    "Gallery refreshed"
                );
                self.events.publish(SyncEvent::GalleryUpdated(view.clone()));
                Ok(view)
            }
            Err(e) => {
                warn!(device = self.device.name(), error = %e, "Gallery refresh failed");
                self.events.publish(SyncEvent::RefreshFailed {
                    component: Component::Gallery,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Upload a file; does not refresh
    ///
    /// # Errors
    ///
    /// Returns the device error unchanged.
    pub async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> DeviceResult<()> {
        self.device.upload_image(bytes, file_name).await
    }

    /// Delete an image; does not refresh
    ///
    /// # Errors
    ///
    /// Returns the device error unchanged.
    pub async fn delete(&self, name: &ImageName) -> DeviceResult<()> {
        self.device.delete_image(name).await
    }

    /// Names from the most recent successful listing
    #[must_use]
    pub fn images(&self) -> Vec<ImageName> {
        self.state.read().images.clone()
    }

    /// Current view snapshot
    #[must_use]
    pub fn view(&self) -> GalleryView {
        self.state.read().view.clone()
    }

    /// Whether any listing has succeeded yet
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.state.read().loaded
    }

    /// Whether `name` was in the most recent listing
    #[must_use]
    pub fn contains(&self, name: &ImageName) -> bool {
        self.state.read().images.contains(name)
    }
}

impl std::fmt::Debug for ImageGallery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageGallery")
            .field("device", &self.device.name())
            .field("images", &self.state.read().images)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::device::{DeviceOp, InjectedFailure, SimulatedDevice};

    fn names(list: &[&str]) -> Vec<ImageName> {
        list.iter().copied().map(ImageName::from).collect()
    }

    fn gallery(device: &SimulatedDevice) -> ImageGallery {
        ImageGallery::new(Arc::new(device.clone()), EventSink::disabled())
    }

    #[test]
    fn test_view_has_one_row_per_name_in_order() {
        let view = GalleryView::from_names(&names(&["dog.png", "cat.png", "owl.gif"]));
        let rows: Vec<&str> = view.rows().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(rows, vec!["dog.png", "cat.png", "owl.gif"]);
        assert!(view
            .rows()
            .iter()
            .all(|r| r.actions == [RowAction::Select, RowAction::Delete]));
        assert!(!view.is_placeholder());
    }

    #[test]
    fn test_empty_listing_renders_placeholder_only() {
        let view = GalleryView::from_names(&[]);
        assert!(view.is_placeholder());
        assert!(view.rows().is_empty());
        assert_eq!(view.render_lines(), vec!["No images.".to_string()]);
    }

    #[test]
    fn test_render_lines_align_actions() {
        let view = GalleryView::from_names(&names(&["a.png", "long.gif"]));
        assert_eq!(
            view.render_lines(),
            vec![
                "a.png     [select] [delete]".to_string(),
                "long.gif  [select] [delete]".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_refresh_replaces_wholesale() {
        let device = SimulatedDevice::new()
            .with_image("cat.png", vec![1])
            .with_image("dog.png", vec![2]);
        let gallery = gallery(&device);
        assert!(!gallery.is_loaded());

        gallery.refresh().await.unwrap();
        assert_eq!(gallery.images(), names(&["cat.png", "dog.png"]));

        device.evict_image(&"cat.png".into());
        gallery.refresh().await.unwrap();
        assert_eq!(gallery.images(), names(&["dog.png"]));
        assert!(!gallery.contains(&"cat.png".into()));
        assert!(gallery.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_list() {
        let device = SimulatedDevice::new().with_image("cat.png", vec![1]);
        let gallery = gallery(&device);
        gallery.refresh().await.unwrap();
        let before = gallery.view();

        device.evict_image(&"cat.png".into());
        device.fail(DeviceOp::ListImages, InjectedFailure::server_error("busy"));
        assert!(gallery.refresh().await.is_err());

        assert_eq!(gallery.view(), before);
        assert_eq!(gallery.images(), names(&["cat.png"]));
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let device = SimulatedDevice::new()
            .with_image("cat.png", vec![1])
            .with_image("dog.png", vec![2]);
        let gallery = gallery(&device);

        let first = gallery.refresh().await.unwrap();
        let second = gallery.refresh().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_mutations_do_not_refresh() {
        let device = SimulatedDevice::new();
        let gallery = gallery(&device);

        gallery.upload(vec![1, 2], "new.png").await.unwrap();
        assert!(gallery.images().is_empty());
        assert_eq!(device.call_count(DeviceOp::ListImages), 0);
    }

    #[tokio::test]
    async fn test_refresh_publishes_snapshot() {
        let device = SimulatedDevice::new().with_image("cat.png", vec![1]);
        let (sink, mut rx) = EventSink::channel(8);
        let gallery = ImageGallery::new(Arc::new(device.clone()), sink);

        gallery.refresh().await.unwrap();
        match rx.try_recv() {
            Ok(SyncEvent::GalleryUpdated(view)) => {
                assert_eq!(view, GalleryView::from_names(&names(&["cat.png"])));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        device.fail(DeviceOp::ListImages, InjectedFailure::Timeout);
        let _ = gallery.refresh().await;
        assert!(matches!(
            rx.try_recv(),
            Ok(SyncEvent::RefreshFailed {
                component: Component::Gallery,
                ..
            })
        ));
    }
}
