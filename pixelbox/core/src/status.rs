//! Status Monitor
//!
//! Last-known filesystem telemetry and its presentation.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::device::{DeviceApi, FilesystemStatus};
use crate::error::DeviceResult;
use crate::events::{Component, EventSink, SyncEvent};

/// Presentation of one status snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusPanel {
    /// Raw values as reported
    pub status: FilesystemStatus,
}

impl StatusPanel {
    /// Wrap a snapshot
    #[must_use]
    pub fn new(status: FilesystemStatus) -> Self {
        Self { status }
    }

    /// e.g. `"512 KBytes"`
    #[must_use]
    pub fn total_size_label(&self) -> String {
        format!("{} KBytes", self.status.total_size)
    }

    /// e.g. `"300 KBytes"`
    #[must_use]
    pub fn allocated_size_label(&self) -> String {
        format!("{} KBytes", self.status.allocated_size)
    }

    /// e.g. `"45000 Bytes"`
    #[must_use]
    pub fn free_heap_label(&self) -> String {
        format!("{} Bytes", self.status.free_heap)
    }
}

/// Component owning filesystem telemetry
#[derive(Clone)]
pub struct StatusMonitor {
    device: Arc<dyn DeviceApi>,
    panel: Arc<RwLock<Option<StatusPanel>>>,
    events: EventSink,
}

impl StatusMonitor {
    /// Create a monitor with no snapshot yet
    #[must_use]
    pub fn new(device: Arc<dyn DeviceApi>, events: EventSink) -> Self {
        Self {
            device,
            panel: Arc::new(RwLock::new(None)),
            events,
        }
    }

    /// Fetch status and replace all three fields
    ///
    /// # Errors
    ///
    /// Returns the device error; the previous snapshot is kept.
    pub async fn refresh(&self) -> DeviceResult<StatusPanel> {
        match self.device.status().await {
            Ok(status) => {
                let panel = StatusPanel::new(status);
                *self.panel.write() = Some(panel);
                info!(
                    device = self.device.name(),
                    total_kb = status.total_size,
                    allocated_kb = status.allocated_size,
                    free_heap = status.free_heap,
                    "Status refreshed"
                );
                self.events.publish(SyncEvent::StatusUpdated(panel));
                Ok(panel)
            }
            Err(e) => {
                warn!(device = self.device.name(), error = %e, "Status refresh failed");
                self.events.publish(SyncEvent::RefreshFailed {
                    component: Component::Status,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Last successful snapshot
    #[must_use]
    pub fn panel(&self) -> Option<StatusPanel> {
        *self.panel.read()
    }
}

impl std::fmt::Debug for StatusMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusMonitor")
            .field("device", &self.device.name())
            .field("panel", &*self.panel.read())
            .finish()
    }
}
