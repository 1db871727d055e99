//! Client Session
//!
//! The one context object a presentation layer holds: it owns the device
//! handle, the components, the reconciliation loop and the event channel for
//! the lifetime of a connection. Construct it at session start, call
//! [`ClientSession::shutdown`] at the end.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::ClientConfig;
use crate::device::{DeviceApi, HttpDevice};
use crate::error::TransportError;
use crate::events::{EventSink, SyncEvent};
use crate::reconcile::{PollerHandle, ReconciliationLoop, RefreshOutcome};

/// Owned state for one connection to one device
pub struct ClientSession {
    device: Arc<dyn DeviceApi>,
    reconciler: ReconciliationLoop,
    events: Option<mpsc::Receiver<SyncEvent>>,
    poller: Option<PollerHandle>,
}

impl ClientSession {
    /// Connect to the device named in `config` over HTTP
    ///
    /// No request is sent until the first refresh or mutation.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Client`] if the HTTP client cannot be built.
    pub fn connect(config: &ClientConfig) -> Result<Self, TransportError> {
        let device = HttpDevice::new(config.device_url.clone(), config.request_timeout)?;
        info!(
            device = %config.device_url,
            timeout_ms = u64::try_from(config.request_timeout.as_millis()).unwrap_or(u64::MAX),
            "Session connected"
        );
        Ok(Self::with_device(
            Arc::new(device),
            config.poll_interval,
            config.event_buffer,
        ))
    }

    /// Build a session around any device implementation
    #[must_use]
    pub fn with_device(
        device: Arc<dyn DeviceApi>,
        poll_interval: Duration,
        event_buffer: usize,
    ) -> Self {
        let (sink, rx) = EventSink::channel(event_buffer.max(1));
        let reconciler = ReconciliationLoop::new(Arc::clone(&device), sink, poll_interval);
        Self {
            device,
            reconciler,
            events: Some(rx),
            poller: None,
        }
    }

    /// Device this session talks to
    #[must_use]
    pub fn device(&self) -> &Arc<dyn DeviceApi> {
        &self.device
    }

    /// Entry points for mutations and refreshes
    #[must_use]
    pub fn reconciler(&self) -> &ReconciliationLoop {
        &self.reconciler
    }

    /// Take the receiving end of the event channel
    ///
    /// Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.events.take()
    }

    /// Refresh every component once
    pub async fn load(&self) -> RefreshOutcome {
        self.reconciler.reconcile_all().await
    }

    /// Start the periodic timer (no-op if already running)
    pub fn start_polling(&mut self) {
        if self.poller.is_none() {
            self.poller = Some(self.reconciler.spawn_periodic());
        }
    }

    /// Whether the periodic timer is running
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| !p.is_finished())
    }

    /// Number of periodic ticks so far
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.poller.as_ref().map_or(0, PollerHandle::ticks)
    }

    /// Stop the timer and wait for its current refresh set to finish
    pub async fn shutdown(mut self) {
        if let Some(poller) = self.poller.take() {
            if let Err(e) = poller.shutdown().await {
                tracing::error!(error = %e, "Periodic reconciliation task failed");
            }
        }
        info!(device = self.device.name(), "Session closed");
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("device", &self.device.name())
            .field("reconciler", &self.reconciler)
            .field("polling", &self.poller.is_some())
            .finish()
    }
}
