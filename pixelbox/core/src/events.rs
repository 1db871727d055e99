//! Sync Events
//!
//! Notifications from the synchronization engine to whatever presents it.
//! Each event carries a complete snapshot of the view it replaces, so a
//! presentation layer only ever swaps whole values in (no incremental patches).
//!
//! Publishing never blocks a refresh: if the receiver is gone or its buffer is
//! full, the event is dropped and the next refresh publishes a fresh snapshot.

use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use crate::gallery::GalleryView;
use crate::parameters::ParameterPanel;
use crate::reconcile::{LoopState, MutationKind};
use crate::renderer::DisplayedImage;
use crate::status::StatusPanel;

/// Component that owns a piece of view state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    /// Image list
    Gallery,
    /// Rendered displayed image
    Display,
    /// Filesystem telemetry
    Status,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gallery => write!(f, "gallery"),
            Self::Display => write!(f, "display"),
            Self::Status => write!(f, "status"),
        }
    }
}

/// Event published to the presentation layer
#[derive(Clone, Debug)]
pub enum SyncEvent {
    /// Image list was replaced
    GalleryUpdated(GalleryView),
    /// Rendered image was replaced
    DisplayUpdated(DisplayedImage),
    /// Filesystem telemetry was replaced
    StatusUpdated(StatusPanel),
    /// A local parameter label changed
    ParametersUpdated(ParameterPanel),
    /// A refresh failed; the component kept its previous value
    RefreshFailed {
        /// Component that failed
        component: Component,
        /// Error description
        error: String,
    },
    /// A user-triggered mutation failed
    MutationFailed {
        /// Which mutation
        mutation: MutationKind,
        /// Error description
        error: String,
    },
    /// The reconciliation loop changed state
    StateChanged(LoopState),
}

/// Non-blocking publisher shared by all components
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<SyncEvent>>,
}

impl EventSink {
    /// Publish into the given channel
    #[must_use]
    pub fn new(tx: mpsc::Sender<SyncEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that discards everything
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Create a bounded channel and a sink feeding it
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    /// Publish an event without waiting
    pub fn publish(&self, event: SyncEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(event) => {
                    debug!(?event, "Event buffer full, dropping event");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!("Event receiver closed");
                }
            }
        }
    }
}
