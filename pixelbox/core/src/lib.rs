//! Pixelbox Core - Client-side sync engine for a networked image display
//!
//! The device stores a handful of PNG/GIF images, shows one of them on its
//! LED panel, and exposes a small HTTP surface. This crate keeps a local view
//! of that state in sync: the list of stored images, a decoded copy of the
//! displayed image, and filesystem telemetry. It knows nothing about how the
//! view is presented.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Presentation layer (CLI, GUI)               │
//! │        calls ReconciliationLoop, consumes SyncEvent           │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┼───────────────────────────────┐
//! │                     ClientSession                             │
//! │  ┌───────────────────────────┴────────────────────────────┐  │
//! │  │                  ReconciliationLoop                     │  │
//! │  │  ┌────────────┐  ┌────────────────┐  ┌───────────────┐ │  │
//! │  │  │ImageGallery│  │DisplayRenderer │  │ StatusMonitor │ │  │
//! │  │  └─────┬──────┘  └───────┬────────┘  └───────┬───────┘ │  │
//! │  └────────┴─────────────────┴───────────────────┴─────────┘  │
//! │                            │                                  │
//! │                   Arc<dyn DeviceApi>                          │
//! └────────────────────────────┼─────────────────────────────────┘
//!                              │
//!                HttpDevice / SimulatedDevice
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use pixelbox_core::{load_config, ClientSession, SyncEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let mut session = ClientSession::connect(&config)?;
//!     let mut events = session.take_events().unwrap();
//!
//!     session.start_polling();
//!     session.reconciler().set_brightness(60).await;
//!
//!     while let Some(event) = events.recv().await {
//!         if let SyncEvent::GalleryUpdated(view) = event {
//!             for line in view.render_lines() {
//!                 println!("{line}");
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`device`]: the device seam, its HTTP implementation and an in-memory simulator
//! - [`gallery`]: image list and its row-set
//! - [`renderer`]: displayed image fetch and decode
//! - [`status`]: filesystem telemetry
//! - [`parameters`]: locally set brightness and max current
//! - [`reconcile`]: mutation ordering and the periodic timer
//! - [`events`]: snapshots published to the presentation layer
//! - [`session`]: per-connection owned context
//! - [`config`]: TOML/env/CLI configuration
//! - [`error`]: transport, decode and device errors

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod gallery;
pub mod parameters;
pub mod reconcile;
pub mod renderer;
pub mod session;
pub mod status;

pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env,
    load_config_with_overrides, ClientConfig,
    ClientToml, ConfigError, ConfigOverrides, ConfigSource,
};
pub use device::{
    CacheToken, DeviceApi, DeviceCall, DeviceOp, FilesystemStatus, HttpDevice, ImageName,
    InjectedFailure, SimulatedDevice,
};
pub use error::{DecodeError, DeviceError, DeviceResult, TransportError};
pub use events::{Component, EventSink, SyncEvent};
pub use gallery::{GalleryRow, GalleryView, ImageGallery, RowAction, NO_IMAGES_PLACEHOLDER};
pub use parameters::ParameterPanel;
pub use reconcile::{
    LoopState, Mutation, MutationKind, MutationOutcome, PollerHandle, ReconciliationLoop,
    RefreshOutcome, RefreshSet,
};
pub use renderer::{CacheTokenSource, DisplayRenderer, DisplayedImage, RasterSurface};
pub use session::ClientSession;
pub use status::{StatusMonitor, StatusPanel};

// Device URLs are plain `reqwest` URLs
pub use reqwest::Url;
