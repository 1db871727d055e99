//! Device Access
//!
//! Everything that issues requests against the device.
//!
//! - [`DeviceApi`]: one async operation per device capability
//! - [`HttpDevice`]: the real thing, over `reqwest`
//! - [`SimulatedDevice`]: in-memory stand-in with firmware semantics

mod http;
mod simulated;
mod traits;
mod types;

pub use http::{parse_image_list, parse_status, HttpDevice, DEFAULT_REQUEST_TIMEOUT};
pub use simulated::{
    DeviceCall, DeviceOp, InjectedFailure, SimulatedDevice, DEFAULT_CAPACITY_KB,
    DEFAULT_FREE_HEAP,
};
pub use traits::{validate_brightness, validate_upload, DeviceApi};
pub use types::{
    CacheToken, FilesystemStatus, ImageListResponse, ImageName, MAX_BRIGHTNESS_PERCENT,
};
