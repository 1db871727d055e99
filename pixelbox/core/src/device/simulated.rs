//! Simulated Device
//!
//! In-memory [`DeviceApi`] that behaves like the firmware's web server:
//!
//! - an upload stores the file and immediately makes it the displayed image
//! - deleting the displayed image first moves the selection to the next file
//!   in listing order (wrapping around), or clears it if it was the only one
//! - selecting just records the name; the firmware does not check it exists
//! - the filesystem has a fixed capacity and rejects writes that overflow it
//!
//! Used by the CLI's `--simulate` mode and by the test suites. Tests can also
//! inject failures per operation, inspect the call log, and hold mutations
//! in flight to observe ordering.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::http::{parse_image_list, parse_status};
use super::traits::{validate_brightness, validate_upload, DeviceApi};
use super::types::{CacheToken, FilesystemStatus, ImageName};
use crate::error::{DeviceError, DeviceResult, TransportError};

/// Default filesystem capacity in KB
pub const DEFAULT_CAPACITY_KB: u64 = 512;

/// Default free heap reported by `fs_status`
pub const DEFAULT_FREE_HEAP: u64 = 45_000;

/// Device operations, used to address failure injection and count calls
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceOp {
    /// `GET /images`
    ListImages,
    /// `POST /image`
    Upload,
    /// `DELETE /image`
    Delete,
    /// `GET /displayed_image`
    DisplayedImage,
    /// `POST /displayed_image`
    SetDisplayedImage,
    /// `GET /fs_status`
    Status,
    /// `POST /set_brightness`
    SetBrightness,
    /// `POST /set_max_current`
    SetMaxCurrent,
}

/// A request as the simulator received it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceCall {
    /// `GET /images`
    ListImages,
    /// `POST /image`
    Upload {
        /// Uploaded file name
        file_name: String,
        /// Uploaded size in bytes
        size: usize,
    },
    /// `DELETE /image`
    Delete(ImageName),
    /// `GET /displayed_image?t=<token>`
    DisplayedImage(CacheToken),
    /// `POST /displayed_image`
    SetDisplayedImage(ImageName),
    /// `GET /fs_status`
    Status,
    /// `POST /set_brightness`
    SetBrightness(u8),
    /// `POST /set_max_current`
    SetMaxCurrent(u32),
}

impl DeviceCall {
    /// Operation this call belongs to
    #[must_use]
    pub fn op(&self) -> DeviceOp {
        match self {
            Self::ListImages => DeviceOp::ListImages,
            Self::Upload { .. } => DeviceOp::Upload,
            Self::Delete(_) => DeviceOp::Delete,
            Self::DisplayedImage(_) => DeviceOp::DisplayedImage,
            Self::SetDisplayedImage(_) => DeviceOp::SetDisplayedImage,
            Self::Status => DeviceOp::Status,
            Self::SetBrightness(_) => DeviceOp::SetBrightness,
            Self::SetMaxCurrent(_) => DeviceOp::SetMaxCurrent,
        }
    }
}

/// Failure to inject into an operation until cleared
#[derive(Clone, Debug)]
pub enum InjectedFailure {
    /// Reject with a status before touching state
    Status {
        /// HTTP status code
        status: u16,
        /// Plain-text reason
        body: String,
    },
    /// Apply the operation, then still answer with an error status
    StatusAfterEffect {
        /// HTTP status code
        status: u16,
        /// Plain-text reason
        body: String,
    },
    /// Answer reads with a body that does not decode (mutations ignore this)
    MalformedBody,
    /// Time out before touching state
    Timeout,
}

impl InjectedFailure {
    /// A plain 500 with the given reason
    pub fn server_error(body: impl Into<String>) -> Self {
        Self::Status {
            status: 500,
            body: body.into(),
        }
    }
}

#[derive(Debug)]
struct SimState {
    /// Stored files in directory order
    files: Vec<(ImageName, Vec<u8>)>,
    /// Displayed image; empty means nothing selected
    displayed: ImageName,
    capacity_kb: u64,
    free_heap: u64,
    brightness: Option<u8>,
    max_current: Option<u32>,
    failures: HashMap<DeviceOp, InjectedFailure>,
    calls: Vec<DeviceCall>,
}

impl SimState {
    fn used_bytes(&self) -> u64 {
        self.files.iter().map(|(_, bytes)| bytes.len() as u64).sum()
    }

    fn position(&self, name: &ImageName) -> Option<usize> {
        self.files.iter().position(|(n, _)| n == name)
    }

    /// Move the selection off `name` the way the firmware does before deleting it
    fn select_next(&mut self, name: &ImageName) {
        if self.files.len() <= 1 {
            self.displayed = ImageName::default();
            return;
        }
        if let Some(pos) = self.position(name) {
            let next = (pos + 1) % self.files.len();
            self.displayed = self.files[next].0.clone();
        }
    }
}

/// In-memory device
#[derive(Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
    /// Open gate lets mutations through; closed gate holds them in flight
    gate: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedDevice")
            .field("files", &state.files.len())
            .field("displayed", &state.displayed)
            .field("calls", &state.calls.len())
            .finish()
    }
}

impl SimulatedDevice {
    /// Empty device with default capacity and heap
    #[must_use]
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Arc::new(Mutex::new(SimState {
                files: Vec::new(),
                displayed: ImageName::default(),
                capacity_kb: DEFAULT_CAPACITY_KB,
                free_heap: DEFAULT_FREE_HEAP,
                brightness: None,
                max_current: None,
                failures: HashMap::new(),
                calls: Vec::new(),
            })),
            gate: Arc::new(gate),
        }
    }

    /// Set filesystem capacity
    #[must_use]
    pub fn with_capacity_kb(self, capacity_kb: u64) -> Self {
        self.state.lock().capacity_kb = capacity_kb;
        self
    }

    /// Set reported free heap
    #[must_use]
    pub fn with_free_heap(self, free_heap: u64) -> Self {
        self.set_free_heap(free_heap);
        self
    }

    /// Seed a stored file without changing the selection
    #[must_use]
    pub fn with_image(self, name: impl Into<ImageName>, bytes: Vec<u8>) -> Self {
        self.store(name.into(), bytes);
        self
    }

    /// Seed the displayed image name
    #[must_use]
    pub fn with_displayed(self, name: impl Into<ImageName>) -> Self {
        self.state.lock().displayed = name.into();
        self
    }

    fn store(&self, name: ImageName, bytes: Vec<u8>) {
        let mut state = self.state.lock();
        match state.position(&name) {
            Some(pos) => state.files[pos].1 = bytes,
            None => state.files.push((name, bytes)),
        }
    }

    /// Change reported free heap (the device's own memory pressure)
    pub fn set_free_heap(&self, free_heap: u64) {
        self.state.lock().free_heap = free_heap;
    }

    /// Replace an image behind the client's back, keeping its name
    pub fn replace_image(&self, name: impl Into<ImageName>, bytes: Vec<u8>) {
        self.store(name.into(), bytes);
    }

    /// Remove an image behind the client's back (low-memory eviction)
    pub fn evict_image(&self, name: &ImageName) {
        let mut state = self.state.lock();
        if &state.displayed == name {
            state.select_next(name);
        }
        state.files.retain(|(n, _)| n != name);
    }

    /// Make `op` fail until [`recover`](Self::recover) is called
    pub fn fail(&self, op: DeviceOp, failure: InjectedFailure) {
        self.state.lock().failures.insert(op, failure);
    }

    /// Stop failing `op`
    pub fn recover(&self, op: DeviceOp) {
        self.state.lock().failures.remove(&op);
    }

    /// Hold every mutation in flight until [`release_mutations`](Self::release_mutations)
    pub fn hold_mutations(&self) {
        self.gate.send_replace(false);
    }

    /// Let held mutations resolve
    pub fn release_mutations(&self) {
        self.gate.send_replace(true);
    }

    /// Stored image names in listing order
    #[must_use]
    pub fn images(&self) -> Vec<ImageName> {
        self.state.lock().files.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Currently displayed image, `None` when nothing is selected
    #[must_use]
    pub fn displayed(&self) -> Option<ImageName> {
        let state = self.state.lock();
        (!state.displayed.is_empty()).then(|| state.displayed.clone())
    }

    /// Last brightness the device accepted
    #[must_use]
    pub fn brightness(&self) -> Option<u8> {
        self.state.lock().brightness
    }

    /// Last max current the device accepted
    #[must_use]
    pub fn max_current(&self) -> Option<u32> {
        self.state.lock().max_current
    }

    /// Every request received so far, in arrival order
    #[must_use]
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().calls.clone()
    }

    /// Number of requests received for `op`
    #[must_use]
    pub fn call_count(&self, op: DeviceOp) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.op() == op)
            .count()
    }

    /// Forget the call log
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Current filesystem status as `fs_status` would report it
    #[must_use]
    pub fn filesystem_status(&self) -> FilesystemStatus {
        let state = self.state.lock();
        FilesystemStatus {
            total_size: state.capacity_kb,
            allocated_size: state.used_bytes().div_ceil(1024),
            free_heap: state.free_heap,
        }
    }

    /// Log the call and fetch any injected failure for it
    fn begin(&self, call: DeviceCall) -> Option<InjectedFailure> {
        let mut state = self.state.lock();
        let failure = state.failures.get(&call.op()).cloned();
        state.calls.push(call);
        failure
    }

    /// Wait for the gate to open (mutations only)
    async fn pass_gate(&self) {
        let mut rx = self.gate.subscribe();
        // Sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Run a mutation with gate, failure injection and effect
    async fn mutate<F>(&self, call: DeviceCall, effect: F) -> DeviceResult<()>
    where
        F: FnOnce(&mut SimState) -> DeviceResult<()>,
    {
        let failure = self.begin(call);
        self.pass_gate().await;

        match failure {
            Some(InjectedFailure::Status { status, body }) => Err(DeviceError::status(status, body)),
            Some(InjectedFailure::Timeout) => Err(TransportError::Timeout.into()),
            Some(InjectedFailure::StatusAfterEffect { status, body }) => {
                // Partial effects are deliberately kept
                let _ = effect(&mut *self.state.lock());
                Err(DeviceError::status(status, body))
            }
            Some(InjectedFailure::MalformedBody) | None => effect(&mut *self.state.lock()),
        }
    }

    /// Apply an injected failure to a read
    fn read_failure(failure: Option<InjectedFailure>) -> DeviceResult<bool> {
        match failure {
            Some(InjectedFailure::Status { status, body })
            | Some(InjectedFailure::StatusAfterEffect { status, body }) => {
                Err(DeviceError::status(status, body))
            }
            Some(InjectedFailure::Timeout) => Err(TransportError::Timeout.into()),
            Some(InjectedFailure::MalformedBody) => Ok(true),
            None => Ok(false),
        }
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

const MALFORMED_BODY: &[u8] = b"<html><body>rebooting</body></html>";

#[async_trait]
impl DeviceApi for SimulatedDevice {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn list_images(&self) -> DeviceResult<Vec<ImageName>> {
        let failure = self.begin(DeviceCall::ListImages);
        if Self::read_failure(failure)? {
            return parse_image_list(MALFORMED_BODY);
        }
        Ok(self.images())
    }

    async fn upload_image(&self, bytes: Vec<u8>, file_name: &str) -> DeviceResult<()> {
        validate_upload(&bytes, file_name)?;
        let call = DeviceCall::Upload {
            file_name: file_name.to_string(),
            size: bytes.len(),
        };
        let name = ImageName::new(file_name);
        self.mutate(call, move |state| {
            let existing = state
                .position(&name)
                .map_or(0, |pos| state.files[pos].1.len() as u64);
            let used_after = state.used_bytes() - existing + bytes.len() as u64;
            if used_after > state.capacity_kb * 1024 {
                return Err(DeviceError::status(500, "Write error."));
            }
            match state.position(&name) {
                Some(pos) => state.files[pos].1 = bytes,
                None => state.files.push((name.clone(), bytes)),
            }
            state.displayed = name;
            Ok(())
        })
        .await
    }

    async fn delete_image(&self, name: &ImageName) -> DeviceResult<()> {
        let target = name.clone();
        self.mutate(DeviceCall::Delete(name.clone()), move |state| {
            if state.displayed == target {
                state.select_next(&target);
            }
            match state.position(&target) {
                Some(pos) => {
                    state.files.remove(pos);
                    Ok(())
                }
                None => Err(DeviceError::status(500, "Failed to delete image.")),
            }
        })
        .await
    }

    async fn displayed_image(&self, token: CacheToken) -> DeviceResult<Option<Vec<u8>>> {
        let failure = self.begin(DeviceCall::DisplayedImage(token));
        if Self::read_failure(failure)? {
            return Ok(Some(MALFORMED_BODY.to_vec()));
        }
        let state = self.state.lock();
        if state.displayed.is_empty() {
            return Ok(None);
        }
        Ok(state
            .position(&state.displayed)
            .map(|pos| state.files[pos].1.clone()))
    }

    async fn set_displayed_image(&self, name: &ImageName) -> DeviceResult<()> {
        let target = name.clone();
        self.mutate(DeviceCall::SetDisplayedImage(name.clone()), move |state| {
            state.displayed = target;
            Ok(())
        })
        .await
    }

    async fn status(&self) -> DeviceResult<FilesystemStatus> {
        let failure = self.begin(DeviceCall::Status);
        if Self::read_failure(failure)? {
            return parse_status(MALFORMED_BODY);
        }
        Ok(self.filesystem_status())
    }

    async fn set_brightness(&self, percent: u8) -> DeviceResult<()> {
        validate_brightness(percent)?;
        self.mutate(DeviceCall::SetBrightness(percent), move |state| {
            state.brightness = Some(percent);
            Ok(())
        })
        .await
    }

    async fn set_max_current(&self, milliamps: u32) -> DeviceResult<()> {
        self.mutate(DeviceCall::SetMaxCurrent(milliamps), move |state| {
            state.max_current = Some(milliamps);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<ImageName> {
        list.iter().copied().map(ImageName::from).collect()
    }

    #[tokio::test]
    async fn test_upload_selects_uploaded_image() {
        let device = SimulatedDevice::new();
        device.upload_image(vec![1, 2, 3], "cat.png").await.unwrap();

        assert_eq!(device.images(), names(&["cat.png"]));
        assert_eq!(device.displayed(), Some(ImageName::from("cat.png")));
        assert_eq!(
            device.calls(),
            vec![DeviceCall::Upload {
                file_name: "cat.png".into(),
                size: 3
            }]
        );
    }

    #[tokio::test]
    async fn test_reupload_overwrites_in_place() {
        let device = SimulatedDevice::new()
            .with_image("a.png", vec![0; 10])
            .with_image("b.png", vec![0; 10]);
        device.upload_image(vec![1; 20], "a.png").await.unwrap();
        assert_eq!(device.images(), names(&["a.png", "b.png"]));
    }

    #[tokio::test]
    async fn test_delete_displayed_selects_next_and_wraps() {
        let device = SimulatedDevice::new()
            .with_image("a.png", vec![1])
            .with_image("b.png", vec![2])
            .with_image("c.png", vec![3])
            .with_displayed("b.png");

        device.delete_image(&"b.png".into()).await.unwrap();
        assert_eq!(device.displayed(), Some(ImageName::from("c.png")));

        device.delete_image(&"c.png".into()).await.unwrap();
        assert_eq!(device.displayed(), Some(ImageName::from("a.png")));

        device.delete_image(&"a.png".into()).await.unwrap();
        assert_eq!(device.displayed(), None);
        assert!(device.images().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_image_fails() {
        let device = SimulatedDevice::new();
        let err = device.delete_image(&"ghost.png".into()).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_capacity_rejects_oversize_upload() {
        let device = SimulatedDevice::new().with_capacity_kb(1);
        let err = device.upload_image(vec![0; 2048], "big.gif").await.unwrap_err();
        assert_eq!(err.to_string(), "device returned 500: Write error.");
        assert!(device.images().is_empty());
    }

    #[tokio::test]
    async fn test_status_reports_usage_in_kb() {
        let device = SimulatedDevice::new()
            .with_free_heap(1234)
            .with_image("a.png", vec![0; 1500]);
        let status = device.status().await.unwrap();
        assert_eq!(status.total_size, DEFAULT_CAPACITY_KB);
        assert_eq!(status.allocated_size, 2);
        assert_eq!(status.free_heap, 1234);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let device = SimulatedDevice::new().with_image("a.png", vec![1]);

        device.fail(DeviceOp::ListImages, InjectedFailure::MalformedBody);
        assert!(device.list_images().await.unwrap_err().is_decode());

        device.fail(DeviceOp::ListImages, InjectedFailure::Timeout);
        assert!(matches!(
            device.list_images().await,
            Err(DeviceError::Transport(TransportError::Timeout))
        ));

        device.recover(DeviceOp::ListImages);
        assert_eq!(device.list_images().await.unwrap(), names(&["a.png"]));

        device.fail(
            DeviceOp::Delete,
            InjectedFailure::StatusAfterEffect {
                status: 500,
                body: "Failed to delete image.".into(),
            },
        );
        assert!(device.delete_image(&"a.png".into()).await.is_err());
        assert!(device.images().is_empty(), "effect applied despite error");
    }

    #[tokio::test]
    async fn test_held_mutation_waits_for_release() {
        let device = SimulatedDevice::new();
        device.hold_mutations();

        let mut upload = tokio_test::task::spawn(device.upload_image(vec![1], "a.png"));
        tokio_test::assert_pending!(upload.poll());
        assert_eq!(device.call_count(DeviceOp::Upload), 1);
        assert!(device.images().is_empty());

        device.release_mutations();
        assert!(upload.is_woken());
        tokio_test::assert_ready_ok!(upload.poll());
        assert_eq!(device.images(), names(&["a.png"]));
    }
}
