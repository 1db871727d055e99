//! Reconciliation Loop
//!
//! Coordinates user mutations with the refreshes that make their effect
//! visible, and runs the periodic refresh timer.
//!
//! # Ordering
//!
//! A mutation's follow-up refreshes are issued only after the mutation's own
//! response has been observed, whether it succeeded or not:
//!
//! | Mutation | Follow-up refreshes |
//! |---|---|
//! | upload, delete | gallery, display, status |
//! | select | display |
//! | brightness, max current | none |
//!
//! The periodic timer refreshes all three components on its own schedule and
//! is never gated on the loop state. Overlapping refreshes resolve as
//! last-response-wins, since every refresh replaces its component's state
//! wholesale.
//!
//! Nothing here retries. Errors are logged, published as [`SyncEvent`]s and
//! returned in the outcome; the next tick or user action is the recovery path.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::device::{validate_brightness, DeviceApi, ImageName};
use crate::error::DeviceResult;
use crate::events::{EventSink, SyncEvent};
use crate::gallery::{GalleryView, ImageGallery};
use crate::parameters::ParameterPanel;
use crate::renderer::{DisplayRenderer, DisplayedImage};
use crate::status::{StatusMonitor, StatusPanel};

/// Observable coordination state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LoopState {
    /// Nothing user-triggered is in flight
    #[default]
    Idle,
    /// A mutation request is awaiting its response
    MutationInFlight,
    /// A mutation's follow-up refreshes are in flight
    RefreshInFlight,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::MutationInFlight => write!(f, "mutation in flight"),
            Self::RefreshInFlight => write!(f, "refresh in flight"),
        }
    }
}

/// Kind of user-initiated mutation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// Upload an image
    Upload,
    /// Delete an image
    Delete,
    /// Change the displayed image
    Select,
    /// Set LED brightness
    SetBrightness,
    /// Set LED current limit
    SetMaxCurrent,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Delete => write!(f, "delete"),
            Self::Select => write!(f, "select"),
            Self::SetBrightness => write!(f, "set brightness"),
            Self::SetMaxCurrent => write!(f, "set max current"),
        }
    }
}

/// Which components to refresh
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshSet {
    /// Image list
    pub gallery: bool,
    /// Displayed image
    pub display: bool,
    /// Filesystem status
    pub status: bool,
}

impl RefreshSet {
    /// Everything
    pub const ALL: Self = Self {
        gallery: true,
        display: true,
        status: true,
    };

    /// Only the displayed image
    pub const DISPLAY_ONLY: Self = Self {
        gallery: false,
        display: true,
        status: false,
    };

    /// Nothing
    pub const NONE: Self = Self {
        gallery: false,
        display: false,
        status: false,
    };

    /// Whether nothing is selected
    #[must_use]
    pub fn is_empty(self) -> bool {
        self == Self::NONE
    }
}

/// A user-initiated change to device state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    /// Store a file (and make it the displayed image)
    Upload {
        /// File contents
        bytes: Vec<u8>,
        /// Name to store it under
        file_name: String,
    },
    /// Remove a stored image
    Delete(ImageName),
    /// Change the displayed image
    Select(ImageName),
    /// Brightness percentage (0-100)
    SetBrightness(u8),
    /// Current limit in milliamps
    SetMaxCurrent(u32),
}

impl Mutation {
    /// Kind of this mutation
    #[must_use]
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Upload { .. } => MutationKind::Upload,
            Self::Delete(_) => MutationKind::Delete,
            Self::Select(_) => MutationKind::Select,
            Self::SetBrightness(_) => MutationKind::SetBrightness,
            Self::SetMaxCurrent(_) => MutationKind::SetMaxCurrent,
        }
    }

    /// Refreshes to issue once this mutation has resolved
    #[must_use]
    pub fn refresh_set(&self) -> RefreshSet {
        match self.kind() {
            MutationKind::Upload | MutationKind::Delete => RefreshSet::ALL,
            MutationKind::Select => RefreshSet::DISPLAY_ONLY,
            MutationKind::SetBrightness | MutationKind::SetMaxCurrent => RefreshSet::NONE,
        }
    }
}

/// Per-component results of one refresh set
///
/// `None` means the component was not part of the set.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    /// Gallery refresh result
    pub gallery: Option<DeviceResult<GalleryView>>,
    /// Renderer refresh result
    pub display: Option<DeviceResult<DisplayedImage>>,
    /// Status refresh result
    pub status: Option<DeviceResult<StatusPanel>>,
}

impl RefreshOutcome {
    /// Which components were refreshed
    #[must_use]
    pub fn refreshed(&self) -> RefreshSet {
        RefreshSet {
            gallery: self.gallery.is_some(),
            display: self.display.is_some(),
            status: self.status.is_some(),
        }
    }

    /// Number of refreshes that failed
    #[must_use]
    pub fn failures(&self) -> usize {
        [
            self.gallery.as_ref().is_some_and(Result::is_err),
            self.display.as_ref().is_some_and(Result::is_err),
            self.status.as_ref().is_some_and(Result::is_err),
        ]
        .into_iter()
        .filter(|failed| *failed)
        .count()
    }

    /// Whether every issued refresh succeeded
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failures() == 0
    }
}

/// Result of handling one mutation
#[derive(Debug)]
pub struct MutationOutcome {
    /// Which mutation was handled
    pub kind: MutationKind,
    /// The device's answer to the mutation itself
    pub mutation: DeviceResult<()>,
    /// Follow-up refreshes issued after the mutation resolved
    pub refresh: RefreshOutcome,
}

impl MutationOutcome {
    /// Whether the mutation itself succeeded
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.mutation.is_ok()
    }
}

// =============================================================================
// State tracking
// =============================================================================

#[derive(Clone, Copy)]
enum Phase {
    Mutation,
    Refresh,
}

#[derive(Debug, Default)]
struct Counters {
    mutations: usize,
    refreshes: usize,
    state: LoopState,
}

impl Counters {
    fn derive(&self) -> LoopState {
        if self.mutations > 0 {
            LoopState::MutationInFlight
        } else if self.refreshes > 0 {
            LoopState::RefreshInFlight
        } else {
            LoopState::Idle
        }
    }
}

/// Derives [`LoopState`] from what is in flight
///
/// Several mutations may overlap (the presentation layer does not serialize
/// user input), so the state is computed from counters rather than stored.
#[derive(Debug)]
struct StateTracker {
    counters: Mutex<Counters>,
    events: EventSink,
}

impl StateTracker {
    fn new(events: EventSink) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            events,
        }
    }

    fn state(&self) -> LoopState {
        self.counters.lock().state
    }

    fn enter(self: &Arc<Self>, phase: Phase) -> PhaseGuard {
        self.update(|c| match phase {
            Phase::Mutation => c.mutations += 1,
            Phase::Refresh => c.refreshes += 1,
        });
        PhaseGuard {
            tracker: Arc::clone(self),
            phase,
        }
    }

    fn update(&self, change: impl FnOnce(&mut Counters)) {
        let next = {
            let mut counters = self.counters.lock();
            change(&mut counters);
            let next = counters.derive();
            if next == counters.state {
                return;
            }
            counters.state = next;
            next
        };
        debug!(state = %next, "Loop state changed");
        self.events.publish(SyncEvent::StateChanged(next));
    }
}

/// Leaves its phase when dropped, including when the handling future is dropped
struct PhaseGuard {
    tracker: Arc<StateTracker>,
    phase: Phase,
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        let phase = self.phase;
        self.tracker.update(|c| match phase {
            Phase::Mutation => c.mutations = c.mutations.saturating_sub(1),
            Phase::Refresh => c.refreshes = c.refreshes.saturating_sub(1),
        });
    }
}

// =============================================================================
// Loop
// =============================================================================

/// Coordinator for mutations, follow-up refreshes and the periodic timer
#[derive(Clone)]
pub struct ReconciliationLoop {
    device: Arc<dyn DeviceApi>,
    gallery: ImageGallery,
    renderer: DisplayRenderer,
    status: StatusMonitor,
    parameters: Arc<RwLock<ParameterPanel>>,
    tracker: Arc<StateTracker>,
    events: EventSink,
    poll_interval: Duration,
}

impl ReconciliationLoop {
    /// Build the components for `device` and the loop that drives them
    #[must_use]
    pub fn new(device: Arc<dyn DeviceApi>, events: EventSink, poll_interval: Duration) -> Self {
        Self {
            gallery: ImageGallery::new(Arc::clone(&device), events.clone()),
            renderer: DisplayRenderer::new(Arc::clone(&device), events.clone()),
            status: StatusMonitor::new(Arc::clone(&device), events.clone()),
            parameters: Arc::new(RwLock::new(ParameterPanel::default())),
            tracker: Arc::new(StateTracker::new(events.clone())),
            device,
            events,
            poll_interval,
        }
    }

    /// Image gallery component
    #[must_use]
    pub fn gallery(&self) -> &ImageGallery {
        &self.gallery
    }

    /// Display renderer component
    #[must_use]
    pub fn renderer(&self) -> &DisplayRenderer {
        &self.renderer
    }

    /// Status monitor component
    #[must_use]
    pub fn status(&self) -> &StatusMonitor {
        &self.status
    }

    /// Locally set hardware parameters
    #[must_use]
    pub fn parameters(&self) -> ParameterPanel {
        *self.parameters.read()
    }

    /// Current coordination state
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.tracker.state()
    }

    /// Period of the timer started by [`spawn_periodic`](Self::spawn_periodic)
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Upload a file, then refresh everything
    pub async fn upload(&self, bytes: Vec<u8>, file_name: impl Into<String>) -> MutationOutcome {
        self.handle(Mutation::Upload {
            bytes,
            file_name: file_name.into(),
        })
        .await
    }

    /// Delete an image, then refresh everything
    pub async fn delete(&self, name: impl Into<ImageName>) -> MutationOutcome {
        self.handle(Mutation::Delete(name.into())).await
    }

    /// Change the displayed image, then refresh the renderer
    pub async fn select(&self, name: impl Into<ImageName>) -> MutationOutcome {
        self.handle(Mutation::Select(name.into())).await
    }

    /// Update the brightness label and send the value
    pub async fn set_brightness(&self, percent: u8) -> MutationOutcome {
        self.handle(Mutation::SetBrightness(percent)).await
    }

    /// Update the max-current label and send the value
    pub async fn set_max_current(&self, milliamps: u32) -> MutationOutcome {
        self.handle(Mutation::SetMaxCurrent(milliamps)).await
    }

    /// Issue a mutation, await its response, then issue its refresh set
    pub async fn handle(&self, mutation: Mutation) -> MutationOutcome {
        let kind = mutation.kind();
        let refresh_set = mutation.refresh_set();

        let mutation_phase = self.tracker.enter(Phase::Mutation);
        debug!(device = self.device.name(), mutation = %kind, "Mutation issued");
        let result = self.apply(mutation).await;

        match &result {
            Ok(()) => info!(device = self.device.name(), mutation = %kind, "Mutation accepted"),
            Err(e) => {
                warn!(device = self.device.name(), mutation = %kind, error = %e, "Mutation failed");
                self.events.publish(SyncEvent::MutationFailed {
                    mutation: kind,
                    error: e.to_string(),
                });
            }
        }

        // Enter the refresh phase before leaving the mutation phase so the
        // state never flickers through Idle in between.
        let refresh_phase = (!refresh_set.is_empty()).then(|| self.tracker.enter(Phase::Refresh));
        drop(mutation_phase);

        let refresh = self.run_refresh(refresh_set).await;
        drop(refresh_phase);

        MutationOutcome {
            kind,
            mutation: result,
            refresh,
        }
    }

    async fn apply(&self, mutation: Mutation) -> DeviceResult<()> {
        match mutation {
            Mutation::Upload { bytes, file_name } => self.gallery.upload(bytes, &file_name).await,
            Mutation::Delete(name) => self.gallery.delete(&name).await,
            Mutation::Select(name) => self.device.set_displayed_image(&name).await,
            Mutation::SetBrightness(percent) => {
                validate_brightness(percent)?;
                self.update_parameters(|p| p.brightness = Some(percent));
                self.device.set_brightness(percent).await
            }
            Mutation::SetMaxCurrent(milliamps) => {
                self.update_parameters(|p| p.max_current = Some(milliamps));
                self.device.set_max_current(milliamps).await
            }
        }
    }

    fn update_parameters(&self, change: impl FnOnce(&mut ParameterPanel)) {
        let panel = {
            let mut panel = self.parameters.write();
            change(&mut panel);
            *panel
        };
        self.events.publish(SyncEvent::ParametersUpdated(panel));
    }

    /// Refresh all three components concurrently
    ///
    /// This is the timer's refresh set; it does not touch [`LoopState`].
    pub async fn reconcile_all(&self) -> RefreshOutcome {
        self.run_refresh(RefreshSet::ALL).await
    }

    async fn run_refresh(&self, set: RefreshSet) -> RefreshOutcome {
        if set.is_empty() {
            return RefreshOutcome::default();
        }

        let status = async {
            if set.status {
                Some(self.status.refresh().await)
            } else {
                None
            }
        };
        let display = async {
            if set.display {
                Some(self.renderer.refresh().await)
            } else {
                None
            }
        };
        let gallery = async {
            if set.gallery {
                Some(self.gallery.refresh().await)
            } else {
                None
            }
        };

        let (status, display, gallery) = futures::join!(status, display, gallery);
        RefreshOutcome {
            gallery,
            display,
            status,
        }
    }

    /// Start the periodic timer on the current runtime
    ///
    /// The first tick fires immediately, which doubles as the initial load.
    /// Ticks missed while a refresh set is still running are skipped.
    #[must_use]
    pub fn spawn_periodic(&self) -> PollerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let ticks = Arc::new(AtomicU64::new(0));
        let this = self.clone();
        let task_ticks = Arc::clone(&ticks);

        let task = tokio::spawn(async move {
            // interval() panics on a zero period
            let period = this.poll_interval.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                device = this.device.name(),
                period_ms = u64::try_from(this.poll_interval.as_millis()).unwrap_or(u64::MAX),
                "Periodic reconciliation started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let tick = task_ticks.fetch_add(1, Ordering::Relaxed) + 1;
                let outcome = this.reconcile_all().await;
                if outcome.is_ok() {
                    debug!(tick, "Periodic reconciliation complete");
                } else {
                    warn!(
                        tick,
                        failures = outcome.failures(),
                        "Periodic reconciliation had failures"
                    );
                }
            }

            info!(device = this.device.name(), "Periodic reconciliation stopped");
        });

        PollerHandle {
            stop: stop_tx,
            task,
            ticks,
        }
    }
}

impl fmt::Debug for ReconciliationLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationLoop")
            .field("device", &self.device.name())
            .field("state", &self.state())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Handle to a running periodic timer
///
/// Dropping the handle also stops the timer after its current refresh set.
#[derive(Debug)]
pub struct PollerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    ticks: Arc<AtomicU64>,
}

impl PollerHandle {
    /// Ask the timer to stop; a refresh set already running completes first
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Number of ticks that have started a refresh set
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Whether the timer task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the timer and wait for its task to exit
    ///
    /// # Errors
    ///
    /// Returns the join error if the task panicked.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        self.stop();
        self.task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;
    use tokio_test::{assert_pending, assert_ready};

    use crate::device::{DeviceCall, DeviceOp, InjectedFailure, SimulatedDevice};
    use crate::renderer::solid_png;

    const POLL: Duration = Duration::from_millis(10_000);

    /// Let spawned tasks and fired timers run
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn looped(device: &SimulatedDevice) -> ReconciliationLoop {
        ReconciliationLoop::new(Arc::new(device.clone()), EventSink::disabled(), POLL)
    }

    fn seeded() -> SimulatedDevice {
        SimulatedDevice::new()
            .with_image("cat.png", solid_png(2, 2, [255, 0, 0, 255]).unwrap())
            .with_image("dog.png", solid_png(2, 2, [0, 255, 0, 255]).unwrap())
            .with_displayed("cat.png")
    }

    fn drain(rx: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_refresh_sets_per_mutation() {
        let upload = Mutation::Upload {
            bytes: vec![1],
            file_name: "a.png".into(),
        };
        assert_eq!(upload.refresh_set(), RefreshSet::ALL);
        assert_eq!(Mutation::Delete("a.png".into()).refresh_set(), RefreshSet::ALL);
        assert_eq!(
            Mutation::Select("a.png".into()).refresh_set(),
            RefreshSet::DISPLAY_ONLY
        );
        assert!(Mutation::SetBrightness(10).refresh_set().is_empty());
        assert!(Mutation::SetMaxCurrent(10).refresh_set().is_empty());
    }

    #[tokio::test]
    async fn test_upload_refreshes_after_mutation() {
        let device = seeded();
        let lp = looped(&device);
        let png = solid_png(2, 2, [0, 0, 255, 255]).unwrap();

        let outcome = lp.upload(png, "owl.png").await;
        assert!(outcome.is_ok());
        assert_eq!(outcome.refresh.refreshed(), RefreshSet::ALL);

        let ops: Vec<DeviceOp> = device.calls().iter().map(DeviceCall::op).collect();
        assert_eq!(ops[0], DeviceOp::Upload);
        assert_eq!(ops.len(), 4);
        assert!(ops[1..].contains(&DeviceOp::ListImages));
        assert!(ops[1..].contains(&DeviceOp::DisplayedImage));
        assert!(ops[1..].contains(&DeviceOp::Status));
        assert!(lp.gallery().contains(&"owl.png".into()));
        assert_eq!(lp.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn test_select_refreshes_display_only() {
        let device = seeded();
        let lp = looped(&device);

        let outcome = lp.select("dog.png").await;
        assert!(outcome.is_ok());
        assert_eq!(outcome.refresh.refreshed(), RefreshSet::DISPLAY_ONLY);
        assert_eq!(
            lp.renderer().displayed().surface().unwrap().pixel(0, 0),
            Some([0, 255, 0, 255])
        );
        assert_eq!(device.call_count(DeviceOp::ListImages), 0);
    }

    #[tokio::test]
    async fn test_parameters_do_not_refresh() {
        let device = seeded();
        let lp = looped(&device);

        let outcome = lp.set_brightness(40).await;
        assert!(outcome.is_ok());
        assert!(outcome.refresh.refreshed().is_empty());
        let outcome = lp.set_max_current(800).await;
        assert!(outcome.is_ok());

        assert_eq!(device.brightness(), Some(40));
        assert_eq!(device.max_current(), Some(800));
        assert_eq!(lp.parameters().brightness_label().as_deref(), Some("Brightness: 40%"));
        assert_eq!(
            lp.parameters().max_current_label().as_deref(),
            Some("Max current: 800 mA")
        );
        assert_eq!(device.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_brightness_leaves_label() {
        let device = seeded();
        let lp = looped(&device);

        let outcome = lp.set_brightness(101).await;
        assert!(matches!(
            outcome.mutation,
            Err(crate::error::DeviceError::InvalidRequest(_))
        ));
        assert_eq!(lp.parameters().brightness, None);
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_mutation_still_refreshes() {
        let device = seeded();
        let lp = looped(&device);
        lp.reconcile_all().await;
        device.fail(DeviceOp::Delete, InjectedFailure::Timeout);

        let outcome = lp.delete("cat.png").await;
        assert!(outcome.mutation.unwrap_err().is_transport());
        assert_eq!(outcome.refresh.refreshed(), RefreshSet::ALL);
        assert!(outcome.refresh.is_ok());
        assert_eq!(lp.gallery().images().len(), 2);
    }

    #[tokio::test]
    async fn test_mutation_failure_is_published() {
        let device = seeded();
        let (sink, mut rx) = EventSink::channel(32);
        let lp = ReconciliationLoop::new(Arc::new(device.clone()), sink, POLL);
        device.fail(DeviceOp::SetDisplayedImage, InjectedFailure::server_error("nope"));

        let _ = lp.select("dog.png").await;
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            SyncEvent::MutationFailed {
                mutation: MutationKind::Select,
                ..
            }
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncEvent::DisplayUpdated(_))));
    }

    #[tokio::test]
    async fn test_state_transitions_are_published_in_order() {
        let device = seeded();
        let (sink, mut rx) = EventSink::channel(32);
        let lp = ReconciliationLoop::new(Arc::new(device.clone()), sink, POLL);

        let _ = lp.select("dog.png").await;
        let states: Vec<LoopState> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                LoopState::MutationInFlight,
                LoopState::RefreshInFlight,
                LoopState::Idle
            ]
        );
    }

    #[tokio::test]
    async fn test_no_refresh_before_mutation_resolves() {
        let device = seeded();
        let lp = looped(&device);
        device.hold_mutations();

        let mut task = tokio_test::task::spawn(lp.delete("dog.png"));
        assert_pending!(task.poll());
        assert_eq!(lp.state(), LoopState::MutationInFlight);
        assert_eq!(device.calls(), vec![DeviceCall::Delete("dog.png".into())]);

        device.release_mutations();
        assert!(task.is_woken());
        let outcome = assert_ready!(task.poll());
        assert!(outcome.is_ok());
        assert_eq!(device.calls().len(), 4);
        assert_eq!(lp.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn test_dropped_mutation_returns_to_idle() {
        let device = seeded();
        let lp = looped(&device);
        device.hold_mutations();

        let mut task = tokio_test::task::spawn(lp.set_max_current(300));
        assert_pending!(task.poll());
        assert_eq!(lp.state(), LoopState::MutationInFlight);
        drop(task);
        assert_eq!(lp.state(), LoopState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_first_tick_is_immediate() {
        let device = seeded();
        let lp = looped(&device);

        let poller = lp.spawn_periodic();
        settle().await;
        assert_eq!(poller.ticks(), 1);
        assert!(lp.gallery().is_loaded());

        tokio::time::advance(POLL).await;
        settle().await;
        assert_eq!(poller.ticks(), 2);

        poller.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_survives_failures() {
        let device = seeded();
        let lp = looped(&device);
        device.fail(DeviceOp::ListImages, InjectedFailure::Timeout);
        device.fail(DeviceOp::Status, InjectedFailure::MalformedBody);

        let poller = lp.spawn_periodic();
        settle().await;
        for _ in 0..3 {
            tokio::time::advance(POLL).await;
            settle().await;
        }
        assert!(poller.ticks() >= 3);
        assert!(!poller.is_finished());
        assert!(!lp.gallery().is_loaded());

        device.recover(DeviceOp::ListImages);
        tokio::time::advance(POLL).await;
        settle().await;
        assert!(lp.gallery().is_loaded());

        poller.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_timer() {
        let device = seeded();
        let lp = looped(&device);
        let poller = lp.spawn_periodic();
        settle().await;
        let PollerHandle { stop, task, ticks } = poller;
        drop(stop);
        task.await.unwrap();
        assert_eq!(ticks.load(Ordering::Relaxed), 1);
    }
}
