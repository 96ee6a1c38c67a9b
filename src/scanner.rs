//! Session facade
//!
//! [`Scanner`] is the only entry point callers need. A scan runs probe,
//! acquisition and detection on a spawned task and ends in exactly one of:
//! a delivered result, a delivered fatal error, or a stop. Whichever way it
//! ends, the camera it acquired is released exactly once, and it is
//! released before any callback runs.

use crate::config::ScannerConfig;
use crate::engine::{build_engines, DecoderEngine};
use crate::errors::{ScanError, TorchError};
use crate::gate::ResultGate;
use crate::invariants::{RELEASED_BEFORE_DELIVERY, SINGLE_DELIVERY, SINGLE_LIVE_SESSION};
use crate::platform::CameraBackend;
use crate::probe::{self, ProbeReport};
use crate::scheduler::{DetectionScheduler, SchedulerConfig, StopHandle};
use crate::session::{AcquisitionTier, CameraPreference, CameraSession};
use crate::torch::{TorchController, TorchResult};
use crate::types::{CameraDescriptor, ScanResult, TorchState};
use crate::{assert_invariant, lock_unpoisoned};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

type ResultCallback = Box<dyn FnOnce(ScanResult) + Send>;
type ErrorCallback = Box<dyn FnOnce(ScanError) + Send>;

/// Where a scan is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Probing and opening the camera.
    Acquiring,
    /// Engines are polling the stream.
    Scanning,
    /// Ended by a result, an error or a stop. Terminal.
    Finished,
}

struct ScanSlot {
    phase: ScanPhase,
    session: Option<CameraSession>,
    stop: Option<StopHandle>,
    on_result: Option<ResultCallback>,
    on_error: Option<ErrorCallback>,
    delivered: bool,
}

/// Camera ownership shared by every [`Scanner`] on one host.
///
/// Holds the acquisition lock, the live-session count and the scan that
/// currently owns the camera. A backend hands out one registry for the host
/// it controls (see [`CameraBackend::sessions`]), so scanners created
/// independently still never hold two streams at once.
#[derive(Default)]
pub struct SessionRegistry {
    acquire_lock: Arc<tokio::sync::Mutex<()>>,
    live_sessions: Arc<AtomicUsize>,
    owner: Mutex<Weak<ScanShared>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Camera sessions currently holding a stream.
    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }

    fn owner(&self) -> Option<Arc<ScanShared>> {
        lock_unpoisoned(&self.owner).upgrade()
    }

    /// Stop whichever scan owns the camera and hand ownership to `scan`.
    fn take_over(&self, scan: &Arc<ScanShared>) {
        let previous = std::mem::replace(&mut *lock_unpoisoned(&self.owner), Arc::downgrade(scan));
        if let Some(previous) = previous.upgrade() {
            if previous.stop() {
                log::debug!("[scan {}] Preempted by scan {}", previous.id, scan.id);
            }
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("live_sessions", &self.live_sessions())
            .field("owner", &self.owner().map(|scan| scan.id))
            .finish()
    }
}

/// State shared between a scan's driver task and its handle.
struct ScanShared {
    id: Uuid,
    slot: Mutex<ScanSlot>,
    live_sessions: Arc<AtomicUsize>,
}

/// Everything torn out of a scan when it ends.
struct Teardown {
    session: Option<CameraSession>,
    stop: Option<StopHandle>,
    on_result: Option<ResultCallback>,
    on_error: Option<ErrorCallback>,
}

impl ScanShared {
    fn phase(&self) -> ScanPhase {
        lock_unpoisoned(&self.slot).phase
    }

    /// Move to `Finished` and take everything out. `None` if already finished.
    fn finish(&self) -> Option<Teardown> {
        let mut slot = lock_unpoisoned(&self.slot);
        if slot.phase == ScanPhase::Finished {
            return None;
        }
        slot.phase = ScanPhase::Finished;
        Some(Teardown {
            session: slot.session.take(),
            stop: slot.stop.take(),
            on_result: slot.on_result.take(),
            on_error: slot.on_error.take(),
        })
    }

    fn release(&self, mut session: CameraSession) {
        if session.release() {
            self.live_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        assert_invariant!(!session.is_active(), RELEASED_BEFORE_DELIVERY, "scanner");
    }

    /// Halt the engines and release the camera. Returns the callbacks.
    fn tear_down(&self, teardown: Teardown) -> (Option<ResultCallback>, Option<ErrorCallback>) {
        if let Some(stop) = teardown.stop {
            stop.stop();
        }
        if let Some(session) = teardown.session {
            self.release(session);
        }
        (teardown.on_result, teardown.on_error)
    }

    fn stop(&self) -> bool {
        match self.finish() {
            Some(teardown) => {
                // Callbacks are dropped unrun.
                let _ = self.tear_down(teardown);
                log::info!("[scan {}] Stopped", self.id);
                true
            }
            None => false,
        }
    }

    fn mark_delivered(&self) {
        let mut slot = lock_unpoisoned(&self.slot);
        assert_invariant!(!slot.delivered, SINGLE_DELIVERY, "scanner");
        slot.delivered = true;
    }

    /// Hand `result` to the caller. Gives it back if the scan already ended.
    fn deliver_result(&self, result: ScanResult) -> Option<ScanResult> {
        let Some(teardown) = self.finish() else {
            log::debug!("[scan {}] Result arrived after stop, discarding", self.id);
            return Some(result);
        };
        let (on_result, _) = self.tear_down(teardown);
        self.mark_delivered();

        log::info!(
            "[scan {}] Delivering result from {} engine",
            self.id,
            result.source_engine
        );
        if let Some(callback) = on_result {
            callback(result);
        }
        None
    }

    fn deliver_error(&self, error: ScanError) {
        let Some(teardown) = self.finish() else {
            log::debug!("[scan {}] Error after stop, discarding: {}", self.id, error);
            return;
        };
        let (_, on_error) = self.tear_down(teardown);
        self.mark_delivered();

        log::warn!("[scan {}] Ended with error: {}", self.id, error);
        if let Some(callback) = on_error {
            callback(error);
        }
    }

    fn toggle_torch(&self) -> TorchResult {
        let mut slot = lock_unpoisoned(&self.slot);
        match slot.session.as_mut() {
            Some(session) => TorchController::toggle(session),
            None => Err(TorchError::Inactive),
        }
    }

    fn tier(&self) -> Option<AcquisitionTier> {
        lock_unpoisoned(&self.slot).session.as_ref().map(|session| session.tier())
    }

    fn torch(&self) -> TorchState {
        lock_unpoisoned(&self.slot)
            .session
            .as_ref()
            .map(|session| session.torch())
            .unwrap_or_default()
    }
}

/// Handle to one running scan. Dropping it stops the scan.
pub struct ScanHandle {
    shared: Arc<ScanShared>,
}

impl std::fmt::Debug for ScanHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanHandle")
            .field("id", &self.shared.id)
            .field("phase", &self.phase())
            .finish()
    }
}

impl ScanHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn phase(&self) -> ScanPhase {
        self.shared.phase()
    }

    pub fn is_active(&self) -> bool {
        self.phase() != ScanPhase::Finished
    }

    /// End the scan now.
    ///
    /// Scheduling stops and the camera tracks are stopped before this
    /// returns. Neither callback runs afterwards. Returns `false` if the scan
    /// had already ended.
    pub fn stop(&self) -> bool {
        self.shared.stop()
    }

    pub fn toggle_torch(&self) -> TorchResult {
        self.shared.toggle_torch()
    }

    pub fn torch(&self) -> TorchState {
        self.shared.torch()
    }

    /// Acquisition tier of the camera this scan holds, while it holds one.
    pub fn tier(&self) -> Option<AcquisitionTier> {
        self.shared.tier()
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

/// Camera code scanner.
///
/// Owns the result gate, so duplicate suppression spans successive scans.
/// Acquisition is serialized through the backend's [`SessionRegistry`], so at
/// most one stream is live on the host no matter how many scanners exist.
pub struct Scanner {
    backend: Arc<dyn CameraBackend>,
    engines: Vec<Arc<dyn DecoderEngine>>,
    config: ScannerConfig,
    gate: Arc<Mutex<ResultGate>>,
    registry: Arc<SessionRegistry>,
    current: Mutex<Weak<ScanShared>>,
    scanning: Mutex<Option<ScanHandle>>,
}

impl Scanner {
    /// Scanner with the engines named in `config.engines.order`.
    pub fn new(backend: Arc<dyn CameraBackend>, config: ScannerConfig) -> Self {
        let engines = build_engines(&config.engines, backend.as_ref());
        Self::with_engines(backend, engines, config)
    }

    /// Scanner with an explicit engine list, polled in the given order.
    pub fn with_engines(
        backend: Arc<dyn CameraBackend>,
        engines: Vec<Arc<dyn DecoderEngine>>,
        config: ScannerConfig,
    ) -> Self {
        let gate = ResultGate::new(config.gate.cooldown());
        let registry = backend.sessions();
        Self {
            backend,
            engines,
            config,
            gate: Arc::new(Mutex::new(gate)),
            registry,
            current: Mutex::new(Weak::new()),
            scanning: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn probe(&self) -> ProbeReport {
        probe::probe(self.backend.as_ref())
    }

    pub fn list_cameras(&self) -> Vec<CameraDescriptor> {
        probe::list_cameras(self.backend.as_ref())
    }

    /// Number of camera sessions currently holding a stream, across every
    /// scanner sharing this backend.
    pub fn live_sessions(&self) -> usize {
        self.registry.live_sessions()
    }

    /// Forget the last accepted payload.
    pub fn reset_gate(&self) {
        lock_unpoisoned(&self.gate).reset();
    }

    /// Start a scan.
    ///
    /// Any scan already holding the camera, from this scanner or another one
    /// on the same backend, is stopped first. Exactly one of the callbacks
    /// runs, at most once, unless the scan is stopped.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn start<R, E>(&self, on_result: R, on_error: E) -> ScanHandle
    where
        R: FnOnce(ScanResult) + Send + 'static,
        E: FnOnce(ScanError) + Send + 'static,
    {
        self.stop_current();

        let shared = Arc::new(ScanShared {
            id: Uuid::new_v4(),
            slot: Mutex::new(ScanSlot {
                phase: ScanPhase::Acquiring,
                session: None,
                stop: None,
                on_result: Some(Box::new(on_result)),
                on_error: Some(Box::new(on_error)),
                delivered: false,
            }),
            live_sessions: self.registry.live_sessions.clone(),
        });
        *lock_unpoisoned(&self.current) = Arc::downgrade(&shared);
        self.registry.take_over(&shared);

        log::info!("[scan {}] Starting", shared.id);

        let driver = ScanDriver {
            shared: shared.clone(),
            backend: self.backend.clone(),
            engines: self.engines.clone(),
            config: self.config.clone(),
            gate: self.gate.clone(),
            acquire_lock: self.registry.acquire_lock.clone(),
        };
        tokio::spawn(driver.run());

        ScanHandle { shared }
    }

    /// Start a scan that reports only the decoded payload.
    ///
    /// Fatal errors are logged. The scan is owned by the scanner and ended by
    /// [`Scanner::stop_scanning`].
    pub fn start_scanning<F>(&self, on_code_detected: F)
    where
        F: FnOnce(String) + Send + 'static,
    {
        let handle = self.start(
            move |result| on_code_detected(result.payload),
            |error| log::error!("Scanning failed: {}", error),
        );
        let previous = lock_unpoisoned(&self.scanning).replace(handle);
        drop(previous);
    }

    pub fn stop_scanning(&self) {
        let handle = lock_unpoisoned(&self.scanning).take();
        if let Some(handle) = handle {
            handle.stop();
        }
        self.stop_current();
    }

    pub fn is_scanning(&self) -> bool {
        self.current_scan()
            .map(|scan| scan.phase() != ScanPhase::Finished)
            .unwrap_or(false)
    }

    /// Toggle the torch of the current scan's camera.
    pub fn toggle_torch(&self) -> TorchResult {
        match self.current_scan() {
            Some(scan) => scan.toggle_torch(),
            None => Err(TorchError::Inactive),
        }
    }

    fn current_scan(&self) -> Option<Arc<ScanShared>> {
        lock_unpoisoned(&self.current).upgrade()
    }

    fn stop_current(&self) {
        if let Some(scan) = self.current_scan() {
            if scan.stop() {
                log::debug!("[scan {}] Replaced by a new scan", scan.id);
            }
        }
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.stop_scanning();
    }
}

/// Deliver `result`, or take it back out of the gate if the scan ended
/// before it could be delivered.
fn deliver_or_retract(shared: &ScanShared, gate: &Mutex<ResultGate>, result: ScanResult) {
    if let Some(undelivered) = shared.deliver_result(result) {
        if lock_unpoisoned(gate).retract(&undelivered.payload, undelivered.accepted_at) {
            log::debug!(
                "[scan {}] Retracted undelivered {:?} from the gate",
                shared.id,
                undelivered.payload
            );
        }
    }
}

/// The spawned half of a scan.
struct ScanDriver {
    shared: Arc<ScanShared>,
    backend: Arc<dyn CameraBackend>,
    engines: Vec<Arc<dyn DecoderEngine>>,
    config: ScannerConfig,
    gate: Arc<Mutex<ResultGate>>,
    acquire_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ScanDriver {
    async fn run(self) {
        let id = self.shared.id;

        let report = probe::probe(self.backend.as_ref());
        let facing = self.config.camera.preferred_facing;
        let preference = match report.preferred(facing) {
            Some(camera) => CameraPreference::facing(facing).with_device(camera.id.clone()),
            None => CameraPreference::facing(facing),
        };

        let guard = self.acquire_lock.lock().await;
        if self.shared.phase() == ScanPhase::Finished {
            log::debug!("[scan {}] Stopped before acquisition", id);
            return;
        }

        assert_invariant!(
            self.shared.live_sessions.load(Ordering::SeqCst) == 0,
            SINGLE_LIVE_SESSION,
            "scanner"
        );

        let session = match CameraSession::acquire(
            self.backend.as_ref(),
            &preference,
            &self.config.camera,
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                drop(guard);
                self.shared.deliver_error(e);
                return;
            }
        };
        self.shared.live_sessions.fetch_add(1, Ordering::SeqCst);

        let Some(stream) = session.stream() else {
            self.shared.release(session);
            drop(guard);
            self.shared
                .deliver_error(ScanError::StreamEnded("stream closed during setup".to_string()));
            return;
        };

        let scheduler = DetectionScheduler::new(
            self.engines.clone(),
            self.gate.clone(),
            SchedulerConfig::from(&self.config.engines),
        );

        let started = {
            let mut slot = lock_unpoisoned(&self.shared.slot);
            if slot.phase == ScanPhase::Finished {
                Err(session)
            } else {
                match scheduler.start(stream.clone()) {
                    Ok(rx) => {
                        slot.session = Some(session);
                        slot.stop = Some(scheduler.stop_handle());
                        slot.phase = ScanPhase::Scanning;
                        Ok(Ok(rx))
                    }
                    Err(e) => Ok(Err((session, e))),
                }
            }
        };

        let mut rx = match started {
            Ok(Ok(rx)) => rx,
            Ok(Err((session, e))) => {
                self.shared.release(session);
                drop(guard);
                self.shared.deliver_error(e);
                return;
            }
            Err(session) => {
                log::debug!("[scan {}] Stopped during acquisition, releasing", id);
                self.shared.release(session);
                return;
            }
        };
        // The next acquisition may only begin once this session is either
        // owned by the slot or released.
        drop(guard);

        let period = self.config.session.liveness_interval();
        let mut liveness = interval_at(Instant::now() + period, period);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                outcome = &mut rx => {
                    match outcome {
                        Ok(result) => deliver_or_retract(&self.shared, &self.gate, result),
                        Err(_) => log::debug!("[scan {}] Scheduler stopped without a result", id),
                    }
                    break;
                }
                _ = liveness.tick() => {
                    if self.shared.phase() == ScanPhase::Finished {
                        break;
                    }
                    if !stream.is_live() {
                        self.shared.deliver_error(ScanError::StreamEnded(format!(
                            "{} stopped delivering",
                            stream.label()
                        )));
                        break;
                    }
                }
            }
        }

        scheduler.stop();
        scheduler.join().await;
        log::debug!("[scan {}] Driver finished", id);
    }
}
