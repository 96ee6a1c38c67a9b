//! In-memory stand-ins for the host platform and for decoder engines.

use super::synthetic_data::synthetic_frame;
use crate::engine::{DecoderEngine, FrameSource};
use crate::errors::{AcquireError, StreamError};
use crate::lock_unpoisoned;
use crate::permissions::PermissionStatus;
use crate::scanner::SessionRegistry;
use crate::platform::{
    select_device, CameraBackend, DetectedCode, MediaStream, PlatformDetector, StreamConstraints,
};
use crate::types::{DetectionOutcome, DeviceInfo, EngineKind, Frame, StreamCapabilities};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counters shared by a [`FakeBackend`] and every stream it hands out.
#[derive(Debug, Default)]
pub struct BackendStats {
    acquire_calls: AtomicUsize,
    acquires: AtomicUsize,
    stop_calls: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    requested: Mutex<Vec<StreamConstraints>>,
}

impl BackendStats {
    /// Calls to `acquire`, successful or not.
    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    /// Streams handed out.
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    /// Calls to `MediaStream::stop` across all streams.
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet stopped.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live streams seen.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Constraints of every acquire call, in order.
    pub fn requested(&self) -> Vec<StreamConstraints> {
        lock_unpoisoned(&self.requested).clone()
    }

    fn opened(&self) {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
    }
}

/// Scripted camera backend.
///
/// By default it enumerates a back and a front camera and every acquire
/// succeeds when the constraints can be met by the device list. Each fake is
/// its own host: scanners built on the same fake share its session registry.
pub struct FakeBackend {
    devices: Vec<DeviceInfo>,
    enumeration_failure: Option<String>,
    script: Mutex<VecDeque<Result<(), AcquireError>>>,
    acquire_delay: Duration,
    capabilities: StreamCapabilities,
    frames: bool,
    detector: Option<Arc<dyn PlatformDetector>>,
    permission: PermissionStatus,
    stats: Arc<BackendStats>,
    streams: Mutex<Vec<Arc<FakeStream>>>,
    sessions: Arc<SessionRegistry>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            devices: vec![
                DeviceInfo::new("0", "Back Camera"),
                DeviceInfo::new("1", "Front Camera"),
            ],
            enumeration_failure: None,
            script: Mutex::new(VecDeque::new()),
            acquire_delay: Duration::ZERO,
            capabilities: StreamCapabilities {
                torch: false,
                resolution: Some((1280, 720)),
                min_resolution: None,
                max_resolution: None,
            },
            frames: true,
            detector: None,
            permission: PermissionStatus::Granted,
            stats: Arc::new(BackendStats::default()),
            streams: Mutex::new(Vec::new()),
            sessions: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn with_devices(mut self, devices: Vec<DeviceInfo>) -> Self {
        self.devices = devices;
        self
    }

    /// Make enumeration and acquisition fail with a backend error.
    pub fn with_enumeration_failure(mut self, message: &str) -> Self {
        self.enumeration_failure = Some(message.to_string());
        self
    }

    /// Outcomes for the next acquire calls, one per call. `Ok(())` means
    /// "behave normally"; once the script runs out every call behaves
    /// normally.
    pub fn with_acquire_results(self, results: Vec<Result<(), AcquireError>>) -> Self {
        *lock_unpoisoned(&self.script) = results.into();
        self
    }

    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = delay;
        self
    }

    pub fn with_capabilities(mut self, capabilities: StreamCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Streams from this backend never produce a frame.
    pub fn without_frames(mut self) -> Self {
        self.frames = false;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn PlatformDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_permission(mut self, permission: PermissionStatus) -> Self {
        self.permission = permission;
        self
    }

    pub fn stats(&self) -> Arc<BackendStats> {
        self.stats.clone()
    }

    /// Every stream handed out so far, oldest first.
    pub fn streams(&self) -> Vec<Arc<FakeStream>> {
        lock_unpoisoned(&self.streams).clone()
    }

    pub fn last_stream(&self) -> Option<Arc<FakeStream>> {
        lock_unpoisoned(&self.streams).last().cloned()
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, AcquireError> {
        match &self.enumeration_failure {
            Some(message) => Err(AcquireError::Backend(message.clone())),
            None => Ok(self.devices.clone()),
        }
    }

    fn acquire<'a>(
        &'a self,
        constraints: &'a StreamConstraints,
    ) -> BoxFuture<'a, Result<Arc<dyn MediaStream>, AcquireError>> {
        Box::pin(async move {
            self.stats.acquire_calls.fetch_add(1, Ordering::SeqCst);
            lock_unpoisoned(&self.stats.requested).push(constraints.clone());

            if !self.acquire_delay.is_zero() {
                tokio::time::sleep(self.acquire_delay).await;
            }

            let scripted = lock_unpoisoned(&self.script).pop_front();
            if let Some(outcome) = scripted {
                outcome?;
            }

            let devices = self.enumerate()?;
            let device = select_device(&devices, constraints)?;

            let mut stream = FakeStream::new(device.label.clone())
                .with_capabilities(self.capabilities.clone())
                .with_stats(self.stats.clone());
            if !self.frames {
                stream = stream.without_frames();
            }
            let stream = Arc::new(stream);

            self.stats.opened();
            lock_unpoisoned(&self.streams).push(stream.clone());
            Ok(stream as Arc<dyn MediaStream>)
        })
    }

    fn native_detector(&self) -> Option<Arc<dyn PlatformDetector>> {
        self.detector.clone()
    }

    fn permission(&self) -> PermissionStatus {
        self.permission
    }

    fn sessions(&self) -> Arc<SessionRegistry> {
        self.sessions.clone()
    }
}

/// Stream that serves one synthetic frame until stopped.
pub struct FakeStream {
    label: String,
    capabilities: StreamCapabilities,
    frame: Mutex<Option<Arc<Frame>>>,
    stopped: AtomicBool,
    unplugged: AtomicBool,
    torch: AtomicBool,
    torch_calls: AtomicUsize,
    torch_failure: Option<String>,
    stats: Arc<BackendStats>,
}

impl FakeStream {
    pub fn new(label: impl Into<String>) -> Self {
        let stats = Arc::new(BackendStats::default());
        stats.opened();
        Self {
            label: label.into(),
            capabilities: StreamCapabilities::default(),
            frame: Mutex::new(Some(Arc::new(synthetic_frame(1, 64, 48)))),
            stopped: AtomicBool::new(false),
            unplugged: AtomicBool::new(false),
            torch: AtomicBool::new(false),
            torch_calls: AtomicUsize::new(0),
            torch_failure: None,
            stats,
        }
    }

    pub fn with_capabilities(mut self, capabilities: StreamCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_torch_failure(mut self, message: &str) -> Self {
        self.torch_failure = Some(message.to_string());
        self
    }

    pub fn without_frames(self) -> Self {
        *lock_unpoisoned(&self.frame) = None;
        self
    }

    fn with_stats(mut self, stats: Arc<BackendStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Replace the frame served by `latest_frame`.
    pub fn push_frame(&self, frame: Frame) {
        *lock_unpoisoned(&self.frame) = Some(Arc::new(frame));
    }

    /// Simulate the device disappearing; the stream stays unstopped.
    pub fn unplug(&self) {
        self.unplugged.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn torch_on(&self) -> bool {
        self.torch.load(Ordering::SeqCst)
    }

    /// Calls to `set_torch` that reached this stream.
    pub fn torch_calls(&self) -> usize {
        self.torch_calls.load(Ordering::SeqCst)
    }
}

impl MediaStream for FakeStream {
    fn label(&self) -> &str {
        &self.label
    }

    fn capabilities(&self) -> StreamCapabilities {
        self.capabilities.clone()
    }

    fn latest_frame(&self) -> Option<Arc<Frame>> {
        if !self.is_live() {
            return None;
        }
        lock_unpoisoned(&self.frame).clone()
    }

    fn set_torch(&self, on: bool) -> Result<(), StreamError> {
        self.torch_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_stopped() {
            return Err(StreamError::Stopped);
        }
        if let Some(message) = &self.torch_failure {
            return Err(StreamError::Control(message.clone()));
        }
        if !self.capabilities.torch {
            return Err(StreamError::Unsupported("no torch".to_string()));
        }
        self.torch.store(on, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stats.stop_calls.fetch_add(1, Ordering::SeqCst);
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stats.live.fetch_sub(1, Ordering::SeqCst);
            self.torch.store(false, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        !self.is_stopped() && !self.unplugged.load(Ordering::SeqCst)
    }
}

/// Platform detector returning a fixed answer.
pub struct FakeDetector {
    answer: Result<Vec<DetectedCode>, String>,
    calls: AtomicUsize,
}

impl FakeDetector {
    pub fn with_codes(codes: Vec<DetectedCode>) -> Self {
        Self {
            answer: Ok(codes),
            calls: AtomicUsize::new(0),
        }
    }

    /// Reports `payload` as a QR code on every frame.
    pub fn always(payload: &str) -> Self {
        Self::with_codes(vec![DetectedCode {
            raw_value: payload.to_string(),
            format: "qr_code".to_string(),
        }])
    }

    pub fn empty() -> Self {
        Self::with_codes(Vec::new())
    }

    pub fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PlatformDetector for FakeDetector {
    fn detect<'a>(&'a self, _frame: &'a Frame) -> BoxFuture<'a, Result<Vec<DetectedCode>, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answer.clone();
        Box::pin(async move { answer })
    }
}

/// One scripted attempt outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Miss,
    Hit(String),
    Fail(String),
    Panic(String),
}

impl Step {
    pub fn hit(payload: &str) -> Self {
        Step::Hit(payload.to_string())
    }

    pub fn fail(message: &str) -> Self {
        Step::Fail(message.to_string())
    }

    pub fn panic(message: &str) -> Self {
        Step::Panic(message.to_string())
    }
}

/// Engine that plays back a script of outcomes.
///
/// Each attempt takes `latency` of (tokio) time, then plays the next step of
/// the script; once the script is exhausted it plays the repeating step,
/// `Step::Miss` unless set otherwise.
pub struct ScriptedEngine {
    kind: EngineKind,
    cadence: Duration,
    latency: Duration,
    available: bool,
    script: Mutex<VecDeque<Step>>,
    repeat: Step,
    attempts: AtomicU64,
}

impl ScriptedEngine {
    pub fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            cadence: Duration::from_millis(100),
            latency: Duration::ZERO,
            available: true,
            script: Mutex::new(VecDeque::new()),
            repeat: Step::Miss,
            attempts: AtomicU64::new(0),
        }
    }

    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_script(self, steps: Vec<Step>) -> Self {
        *lock_unpoisoned(&self.script) = steps.into();
        self
    }

    pub fn repeating(mut self, step: Step) -> Self {
        self.repeat = step;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        lock_unpoisoned(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.repeat.clone())
    }
}

impl DecoderEngine for ScriptedEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    fn attempt<'a>(&'a self, _source: &'a FrameSource) -> BoxFuture<'a, DetectionOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            match self.next_step() {
                Step::Miss => DetectionOutcome::NoMatch,
                Step::Hit(payload) => DetectionOutcome::Match(payload),
                Step::Fail(message) => DetectionOutcome::TransientError(message),
                Step::Panic(message) => panic!("{}", message),
            }
        })
    }
}
