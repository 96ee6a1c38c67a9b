//! Camera session
//!
//! A [`CameraSession`] is the sole owner of one open media stream. It is
//! created by [`CameraSession::acquire`], which walks the acquisition tiers,
//! and ends with [`CameraSession::release`] or when it is dropped. Release is
//! idempotent: the underlying tracks are stopped exactly once no matter how
//! many exit paths reach it.

use crate::config::CameraConfig;
use crate::errors::{AcquireError, ScanError};
use crate::platform::{CameraBackend, FacingConstraint, MediaStream, StreamConstraints};
use crate::types::{FacingMode, StreamCapabilities, TorchState};
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

/// Acquisition attempts, strictest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum AcquisitionTier {
    /// Exact facing constraint with a minimum resolution.
    ExactFacing,
    /// Facing as a preference only.
    RelaxedFacing,
    /// Whatever camera the host hands out.
    AnyCamera,
}

impl AcquisitionTier {
    pub const ORDER: [AcquisitionTier; 3] = [
        AcquisitionTier::ExactFacing,
        AcquisitionTier::RelaxedFacing,
        AcquisitionTier::AnyCamera,
    ];

    /// Constraint object for this tier.
    pub fn constraints(&self, preference: &CameraPreference, config: &CameraConfig) -> StreamConstraints {
        let [ideal_w, ideal_h] = config.ideal_resolution;
        match self {
            AcquisitionTier::ExactFacing => {
                let mut constraints = StreamConstraints::any()
                    .with_facing(FacingConstraint::Exact(preference.facing))
                    .with_ideal_resolution(ideal_w, ideal_h)
                    .with_min_resolution(config.min_resolution[0], config.min_resolution[1]);
                if let Some(device_id) = &preference.device_id {
                    constraints = constraints.with_device(device_id.clone());
                }
                constraints
            }
            AcquisitionTier::RelaxedFacing => StreamConstraints::any()
                .with_facing(FacingConstraint::Ideal(preference.facing))
                .with_ideal_resolution(ideal_w, ideal_h),
            AcquisitionTier::AnyCamera => StreamConstraints::any().with_ideal_resolution(
                config.fallback_resolution[0],
                config.fallback_resolution[1],
            ),
        }
    }
}

/// Which camera the caller would like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraPreference {
    pub facing: FacingMode,
    /// Device the probe matched to `facing`, if any.
    pub device_id: Option<String>,
}

impl CameraPreference {
    pub fn facing(facing: FacingMode) -> Self {
        Self {
            facing,
            device_id: None,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

impl Default for CameraPreference {
    fn default() -> Self {
        Self::facing(FacingMode::Back)
    }
}

pub struct CameraSession {
    id: Uuid,
    stream: Option<Arc<dyn MediaStream>>,
    capabilities: StreamCapabilities,
    tier: AcquisitionTier,
    torch: TorchState,
    acquired_at: Instant,
}

impl std::fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSession")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("tier", &self.tier)
            .field("torch", &self.torch)
            .finish()
    }
}

impl CameraSession {
    /// Open a stream, trying each tier only after the previous one failed.
    ///
    /// A permission denial ends the walk immediately; every other failure
    /// moves on to the next tier. Running out of tiers is `NoCameraAvailable`.
    pub async fn acquire(
        backend: &dyn CameraBackend,
        preference: &CameraPreference,
        config: &CameraConfig,
    ) -> Result<Self, ScanError> {
        let mut failures: Vec<String> = Vec::new();

        for tier in AcquisitionTier::ORDER {
            let constraints = tier.constraints(preference, config);
            log::debug!("Acquiring camera via {:?} on {}", tier, backend.name());

            match backend.acquire(&constraints).await {
                Ok(stream) => {
                    let session = Self::from_stream(stream, tier);
                    log::info!(
                        "Camera session {} acquired via {:?} ({})",
                        session.id,
                        tier,
                        session.label()
                    );
                    return Ok(session);
                }
                Err(AcquireError::PermissionDenied(msg)) => {
                    log::warn!("Camera permission denied during {:?}: {}", tier, msg);
                    return Err(ScanError::PermissionDenied(msg));
                }
                Err(e) => {
                    log::debug!("Tier {:?} failed: {}", tier, e);
                    failures.push(format!("{:?}: {}", tier, e));
                }
            }
        }

        Err(ScanError::NoCameraAvailable(failures.join("; ")))
    }

    /// Wrap an already-open stream.
    pub fn from_stream(stream: Arc<dyn MediaStream>, tier: AcquisitionTier) -> Self {
        let capabilities = stream.capabilities();
        Self {
            id: Uuid::new_v4(),
            stream: Some(stream),
            capabilities,
            tier,
            torch: TorchState::Off,
            acquired_at: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tier(&self) -> AcquisitionTier {
        self.tier
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    pub fn label(&self) -> &str {
        self.stream.as_deref().map(|s| s.label()).unwrap_or("")
    }

    /// Shared handle to the stream for frame readers.
    pub fn stream(&self) -> Option<Arc<dyn MediaStream>> {
        self.stream.clone()
    }

    /// Live capability set; empty once released.
    pub fn capabilities(&self) -> StreamCapabilities {
        match &self.stream {
            Some(stream) => stream.capabilities(),
            None => StreamCapabilities::default(),
        }
    }

    /// Capabilities as reported when the stream was opened.
    pub fn initial_capabilities(&self) -> &StreamCapabilities {
        &self.capabilities
    }

    pub fn torch(&self) -> TorchState {
        self.torch
    }

    pub(crate) fn set_torch_state(&mut self, state: TorchState) {
        self.torch = state;
    }

    /// Stop every track and drop the handle.
    ///
    /// Returns `true` only for the call that actually stopped the stream.
    pub fn release(&mut self) -> bool {
        match self.stream.take() {
            Some(stream) => {
                stream.stop();
                self.torch = TorchState::Off;
                log::info!(
                    "Camera session {} released after {}ms",
                    self.id,
                    self.acquired_at.elapsed().as_millis()
                );
                true
            }
            None => false,
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.release();
    }
}
