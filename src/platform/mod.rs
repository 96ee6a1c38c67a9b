//! Host platform seams
//!
//! Everything the pipeline consumes from the host lives behind these traits:
//! device enumeration and stream acquisition ([`CameraBackend`]), the open
//! stream itself ([`MediaStream`]) and the platform's built-in code detector
//! ([`PlatformDetector`]), which most hosts do not have.

#[cfg(feature = "native")]
pub mod native;

use crate::errors::{AcquireError, StreamError};
use crate::permissions::PermissionStatus;
use crate::scanner::SessionRegistry;
use crate::types::{DeviceInfo, FacingMode, Frame, StreamCapabilities};
use futures::future::BoxFuture;
use std::sync::Arc;

/// How strictly a facing mode is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingConstraint {
    /// Fail unless the camera has this facing.
    Exact(FacingMode),
    /// Prefer this facing but accept any camera.
    Ideal(FacingMode),
}

/// Constraint object handed to [`CameraBackend::acquire`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConstraints {
    pub facing: Option<FacingConstraint>,
    /// Exact device to open, when the probe picked one.
    pub device_id: Option<String>,
    pub ideal_resolution: Option<(u32, u32)>,
    pub min_resolution: Option<(u32, u32)>,
}

impl StreamConstraints {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_facing(mut self, facing: FacingConstraint) -> Self {
        self.facing = Some(facing);
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_ideal_resolution(mut self, width: u32, height: u32) -> Self {
        self.ideal_resolution = Some((width, height));
        self
    }

    pub fn with_min_resolution(mut self, width: u32, height: u32) -> Self {
        self.min_resolution = Some((width, height));
        self
    }
}

/// Camera access provided by the host.
pub trait CameraBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Enumerate video input devices.
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, AcquireError>;

    /// Open a stream satisfying `constraints`, or reject with a typed failure.
    fn acquire<'a>(
        &'a self,
        constraints: &'a StreamConstraints,
    ) -> BoxFuture<'a, Result<Arc<dyn MediaStream>, AcquireError>>;

    /// The platform's built-in multi-format detector, if it has one.
    fn native_detector(&self) -> Option<Arc<dyn PlatformDetector>> {
        None
    }

    fn permission(&self) -> PermissionStatus {
        PermissionStatus::NotDetermined
    }

    /// Session bookkeeping for the cameras this backend controls.
    ///
    /// Every call must return the same registry for the same host; scanners
    /// rely on it to keep a single stream live.
    fn sessions(&self) -> Arc<SessionRegistry>;
}

/// An open camera stream.
///
/// `stop` must stop every underlying track; it may be called more than once
/// but the camera session only ever calls it once.
pub trait MediaStream: Send + Sync {
    fn label(&self) -> &str;

    fn capabilities(&self) -> StreamCapabilities;

    /// Most recent frame, or `None` before the first frame has arrived.
    fn latest_frame(&self) -> Option<Arc<Frame>>;

    fn set_torch(&self, on: bool) -> Result<(), StreamError>;

    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// Pick the device a backend should open for `constraints`.
///
/// Facing is taken from explicit metadata, else guessed from the label.
pub fn select_device<'a>(
    devices: &'a [DeviceInfo],
    constraints: &StreamConstraints,
) -> Result<&'a DeviceInfo, AcquireError> {
    if devices.is_empty() {
        return Err(AcquireError::NotFound("no video input devices".to_string()));
    }

    let candidates: Vec<&DeviceInfo> = match &constraints.device_id {
        Some(id) => {
            let device = devices
                .iter()
                .find(|d| &d.id == id)
                .ok_or_else(|| AcquireError::NotFound(format!("device {} not present", id)))?;
            vec![device]
        }
        None => devices.iter().collect(),
    };

    let facing_of = |d: &DeviceInfo| d.facing.unwrap_or_else(|| crate::probe::guess_facing(&d.label));

    match constraints.facing {
        Some(FacingConstraint::Exact(wanted)) => candidates
            .into_iter()
            .find(|d| facing_of(d) == wanted)
            .ok_or_else(|| {
                AcquireError::ConstraintUnsatisfiable(format!("no {} facing camera", wanted))
            }),
        Some(FacingConstraint::Ideal(wanted)) => Ok(candidates
            .iter()
            .copied()
            .find(|d| facing_of(d) == wanted)
            .unwrap_or(candidates[0])),
        None => Ok(candidates[0]),
    }
}

/// A code found by a platform detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedCode {
    pub raw_value: String,
    pub format: String,
}

/// Built-in detector working directly on live frames.
pub trait PlatformDetector: Send + Sync {
    fn detect<'a>(&'a self, frame: &'a Frame) -> BoxFuture<'a, Result<Vec<DetectedCode>, String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_builder() {
        let constraints = StreamConstraints::any()
            .with_facing(FacingConstraint::Exact(FacingMode::Back))
            .with_device("cam-1")
            .with_ideal_resolution(1920, 1080)
            .with_min_resolution(1280, 720);

        assert_eq!(
            constraints.facing,
            Some(FacingConstraint::Exact(FacingMode::Back))
        );
        assert_eq!(constraints.device_id.as_deref(), Some("cam-1"));
        assert_eq!(constraints.ideal_resolution, Some((1920, 1080)));
        assert_eq!(constraints.min_resolution, Some((1280, 720)));
        assert_eq!(StreamConstraints::any(), StreamConstraints::default());
    }

    fn devices() -> Vec<DeviceInfo> {
        vec![
            DeviceInfo::new("0", "Integrated Camera"),
            DeviceInfo::new("1", "USB Rear Camera"),
            DeviceInfo::new("2", "Capture Card").with_facing(FacingMode::Back),
        ]
    }

    #[test]
    fn test_select_exact_facing() {
        let devices = devices();
        let exact = StreamConstraints::any().with_facing(FacingConstraint::Exact(FacingMode::Back));
        assert_eq!(select_device(&devices, &exact).unwrap().id, "1");

        let only_front = vec![DeviceInfo::new("0", "FaceTime HD Camera")];
        assert!(matches!(
            select_device(&only_front, &exact),
            Err(AcquireError::ConstraintUnsatisfiable(_))
        ));
    }

    #[test]
    fn test_select_ideal_facing_falls_back_to_first() {
        let only_front = vec![DeviceInfo::new("0", "FaceTime HD Camera")];
        let ideal = StreamConstraints::any().with_facing(FacingConstraint::Ideal(FacingMode::Back));
        assert_eq!(select_device(&only_front, &ideal).unwrap().id, "0");
    }

    #[test]
    fn test_select_by_device_id() {
        let devices = devices();
        let by_id = StreamConstraints::any()
            .with_device("2")
            .with_facing(FacingConstraint::Exact(FacingMode::Back));
        assert_eq!(select_device(&devices, &by_id).unwrap().id, "2");

        let missing = StreamConstraints::any().with_device("9");
        assert!(matches!(
            select_device(&devices, &missing),
            Err(AcquireError::NotFound(_))
        ));
        assert!(matches!(
            select_device(&[], &StreamConstraints::any()),
            Err(AcquireError::NotFound(_))
        ));
    }
}
