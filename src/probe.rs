//! Capability probe
//!
//! Read-only inspection of the host: which cameras exist, which way they
//! probably face, and whether camera access is permitted. Nothing here opens
//! a stream, and nothing here fails; an empty camera list is a valid answer.

use crate::permissions::PermissionStatus;
use crate::platform::CameraBackend;
use crate::types::{CameraDescriptor, DeviceInfo, FacingMode};

const BACK_HINTS: [&str; 4] = ["back", "rear", "environment", "world"];
const FRONT_HINTS: [&str; 5] = ["front", "user", "facetime", "selfie", "integrated"];

/// What the probe found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub cameras: Vec<CameraDescriptor>,
    pub permission: PermissionStatus,
}

impl ProbeReport {
    /// First camera tagged with `facing`.
    pub fn preferred(&self, facing: FacingMode) -> Option<&CameraDescriptor> {
        self.cameras.iter().find(|camera| camera.facing == facing)
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

/// Guess the facing mode of a camera from its label.
pub fn guess_facing(label: &str) -> FacingMode {
    let label = label.to_lowercase();
    if BACK_HINTS.iter().any(|hint| label.contains(hint)) {
        FacingMode::Back
    } else if FRONT_HINTS.iter().any(|hint| label.contains(hint)) {
        FacingMode::Front
    } else {
        FacingMode::Unknown
    }
}

pub fn describe(device: &DeviceInfo) -> CameraDescriptor {
    CameraDescriptor {
        id: device.id.clone(),
        label: device.label.clone(),
        facing: device.facing.unwrap_or_else(|| guess_facing(&device.label)),
    }
}

/// List cameras in enumeration order, each tagged with a facing mode.
pub fn list_cameras(backend: &dyn CameraBackend) -> Vec<CameraDescriptor> {
    match backend.enumerate() {
        Ok(devices) => devices.iter().map(describe).collect(),
        Err(e) => {
            log::warn!("Camera enumeration on {} failed: {}", backend.name(), e);
            Vec::new()
        }
    }
}

pub fn probe(backend: &dyn CameraBackend) -> ProbeReport {
    let cameras = list_cameras(backend);
    let permission = backend.permission();
    log::debug!(
        "Probe on {}: {} camera(s), permission {}",
        backend.name(),
        cameras.len(),
        permission
    );
    ProbeReport {
        cameras,
        permission,
    }
}
