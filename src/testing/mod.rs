//! Testing utilities for crabscan
//!
//! Fakes for the host platform and for decoder engines, plus synthetic frames
//! and device lists, so the whole pipeline can be exercised without a camera.

pub mod fakes;
pub mod synthetic_data;

pub use fakes::{BackendStats, FakeBackend, FakeDetector, FakeStream, ScriptedEngine, Step};
pub use synthetic_data::{desktop_devices, laptop_devices, phone_devices, synthetic_frame};
#[cfg(feature = "general-purpose")]
pub use synthetic_data::encoded_frame;
