//! Decoder engines
//!
//! Each engine tries to pull a payload string out of one frame. The three
//! variants trade cost against format coverage:
//!
//! - [`NativeEngine`] hands the live frame to the platform's own detector
//! - [`GeneralPurposeEngine`] renders snapshots through a preset list and
//!   decodes 1D and 2D formats
//! - [`SpecializedEngine`] decodes QR codes only
//!
//! A miss is the normal outcome of an attempt and is never reported as an
//! error. Availability is decided once, when the scheduler starts.

pub mod general;
pub mod native;
pub mod snapshot;
pub mod specialized;

pub use general::GeneralPurposeEngine;
pub use native::NativeEngine;
pub use snapshot::EnhancePreset;
pub use specialized::SpecializedEngine;

use crate::config::EngineConfig;
use crate::platform::CameraBackend;
use crate::types::{DetectionOutcome, EngineKind, Frame};
use futures::future::BoxFuture;
use image::GrayImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A decoding strategy polled by the scheduler.
pub trait DecoderEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Whether the engine can run on this host at all.
    fn is_available(&self) -> bool;

    /// Delay between two attempts.
    fn cadence(&self) -> Duration;

    /// Try to decode one frame.
    ///
    /// Implementations must return to the executor between bounded units of
    /// work so they never starve the other engines.
    fn attempt<'a>(&'a self, source: &'a FrameSource) -> BoxFuture<'a, DetectionOutcome>;
}

/// The frame an attempt works on.
#[derive(Debug, Clone)]
pub struct FrameSource {
    frame: Arc<Frame>,
}

impl FrameSource {
    pub fn new(frame: Arc<Frame>) -> Self {
        Self { frame }
    }

    /// The live frame, shared without copying.
    pub fn live(&self) -> &Frame {
        &self.frame
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.frame.captured_at
    }

    /// Render a still copy through `preset`.
    pub fn snapshot(&self, preset: &EnhancePreset, max_dimension: u32) -> Option<GrayImage> {
        snapshot::render(&self.frame, preset, max_dimension)
    }
}

/// Build the engines named in `config.order`, in that order.
///
/// Engines that cannot run here are still returned; the scheduler leaves them
/// out of its active set.
pub fn build_engines(config: &EngineConfig, backend: &dyn CameraBackend) -> Vec<Arc<dyn DecoderEngine>> {
    config
        .order
        .iter()
        .map(|kind| -> Arc<dyn DecoderEngine> {
            let cadence = config.cadence(*kind);
            match kind {
                EngineKind::Native => Arc::new(NativeEngine::new(backend.native_detector(), cadence)),
                EngineKind::GeneralPurpose => Arc::new(GeneralPurposeEngine::new(
                    config.presets.clone(),
                    config.max_dimension,
                    cadence,
                )),
                EngineKind::Specialized => {
                    Arc::new(SpecializedEngine::new(config.max_dimension, cadence))
                }
            }
        })
        .collect()
}
