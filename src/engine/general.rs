use super::snapshot::EnhancePreset;
use super::{DecoderEngine, FrameSource};
use crate::types::{DetectionOutcome, EngineKind};
use futures::future::BoxFuture;
#[cfg(feature = "general-purpose")]
use image::GrayImage;
use std::time::Duration;

/// Multi-format engine built on rxing.
///
/// Every attempt walks the preset list in order and stops at the first
/// preset that decodes. Between presets the task yields, so one expensive
/// attempt is several short slices of work rather than one long one.
pub struct GeneralPurposeEngine {
    presets: Vec<EnhancePreset>,
    max_dimension: u32,
    cadence: Duration,
}

impl GeneralPurposeEngine {
    pub fn new(presets: Vec<EnhancePreset>, max_dimension: u32, cadence: Duration) -> Self {
        Self {
            presets,
            max_dimension,
            cadence,
        }
    }

    pub fn presets(&self) -> &[EnhancePreset] {
        &self.presets
    }
}

#[cfg(feature = "general-purpose")]
fn decode(image: GrayImage) -> Option<String> {
    let (width, height) = image.dimensions();
    match rxing::helpers::detect_in_luma(image.into_raw(), width, height, None) {
        Ok(result) => Some(result.getText().to_string()),
        Err(e) => {
            log::trace!("rxing found nothing: {}", e);
            None
        }
    }
}

impl DecoderEngine for GeneralPurposeEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::GeneralPurpose
    }

    fn is_available(&self) -> bool {
        cfg!(feature = "general-purpose") && !self.presets.is_empty()
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    fn attempt<'a>(&'a self, source: &'a FrameSource) -> BoxFuture<'a, DetectionOutcome> {
        Box::pin(async move {
            #[cfg(feature = "general-purpose")]
            {
                for (index, preset) in self.presets.iter().enumerate() {
                    if index > 0 {
                        tokio::task::yield_now().await;
                    }

                    let Some(snapshot) = source.snapshot(preset, self.max_dimension) else {
                        return DetectionOutcome::TransientError(format!(
                            "frame {} has a malformed buffer",
                            source.sequence()
                        ));
                    };

                    if let Some(payload) = decode(snapshot).filter(|p| !p.is_empty()) {
                        log::trace!("Decoded with preset {}", preset.name);
                        return DetectionOutcome::Match(payload);
                    }
                }
                DetectionOutcome::NoMatch
            }

            #[cfg(not(feature = "general-purpose"))]
            {
                let _ = (source, self.max_dimension);
                DetectionOutcome::NoMatch
            }
        })
    }
}
