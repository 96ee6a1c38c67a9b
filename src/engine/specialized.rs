use super::snapshot::EnhancePreset;
use super::{DecoderEngine, FrameSource};
use crate::types::{DetectionOutcome, EngineKind};
use futures::future::BoxFuture;
#[cfg(feature = "specialized")]
use image::GrayImage;
use std::time::Duration;

/// QR-only engine built on rqrr.
pub struct SpecializedEngine {
    max_dimension: u32,
    cadence: Duration,
}

impl SpecializedEngine {
    pub fn new(max_dimension: u32, cadence: Duration) -> Self {
        Self {
            max_dimension,
            cadence,
        }
    }
}

#[cfg(feature = "specialized")]
fn decode_qr(image: &GrayImage) -> Option<String> {
    let (width, height) = image.dimensions();
    let mut prepared =
        rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
            image.get_pixel(x as u32, y as u32).0[0]
        });

    let grids = prepared.detect_grids();
    log::trace!("Found {} candidate QR grids", grids.len());

    for grid in grids {
        match grid.decode() {
            Ok((_, content)) if !content.is_empty() => return Some(content),
            Ok(_) => {}
            Err(e) => log::trace!("Grid decode failed: {:?}", e),
        }
    }
    None
}

impl DecoderEngine for SpecializedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Specialized
    }

    fn is_available(&self) -> bool {
        cfg!(feature = "specialized")
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    fn attempt<'a>(&'a self, source: &'a FrameSource) -> BoxFuture<'a, DetectionOutcome> {
        Box::pin(async move {
            #[cfg(feature = "specialized")]
            {
                let preset = EnhancePreset::standard();
                match source.snapshot(&preset, self.max_dimension) {
                    Some(snapshot) => decode_qr(&snapshot)
                        .map(DetectionOutcome::Match)
                        .unwrap_or(DetectionOutcome::NoMatch),
                    None => DetectionOutcome::TransientError(format!(
                        "frame {} has a malformed buffer",
                        source.sequence()
                    )),
                }
            }

            #[cfg(not(feature = "specialized"))]
            {
                let _ = (source, self.max_dimension, EnhancePreset::standard);
                DetectionOutcome::NoMatch
            }
        })
    }
}
