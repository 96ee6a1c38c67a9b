use super::{DecoderEngine, FrameSource};
use crate::platform::PlatformDetector;
use crate::types::{DetectionOutcome, EngineKind};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Engine backed by the platform's built-in detector.
///
/// Works on the live frame, so it skips the snapshot cost entirely.
pub struct NativeEngine {
    detector: Option<Arc<dyn PlatformDetector>>,
    cadence: Duration,
}

impl NativeEngine {
    pub fn new(detector: Option<Arc<dyn PlatformDetector>>, cadence: Duration) -> Self {
        Self { detector, cadence }
    }
}

impl DecoderEngine for NativeEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Native
    }

    fn is_available(&self) -> bool {
        self.detector.is_some()
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    fn attempt<'a>(&'a self, source: &'a FrameSource) -> BoxFuture<'a, DetectionOutcome> {
        Box::pin(async move {
            let Some(detector) = &self.detector else {
                return DetectionOutcome::NoMatch;
            };

            match detector.detect(source.live()).await {
                Ok(codes) => codes
                    .into_iter()
                    .find(|code| !code.raw_value.is_empty())
                    .map(|code| {
                        log::trace!("Native detector read a {} code", code.format);
                        DetectionOutcome::Match(code.raw_value)
                    })
                    .unwrap_or(DetectionOutcome::NoMatch),
                Err(e) => DetectionOutcome::TransientError(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::DetectedCode;
    use crate::testing::{synthetic_frame, FakeDetector};

    fn source() -> FrameSource {
        FrameSource::new(Arc::new(synthetic_frame(1, 8, 8)))
    }

    #[tokio::test]
    async fn test_first_non_empty_code_wins() {
        let detector = FakeDetector::with_codes(vec![
            DetectedCode {
                raw_value: String::new(),
                format: "ean_13".to_string(),
            },
            DetectedCode {
                raw_value: "4006381333931".to_string(),
                format: "ean_13".to_string(),
            },
        ]);
        let engine = NativeEngine::new(Some(Arc::new(detector)), Duration::from_millis(16));
        assert_eq!(
            engine.attempt(&source()).await,
            DetectionOutcome::Match("4006381333931".to_string())
        );
    }

    #[tokio::test]
    async fn test_detector_error_is_transient() {
        let engine = NativeEngine::new(
            Some(Arc::new(FakeDetector::failing("detector busy"))),
            Duration::from_millis(16),
        );
        assert_eq!(
            engine.attempt(&source()).await,
            DetectionOutcome::TransientError("detector busy".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_detector_is_unavailable() {
        let engine = NativeEngine::new(None, Duration::from_millis(16));
        assert!(!engine.is_available());
        assert_eq!(engine.attempt(&source()).await, DetectionOutcome::NoMatch);
    }
}
