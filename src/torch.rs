use crate::errors::{StreamError, TorchError};
use crate::session::CameraSession;
use crate::types::TorchState;

/// Outcome of a torch request; `Err(TorchError::Unsupported)` is a normal answer.
pub type TorchResult = Result<TorchState, TorchError>;

/// Torch control for the stream owned by a camera session.
///
/// Capabilities are checked before the stream is touched, so a camera
/// without a torch never sees a constraint change.
pub struct TorchController;

impl TorchController {
    /// Whether the session's stream reports a torch.
    pub fn is_supported(session: &CameraSession) -> bool {
        session.is_active() && session.capabilities().torch
    }

    /// Flip the torch and return the new state.
    pub fn toggle(session: &mut CameraSession) -> TorchResult {
        let wanted = session.torch().toggled();
        Self::set(session, wanted)
    }

    pub fn set(session: &mut CameraSession, state: TorchState) -> TorchResult {
        let Some(stream) = session.stream() else {
            return Err(TorchError::Inactive);
        };

        if !session.capabilities().torch {
            log::debug!("Torch requested on {} which has none", stream.label());
            return Err(TorchError::Unsupported);
        }

        match stream.set_torch(state.is_on()) {
            Ok(()) => {
                session.set_torch_state(state);
                log::info!("Torch {:?} on {}", state, stream.label());
                Ok(state)
            }
            Err(StreamError::Unsupported(_)) => Err(TorchError::Unsupported),
            Err(StreamError::Stopped) => Err(TorchError::Inactive),
            Err(StreamError::Control(msg)) => Err(TorchError::Backend(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AcquisitionTier;
    use crate::testing::FakeStream;
    use crate::types::StreamCapabilities;
    use std::sync::Arc;

    fn torch_caps() -> StreamCapabilities {
        StreamCapabilities {
            torch: true,
            ..StreamCapabilities::default()
        }
    }

    #[test]
    fn test_toggle_on_and_off() {
        let stream = Arc::new(FakeStream::new("Back Camera").with_capabilities(torch_caps()));
        let mut session = CameraSession::from_stream(stream.clone(), AcquisitionTier::ExactFacing);

        assert!(TorchController::is_supported(&session));
        assert_eq!(TorchController::toggle(&mut session), Ok(TorchState::On));
        assert!(stream.torch_on());
        assert_eq!(TorchController::toggle(&mut session), Ok(TorchState::Off));
        assert!(!stream.torch_on());
        assert_eq!(stream.torch_calls(), 2);
    }

    #[test]
    fn test_unsupported_leaves_stream_alone() {
        let stream = Arc::new(FakeStream::new("Integrated Camera"));
        let mut session = CameraSession::from_stream(stream.clone(), AcquisitionTier::AnyCamera);

        assert_eq!(
            TorchController::toggle(&mut session),
            Err(TorchError::Unsupported)
        );
        assert_eq!(stream.torch_calls(), 0);
        assert_eq!(session.torch(), TorchState::Off);
        assert!(session.is_active());
    }

    #[test]
    fn test_released_session_is_inactive() {
        let stream = Arc::new(FakeStream::new("Back Camera").with_capabilities(torch_caps()));
        let mut session = CameraSession::from_stream(stream, AcquisitionTier::ExactFacing);
        session.release();
        assert_eq!(
            TorchController::toggle(&mut session),
            Err(TorchError::Inactive)
        );
    }

    #[test]
    fn test_backend_failure_keeps_state() {
        let stream = Arc::new(
            FakeStream::new("Back Camera")
                .with_capabilities(torch_caps())
                .with_torch_failure("constraint rejected"),
        );
        let mut session = CameraSession::from_stream(stream, AcquisitionTier::ExactFacing);
        assert_eq!(
            TorchController::toggle(&mut session),
            Err(TorchError::Backend("constraint rejected".to_string()))
        );
        assert_eq!(session.torch(), TorchState::Off);
    }
}
