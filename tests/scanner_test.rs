//! End-to-end scan scenarios against the in-memory backend.
//!
//! All tests run on a paused tokio clock, so the millisecond timings below
//! are exact.

#[cfg(test)]
mod scanner_tests {
    use crabscan::errors::{AcquireError, ScanError, TorchError};
    use crabscan::invariants::{
        clear_invariant_log, contract_test, RELEASED_BEFORE_DELIVERY, SINGLE_DELIVERY,
        SINGLE_LIVE_SESSION, SINGLE_WINNER,
    };
    use crabscan::platform::FacingConstraint;
    use crabscan::testing::{FakeBackend, FakeDetector, ScriptedEngine, Step};
    use crabscan::types::{EngineKind, FacingMode, StreamCapabilities, TorchState};
    use crabscan::{
        AcquisitionTier, DecoderEngine, MediaStream, ScanPhase, ScanResult, Scanner, ScannerConfig,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, Instant};

    type Results = mpsc::UnboundedReceiver<(ScanResult, Instant)>;
    type Errors = mpsc::UnboundedReceiver<ScanError>;

    fn scanner(backend: &Arc<FakeBackend>, engines: Vec<Arc<ScriptedEngine>>) -> Scanner {
        let engines = engines
            .into_iter()
            .map(|e| e as Arc<dyn DecoderEngine>)
            .collect();
        Scanner::with_engines(backend.clone(), engines, ScannerConfig::default())
    }

    fn start(scanner: &Scanner) -> (crabscan::ScanHandle, Results, Errors) {
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let handle = scanner.start(
            move |result| {
                let _ = result_tx.send((result, Instant::now()));
            },
            move |error| {
                let _ = error_tx.send(error);
            },
        );
        (handle, result_rx, error_rx)
    }

    fn hitting(kind: EngineKind, payload: &str) -> Arc<ScriptedEngine> {
        Arc::new(ScriptedEngine::new(kind).repeating(Step::hit(payload)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_code_from_two_engines_delivered_once() {
        let backend = Arc::new(FakeBackend::new());
        let specialized = hitting(EngineKind::Specialized, "ABC123");
        let general = Arc::new(
            ScriptedEngine::new(EngineKind::GeneralPurpose)
                .with_latency(Duration::from_millis(50))
                .repeating(Step::hit("ABC123")),
        );
        let scanner = scanner(&backend, vec![specialized, general]);

        let (handle, mut results, _errors) = start(&scanner);
        let (result, _) = results.recv().await.unwrap();
        assert_eq!(result.payload, "ABC123");
        assert_eq!(result.source_engine, EngineKind::Specialized);

        sleep(Duration::from_secs(2)).await;
        assert!(results.try_recv().is_err());
        assert!(!handle.is_active());
        assert_eq!(backend.stats().stop_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_attempt_in_flight() {
        let backend = Arc::new(FakeBackend::new());
        let general = Arc::new(
            ScriptedEngine::new(EngineKind::GeneralPurpose)
                .with_latency(Duration::from_millis(40))
                .repeating(Step::hit("LATE")),
        );
        let scanner = scanner(&backend, vec![general.clone()]);

        let (handle, mut results, mut errors) = start(&scanner);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.stats().live(), 1);

        assert!(handle.stop());
        // Released synchronously, before the attempt resolves at t=40ms.
        assert_eq!(backend.stats().live(), 0);
        assert_eq!(backend.stats().stop_calls(), 1);

        sleep(Duration::from_millis(100)).await;
        assert!(results.try_recv().is_err());
        assert!(errors.try_recv().is_err());
        assert_eq!(general.attempts(), 1);
        assert!(!handle.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_engines_holds_camera_until_stop() {
        let backend = Arc::new(FakeBackend::new());
        let scanner = scanner(&backend, Vec::new());

        let (handle, mut results, mut errors) = start(&scanner);
        sleep(Duration::from_secs(5)).await;

        assert_eq!(handle.phase(), ScanPhase::Scanning);
        assert_eq!(backend.stats().live(), 1);
        assert!(results.try_recv().is_err());
        assert!(errors.try_recv().is_err());

        handle.stop();
        assert_eq!(backend.stats().acquires(), 1);
        assert_eq!(backend.stats().stop_calls(), 1);
        assert_eq!(scanner.live_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_engine_does_not_block_healthy_one() {
        let backend = Arc::new(FakeBackend::new());
        let broken = Arc::new(
            ScriptedEngine::new(EngineKind::Native)
                .with_cadence(Duration::from_millis(16))
                .repeating(Step::panic("native detector crashed")),
        );
        let healthy = Arc::new(
            ScriptedEngine::new(EngineKind::Specialized)
                .with_script(vec![Step::Miss, Step::Miss, Step::fail("glare")])
                .repeating(Step::hit("QR-OK")),
        );
        let scanner = scanner(&backend, vec![broken.clone(), healthy]);

        let (_handle, mut results, _errors) = start(&scanner);
        let (result, _) = results.recv().await.unwrap();

        assert_eq!(result.payload, "QR-OK");
        assert_eq!(result.source_engine, EngineKind::Specialized);
        assert!(broken.attempts() > 1);
        assert_eq!(backend.stats().live(), 0);
        assert_eq!(backend.stats().stop_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tier_two_tried_once_before_tier_three() {
        let backend = Arc::new(FakeBackend::new().with_acquire_results(vec![
            Err(AcquireError::ConstraintUnsatisfiable("no exact match".to_string())),
            Err(AcquireError::Backend("device busy".to_string())),
        ]));
        let scanner = scanner(&backend, Vec::new());

        let (handle, _results, _errors) = start(&scanner);
        sleep(Duration::from_millis(50)).await;

        let requested = backend.stats().requested();
        assert_eq!(requested.len(), 3);
        assert_eq!(
            requested[0].facing,
            Some(FacingConstraint::Exact(FacingMode::Back))
        );
        assert_eq!(requested[0].device_id.as_deref(), Some("0"));
        assert_eq!(
            requested[1].facing,
            Some(FacingConstraint::Ideal(FacingMode::Back))
        );
        assert_eq!(requested[2].facing, None);
        assert_eq!(handle.tier(), Some(AcquisitionTier::AnyCamera));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tier_one_failure_lands_on_tier_two() {
        let backend = Arc::new(FakeBackend::new().with_acquire_results(vec![Err(
            AcquireError::ConstraintUnsatisfiable("resolution too high".to_string()),
        )]));
        let scanner = scanner(&backend, Vec::new());

        let (handle, _results, _errors) = start(&scanner);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(backend.stats().acquire_calls(), 2);
        assert_eq!(handle.tier(), Some(AcquisitionTier::RelaxedFacing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_is_fatal_and_not_retried() {
        let backend = Arc::new(FakeBackend::new().with_acquire_results(vec![Err(
            AcquireError::PermissionDenied("blocked by user".to_string()),
        )]));
        let scanner = scanner(&backend, vec![hitting(EngineKind::Specialized, "X")]);

        let (handle, mut results, mut errors) = start(&scanner);
        let error = errors.recv().await.unwrap();

        assert_eq!(error, ScanError::PermissionDenied("blocked by user".to_string()));
        assert!(error.is_fatal());
        assert_eq!(backend.stats().acquire_calls(), 1);
        assert_eq!(backend.stats().acquires(), 0);
        assert!(results.try_recv().is_err());
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_camera_available() {
        let backend = Arc::new(FakeBackend::new().with_devices(Vec::new()));
        let scanner = scanner(&backend, Vec::new());

        let (_handle, _results, mut errors) = start(&scanner);
        let error = errors.recv().await.unwrap();

        assert!(matches!(error, ScanError::NoCameraAvailable(_)));
        assert_eq!(backend.stats().acquire_calls(), 3);
        assert_eq!(backend.stats().stop_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_redelivered_after_cooldown() {
        let backend = Arc::new(FakeBackend::new());
        let scanner = scanner(&backend, vec![hitting(EngineKind::Specialized, "SKU-1")]);

        let (_first, mut results, _errors) = start(&scanner);
        let (_, first_at) = results.recv().await.unwrap();

        let (_second, mut results, _errors) = start(&scanner);
        let (result, second_at) = results.recv().await.unwrap();

        assert_eq!(result.payload, "SKU-1");
        assert!(second_at.duration_since(first_at) >= Duration::from_millis(1000));
        assert!(second_at.duration_since(first_at) < Duration::from_millis(1200));
        assert_eq!(backend.stats().acquires(), 2);
        assert_eq!(backend.stats().stop_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_loss_ends_scan() {
        let backend = Arc::new(FakeBackend::new());
        let scanner = scanner(&backend, vec![Arc::new(ScriptedEngine::new(EngineKind::Specialized))]);

        let (handle, _results, mut errors) = start(&scanner);
        sleep(Duration::from_millis(50)).await;
        backend.last_stream().unwrap().unplug();

        let error = errors.recv().await.unwrap();
        assert!(matches!(error, ScanError::StreamEnded(_)));
        assert!(!handle.is_active());
        assert_eq!(backend.stats().live(), 0);
        assert_eq!(backend.stats().stop_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_releases_camera() {
        let backend = Arc::new(FakeBackend::new());
        let scanner = scanner(&backend, Vec::new());

        let (handle, _results, _errors) = start(&scanner);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.stats().live(), 1);

        drop(handle);
        assert_eq!(backend.stats().live(), 0);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_acquisition_releases_late_stream() {
        let backend = Arc::new(FakeBackend::new().with_acquire_delay(Duration::from_millis(100)));
        let scanner = scanner(&backend, vec![hitting(EngineKind::Specialized, "X")]);

        let (handle, mut results, mut errors) = start(&scanner);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.phase(), ScanPhase::Acquiring);
        assert!(handle.stop());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(backend.stats().acquires(), 1);
        assert_eq!(backend.stats().stop_calls(), 1);
        assert_eq!(backend.stats().live(), 0);
        assert!(results.try_recv().is_err());
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_scan_waits_for_previous_acquisition() {
        let backend = Arc::new(FakeBackend::new().with_acquire_delay(Duration::from_millis(100)));
        let scanner = scanner(&backend, Vec::new());

        let (first, _r1, _e1) = start(&scanner);
        sleep(Duration::from_millis(10)).await;
        let (second, _r2, _e2) = start(&scanner);
        assert!(!first.is_active());

        sleep(Duration::from_millis(300)).await;
        assert_eq!(second.phase(), ScanPhase::Scanning);
        assert_eq!(backend.stats().max_live(), 1);
        assert_eq!(backend.stats().live(), 1);

        second.stop();
        assert_eq!(backend.stats().acquires(), 2);
        assert_eq!(backend.stats().stop_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_torch_unsupported_leaves_scan_running() {
        let backend = Arc::new(FakeBackend::new());
        let scanner = scanner(&backend, Vec::new());

        let (handle, _results, _errors) = start(&scanner);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.toggle_torch(), Err(TorchError::Unsupported));
        assert_eq!(scanner.toggle_torch(), Err(TorchError::Unsupported));
        let stream = backend.last_stream().unwrap();
        assert_eq!(stream.torch_calls(), 0);
        assert!(stream.is_live());
        assert_eq!(handle.phase(), ScanPhase::Scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_torch_state_not_carried_across_scans() {
        let backend = Arc::new(FakeBackend::new().with_capabilities(StreamCapabilities {
            torch: true,
            ..StreamCapabilities::default()
        }));
        let scanner = scanner(&backend, Vec::new());

        let (first, _r1, _e1) = start(&scanner);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(first.toggle_torch(), Ok(TorchState::On));
        assert!(backend.last_stream().unwrap().torch_on());

        let (second, _r2, _e2) = start(&scanner);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(second.torch(), TorchState::Off);
        assert!(!backend.last_stream().unwrap().torch_on());
        assert_eq!(scanner.toggle_torch(), Ok(TorchState::On));
        assert_eq!(first.toggle_torch(), Err(TorchError::Inactive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_engine_from_backend_detector() {
        let backend = Arc::new(
            FakeBackend::new().with_detector(Arc::new(FakeDetector::always("NATIVE-7"))),
        );
        let scanner = Scanner::new(backend.clone(), ScannerConfig::default());

        let (_handle, mut results, _errors) = start(&scanner);
        let (result, _) = results.recv().await.unwrap();
        assert_eq!(result.payload, "NATIVE-7");
        assert_eq!(result.source_engine, EngineKind::Native);
        assert_eq!(backend.stats().live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_scanning_delivers_payload() {
        let backend = Arc::new(FakeBackend::new());
        let scanner = scanner(&backend, vec![hitting(EngineKind::GeneralPurpose, "4006381333931")]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        scanner.start_scanning(move |payload| {
            let _ = tx.send(payload);
        });

        assert_eq!(rx.recv().await.unwrap(), "4006381333931");
        assert!(!scanner.is_scanning());
        scanner.stop_scanning();
        assert_eq!(backend.stats().stop_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_scanning_releases_camera() {
        let backend = Arc::new(FakeBackend::new());
        let scanner = scanner(&backend, Vec::new());

        scanner.start_scanning(|_| panic!("nothing to detect"));
        sleep(Duration::from_millis(50)).await;
        assert!(scanner.is_scanning());

        scanner.stop_scanning();
        assert!(!scanner.is_scanning());
        assert_eq!(backend.stats().live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_scan_checks_lifecycle_invariants() {
        clear_invariant_log();
        let backend = Arc::new(FakeBackend::new());
        let scanner = scanner(&backend, vec![hitting(EngineKind::Specialized, "ABC123")]);

        let (_handle, mut results, _errors) = start(&scanner);
        results.recv().await.unwrap();

        contract_test(
            "successful scan",
            &[
                SINGLE_LIVE_SESSION,
                SINGLE_WINNER,
                SINGLE_DELIVERY,
                RELEASED_BEFORE_DELIVERY,
            ],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_scanners_share_one_camera() {
        let backend = Arc::new(FakeBackend::new());
        let first_scanner = scanner(&backend, Vec::new());
        let second_scanner = scanner(&backend, Vec::new());

        let (first, _r1, mut first_errors) = start(&first_scanner);
        let (second, _r2, _e2) = start(&second_scanner);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(backend.stats().max_live(), 1);
        assert_eq!(backend.stats().live(), 1);
        assert!(!first.is_active());
        assert_eq!(second.phase(), ScanPhase::Scanning);
        assert!(first_errors.try_recv().is_err());
        assert_eq!(first_scanner.live_sessions(), 1);
        assert_eq!(second_scanner.live_sessions(), 1);

        second.stop();
        assert_eq!(backend.stats().acquires(), backend.stats().stop_calls());
        assert_eq!(first_scanner.live_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_scanner_preempts_running_scan() {
        let backend = Arc::new(FakeBackend::new().with_acquire_delay(Duration::from_millis(30)));
        let first_scanner = scanner(&backend, Vec::new());
        let second_scanner = scanner(&backend, Vec::new());

        let (first, _r1, _e1) = start(&first_scanner);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(first.phase(), ScanPhase::Scanning);

        let (second, _r2, _e2) = start(&second_scanner);
        assert!(!first.is_active());
        assert_eq!(backend.stats().live(), 0);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(second.phase(), ScanPhase::Scanning);
        assert_eq!(backend.stats().max_live(), 1);
        assert!(!first_scanner.is_scanning());
        assert!(second_scanner.is_scanning());
    }
}
