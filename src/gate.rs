use crate::types::EngineKind;
use std::time::Duration;
use tokio::time::Instant;

/// Suppresses repeated deliveries of the same payload within a cooldown window.
///
/// Several engines can decode the same physical code from the same few
/// frames; the gate makes sure the caller only hears about it once. The
/// window is time bounded, so the same code shown again later is delivered
/// again.
#[derive(Debug, Clone)]
pub struct ResultGate {
    cooldown: Duration,
    last: Option<(String, Instant)>,
    previous: Option<(String, Instant)>,
}

impl ResultGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
            previous: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn accept(&mut self, payload: &str, engine: EngineKind) -> bool {
        self.accept_at(payload, engine, Instant::now())
    }

    /// `accept` with an explicit clock reading.
    pub fn accept_at(&mut self, payload: &str, engine: EngineKind, now: Instant) -> bool {
        if let Some((last_payload, last_accepted_at)) = &self.last {
            let elapsed = now.saturating_duration_since(*last_accepted_at);
            if last_payload == payload && elapsed < self.cooldown {
                log::debug!(
                    "Suppressed duplicate from {} ({}ms into cooldown)",
                    engine,
                    elapsed.as_millis()
                );
                return false;
            }
        }

        self.previous = self.last.replace((payload.to_string(), now));
        true
    }

    /// Take back the acceptance of `payload` made at `accepted_at`.
    ///
    /// Used when an accepted result was never delivered. Only the most recent
    /// acceptance can be retracted; the one before it is restored.
    pub fn retract(&mut self, payload: &str, accepted_at: Instant) -> bool {
        match &self.last {
            Some((last, at)) if last == payload && *at == accepted_at => {
                self.last = self.previous.take();
                true
            }
            _ => false,
        }
    }

    pub fn last_payload(&self) -> Option<&str> {
        self.last.as_ref().map(|(payload, _)| payload.as_str())
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.previous = None;
    }
}

impl Default for ResultGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_within_cooldown_rejected() {
        let mut gate = ResultGate::default();
        let t0 = Instant::now();
        assert!(gate.accept_at("ABC123", EngineKind::Specialized, t0));
        assert!(!gate.accept_at(
            "ABC123",
            EngineKind::GeneralPurpose,
            t0 + Duration::from_millis(50)
        ));
        assert_eq!(gate.last_payload(), Some("ABC123"));
    }

    #[test]
    fn test_duplicate_after_cooldown_accepted() {
        let mut gate = ResultGate::new(Duration::from_millis(1000));
        let t0 = Instant::now();
        assert!(gate.accept_at("X", EngineKind::Native, t0));
        assert!(!gate.accept_at("X", EngineKind::Native, t0 + Duration::from_millis(999)));
        assert!(gate.accept_at("X", EngineKind::Native, t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn test_different_payload_always_accepted() {
        let mut gate = ResultGate::default();
        let t0 = Instant::now();
        assert!(gate.accept_at("A", EngineKind::Native, t0));
        assert!(gate.accept_at("B", EngineKind::Native, t0));
        // The window follows the most recent acceptance, so "A" is new again.
        assert!(gate.accept_at("A", EngineKind::Native, t0));
    }

    #[test]
    fn test_rejection_does_not_extend_window() {
        let mut gate = ResultGate::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(gate.accept_at("X", EngineKind::Native, t0));
        assert!(!gate.accept_at("X", EngineKind::Native, t0 + Duration::from_millis(90)));
        assert!(gate.accept_at("X", EngineKind::Native, t0 + Duration::from_millis(100)));
    }

    #[test]
    fn test_reset() {
        let mut gate = ResultGate::default();
        let t0 = Instant::now();
        assert!(gate.accept_at("X", EngineKind::Native, t0));
        gate.reset();
        assert!(gate.accept_at("X", EngineKind::Native, t0));
    }

    #[test]
    fn test_retract_reopens_payload() {
        let mut gate = ResultGate::new(Duration::from_millis(1000));
        let t0 = Instant::now();
        assert!(gate.accept_at("A", EngineKind::Native, t0));
        let t1 = t0 + Duration::from_millis(10);
        assert!(gate.accept_at("B", EngineKind::Specialized, t1));

        assert!(gate.retract("B", t1));
        assert_eq!(gate.last_payload(), Some("A"));
        assert!(gate.accept_at("B", EngineKind::Specialized, t1 + Duration::from_millis(5)));
        assert!(!gate.accept_at("B", EngineKind::Specialized, t1 + Duration::from_millis(6)));
    }

    #[test]
    fn test_retract_ignores_stale_acceptance() {
        let mut gate = ResultGate::default();
        let t0 = Instant::now();
        assert!(gate.accept_at("A", EngineKind::Native, t0));
        assert!(!gate.retract("A", t0 + Duration::from_millis(1)));
        assert!(!gate.retract("B", t0));
        assert_eq!(gate.last_payload(), Some("A"));
    }
}
