//! Detection scheduler
//!
//! Runs one cooperative polling loop per available engine against the live
//! stream. The first match that the result gate accepts wins the run: every
//! loop is signalled to stop and the result is handed to whoever holds the
//! receiver returned by [`DetectionScheduler::start`].
//!
//! A scheduler moves `Idle -> Running -> Stopped` exactly once. A new scan
//! builds a new scheduler.

use crate::config::EngineConfig;
use crate::engine::{DecoderEngine, FrameSource};
use crate::errors::ScanError;
use crate::gate::ResultGate;
use crate::invariants::SINGLE_WINNER;
use crate::platform::MediaStream;
use crate::types::{DetectionAttempt, DetectionOutcome, EngineKind, ScanResult, StrategyState};
use crate::{assert_invariant, lock_unpoisoned};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Lifecycle of one scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Supervision limits shared by every loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub overrun_factor: u32,
    pub max_consecutive_overruns: u32,
    pub max_backoff: Duration,
}

impl From<&EngineConfig> for SchedulerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            overrun_factor: config.overrun_factor,
            max_consecutive_overruns: config.max_consecutive_overruns,
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            overrun_factor: 4,
            max_consecutive_overruns: 5,
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Delay before the next attempt after `failures` faults in a row.
pub fn backoff_delay(cadence: Duration, failures: u32, max_backoff: Duration) -> Duration {
    if failures == 0 {
        return cadence;
    }
    let factor = 1u32 << failures.min(5);
    cadence.saturating_mul(factor).min(max_backoff.max(cadence))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "engine panicked".to_string()
    }
}

/// What a loop does after an attempt has been settled.
#[derive(Debug, PartialEq, Eq)]
enum Next {
    Sleep(Duration),
    Disabled,
    Won,
    Halt,
}

struct RunState {
    state: SchedulerState,
    winner: Option<oneshot::Sender<ScanResult>>,
    strategies: Vec<StrategyState>,
}

/// Shared by the loops; decides who wins.
///
/// The gate check and the win claim happen under the same lock, so a second
/// match can never slip in between them.
struct Arbiter {
    run: Mutex<RunState>,
    gate: Arc<Mutex<ResultGate>>,
    stop_tx: watch::Sender<bool>,
    config: SchedulerConfig,
}

impl Arbiter {
    fn state(&self) -> SchedulerState {
        lock_unpoisoned(&self.run).state
    }

    fn stop(&self) -> bool {
        let mut run = lock_unpoisoned(&self.run);
        if run.state == SchedulerState::Stopped {
            return false;
        }
        run.state = SchedulerState::Stopped;
        // Dropping the sender wakes the receiver with an error.
        run.winner = None;
        self.stop_tx.send_replace(true);
        true
    }

    fn settle(&self, attempt: DetectionAttempt, started: Instant, elapsed: Duration, cadence: Duration) -> Next {
        let mut run = lock_unpoisoned(&self.run);
        if run.state != SchedulerState::Running {
            return Next::Halt;
        }

        let kind = attempt.engine;
        let Some(index) = run.strategies.iter().position(|s| s.engine == kind) else {
            return Next::Halt;
        };

        {
            let strategy = &mut run.strategies[index];
            strategy.attempts += 1;
            strategy.last_attempt_at = Some(started);
        }

        let mut next = match attempt.outcome {
            DetectionOutcome::Match(payload) => {
                let now = Instant::now();
                let accepted = lock_unpoisoned(&self.gate).accept_at(&payload, kind, now);
                if accepted {
                    assert_invariant!(run.winner.is_some(), SINGLE_WINNER, "scheduler");
                    run.state = SchedulerState::Stopped;
                    self.stop_tx.send_replace(true);

                    let result = ScanResult::new(payload, kind, now)
                        .with_frame_sequence(attempt.frame_sequence);
                    log::info!(
                        "Engine {} won on frame {}",
                        kind,
                        attempt.frame_sequence
                    );
                    if let Some(winner) = run.winner.take() {
                        if winner.send(result).is_err() {
                            log::debug!("Result receiver gone before delivery");
                        }
                    }
                    return Next::Won;
                }
                run.strategies[index].consecutive_failures = 0;
                Next::Sleep(cadence)
            }
            DetectionOutcome::NoMatch => {
                let strategy = &mut run.strategies[index];
                strategy.misses += 1;
                strategy.consecutive_failures = 0;
                log::trace!("{} missed frame {}", kind, attempt.frame_sequence);
                Next::Sleep(cadence)
            }
            DetectionOutcome::TransientError(e) => {
                let strategy = &mut run.strategies[index];
                strategy.consecutive_failures += 1;
                log::debug!(
                    "{} attempt failed ({} in a row): {}",
                    kind,
                    strategy.consecutive_failures,
                    e
                );
                Next::Sleep(backoff_delay(
                    cadence,
                    strategy.consecutive_failures,
                    self.config.max_backoff,
                ))
            }
        };

        let strategy = &mut run.strategies[index];
        if elapsed > cadence.saturating_mul(self.config.overrun_factor) {
            strategy.consecutive_overruns += 1;
        } else {
            strategy.consecutive_overruns = 0;
        }
        if strategy.consecutive_overruns >= self.config.max_consecutive_overruns {
            strategy.enabled = false;
            log::warn!(
                "Disabling engine {}: {} attempts in a row took longer than {}ms",
                kind,
                strategy.consecutive_overruns,
                cadence.saturating_mul(self.config.overrun_factor).as_millis()
            );
            next = Next::Disabled;
        }

        next
    }
}

/// Cloneable handle that stops a scheduler from anywhere.
#[derive(Clone)]
pub struct StopHandle {
    arbiter: Arc<Arbiter>,
}

impl StopHandle {
    pub fn stop(&self) -> bool {
        self.arbiter.stop()
    }

    pub fn is_stopped(&self) -> bool {
        self.arbiter.state() == SchedulerState::Stopped
    }
}

pub struct DetectionScheduler {
    engines: Vec<Arc<dyn DecoderEngine>>,
    arbiter: Arc<Arbiter>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DetectionScheduler {
    pub fn new(
        engines: Vec<Arc<dyn DecoderEngine>>,
        gate: Arc<Mutex<ResultGate>>,
        config: SchedulerConfig,
    ) -> Self {
        let strategies = engines
            .iter()
            .map(|engine| StrategyState::new(engine.kind()))
            .collect();
        let (stop_tx, _) = watch::channel(false);

        Self {
            engines,
            arbiter: Arc::new(Arbiter {
                run: Mutex::new(RunState {
                    state: SchedulerState::Idle,
                    winner: None,
                    strategies,
                }),
                gate,
                stop_tx,
                config,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start one loop per available engine, in priority order.
    ///
    /// Must be called from within a tokio runtime. The receiver resolves with
    /// the winning result, or errors once the scheduler is stopped without one.
    pub fn start(
        &self,
        stream: Arc<dyn MediaStream>,
    ) -> Result<oneshot::Receiver<ScanResult>, ScanError> {
        let (tx, rx) = oneshot::channel();

        let active: Vec<Arc<dyn DecoderEngine>> = {
            let mut run = lock_unpoisoned(&self.arbiter.run);
            if run.state != SchedulerState::Idle {
                return Err(ScanError::InvalidState(format!(
                    "scheduler cannot start from {:?}",
                    run.state
                )));
            }
            run.state = SchedulerState::Running;
            run.winner = Some(tx);

            let mut active = Vec::new();
            for (engine, strategy) in self.engines.iter().zip(run.strategies.iter_mut()) {
                if engine.is_available() {
                    active.push(engine.clone());
                } else {
                    strategy.enabled = false;
                    log::info!("Engine {} unavailable, leaving it out", engine.kind());
                }
            }
            active
        };

        log::debug!(
            "Scheduler running with engines [{}]",
            active
                .iter()
                .map(|e| e.kind().as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut tasks = lock_unpoisoned(&self.tasks);
        for engine in active {
            let arbiter = self.arbiter.clone();
            let stream = stream.clone();
            let stop_rx = self.arbiter.stop_tx.subscribe();
            tasks.push(tokio::spawn(run_engine(engine, stream, arbiter, stop_rx)));
        }

        Ok(rx)
    }

    /// Stop scheduling. Attempts already running finish on their own and
    /// their results are discarded.
    pub fn stop(&self) -> bool {
        let stopped = self.arbiter.stop();
        if stopped {
            log::debug!("Scheduler stopped");
        }
        stopped
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            arbiter: self.arbiter.clone(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.arbiter.state()
    }

    pub fn strategies(&self) -> Vec<StrategyState> {
        lock_unpoisoned(&self.arbiter.run).strategies.clone()
    }

    /// Engines still polling, or eligible to poll before `start`.
    pub fn active_engines(&self) -> Vec<EngineKind> {
        self.strategies()
            .into_iter()
            .filter(|s| s.enabled)
            .map(|s| s.engine)
            .collect()
    }

    /// Wait for every loop to exit.
    pub async fn join(&self) {
        let tasks: Vec<JoinHandle<()>> = lock_unpoisoned(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                log::warn!("Engine loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for DetectionScheduler {
    fn drop(&mut self) {
        self.arbiter.stop();
    }
}

async fn run_engine(
    engine: Arc<dyn DecoderEngine>,
    stream: Arc<dyn MediaStream>,
    arbiter: Arc<Arbiter>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let kind = engine.kind();
    let cadence = engine.cadence();
    log::debug!("{} loop started ({}ms cadence)", kind, cadence.as_millis());

    loop {
        if *stop_rx.borrow_and_update() {
            break;
        }

        let delay = match stream.latest_frame() {
            None => cadence,
            Some(frame) => {
                let source = FrameSource::new(frame);
                let started = Instant::now();
                // Covers panics raised while building the attempt future too.
                let outcome = AssertUnwindSafe(async { engine.attempt(&source).await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        let msg = panic_message(panic.as_ref());
                        log::warn!("Engine {} panicked: {}", kind, msg);
                        DetectionOutcome::TransientError(msg)
                    });
                let elapsed = started.elapsed();

                if *stop_rx.borrow() {
                    if outcome.is_match() {
                        log::debug!("Discarding {} match that finished after stop", kind);
                    }
                    break;
                }

                let attempt = DetectionAttempt {
                    engine: kind,
                    frame_timestamp: source.captured_at(),
                    frame_sequence: source.sequence(),
                    outcome,
                };
                match arbiter.settle(attempt, started, elapsed, cadence) {
                    Next::Sleep(delay) => delay,
                    Next::Disabled | Next::Won | Next::Halt => break,
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    log::debug!("{} loop exited", kind);
}
