//! crabscan: live camera code detection
//!
//! This crate opens a camera, races several decoder engines against its live
//! frames and hands the first accepted payload to the caller, releasing the
//! camera on every exit path.
//!
//! # Features
//! - Camera acquisition with fallback tiers (exact facing, relaxed facing, any camera)
//! - Three decoder engines: platform-native, multi-format (rxing) and QR-only (rqrr)
//! - Race-to-first-success scheduling with per-engine cadence, backoff and overrun detection
//! - Duplicate suppression with a cooldown window
//! - Optional torch control
//!
//! # Usage
//! ```rust,ignore
//! use crabscan::{platform::native::NokhwaBackend, Scanner, ScannerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     crabscan::init_logging();
//!     let scanner = Scanner::new(Arc::new(NokhwaBackend::new()), ScannerConfig::default());
//!     let handle = scanner.start(
//!         |result| println!("{}", result.payload),
//!         |error| eprintln!("{}", error),
//!     );
//!     // ... later
//!     handle.stop();
//! }
//! ```
pub mod config;
pub mod engine;
pub mod errors;
pub mod gate;
pub mod invariants;
pub mod permissions;
pub mod platform;
pub mod probe;
pub mod scanner;
pub mod scheduler;
pub mod session;
pub mod torch;
pub mod types;

// Testing utilities - fakes and synthetic data for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::ScannerConfig;
pub use engine::{DecoderEngine, FrameSource};
pub use errors::{AcquireError, ScanError, StreamError, TorchError};
pub use gate::ResultGate;
pub use platform::{CameraBackend, MediaStream, PlatformDetector};
pub use scanner::{ScanHandle, ScanPhase, Scanner, SessionRegistry};
pub use session::{AcquisitionTier, CameraPreference, CameraSession};
pub use torch::{TorchController, TorchResult};
pub use types::{
    CameraDescriptor, DetectionOutcome, EngineKind, FacingMode, Frame, ScanResult, TorchState,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Initialize logging for the scanner
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabscan=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
