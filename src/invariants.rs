//! Runtime invariant checks with contract-test support
//!
//! Production code asserts its lifecycle invariants through
//! [`assert_invariant!`]; every check is counted per thread so tests can prove
//! that a scenario actually exercised the invariants it claims to cover.
//!
//! ```rust,ignore
//! use crabscan::invariants::*;
//!
//! assert_invariant!(
//!     live_sessions <= 1,
//!     "At most one camera session is live per scanner",
//!     "scanner"
//! );
//!
//! #[test]
//! fn contract_single_session() {
//!     // ... drive a scanner ...
//!     contract_test("single session", &["At most one camera session is live per scanner"]);
//! }
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::thread_local;

pub const SINGLE_LIVE_SESSION: &str = "At most one camera session is live per scanner";
pub const SINGLE_WINNER: &str = "A scheduler run has at most one winning result";
pub const SINGLE_DELIVERY: &str = "A scan delivers at most one outcome to the caller";
pub const RELEASED_BEFORE_DELIVERY: &str = "The camera is released before a result is delivered";

thread_local! {
    static INVARIANT_LOG: RefCell<HashMap<String, u64>> = RefCell::new(HashMap::new());
}

/// Assert an invariant and record that it was checked.
///
/// # Panics
/// Panics if the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariants::__assert_invariant_impl($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariants::__assert_invariant_impl($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __assert_invariant_impl(condition: bool, message: &str, context: Option<&str>) {
    INVARIANT_LOG.with(|log| {
        *log.borrow_mut().entry(message.to_string()).or_insert(0) += 1;
    });

    if !condition {
        let ctx = context.unwrap_or("unknown");
        log::error!("Invariant violated [{}]: {}", ctx, message);
        panic!("INVARIANT VIOLATION [{}]: {}", ctx, message);
    }
}

/// How many times `message` was checked on this thread since the last clear.
pub fn invariant_checks(message: &str) -> u64 {
    INVARIANT_LOG.with(|log| log.borrow().get(message).copied().unwrap_or(0))
}

/// Check that every listed invariant was verified on this thread.
///
/// # Panics
/// Panics naming the invariants that were never checked.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let missing: Vec<&str> = required_invariants
        .iter()
        .copied()
        .filter(|invariant| invariant_checks(invariant) == 0)
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: The following invariants were not checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

pub fn clear_invariant_log() {
    INVARIANT_LOG.with(|log| log.borrow_mut().clear());
}
