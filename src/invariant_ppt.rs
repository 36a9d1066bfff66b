//! Runtime contract checks for the encoder/muxer handshake
//!
//! The drain engine and the frame muxer share a small set of ordering
//! contracts (format-ready fires once, nothing is written before the muxer
//! starts, the muxer starts once). Breaking one means the pipeline is
//! desynchronised, so a violation panics instead of returning an error.
//!
//! Every check is recorded in a thread-local log so tests can prove that a
//! code path actually exercised the contract it claims to guard.
//!
//! ```rust,ignore
//! use framereel::assert_invariant;
//!
//! assert_invariant!(
//!     !muxer.is_started(),
//!     "Encoder output format must change only once",
//!     "VideoEncoder::drain"
//! );
//!
//! // In a test, after driving the pipeline:
//! framereel::invariant_ppt::contract_test("format handshake", &[
//!     "Encoder output format must change only once",
//! ]);
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::thread_local;

thread_local! {
    static CHECKED_INVARIANTS: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Assert a pipeline contract and record that it was checked.
///
/// # Panics
/// Panics with `INVARIANT VIOLATION [context]: message` if the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __assert_invariant_impl(condition: bool, message: &str, context: Option<&str>) {
    CHECKED_INVARIANTS.with(|log| {
        log.borrow_mut().insert(message.to_string());
    });

    if !condition {
        let ctx = context.unwrap_or("pipeline");
        log::error!("Contract violated in {}: {}", ctx, message);
        panic!("INVARIANT VIOLATION [{}]: {}", ctx, message);
    }
}

/// Whether the given invariant has been checked on this thread.
pub fn invariant_checked(message: &str) -> bool {
    CHECKED_INVARIANTS.with(|log| log.borrow().contains(message))
}

/// Fail the calling test unless every listed invariant was checked on this thread.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let missing: Vec<&str> = required_invariants
        .iter()
        .copied()
        .filter(|invariant| !invariant_checked(invariant))
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: The following invariants were not checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

/// Forget every recorded check on this thread.
pub fn clear_invariant_log() {
    CHECKED_INVARIANTS.with(|log| log.borrow_mut().clear());
}
