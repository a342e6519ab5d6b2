//! # Tempo Core
//!
//! Deterministic harness primitives for testing asynchronous and randomized
//! code.
//!
//! Non-determinism in tests comes from three places: wall-clock delays,
//! random draws, and guesses about when async work has finished. This crate
//! replaces each with something a test controls:
//!
//! - Wall-clock delays become callbacks on a [`clock::VirtualClock`] that only
//!   moves when the test advances it.
//! - Random draws come from an [`entropy::EntropySequence`] that replays a
//!   fixed list of values.
//! - "Sleep and hope" becomes [`gate::await_all`] / [`gate::await_one`], which
//!   are ready exactly when the awaited operations settle.
//!
//! Code under test reaches the clock and random function through
//! [`ambient`], which defaults to the real implementations and is swapped
//! per test with scoped guards (or a [`harness::Harness`]).
//!
//! ## Crate Structure
//!
//! - [`timer_queue`] - `(due, seq)` ordered callback queue
//! - [`clock`] - Virtual clock
//! - [`entropy`] - Replayable entropy sequence
//! - [`ambient`] - Per-thread ambient random function and timer
//! - [`operation`] - One-shot pending operations
//! - [`gate`] - Completion gates over sets of operations
//! - [`debounce`] - Debounced actions with a queryable live signal
//! - [`trace`] - Firing trace for run-to-run comparison
//! - [`harness`] - Per-test bundle of the above

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod ambient;
pub mod clock;
pub mod debounce;
pub mod entropy;
pub mod error;
pub mod gate;
pub mod harness;
pub mod operation;
pub mod timer_queue;
pub mod trace;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::ambient::{AmbientSnapshot, Timer};
    pub use crate::clock::{VirtualClock, DEFAULT_RUN_LIMIT};
    pub use crate::debounce::Debouncer;
    pub use crate::entropy::{EntropySequence, EntropySource, ScopedEntropy};
    pub use crate::error::{HarnessError, Result};
    pub use crate::gate::{await_all, await_one, AllSettled, FirstSettled};
    pub use crate::harness::Harness;
    pub use crate::operation::{pending, OperationId, OperationState, PendingOperation, Resolver};
    pub use crate::timer_queue::TimerHandle;
    pub use crate::trace::FiringTrace;
}
