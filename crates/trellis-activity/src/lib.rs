//! Trellis Activity - the immutable trace of every state change.
//!
//! Every successful mutation and every auth event produces exactly one
//! [`ActivityRecord`](trellis_core::ActivityRecord). The
//! [`ActivityRecorder`] keeps the last N records in a rolling window
//! that feeds the `activity` room and the recent-activities query, and
//! forwards every record to the external [`ActivitySink`]. Sink writes
//! are fire-and-forget: a sink failure is logged and never fails the
//! user request that produced the record.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod recorder;
pub mod sink;

pub use recorder::ActivityRecorder;
pub use sink::{ActivitySink, MemoryActivitySink, SinkError, SinkResult};
