//! Trellis Board - the authoritative task core.
//!
//! Three cooperating pieces live here:
//!
//! - [`TaskService`]: all task CRUD, validated and serialised per task,
//!   with explicit version bumps and derived events returned to the
//!   caller for fan-out.
//! - The conflict controller: stale writes are rejected with a
//!   [`ConflictDescriptor`](trellis_core::ConflictDescriptor) held in
//!   the [`ConflictRegistry`] until the client settles it with a
//!   [`ResolutionStrategy`](trellis_core::ResolutionStrategy); advisory
//!   edit sessions live in [`EditSessions`].
//! - The [`AssignmentEngine`]: Smart-Assign picks uniformly among the
//!   least-loaded active users.
//!
//! Services are transport-free: the gateway hands replies and derived
//! events to its room router, tests assert on the returned values.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod assign;
pub mod conflict;
pub mod edit;
mod locks;
pub mod service;

pub use assign::AssignmentEngine;
pub use conflict::{ConflictRegistry, PendingConflict, merge_patch};
pub use edit::{EditOutcome, EditSessions};
pub use service::{Mutation, Removal, TaskService};
