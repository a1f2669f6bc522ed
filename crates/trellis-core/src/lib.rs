//! Trellis Core - domain model for the collaborative task board.
//!
//! This crate defines the shared vocabulary of the board core:
//!
//! - Identifier newtypes and timestamps ([`id`])
//! - The task aggregate, its enums and validation ([`task`])
//! - Users, principals and the external collaborator traits ([`user`])
//! - Conflict descriptors and resolution strategies ([`conflict`])
//! - Activity records with their description templates ([`activity`])
//! - The error taxonomy surfaced to clients ([`error`])
//!
//! Everything here is plain data plus validation. Services that mutate
//! state live in `trellis-board`; transport lives in `trellis-gateway`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod activity;
pub mod conflict;
pub mod error;
pub mod id;
pub mod prelude;
pub mod task;
pub mod user;

pub use activity::{ActivityAction, ActivityCategory, ActivityRecord, ActivitySeverity};
pub use conflict::{ConflictDescriptor, ResolutionStrategy};
pub use error::{BoardError, BoardResult, FieldError};
pub use id::{ActivityId, ConflictId, SessionId, TaskId, Timestamp, UserId};
pub use task::{
    Comment, Limits, Task, TaskFilter, TaskInput, TaskPatch, TaskPriority, TaskStatus, dedup_tags,
    folded_title,
};
pub use user::{CredentialVerifier, Principal, Role, User, UserDirectory};
