//! Trellis Storage - persistence contracts and in-memory stores.
//!
//! The persistence store is an external collaborator; [`TaskStore`] is
//! its contract. The store must provide linearisable single-document
//! reads and writes keyed by task id; the board core layers its
//! per-task serialisation on top and never asks for multi-document
//! transactions.
//!
//! [`MemoryTaskStore`], [`MemoryUserDirectory`] and
//! [`StaticCredentialVerifier`] back tests and the self-contained dev
//! server.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod tasks;
pub mod users;

pub use error::{StorageError, StorageResult};
pub use tasks::{MemoryTaskStore, TaskStore};
pub use users::{MemoryUserDirectory, StaticCredentialVerifier};
