//! Trellis Config - TOML configuration for the server binary.
//!
//! All types here are self-contained: domain limits are mirrored and
//! converted at the boundary so this crate depends on nothing internal.
//! Every section implements [`Default`] with working values, so a bare
//! `[section]` header (or no file at all) produces a runnable server.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod loader;
pub mod types;

pub use loader::{ConfigError, load};
pub use types::{
    ActivitySection, AuthSection, Config, LimitsSection, LogFormat, LoggingSection, ServerSection,
};
