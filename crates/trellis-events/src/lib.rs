//! Trellis Events - rooms, domain events and the wire protocol.
//!
//! This crate is the contract between the board services and the
//! gateway:
//!
//! - [`Room`] names a fan-out target (board, per-task, per-user,
//!   activity feed).
//! - [`BoardEvent`] is a domain event with its wire kind and the rooms
//!   it targets.
//! - [`frame`] holds the `{type, id?, data}` envelope, the inbound
//!   command enum and the reply shapes.
//! - [`codec`] reads and writes length-prefixed JSON frames.
//! - [`Fanout`] is the injected broadcast seam: services publish
//!   through it and never see sockets, so they stay testable against
//!   [`RecordingFanout`].

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod codec;
pub mod event;
pub mod fanout;
pub mod frame;
pub mod room;

pub use codec::{CodecError, MAX_FRAME_LEN, read_frame, write_frame};
pub use event::{BoardEvent, FieldDelta};
pub use fanout::{Fanout, RecordingFanout};
pub use frame::{
    BoardColumns, ClientCommand, CloseReason, Envelope, ErrorBody, FrameError, OutboundBody,
    ServerMessage, server_frame,
};
pub use room::{Room, RoomKind};
