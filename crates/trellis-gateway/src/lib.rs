//! Trellis Gateway - connection termination and fan-out.
//!
//! One logical command channel: clients hold a long-lived duplex
//! socket speaking length-prefixed JSON frames. The gateway
//! authenticates each connection once at handshake, dispatches inbound
//! commands to the board services, and serializes everything outbound
//! through one writer task per session consuming a bounded queue.
//!
//! Delivery rules:
//!
//! - Per-session FIFO: frames reach a client in enqueue order.
//! - A mutation's acknowledgement is enqueued to the originating
//!   session before the same event is broadcast.
//! - Broadcasts never block on a member: a session whose queue is full
//!   is expelled from every room and its connection closed
//!   (`slow-consumer`).

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod dispatch;
pub mod rooms;
pub mod server;
pub mod session;

pub use rooms::RoomRouter;
pub use server::{Gateway, GatewayConfig};
pub use session::{Outbound, SessionHandle, SessionRegistry};
