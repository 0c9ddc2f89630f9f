//! # AoM Server
//!
//! Binary message protocol, per-connection sessions and the TCP session
//! manager of the engine core.
//!
//! ## Message Flow
//!
//! 1. Bytes arrive on a connection and the [`pipeline`] cuts them into
//!    `[opcode][length][payload]` frames
//! 2. The session's current [`Protocol`] decodes each frame into a [`Message`]
//!    which is queued on the [`Session`]
//! 3. The tick loop calls [`SessionManager::pulse`], which dispatches queued
//!    messages either to the handlers bound in the protocol or as a
//!    [`SessionMessageEvent`] on the event bus
//! 4. Replies queued with [`Session::send`] are encoded and written by the
//!    same pulse, followed by a single flush
//!
//! ## Error Handling
//!
//! Protocol failures are fatal to the connection they happen on. They reach
//! the session's [`UncaughtHandler`], which disconnects by default. Binding
//! failures are reported to the caller as `false`.
//!
//! ```rust
//! use aom_server::codecs::{ProxyClientCodec, ProxyClientMessage};
//! use aom_server::{Dispatch, Protocol};
//! use std::sync::Arc;
//!
//! let protocol = Protocol::builder()
//!     .dispatch(Dispatch::Handlers)
//!     .inbound_with_handler(ProxyClientCodec, |session, message: &ProxyClientMessage| {
//!         if message.bytes() == b"PING" {
//!             session.send(Arc::new(ProxyClientMessage::new("PONG")), false)?;
//!         }
//!         Ok(())
//!     })?
//!     .outbound(ProxyClientCodec)?
//!     .build();
//!
//! let frame = protocol.encode(&ProxyClientMessage::new("PONG"))?;
//! assert_eq!(frame, [0x01, 0x00, 0x04, b'P', b'O', b'N', b'G']);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod codecs;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod tests;

pub use error::{ProtocolError, ServerError};
pub use events::{SessionClosedEvent, SessionConnectedEvent, SessionMessageEvent};
pub use protocol::{Dispatch, Message, MessageCodec, MessageHandler, Protocol, ProtocolBuilder};
pub use session::{
    default_uncaught_handler, Session, SessionManager, TcpTransport, Transport, UncaughtHandler, ALL,
};
