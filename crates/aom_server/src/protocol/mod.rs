//! Message codecs and the immutable protocol table built from them.

mod builder;
mod message;

pub use builder::ProtocolBuilder;
pub use message::{AsAny, Message, MessageCodec};

use crate::error::{ProtocolError, ServerError};
use crate::pipeline;
use crate::session::Session;
use message::ErasedCodec;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Handler bound to one inbound message type at protocol build time.
pub type MessageHandler =
    Arc<dyn Fn(&Arc<Session>, &dyn Message) -> Result<(), ServerError> + Send + Sync>;

/// How a session delivers the messages it has decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dispatch {
    /// Raise a [`SessionMessageEvent`](crate::SessionMessageEvent) on the event bus
    #[default]
    Events,
    /// Call the handler registered with [`ProtocolBuilder::inbound_with_handler`]
    Handlers,
}

/// Immutable opcode and type tables for one wire protocol.
///
/// A session may swap its protocol at any time, for example after a
/// handshake, so protocols are shared as `Arc<Protocol>`.
pub struct Protocol {
    pub(crate) inbound: HashMap<u8, Arc<dyn ErasedCodec>>,
    pub(crate) outbound: HashMap<TypeId, Arc<dyn ErasedCodec>>,
    pub(crate) handlers: HashMap<TypeId, MessageHandler>,
    pub(crate) dispatch: Dispatch,
}

impl Protocol {
    pub fn builder() -> ProtocolBuilder {
        ProtocolBuilder::new()
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    pub fn has_inbound(&self, opcode: u8) -> bool {
        self.inbound.contains_key(&opcode)
    }

    pub fn has_outbound<M: Message>(&self) -> bool {
        self.outbound.contains_key(&TypeId::of::<M>())
    }

    /// Decodes a frame payload received under `opcode`.
    pub fn decode(&self, opcode: u8, payload: &[u8]) -> Result<Box<dyn Message>, ProtocolError> {
        let codec = self
            .inbound
            .get(&opcode)
            .ok_or(ProtocolError::UnknownOpcode(opcode))?;
        codec.decode(payload)
    }

    /// Encodes `message` into a complete wire frame, header included.
    pub fn encode(&self, message: &dyn Message) -> Result<Vec<u8>, ProtocolError> {
        let codec = self
            .outbound
            .get(&message.message_type())
            .ok_or_else(|| ProtocolError::UnknownMessageType(message.message_name()))?;
        let payload = codec.encode(message)?;
        let mut frame = Vec::with_capacity(pipeline::HEADER_LEN + payload.len());
        pipeline::encode_frame(codec.opcode(), &payload, &mut frame)?;
        Ok(frame)
    }

    /// Runs the handler registered for the runtime type of `message`.
    pub fn handle(&self, session: &Arc<Session>, message: &dyn Message) -> Result<(), ServerError> {
        let handler = self.handlers.get(&message.message_type()).ok_or_else(|| {
            ServerError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("Message {} doesn't have a handler", message.short_name()),
            ))
        })?;
        handler(session, message)
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut inbound: Vec<_> = self.inbound.keys().copied().collect();
        inbound.sort_unstable();
        let mut outbound: Vec<_> = self
            .outbound
            .values()
            .map(|codec| (codec.opcode(), codec.message_name()))
            .collect();
        outbound.sort_unstable();
        f.debug_struct("Protocol")
            .field("inbound", &inbound)
            .field("outbound", &outbound)
            .field("handlers", &self.handlers.len())
            .field("dispatch", &self.dispatch)
            .finish()
    }
}
