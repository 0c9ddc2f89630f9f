use super::message::{CodecAdapter, ErasedCodec};
use super::{Dispatch, MessageHandler, Protocol};
use crate::error::{ProtocolError, ServerError};
use crate::protocol::{Message, MessageCodec};
use crate::session::Session;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Accumulates codec registrations for a [`Protocol`].
///
/// Every registration is validated on the spot, so a duplicate opcode is
/// reported by the call that introduced it and [`ProtocolBuilder::build`]
/// cannot fail.
///
/// ```rust
/// use aom_server::codecs::{ProxyClientCodec, ProxyPingCodec};
/// use aom_server::{Protocol, ProtocolError};
///
/// let protocol = Protocol::builder()
///     .inbound(ProxyClientCodec)?
///     .outbound(ProxyClientCodec)?
///     .outbound(ProxyPingCodec)?
///     .build();
/// assert!(protocol.has_inbound(0x01));
///
/// let duplicate = Protocol::builder().inbound(ProxyClientCodec)?.inbound(ProxyClientCodec);
/// assert!(matches!(duplicate, Err(ProtocolError::DuplicateOpcode(0x01))));
/// # Ok::<(), ProtocolError>(())
/// ```
#[derive(Default)]
pub struct ProtocolBuilder {
    inbound: HashMap<u8, Arc<dyn ErasedCodec>>,
    outbound: HashMap<TypeId, Arc<dyn ErasedCodec>>,
    outbound_opcodes: HashSet<u8>,
    handlers: HashMap<TypeId, MessageHandler>,
    dispatch: Dispatch,
}

impl ProtocolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a codec for decoding frames received from the peer.
    pub fn inbound<C: MessageCodec>(mut self, codec: C) -> Result<Self, ProtocolError> {
        if self.inbound.contains_key(&C::OPCODE) {
            return Err(ProtocolError::DuplicateOpcode(C::OPCODE));
        }
        self.inbound.insert(C::OPCODE, Arc::new(CodecAdapter(codec)));
        Ok(self)
    }

    /// Registers an inbound codec together with the handler invoked by
    /// [`Protocol::handle`] for its message type.
    pub fn inbound_with_handler<C, F>(self, codec: C, handler: F) -> Result<Self, ProtocolError>
    where
        C: MessageCodec,
        F: Fn(&Arc<Session>, &C::Message) -> Result<(), ServerError> + Send + Sync + 'static,
    {
        let message_type = TypeId::of::<C::Message>();
        if self.handlers.contains_key(&message_type) {
            return Err(ProtocolError::DuplicateMessageType(std::any::type_name::<
                C::Message,
            >()));
        }
        let mut builder = self.inbound(codec)?;
        let handler: MessageHandler = Arc::new(move |session, message: &dyn Message| {
            match message.downcast_ref::<C::Message>() {
                Some(message) => handler(session, message),
                None => Err(ServerError::Internal(format!(
                    "handler for {} received {}",
                    std::any::type_name::<C::Message>(),
                    message.message_name()
                ))),
            }
        });
        builder.handlers.insert(message_type, handler);
        Ok(builder)
    }

    /// Registers a codec for encoding messages sent to the peer.
    pub fn outbound<C: MessageCodec>(mut self, codec: C) -> Result<Self, ProtocolError> {
        let message_type = TypeId::of::<C::Message>();
        if self.outbound.contains_key(&message_type) {
            return Err(ProtocolError::DuplicateMessageType(std::any::type_name::<
                C::Message,
            >()));
        }
        if !self.outbound_opcodes.insert(C::OPCODE) {
            return Err(ProtocolError::DuplicateOpcode(C::OPCODE));
        }
        self.outbound.insert(message_type, Arc::new(CodecAdapter(codec)));
        Ok(self)
    }

    /// Chooses how sessions deliver decoded messages. Defaults to
    /// [`Dispatch::Events`].
    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn build(self) -> Protocol {
        Protocol {
            inbound: self.inbound,
            outbound: self.outbound,
            handlers: self.handlers,
            dispatch: self.dispatch,
        }
    }
}
