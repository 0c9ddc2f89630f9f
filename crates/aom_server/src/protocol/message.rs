use crate::error::ProtocolError;
use std::any::{Any, TypeId};
use std::fmt;

/// Upcast helper so a `&dyn Message` can be inspected as `&dyn Any`.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An application defined payload carried over the wire.
///
/// Messages are immutable once constructed. The runtime type selects the
/// outbound codec; inbound frames select the codec by opcode.
///
/// ```rust
/// use aom_server::Message;
///
/// #[derive(Debug)]
/// struct Chat(String);
///
/// impl Message for Chat {}
/// ```
pub trait Message: AsAny + Send + Sync + fmt::Debug {
    /// Full type name, used in diagnostics.
    fn message_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl dyn Message {
    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub(crate) fn message_type(&self) -> TypeId {
        self.as_any().type_id()
    }

    /// The last path segment of [`Message::message_name`].
    pub fn short_name(&self) -> &'static str {
        let name = self.message_name();
        name.rsplit("::").next().unwrap_or(name)
    }
}

/// Binds one opcode to one [`Message`] type.
pub trait MessageCodec: Send + Sync + 'static {
    type Message: Message;

    const OPCODE: u8;

    fn encode(&self, message: &Self::Message) -> Result<Vec<u8>, ProtocolError>;

    fn decode(&self, payload: &[u8]) -> Result<Self::Message, ProtocolError>;
}

/// Object safe face of a [`MessageCodec`], stored inside a protocol table.
pub(crate) trait ErasedCodec: Send + Sync {
    fn opcode(&self) -> u8;
    fn message_name(&self) -> &'static str;
    fn encode(&self, message: &dyn Message) -> Result<Vec<u8>, ProtocolError>;
    fn decode(&self, payload: &[u8]) -> Result<Box<dyn Message>, ProtocolError>;
}

pub(crate) struct CodecAdapter<C>(pub(crate) C);

impl<C: MessageCodec> ErasedCodec for CodecAdapter<C> {
    fn opcode(&self) -> u8 {
        C::OPCODE
    }

    fn message_name(&self) -> &'static str {
        std::any::type_name::<C::Message>()
    }

    fn encode(&self, message: &dyn Message) -> Result<Vec<u8>, ProtocolError> {
        let message = message
            .downcast_ref::<C::Message>()
            .ok_or_else(|| ProtocolError::UnknownMessageType(message.message_name()))?;
        self.0.encode(message)
    }

    fn decode(&self, payload: &[u8]) -> Result<Box<dyn Message>, ProtocolError> {
        Ok(Box::new(self.0.decode(payload)?))
    }
}
