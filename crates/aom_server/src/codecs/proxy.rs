//! Proxy messages: opaque byte payloads relayed between a client, this
//! engine and an upstream server, plus a keep-alive ping.

use crate::error::ProtocolError;
use crate::protocol::{Message, MessageCodec, Protocol};

/// Bytes travelling between the client and the engine. Opcode `0x01`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyClientMessage {
    bytes: Vec<u8>,
}

impl ProxyClientMessage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Message for ProxyClientMessage {}

/// Bytes travelling between the engine and the upstream server. Opcode `0x02`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyServerMessage {
    bytes: Vec<u8>,
}

impl ProxyServerMessage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Message for ProxyServerMessage {}

/// Keep-alive with an empty payload. Opcode `0x03`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProxyPingMessage;

impl Message for ProxyPingMessage {}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyClientCodec;

impl MessageCodec for ProxyClientCodec {
    type Message = ProxyClientMessage;

    const OPCODE: u8 = 0x01;

    fn encode(&self, message: &ProxyClientMessage) -> Result<Vec<u8>, ProtocolError> {
        Ok(message.bytes.clone())
    }

    fn decode(&self, payload: &[u8]) -> Result<ProxyClientMessage, ProtocolError> {
        Ok(ProxyClientMessage::new(payload))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyServerCodec;

impl MessageCodec for ProxyServerCodec {
    type Message = ProxyServerMessage;

    const OPCODE: u8 = 0x02;

    fn encode(&self, message: &ProxyServerMessage) -> Result<Vec<u8>, ProtocolError> {
        Ok(message.bytes.clone())
    }

    fn decode(&self, payload: &[u8]) -> Result<ProxyServerMessage, ProtocolError> {
        Ok(ProxyServerMessage::new(payload))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyPingCodec;

impl MessageCodec for ProxyPingCodec {
    type Message = ProxyPingMessage;

    const OPCODE: u8 = 0x03;

    fn encode(&self, _: &ProxyPingMessage) -> Result<Vec<u8>, ProtocolError> {
        Ok(Vec::new())
    }

    fn decode(&self, payload: &[u8]) -> Result<ProxyPingMessage, ProtocolError> {
        if !payload.is_empty() {
            return Err(ProtocolError::InvalidMessage(format!(
                "ping carries no payload, got {} bytes",
                payload.len()
            )));
        }
        Ok(ProxyPingMessage)
    }
}

/// All three proxy codecs in both directions, delivered as events.
pub fn proxy_protocol() -> Result<Protocol, ProtocolError> {
    Ok(Protocol::builder()
        .outbound(ProxyClientCodec)?
        .outbound(ProxyServerCodec)?
        .outbound(ProxyPingCodec)?
        .inbound(ProxyClientCodec)?
        .inbound(ProxyServerCodec)?
        .inbound(ProxyPingCodec)?
        .build())
}
