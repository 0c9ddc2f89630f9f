//! Protocol and listeners the server boots with before any plugin is loaded.

use aom_event_system::{Event, EventPriority, Listener, ListenerRegistrar};
use aom_server::codecs::{ProxyClientCodec, ProxyClientMessage, ProxyPingCodec, ProxyPingMessage};
use aom_server::{Dispatch, Protocol, ProtocolError, SessionClosedEvent, SessionConnectedEvent};
use std::sync::Arc;
use tracing::{debug, info};

/// Answers `PING` with `PONG` on the client channel (opcode 0x01) and echoes
/// keep-alive pings (opcode 0x03).
pub fn echo_protocol() -> Result<Protocol, ProtocolError> {
    Ok(Protocol::builder()
        .dispatch(Dispatch::Handlers)
        .inbound_with_handler(ProxyClientCodec, |session, message: &ProxyClientMessage| {
            if message.bytes() == b"PING" {
                session.send(Arc::new(ProxyClientMessage::new("PONG")), false)?;
            } else {
                debug!(session = %session.id(), "Ignoring {} byte(s) of client data", message.bytes().len());
            }
            Ok(())
        })?
        .inbound_with_handler(ProxyPingCodec, |session, _: &ProxyPingMessage| {
            session.send(Arc::new(ProxyPingMessage), false)
        })?
        .outbound(ProxyClientCodec)?
        .outbound(ProxyPingCodec)?
        .build())
}

/// Logs sessions joining and leaving.
pub struct ConnectionLogger;

impl Listener for ConnectionLogger {
    fn register(self: Arc<Self>, registrar: &mut ListenerRegistrar<'_>) {
        registrar
            .on(EventPriority::Lowest, |event: &mut SessionConnectedEvent| {
                if !event.is_cancelled() {
                    info!("🟢 {} connected from {}", event.session().id(), event.session().remote_addr());
                }
            })
            .on(EventPriority::Lowest, |event: &mut SessionClosedEvent| {
                info!("🔴 {} disconnected", event.session().id());
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_protocol_codecs() {
        let protocol = echo_protocol().unwrap();

        assert!(protocol.has_inbound(0x01));
        assert!(protocol.has_inbound(0x03));
        assert!(!protocol.has_inbound(0x02));
        assert!(protocol.has_outbound::<ProxyClientMessage>());
        assert!(protocol.has_outbound::<ProxyPingMessage>());
        assert_eq!(
            protocol.encode(&ProxyClientMessage::new("PONG")).unwrap(),
            [0x01, 0x00, 0x04, b'P', b'O', b'N', b'G']
        );
    }
}
