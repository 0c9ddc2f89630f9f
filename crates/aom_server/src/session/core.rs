use super::transport::Transport;
use crate::error::ServerError;
use crate::events::SessionMessageEvent;
use crate::protocol::{Dispatch, Message, Protocol};
use aom_event_system::EventBus;
use aom_scheduler::panic_message;
use crossbeam::queue::SegQueue;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Called with the failing session when dispatching one of its messages fails.
pub type UncaughtHandler = Arc<dyn Fn(&Arc<Session>, &ServerError) + Send + Sync>;

/// The handler sessions start with: log the failure and disconnect.
pub fn default_uncaught_handler() -> UncaughtHandler {
    Arc::new(|session: &Arc<Session>, error: &ServerError| {
        warn!(session = %session.id(), "❌ Unhandled session error: {}", error);
        session.disconnect(&format!("An exception was raised: {error}"));
    })
}

struct Inbound {
    protocol: Arc<Protocol>,
    message: Arc<dyn Message>,
}

/// One connected peer.
///
/// Inbound messages are queued by the network side and dispatched by
/// [`Session::pulse`] on the tick loop; outbound messages are queued by any
/// thread and written by the same pulse with a single flush.
pub struct Session {
    id: Uuid,
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    protocol: RwLock<Option<Arc<Protocol>>>,
    inbound: SegQueue<Inbound>,
    outbound: SegQueue<Arc<dyn Message>>,
    uncaught: RwLock<UncaughtHandler>,
}

impl Session {
    pub fn new(
        transport: Arc<dyn Transport>,
        protocol: Option<Arc<Protocol>>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            transport,
            events,
            protocol: RwLock::new(protocol),
            inbound: SegQueue::new(),
            outbound: SegQueue::new(),
            uncaught: RwLock::new(default_uncaught_handler()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.transport.remote_addr()
    }

    pub fn is_active(&self) -> bool {
        self.transport.is_active()
    }

    pub fn protocol(&self) -> Option<Arc<Protocol>> {
        self.protocol
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swaps the protocol used for frames decoded from now on and for every
    /// outbound message written from now on. Messages already queued keep
    /// the protocol that decoded them.
    pub fn set_protocol(&self, protocol: Option<Arc<Protocol>>) {
        *self.protocol.write().unwrap_or_else(PoisonError::into_inner) = protocol;
    }

    pub fn uncaught_handler(&self) -> UncaughtHandler {
        self.uncaught
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_uncaught_handler(&self, handler: UncaughtHandler) {
        *self.uncaught.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Sends `message` to the peer.
    ///
    /// Urgent messages on an active session are encoded and written with a
    /// flush right away; anything else waits for the next pulse. Only the
    /// urgent path can fail.
    pub fn send(&self, message: Arc<dyn Message>, urgent: bool) -> Result<(), ServerError> {
        if urgent && self.is_active() {
            let frame = self.encode(message.as_ref())?;
            self.transport.write(frame)?;
            return self.transport.flush();
        }
        self.outbound.push(message);
        Ok(())
    }

    pub fn send_all<I>(&self, messages: I)
    where
        I: IntoIterator<Item = Arc<dyn Message>>,
    {
        for message in messages {
            self.outbound.push(message);
        }
    }

    pub fn disconnect(&self, reason: &str) {
        if self.is_active() {
            info!("🔌 Session {} disconnected: {}", self.id, reason);
        }
        self.transport.close(reason);
    }

    /// Queues a decoded message for the next pulse.
    pub fn enqueue_inbound(&self, protocol: Arc<Protocol>, message: Arc<dyn Message>) {
        self.inbound.push(Inbound { protocol, message });
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    /// Dispatches every queued inbound message in arrival order, then writes
    /// every queued outbound message and flushes once.
    pub fn pulse(self: &Arc<Self>) {
        while let Some(Inbound { protocol, message }) = self.inbound.pop() {
            if let Err(error) = self.dispatch(&protocol, message) {
                (self.uncaught_handler())(self, &error);
            }
        }

        if !self.is_active() {
            while self.outbound.pop().is_some() {}
            return;
        }

        let mut written = 0usize;
        while let Some(message) = self.outbound.pop() {
            let frame = match self.encode(message.as_ref()) {
                Ok(frame) => frame,
                Err(error) => {
                    (self.uncaught_handler())(self, &error);
                    continue;
                }
            };
            if let Err(error) = self.transport.write(frame) {
                // The transport is gone; the rest of the queue has nowhere to go.
                let mut dropped = 0usize;
                while self.outbound.pop().is_some() {
                    dropped += 1;
                }
                debug!(session = %self.id, dropped, "Write failed, discarding queued messages");
                (self.uncaught_handler())(self, &error);
                return;
            }
            written += 1;
        }
        if written > 0 {
            if let Err(error) = self.transport.flush() {
                (self.uncaught_handler())(self, &error);
            }
        }
    }

    fn encode(&self, message: &dyn Message) -> Result<Vec<u8>, ServerError> {
        let protocol = self
            .protocol()
            .ok_or_else(|| ServerError::Network(format!("session {} has no protocol", self.id)))?;
        Ok(protocol.encode(message)?)
    }

    fn dispatch(self: &Arc<Self>, protocol: &Protocol, message: Arc<dyn Message>) -> Result<(), ServerError> {
        debug!(session = %self.id, message = message.short_name(), "Dispatching message");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match protocol.dispatch() {
            Dispatch::Handlers => protocol.handle(self, message.as_ref()),
            Dispatch::Events => {
                self.events
                    .invoke_event(SessionMessageEvent::new(Arc::clone(self), Arc::clone(&message)));
                Ok(())
            }
        }));
        outcome.unwrap_or_else(|payload| Err(ServerError::Internal(panic_message(payload.as_ref()))))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr())
            .field("active", &self.is_active())
            .field("inbound", &self.inbound.len())
            .field("outbound", &self.outbound.len())
            .finish()
    }
}
