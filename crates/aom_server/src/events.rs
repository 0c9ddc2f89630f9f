//! Session lifecycle and message events raised on the [`EventBus`](aom_event_system::EventBus).

use crate::protocol::Message;
use crate::session::Session;
use aom_event_system::{Cancellable, Event};
use std::sync::Arc;

/// Raised asynchronously when a connection is accepted.
///
/// The session joins the manager's registry only if no handler cancels the
/// event; a cancelled session is disconnected with `<Cancelled>`.
#[derive(Debug)]
pub struct SessionConnectedEvent {
    session: Arc<Session>,
    cancelled: bool,
}

impl SessionConnectedEvent {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            cancelled: false,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Event for SessionConnectedEvent {
    fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Cancellable for SessionConnectedEvent {
    fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }
}

/// Raised asynchronously once a session has left the registry.
#[derive(Debug)]
pub struct SessionClosedEvent {
    session: Arc<Session>,
}

impl SessionClosedEvent {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Event for SessionClosedEvent {}

/// Raised on the tick loop for every inbound message of a protocol using
/// [`Dispatch::Events`](crate::Dispatch::Events).
#[derive(Debug)]
pub struct SessionMessageEvent {
    session: Arc<Session>,
    message: Arc<dyn Message>,
    cancelled: bool,
}

impl SessionMessageEvent {
    pub fn new(session: Arc<Session>, message: Arc<dyn Message>) -> Self {
        Self {
            session,
            message,
            cancelled: false,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn message(&self) -> &dyn Message {
        self.message.as_ref()
    }

    /// The message as `M`, if that is its type.
    pub fn message_as<M: Message>(&self) -> Option<&M> {
        self.message().downcast_ref::<M>()
    }
}

impl Event for SessionMessageEvent {
    fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Cancellable for SessionMessageEvent {
    fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }
}
