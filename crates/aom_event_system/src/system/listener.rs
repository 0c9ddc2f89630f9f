/// Grouped handler registration
use super::core::{EventBus, HandlerId, ListenerId};
use crate::events::{Event, EventPriority};
use aom_scheduler::Owner;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// An object that subscribes a group of handlers in one go and can later be
/// removed as a unit with [`EventBus::unregister_events`].
///
/// ```rust,no_run
/// use aom_event_system::{Event, EventBus, EventPriority, Listener, ListenerRegistrar};
/// use std::sync::Arc;
///
/// struct Tick;
/// impl Event for Tick {}
///
/// struct Counter;
///
/// impl Listener for Counter {
///     fn register(self: Arc<Self>, registrar: &mut ListenerRegistrar<'_>) {
///         registrar.on(EventPriority::Normal, move |_: &mut Tick| {
///             let _counter = &self;
///         });
///     }
/// }
/// ```
pub trait Listener: Send + Sync + 'static {
    fn register(self: Arc<Self>, registrar: &mut ListenerRegistrar<'_>);
}

/// Collects the handlers of one [`Listener`].
pub struct ListenerRegistrar<'a> {
    bus: &'a EventBus,
    owner: Owner,
    listener: ListenerId,
    handlers: Vec<HandlerId>,
}

impl ListenerRegistrar<'_> {
    pub fn on<E, F>(&mut self, priority: EventPriority, callback: F) -> &mut Self
    where
        E: Event,
        F: Fn(&mut E) + Send + Sync + 'static,
    {
        let id = self
            .bus
            .insert::<E, F>(self.owner.clone(), Some(self.listener), priority, callback);
        self.handlers.push(id);
        self
    }

    pub fn listener_id(&self) -> ListenerId {
        self.listener
    }
}

impl EventBus {
    /// Registers every handler the listener subscribes, under `owner`.
    pub fn register_events<L: Listener>(&self, owner: Owner, listener: Arc<L>) -> ListenerId {
        let mut registrar = ListenerRegistrar {
            bus: self,
            owner,
            listener: NEXT_LISTENER.fetch_add(1, Ordering::Relaxed),
            handlers: Vec::new(),
        };
        listener.register(&mut registrar);
        tracing::debug!(
            listener = registrar.listener,
            handlers = registrar.handlers.len(),
            "📝 Registered listener"
        );
        registrar.listener
    }
}
