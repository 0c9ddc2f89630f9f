/// Core EventBus implementation
use crate::error::EventError;
use crate::events::{Event, EventPriority};
use aom_scheduler::{Owner, Scheduler};
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Identifier returned by [`EventBus::register_event`].
pub type HandlerId = u64;

/// Identifier returned by [`EventBus::register_events`].
pub type ListenerId = u64;

pub(super) type ErasedCallback = Box<dyn Fn(&mut dyn Any) + Send + Sync>;

/// One callback bound to one event type.
pub(super) struct EventExecutor {
    pub(super) id: HandlerId,
    pub(super) owner: Owner,
    pub(super) listener: Option<ListenerId>,
    pub(super) priority: EventPriority,
    pub(super) callback: ErasedCallback,
}

/// The in-process publish/subscribe bus.
///
/// Executors are stored per exact event [`TypeId`], kept sorted by priority
/// slot with registration order preserved inside a slot. Dispatch works on a
/// snapshot of that list, so callbacks may register or unregister handlers
/// (even their own) while an event is in flight.
pub struct EventBus {
    pub(super) scheduler: Arc<Scheduler>,
    pub(super) handlers: DashMap<TypeId, Vec<Arc<EventExecutor>>>,
    pub(super) index: DashMap<HandlerId, TypeId>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_types", &self.handlers.len())
            .field("handlers", &self.index.len())
            .finish()
    }
}

impl EventBus {
    /// Creates an empty bus. Asynchronous dispatch goes through `scheduler`.
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            handlers: DashMap::new(),
            index: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Subscribes `callback` to events of type `E`.
    ///
    /// # Returns
    ///
    /// The handle to pass to [`EventBus::unregister_event`].
    pub fn register_event<E, F>(&self, owner: Owner, priority: EventPriority, callback: F) -> HandlerId
    where
        E: Event,
        F: Fn(&mut E) + Send + Sync + 'static,
    {
        self.insert::<E, F>(owner, None, priority, callback)
    }

    pub(super) fn insert<E, F>(
        &self,
        owner: Owner,
        listener: Option<ListenerId>,
        priority: EventPriority,
        callback: F,
    ) -> HandlerId
    where
        E: Event,
        F: Fn(&mut E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: ErasedCallback = Box::new(move |event: &mut dyn Any| {
            if let Some(event) = event.downcast_mut::<E>() {
                callback(event);
            }
        });
        let executor = Arc::new(EventExecutor {
            id,
            owner,
            listener,
            priority,
            callback,
        });

        let type_id = TypeId::of::<E>();
        let mut executors = self.handlers.entry(type_id).or_default();
        let position = executors.partition_point(|e| e.priority.slot() <= priority.slot());
        executors.insert(position, executor);
        drop(executors);
        self.index.insert(id, type_id);

        debug!(
            handler = id,
            event = std::any::type_name::<E>(),
            ?priority,
            "📝 Registered event handler"
        );
        id
    }

    /// Removes a single handler.
    pub fn unregister_event(&self, id: HandlerId) -> Result<(), EventError> {
        let (_, type_id) = self.index.remove(&id).ok_or(EventError::UnknownHandler(id))?;
        if let Some(mut executors) = self.handlers.get_mut(&type_id) {
            executors.retain(|executor| executor.id != id);
        }
        self.handlers.remove_if(&type_id, |_, executors| executors.is_empty());
        Ok(())
    }

    /// Removes every handler registered through the given listener.
    pub fn unregister_events(&self, listener: ListenerId) -> usize {
        self.remove_where(|executor| executor.listener == Some(listener))
    }

    /// Removes every handler registered under `owner`.
    pub fn unregister_all_events_by(&self, owner: &Owner) -> usize {
        self.remove_where(|executor| &executor.owner == owner)
    }

    pub fn unregister_all_events(&self) {
        self.handlers.clear();
        self.index.clear();
    }

    /// Number of handlers currently subscribed to `E`.
    pub fn handler_count<E: Event>(&self) -> usize {
        self.handlers
            .get(&TypeId::of::<E>())
            .map(|executors| executors.len())
            .unwrap_or(0)
    }

    pub fn total_handlers(&self) -> usize {
        self.index.len()
    }

    fn remove_where(&self, predicate: impl Fn(&EventExecutor) -> bool) -> usize {
        let mut removed = Vec::new();
        self.handlers.retain(|_, executors| {
            executors.retain(|executor| {
                if predicate(executor) {
                    removed.push(executor.id);
                    false
                } else {
                    true
                }
            });
            !executors.is_empty()
        });
        for id in &removed {
            self.index.remove(id);
        }
        removed.len()
    }
}
