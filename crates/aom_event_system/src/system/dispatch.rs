/// Synchronous and scheduler backed event dispatch
use super::core::EventBus;
use crate::events::{as_any_mut, Event};
use aom_scheduler::{panic_message, Owner, Task, TaskPriority};
use std::any::TypeId;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace};

impl EventBus {
    /// Dispatches `event` on the calling thread and hands it back.
    ///
    /// Every executor registered for the exact type `E` is visited in
    /// priority order. An executor at a plain priority is skipped once the
    /// event reports itself cancelled; ignore-cancelled executors always run.
    /// A panicking callback is logged and does not stop the dispatch.
    pub fn invoke_event<E: Event>(&self, mut event: E) -> E {
        let executors = match self.handlers.get(&TypeId::of::<E>()) {
            Some(executors) => executors.clone(),
            None => return event,
        };

        for executor in &executors {
            if event.is_cancelled() && !executor.priority.ignores_cancelled() {
                trace!(handler = executor.id, "Skipping handler for cancelled event");
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                (executor.callback)(as_any_mut(&mut event));
            }));
            if let Err(payload) = outcome {
                error!(
                    handler = executor.id,
                    owner = %executor.owner,
                    event = std::any::type_name::<E>(),
                    "💥 Event handler panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
        event
    }

    /// Dispatches `event` on the scheduler's worker pool.
    pub fn invoke_async_event<E: Event>(self: &Arc<Self>, event: E) -> Arc<Task> {
        self.invoke_async_event_with(event, |_| {})
    }

    /// Dispatches `event` on the scheduler's worker pool, then runs
    /// `completion` with the dispatched event on the same worker, right after
    /// the last handler.
    pub fn invoke_async_event_with<E, C>(self: &Arc<Self>, event: E, completion: C) -> Arc<Task>
    where
        E: Event,
        C: FnOnce(E) + Send + 'static,
    {
        let bus = Arc::clone(self);
        let mut job = Some((event, completion));
        self.scheduler
            .invoke_async(Owner::Anonymous, TaskPriority::Normal, 0, move |_| {
                if let Some((event, completion)) = job.take() {
                    completion(bus.invoke_event(event));
                }
            })
    }
}
