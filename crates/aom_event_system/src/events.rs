//! Event traits and dispatch priorities.

use std::any::Any;

/// Anything that can be published on the [`EventBus`](crate::EventBus).
///
/// Dispatch is keyed on the exact concrete type: a handler registered for one
/// event type never sees another type, whatever their relationship.
pub trait Event: Any + Send + 'static {
    /// Whether an earlier executor cancelled this event. Events that cannot
    /// be cancelled keep the default.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// An event whose dispatch can be vetoed by a handler.
///
/// Once cancelled, executors at plain priorities are skipped for the rest of
/// the dispatch; "ignore cancelled" executors still run and may even
/// un-cancel it.
pub trait Cancellable: Event {
    fn set_cancelled(&mut self, cancelled: bool);

    fn cancel(&mut self) {
        self.set_cancelled(true);
    }
}

/// Order in which executors of the same event type run.
///
/// Levels run from `Highest` to `Lowest`. Each level below `Highest` has an
/// "ignore cancelled" twin that shares its slot and runs interleaved with it
/// in registration order, but is never skipped because of cancellation.
/// `Highest` itself always ignores cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPriority {
    Highest,
    HighIgnoreCancelled,
    High,
    NormalIgnoreCancelled,
    Normal,
    LowIgnoreCancelled,
    Low,
    LowestIgnoreCancelled,
    Lowest,
}

impl EventPriority {
    pub const fn slot(self) -> u8 {
        match self {
            EventPriority::Highest => 0,
            EventPriority::HighIgnoreCancelled | EventPriority::High => 1,
            EventPriority::NormalIgnoreCancelled | EventPriority::Normal => 2,
            EventPriority::LowIgnoreCancelled | EventPriority::Low => 3,
            EventPriority::LowestIgnoreCancelled | EventPriority::Lowest => 4,
        }
    }

    pub const fn ignores_cancelled(self) -> bool {
        matches!(
            self,
            EventPriority::Highest
                | EventPriority::HighIgnoreCancelled
                | EventPriority::NormalIgnoreCancelled
                | EventPriority::LowIgnoreCancelled
                | EventPriority::LowestIgnoreCancelled
        )
    }
}

impl Default for EventPriority {
    fn default() -> Self {
        EventPriority::Normal
    }
}

pub(crate) fn as_any_mut<E: Event>(event: &mut E) -> &mut dyn Any {
    event
}
