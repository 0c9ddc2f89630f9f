//! The event bus: registration, dispatch and bulk removal.

mod core;
mod dispatch;
mod listener;


pub use self::core::{EventBus, HandlerId, ListenerId};
pub use listener::{Listener, ListenerRegistrar};
