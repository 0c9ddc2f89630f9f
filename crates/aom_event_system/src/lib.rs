//! # AoM Event System
//!
//! In-process publish/subscribe bus with priority ordered, cancellable
//! dispatch.
//!
//! ## Core Features
//!
//! - **Exact type dispatch**: handlers are keyed by the concrete event type
//! - **Priorities**: five levels, four of them with an "ignore cancelled" twin
//! - **Sync and async**: [`EventBus::invoke_event`] runs inline,
//!   [`EventBus::invoke_async_event_with`] runs on the scheduler's workers
//! - **Bulk teardown**: by handler id, by [`Listener`], or by [`Owner`]
//!
//! ## Quick Start Example
//!
//! ```rust,no_run
//! use aom_event_system::*;
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Chat {
//!     text: String,
//!     cancelled: bool,
//! }
//!
//! impl Event for Chat {
//!     fn is_cancelled(&self) -> bool {
//!         self.cancelled
//!     }
//! }
//!
//! impl Cancellable for Chat {
//!     fn set_cancelled(&mut self, cancelled: bool) {
//!         self.cancelled = cancelled;
//!     }
//! }
//!
//! let scheduler = Arc::new(Scheduler::new(60, 0)?);
//! let bus = EventBus::new(scheduler);
//! bus.register_event(Owner::Anonymous, EventPriority::High, |chat: &mut Chat| {
//!     if chat.text.contains("spam") {
//!         chat.cancel();
//!     }
//! });
//! let chat = bus.invoke_event(Chat { text: "spam".into(), ..Default::default() });
//! assert!(chat.is_cancelled());
//! # Ok::<(), SchedulerError>(())
//! ```

pub mod error;
pub mod events;
pub mod system;

pub use error::EventError;
pub use events::{Cancellable, Event, EventPriority};
pub use system::{EventBus, HandlerId, Listener, ListenerId, ListenerRegistrar};

// Re-exported so handlers and tasks share one owner type.
pub use aom_scheduler::{Owner, Scheduler, SchedulerError, Task, TaskPriority};
