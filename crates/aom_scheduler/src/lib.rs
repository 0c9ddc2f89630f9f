//! # AoM Scheduler
//!
//! Cooperative, tick driven task scheduler used by the engine core.
//!
//! Work is submitted as [`Task`]s with an [`Owner`], a [`TaskPriority`], a
//! delay, an optional repeat period and a synchronous/asynchronous flag.
//! Synchronous tasks run on the single loop thread in due order; asynchronous
//! ones are handed to a worker pool the moment they become due.
//!
//! ```rust,no_run
//! use aom_scheduler::{Owner, Scheduler, TaskPriority};
//! use std::sync::Arc;
//!
//! let scheduler = Arc::new(Scheduler::new(60, 0)?);
//! scheduler.invoke_repeating(Owner::Anonymous, TaskPriority::Critical, 0, 1, |_task| {
//!     // pulse the world
//! });
//!
//! let looper = Arc::clone(&scheduler);
//! let handle = std::thread::spawn(move || looper.run());
//! // ...
//! scheduler.stop()?;
//! handle.join().ok();
//! # Ok::<(), aom_scheduler::SchedulerError>(())
//! ```

mod error;
mod owner;
mod priority;
mod scheduler;
mod task;


pub use error::SchedulerError;
pub use owner::Owner;
pub use priority::TaskPriority;
pub use scheduler::Scheduler;
pub use task::{panic_message, Task, TaskId};
