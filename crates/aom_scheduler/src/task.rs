//! Scheduled units of work.

use crate::{Owner, TaskPriority};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::error;

/// Unique identifier handed out by the scheduler for every submitted task.
pub type TaskId = u64;

pub(crate) type TaskCallback = Box<dyn FnMut(&Task) + Send>;

/// A unit of work owned by the scheduler.
///
/// Cancellation is cooperative: [`Task::cancel`] only flips the alive flag.
/// A body that is already running finishes normally, but a cancelled task is
/// never popped again and a cancelled repeating task is not re-submitted.
pub struct Task {
    id: TaskId,
    owner: Owner,
    priority: TaskPriority,
    asynchronous: bool,
    period: Option<u64>,
    alive: AtomicBool,
    callback: Mutex<TaskCallback>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        owner: Owner,
        priority: TaskPriority,
        asynchronous: bool,
        period: Option<u64>,
        callback: TaskCallback,
    ) -> Self {
        Self {
            id,
            owner,
            priority,
            asynchronous,
            period,
            alive: AtomicBool::new(true),
            callback: Mutex::new(callback),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    /// Repeat period in ticks, `None` for one-shot tasks.
    pub fn period(&self) -> Option<u64> {
        self.period
    }

    pub fn is_repeating(&self) -> bool {
        self.period.is_some()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Runs the body once. A panic raised by the body is logged and swallowed.
    pub(crate) fn execute(&self) {
        let mut callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (*callback)(self))) {
            error!(
                task = self.id,
                owner = %self.owner,
                "💥 Task panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .field("asynchronous", &self.asynchronous)
            .field("period", &self.period)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Extracts a printable message from a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
