//! Error types for the scheduler.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler has already been started")]
    AlreadyStarted,

    #[error("Scheduler has not been started")]
    NotStarted,

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}
