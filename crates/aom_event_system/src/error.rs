//! Error types for the event bus.

use crate::HandlerId;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EventError {
    #[error("No event handler registered with id {0}")]
    UnknownHandler(HandlerId),
}
