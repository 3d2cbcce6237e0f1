use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingStatus, DateWindow};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid range: end {end} is before start {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("invalid quantity: {0}")]
    InvalidQuantity(u32),
    #[error("resource not found: {0}")]
    ResourceNotFound(Ulid),
    #[error(
        "insufficient stock for \"{resource_name}\" on {window}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        resource_name: String,
        window: DateWindow,
        requested: u32,
        available: u32,
    },
    #[error("stage is bound to {bound}; clear it before staging {requested}")]
    WindowConflict {
        bound: DateWindow,
        requested: DateWindow,
    },
    #[error("stage is empty")]
    EmptyStage,
    #[error("stage lines disagree on the rental window")]
    InconsistentWindow,
    #[error("could not allocate a unique booking reference")]
    ReferenceAllocationExhausted,
    #[error("concurrent commit conflict, retry")]
    ConcurrentCommitConflict,
    #[error("booking not found: {0}")]
    BookingNotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("resource {0} is referenced by committed bookings")]
    ResourceInUse(Ulid),
    #[error("cannot move booking from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("invalid resource: {0}")]
    InvalidResource(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Only lock contention is worth retrying; every other error is a verdict
    /// on the request itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrentCommitConflict)
    }
}
