use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingStatus, InvalidRange};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidRange(#[from] InvalidRange),
    #[error("guest count must be at least 1")]
    InvalidGuests,
    #[error("{guests} guests exceed unit capacity of {max_guests}")]
    CapacityExceeded { guests: u32, max_guests: u32 },
    /// Dates collide with a live booking or a blocked range (the conflicting interval).
    #[error("unit {unit_id} is unavailable: conflicts with {conflict}")]
    UnitUnavailable { unit_id: Ulid, conflict: Ulid },
    #[error("blocked dates overlap existing block {0}")]
    OverlappingBlock(Ulid),
    #[error("illegal booking transition: {from} -> {to}")]
    IllegalTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("booking {booking_id} cannot complete before check-out on {check_out}")]
    CheckOutNotReached { booking_id: Ulid, check_out: NaiveDate },
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable code for the wire protocol.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidRange(_) => "invalid_range",
            EngineError::InvalidGuests => "invalid_guests",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::UnitUnavailable { .. } => "unit_unavailable",
            EngineError::OverlappingBlock(_) => "overlapping_block",
            EngineError::IllegalTransition { .. } => "illegal_transition",
            EngineError::CheckOutNotReached { .. } => "check_out_not_reached",
            EngineError::NotFound(_) => "not_found",
            EngineError::PermissionDenied(_) => "permission_denied",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "storage_error",
        }
    }
}
