use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::review::ReviewStatus;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(Ulid),
    #[error("start time {0} is not on the hour")]
    InvalidSlotAlignment(NaiveTime),
    #[error("cannot book past date {0}")]
    PastDateNotAllowed(NaiveDate),
    #[error("{0} is not a working day; submit a special request")]
    NonWorkingDayRequiresSpecialRequest(NaiveDate),
    #[error("special requests require a reason")]
    SpecialRequestReasonRequired,
    #[error("quantity must be at least 1")]
    InvalidQuantity,
    #[error("{0} is required")]
    ReasonRequired(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("capacity exceeded: requested {requested}, available {available} of {total}")]
    CapacityExceeded { requested: u32, available: u32, total: u32 },
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not authorized: {0}")]
    NotAuthorized(&'static str),
    #[error("{0} was decided automatically and cannot be reviewed")]
    AlreadyDecided(Ulid),
    #[error("cannot move from {from} to {to}")]
    InvalidStateTransition { from: ReviewStatus, to: ReviewStatus },
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("no calendar override on {0}")]
    OverrideNotFound(NaiveDate),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("journal error: {0}")]
    JournalError(String),
}

/// Coarse classification callers branch on (e.g. HTTP status mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad request shape. Fix the input.
    Input,
    /// Lost to existing state (capacity, duplicates). Try another slot.
    Conflict,
    Authority,
    /// Wrong current status for the transition.
    State,
    NotFound,
    Storage,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ResourceUnavailable(_)
            | EngineError::InvalidSlotAlignment(_)
            | EngineError::PastDateNotAllowed(_)
            | EngineError::NonWorkingDayRequiresSpecialRequest(_)
            | EngineError::SpecialRequestReasonRequired
            | EngineError::InvalidQuantity
            | EngineError::ReasonRequired(_)
            | EngineError::InvalidInput(_)
            | EngineError::LimitExceeded(_) => ErrorKind::Input,
            EngineError::CapacityExceeded { .. } | EngineError::AlreadyExists(_) => ErrorKind::Conflict,
            EngineError::NotAuthorized(_) => ErrorKind::Authority,
            EngineError::AlreadyDecided(_) | EngineError::InvalidStateTransition { .. } => ErrorKind::State,
            EngineError::NotFound(_) | EngineError::OverrideNotFound(_) => ErrorKind::NotFound,
            EngineError::JournalError(_) => ErrorKind::Storage,
        }
    }

    /// Stable metric label.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::ResourceUnavailable(_) => "resource_unavailable",
            EngineError::InvalidSlotAlignment(_) => "invalid_slot_alignment",
            EngineError::PastDateNotAllowed(_) => "past_date_not_allowed",
            EngineError::NonWorkingDayRequiresSpecialRequest(_) => "non_working_day",
            EngineError::SpecialRequestReasonRequired => "special_request_reason_required",
            EngineError::InvalidQuantity => "invalid_quantity",
            EngineError::ReasonRequired(_) => "reason_required",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::NotAuthorized(_) => "not_authorized",
            EngineError::AlreadyDecided(_) => "already_decided",
            EngineError::InvalidStateTransition { .. } => "invalid_state_transition",
            EngineError::NotFound(_) | EngineError::OverrideNotFound(_) => "not_found",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::JournalError(_) => "journal_error",
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::JournalError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_conflict_not_input() {
        let e = EngineError::CapacityExceeded { requested: 1, available: 0, total: 1 };
        assert_eq!(e.kind(), ErrorKind::Conflict);
        assert_eq!(e.label(), "capacity_exceeded");
        assert_eq!(EngineError::InvalidQuantity.kind(), ErrorKind::Input);
    }

    #[test]
    fn display_mentions_states() {
        let e = EngineError::InvalidStateTransition {
            from: ReviewStatus::Rejected,
            to: ReviewStatus::Cancelled,
        };
        assert_eq!(e.to_string(), "cannot move from REJECTED to CANCELLED");
        assert_eq!(e.kind(), ErrorKind::State);
    }
}
