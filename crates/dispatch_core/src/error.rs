//! Error taxonomy shared by every dispatch operation.

use thiserror::Error;

use crate::model::{DriverId, RideId, RideStatus};
use crate::routing::OracleError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Why a request could not be served even though it was well-formed.
#[derive(Debug, Error)]
pub enum UnavailableReason {
    #[error("no pending rides to claim")]
    NoPendingRides,
    #[error("no travel-time estimate for any of {candidates} pending rides")]
    NoRouteEstimates { candidates: usize },
    #[error("could not estimate ride duration: {0}")]
    RouteEstimate(#[source] OracleError),
    #[error("gave up after {attempts} contended claim attempts")]
    ContentionExhausted { attempts: u32 },
}

/// Which uniqueness or ownership rule a request ran into.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictKind {
    #[error("driver already operates an active ride ({ride})")]
    DriverAlreadyAssigned { ride: RideId },
    #[error("passenger already holds an unresolved booking on ride {ride}")]
    PassengerHasOpenBooking { ride: RideId },
    #[error("ride {ride} is {status} and no longer takes bookings")]
    RideClosedForBooking { ride: RideId, status: RideStatus },
    #[error("location name already exists")]
    DuplicateLocationName,
    #[error("location is referenced by ride {ride}")]
    LocationInUse { ride: RideId },
    #[error("licence tag already registered")]
    DuplicateLicence,
    #[error("email already registered")]
    DuplicateEmail,
    #[error("vehicle is already assigned to driver {driver}")]
    VehicleAlreadyAssigned { driver: DriverId },
    /// A concurrent quote created the pending ride, which was claimed before it
    /// could be re-read.
    #[error("pending ride for this route changed while quoting")]
    PendingRouteRace,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Malformed input, rejected before touching the store.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(ConflictKind),

    /// The requested ride transition does not apply to the ride's current status.
    #[error("ride {ride} cannot move from {from} to {to}")]
    InvalidTransition {
        ride: RideId,
        from: RideStatus,
        to: RideStatus,
    },

    #[error("unavailable: {0}")]
    Unavailable(UnavailableReason),

    #[error("travel-time service failed: {0}")]
    ExternalService(#[from] OracleError),

    #[error("storage failure: {0}")]
    Persistence(#[from] rusqlite::Error),
}

impl DispatchError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DispatchError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DispatchError::Validation(message.into())
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::ExternalService(_) => true,
            DispatchError::Unavailable(reason) => matches!(
                reason,
                UnavailableReason::RouteEstimate(_)
                    | UnavailableReason::NoRouteEstimates { .. }
                    | UnavailableReason::ContentionExhausted { .. }
            ),
            DispatchError::Conflict(ConflictKind::PendingRouteRace) => true,
            DispatchError::Persistence(err) => is_busy(err),
            _ => false,
        }
    }
}

/// True when SQLite reported a uniqueness or primary-key violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err.sqlite_error() {
        Some(ffi) => {
            ffi.code == rusqlite::ErrorCode::ConstraintViolation
                && (ffi.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || ffi.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        None => false,
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oracle_failures_are_retryable() {
        let err = DispatchError::ExternalService(OracleError::NoRoute);
        assert!(err.is_retryable());
        let err = DispatchError::Unavailable(UnavailableReason::NoPendingRides);
        assert!(!err.is_retryable());
    }

    #[test]
    fn conflict_message_names_the_ride() {
        let err = DispatchError::Conflict(ConflictKind::DriverAlreadyAssigned { ride: RideId(7) });
        assert_eq!(
            err.to_string(),
            "conflict: driver already operates an active ride (7)"
        );
    }
}
