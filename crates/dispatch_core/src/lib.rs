pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod model;
pub mod notify;
pub mod pricing;
pub mod report;
pub mod routing;
pub mod store;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::DispatchConfig;
pub use dispatch::{ClaimedRide, DispatchEngine, RideDetails};
pub use error::{ConflictKind, DispatchError, Result, UnavailableReason};
pub use ledger::{BookingLedger, BookingOutcome, PaymentConfirmation};
pub use store::rides::RideStore;
pub use store::Db;
