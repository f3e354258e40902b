//! Idempotent booking ledger fed by payment-confirmation events.
//!
//! Confirmations arrive at least once and may be redelivered concurrently. The
//! `(ride_id, passenger_id)` primary key on `bookings` is the arbiter: whichever
//! delivery inserts first creates the booking, every other delivery observes it
//! and reports [`BookingOutcome::AlreadyBooked`].

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::{is_unique_violation, ConflictKind, DispatchError, Result};
use crate::model::{Booking, PassengerId, RideId, RideStatus};
use crate::store::fleet::find_passenger;
use crate::store::rides::{find_booking, find_ride, open_booking_for_passenger};
use crate::store::Db;

/// Payload of a payment-confirmation event. Authenticity is checked upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub ride_id: RideId,
    pub passenger_id: PassengerId,
    pub payment_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "booking", rename_all = "snake_case")]
pub enum BookingOutcome {
    /// This delivery created the booking.
    Created(Booking),
    /// The booking already existed; nothing was written.
    AlreadyBooked(Booking),
}

impl BookingOutcome {
    pub fn booking(&self) -> &Booking {
        match self {
            BookingOutcome::Created(booking) | BookingOutcome::AlreadyBooked(booking) => booking,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, BookingOutcome::Created(_))
    }
}

pub struct BookingLedger;

impl BookingLedger {
    /// Ensure exactly one booking exists for the confirmed `(ride, passenger)`.
    ///
    /// A new booking needs the ride to still be pending and the passenger to
    /// have no other unresolved booking. A redelivery for an existing booking
    /// always succeeds, whatever the ride's status is by then.
    pub fn confirm_payment(db: &mut Db, event: &PaymentConfirmation) -> Result<BookingOutcome> {
        let payment_ref = event.payment_ref.trim();
        if payment_ref.is_empty() {
            return Err(DispatchError::validation("payment reference is missing"));
        }
        let (ride, passenger) = (event.ride_id, event.passenger_id);

        let tx = db.write_tx()?;
        let current =
            find_ride(&tx, ride)?.ok_or_else(|| DispatchError::not_found("ride", ride))?;
        if find_passenger(&tx, passenger)?.is_none() {
            return Err(DispatchError::not_found("passenger", passenger));
        }
        if let Some(existing) = find_booking(&tx, ride, passenger)? {
            tracing::debug!(%ride, %passenger, "duplicate payment confirmation");
            return Ok(BookingOutcome::AlreadyBooked(existing));
        }
        if current.status != RideStatus::Pending {
            return Err(DispatchError::Conflict(ConflictKind::RideClosedForBooking {
                ride,
                status: current.status,
            }));
        }
        if let Some(other) = open_booking_for_passenger(&tx, passenger)? {
            return Err(DispatchError::Conflict(
                ConflictKind::PassengerHasOpenBooking { ride: other },
            ));
        }

        let booking = Booking {
            ride,
            passenger,
            booked_at: Utc::now(),
            payment_ref: payment_ref.to_string(),
        };
        let inserted = tx.execute(
            "INSERT INTO bookings (ride_id, passenger_id, booked_at, payment_ref) \
             VALUES (?1, ?2, ?3, ?4)",
            params![ride, passenger, booking.booked_at, booking.payment_ref],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                drop(tx);
                return match find_booking(db.conn(), ride, passenger)? {
                    Some(existing) => Ok(BookingOutcome::AlreadyBooked(existing)),
                    None => Err(err.into()),
                };
            }
            Err(err) => return Err(err.into()),
        }
        tx.commit()?;

        tracing::info!(%ride, %passenger, payment_ref = %booking.payment_ref, "booking created");
        Ok(BookingOutcome::Created(booking))
    }
}

/// Look up a single booking.
pub fn get_booking(db: &Db, ride: RideId, passenger: PassengerId) -> Result<Booking> {
    find_booking(db.conn(), ride, passenger)?
        .ok_or_else(|| DispatchError::not_found("booking", format!("{ride}/{passenger}")))
}
