//! Ride lifecycle: merge-or-create quoting, completion, and the read paths the
//! dispatcher and ledger share.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::fleet::find_passenger;
use super::locations::find_location;
use super::{to_u32, Db};
use crate::config::PricingConfig;
use crate::error::{is_unique_violation, ConflictKind, DispatchError, Result, UnavailableReason};
use crate::model::{
    Assignment, Booking, Coord, DriverId, Location, LocationId, Passenger, PassengerId, Ride,
    RideId, RideStatus,
};
use crate::pricing::quote_price_cents;
use crate::routing::TravelTimeOracle;

const RIDE_COLUMNS: &str =
    "ride_id, start_location, end_location, status, duration_minutes, profit, environmental";

fn ride_from_row(row: &Row<'_>) -> rusqlite::Result<Ride> {
    Ok(Ride {
        id: row.get(0)?,
        start: row.get(1)?,
        end: row.get(2)?,
        status: row.get(3)?,
        duration_minutes: row.get(4)?,
        profit: row.get(5)?,
        environmental: row.get(6)?,
    })
}

/// Result of [`RideStore::quote`].
#[derive(Debug, Clone, Serialize)]
pub struct RideQuote {
    pub ride: Ride,
    pub start: Location,
    pub end: Location,
    pub price_cents: i64,
    /// True when an existing pending ride for the route was returned.
    pub reused: bool,
}

/// A pending ride as seen by the dispatcher, with both endpoints resolved.
#[derive(Debug, Clone)]
pub struct PendingCandidate {
    pub ride: Ride,
    pub start: Location,
    pub end: Location,
    pub headcount: u32,
}

/// A passenger's booking together with the ride it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct BookedRide {
    pub booking: Booking,
    pub ride: Ride,
}

/// Owns the pending → active → complete lifecycle on the ride side.
///
/// The store is stateless apart from its collaborators; every call takes the
/// caller's own [`Db`] handle.
pub struct RideStore {
    oracle: Arc<dyn TravelTimeOracle>,
    pricing: PricingConfig,
}

impl RideStore {
    pub fn new(oracle: Arc<dyn TravelTimeOracle>, pricing: PricingConfig) -> Self {
        Self { oracle, pricing }
    }

    /// Return the pending ride for `start -> end`, creating it if none exists.
    ///
    /// The travel-time estimate runs with no transaction open. Two quotes racing
    /// for the same route both end up with the same ride: the loser either sees
    /// the winner's row on its re-check or trips the pending-route unique index
    /// and re-reads it.
    pub fn quote(
        &self,
        db: &mut Db,
        start: LocationId,
        end: LocationId,
        passenger: PassengerId,
    ) -> Result<RideQuote> {
        if start == end {
            return Err(DispatchError::validation(
                "start and end location must differ",
            ));
        }

        let (start_loc, end_loc) = {
            let conn = db.conn();
            let start_loc =
                find_location(conn, start)?.ok_or_else(|| DispatchError::not_found("location", start))?;
            let end_loc =
                find_location(conn, end)?.ok_or_else(|| DispatchError::not_found("location", end))?;
            if find_passenger(conn, passenger)?.is_none() {
                return Err(DispatchError::not_found("passenger", passenger));
            }
            if let Some(ride) = open_booking_for_passenger(conn, passenger)? {
                return Err(DispatchError::Conflict(
                    ConflictKind::PassengerHasOpenBooking { ride },
                ));
            }
            if let Some(ride) = find_pending(conn, start, end)? {
                return Ok(self.build_quote(ride, start_loc, end_loc, true));
            }
            (start_loc, end_loc)
        };

        let duration = self
            .oracle
            .estimate(start_loc.coord, end_loc.coord)
            .map_err(|err| {
                tracing::warn!(%start, %end, error = %err, "route estimate failed during quote");
                DispatchError::Unavailable(UnavailableReason::RouteEstimate(err))
            })?;

        let tx = db.write_tx()?;
        if let Some(ride) = find_pending(&tx, start, end)? {
            return Ok(self.build_quote(ride, start_loc, end_loc, true));
        }
        let inserted = tx.execute(
            "INSERT INTO rides (start_location, end_location, status, duration_minutes, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![start, end, RideStatus::Pending, duration, Utc::now()],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                drop(tx);
                tracing::debug!(%start, %end, "pending ride created concurrently, merging");
                return match find_pending(db.conn(), start, end)? {
                    Some(ride) => Ok(self.build_quote(ride, start_loc, end_loc, true)),
                    None => Err(DispatchError::Conflict(ConflictKind::PendingRouteRace)),
                };
            }
            Err(err) => return Err(err.into()),
        }
        let id = RideId(tx.last_insert_rowid());
        tx.commit()?;

        tracing::info!(ride = %id, %start, %end, duration_minutes = duration, "pending ride created");
        let ride = Ride {
            id,
            start,
            end,
            status: RideStatus::Pending,
            duration_minutes: duration,
            profit: None,
            environmental: None,
        };
        Ok(self.build_quote(ride, start_loc, end_loc, false))
    }

    fn build_quote(&self, ride: Ride, start: Location, end: Location, reused: bool) -> RideQuote {
        RideQuote {
            price_cents: quote_price_cents(ride.duration_minutes, &self.pricing),
            ride,
            start,
            end,
            reused,
        }
    }

    /// Move an active ride to complete and release its driver.
    pub fn complete(&self, db: &mut Db, ride: RideId) -> Result<Ride> {
        let tx = db.write_tx()?;
        let mut current =
            find_ride(&tx, ride)?.ok_or_else(|| DispatchError::not_found("ride", ride))?;
        if !current.status.can_transition_to(RideStatus::Complete) {
            return Err(DispatchError::InvalidTransition {
                ride,
                from: current.status,
                to: RideStatus::Complete,
            });
        }
        tx.execute(
            "UPDATE rides SET status = ?1 WHERE ride_id = ?2 AND status = ?3",
            params![RideStatus::Complete, ride, RideStatus::Active],
        )?;
        tx.execute("UPDATE operates SET active = 0 WHERE ride_id = ?1", [ride])?;
        tx.commit()?;

        tracing::info!(%ride, "ride complete");
        current.status = RideStatus::Complete;
        Ok(current)
    }

    /// Re-estimate the duration of every pending ride. Rides claimed while the
    /// estimates were running keep their recorded duration. Returns how many
    /// rows changed.
    pub fn refresh_pending_durations(&self, db: &mut Db) -> Result<usize> {
        let candidates = pending_candidates(db)?;
        let mut estimates = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            match self.oracle.estimate(candidate.start.coord, candidate.end.coord) {
                Ok(minutes) => estimates.push((candidate.ride.id, minutes)),
                Err(err) => {
                    tracing::warn!(ride = %candidate.ride.id, error = %err, "skipping duration refresh");
                }
            }
        }

        let tx = db.write_tx()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE rides SET duration_minutes = ?1 WHERE ride_id = ?2 AND status = 'pending'",
            )?;
            for (ride, minutes) in &estimates {
                updated += stmt.execute(params![minutes, ride])?;
            }
        }
        tx.commit()?;
        tracing::info!(updated, candidates = candidates.len(), "pending durations refreshed");
        Ok(updated)
    }

    /// Raw travel-time estimate between two stored locations.
    pub fn estimate_route(&self, db: &Db, start: LocationId, end: LocationId) -> Result<f64> {
        let from = find_location(db.conn(), start)?
            .ok_or_else(|| DispatchError::not_found("location", start))?;
        let to = find_location(db.conn(), end)?
            .ok_or_else(|| DispatchError::not_found("location", end))?;
        Ok(self.oracle.estimate(from.coord, to.coord)?)
    }
}

// ── Read paths ──────────────────────────────────────────────────────────

pub(crate) fn find_ride(conn: &Connection, id: RideId) -> Result<Option<Ride>> {
    Ok(conn
        .query_row(
            &format!("SELECT {RIDE_COLUMNS} FROM rides WHERE ride_id = ?1"),
            [id],
            ride_from_row,
        )
        .optional()?)
}

pub fn get_ride(db: &Db, id: RideId) -> Result<Ride> {
    find_ride(db.conn(), id)?.ok_or_else(|| DispatchError::not_found("ride", id))
}

pub fn list_rides(db: &Db, status: Option<RideStatus>) -> Result<Vec<Ride>> {
    let mut stmt = db.conn().prepare(&format!(
        "SELECT {RIDE_COLUMNS} FROM rides WHERE ?1 IS NULL OR status = ?1 ORDER BY ride_id"
    ))?;
    let rows = stmt.query_map([status], ride_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn find_pending(
    conn: &Connection,
    start: LocationId,
    end: LocationId,
) -> Result<Option<Ride>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {RIDE_COLUMNS} FROM rides \
                 WHERE start_location = ?1 AND end_location = ?2 AND status = 'pending'"
            ),
            [start, end],
            ride_from_row,
        )
        .optional()?)
}

/// Every pending ride with resolved endpoints and current headcount, read in
/// one statement so all rows come from the same snapshot.
pub fn pending_candidates(db: &Db) -> Result<Vec<PendingCandidate>> {
    let mut stmt = db.conn().prepare(
        "SELECT r.ride_id, r.start_location, r.end_location, r.status, r.duration_minutes, \
                r.profit, r.environmental, \
                s.name, s.lat, s.lng, e.name, e.lat, e.lng, \
                (SELECT count(*) FROM bookings b WHERE b.ride_id = r.ride_id) \
         FROM rides r \
         JOIN locations s ON s.location_id = r.start_location \
         JOIN locations e ON e.location_id = r.end_location \
         WHERE r.status = 'pending' \
         ORDER BY r.ride_id",
    )?;
    let rows = stmt.query_map([], |row| {
        let ride = ride_from_row(row)?;
        Ok(PendingCandidate {
            start: Location {
                id: ride.start,
                name: row.get(7)?,
                coord: Coord {
                    lat: row.get(8)?,
                    lng: row.get(9)?,
                },
            },
            end: Location {
                id: ride.end,
                name: row.get(10)?,
                coord: Coord {
                    lat: row.get(11)?,
                    lng: row.get(12)?,
                },
            },
            headcount: to_u32(row.get(13)?, 13)?,
            ride,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn headcount(conn: &Connection, ride: RideId) -> Result<u32> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM bookings WHERE ride_id = ?1",
        [ride],
        |row| row.get(0),
    )?;
    Ok(to_u32(count, 0)?)
}

pub(crate) fn passengers_on_ride(conn: &Connection, ride: RideId) -> Result<Vec<Passenger>> {
    let mut stmt = conn.prepare(
        "SELECT p.passenger_id, p.name, p.email, p.phone_number \
         FROM bookings b JOIN passengers p ON p.passenger_id = b.passenger_id \
         WHERE b.ride_id = ?1 ORDER BY b.booked_at, p.passenger_id",
    )?;
    let rows = stmt.query_map([ride], |row| {
        Ok(Passenger {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            phone_number: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Passengers booked on `ride`, in booking order.
pub fn ride_passengers(db: &Db, ride: RideId) -> Result<Vec<Passenger>> {
    if find_ride(db.conn(), ride)?.is_none() {
        return Err(DispatchError::not_found("ride", ride));
    }
    passengers_on_ride(db.conn(), ride)
}

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        driver: row.get(0)?,
        ride: row.get(1)?,
        active: row.get(2)?,
        assigned_at: row.get(3)?,
    })
}

pub(crate) fn find_active_assignment(
    conn: &Connection,
    driver: DriverId,
) -> Result<Option<Assignment>> {
    Ok(conn
        .query_row(
            "SELECT driver_id, ride_id, active, assigned_at FROM operates \
             WHERE driver_id = ?1 AND active = 1",
            [driver],
            assignment_from_row,
        )
        .optional()?)
}

/// The ride `driver` is currently operating, if any.
pub fn active_assignment(db: &Db, driver: DriverId) -> Result<Option<Assignment>> {
    find_active_assignment(db.conn(), driver)
}

/// A ride on which `passenger` holds a booking and that has not completed yet.
pub(crate) fn open_booking_for_passenger(
    conn: &Connection,
    passenger: PassengerId,
) -> Result<Option<RideId>> {
    let mut stmt = conn.prepare(
        "SELECT b.ride_id, r.status FROM bookings b JOIN rides r ON r.ride_id = b.ride_id \
         WHERE b.passenger_id = ?1 ORDER BY b.ride_id",
    )?;
    let mut rows = stmt.query([passenger])?;
    while let Some(row) = rows.next()? {
        let status: RideStatus = row.get(1)?;
        if !status.is_terminal() {
            return Ok(Some(row.get(0)?));
        }
    }
    Ok(None)
}

pub(crate) fn booking_from_row(row: &Row<'_>) -> rusqlite::Result<Booking> {
    Ok(Booking {
        ride: row.get(0)?,
        passenger: row.get(1)?,
        booked_at: row.get(2)?,
        payment_ref: row.get(3)?,
    })
}

pub(crate) fn find_booking(
    conn: &Connection,
    ride: RideId,
    passenger: PassengerId,
) -> Result<Option<Booking>> {
    Ok(conn
        .query_row(
            "SELECT ride_id, passenger_id, booked_at, payment_ref FROM bookings \
             WHERE ride_id = ?1 AND passenger_id = ?2",
            params![ride, passenger],
            booking_from_row,
        )
        .optional()?)
}

/// Every booking a passenger holds, newest first.
pub fn bookings_for_passenger(db: &Db, passenger: PassengerId) -> Result<Vec<BookedRide>> {
    if find_passenger(db.conn(), passenger)?.is_none() {
        return Err(DispatchError::not_found("passenger", passenger));
    }
    let mut stmt = db.conn().prepare(
        "SELECT b.ride_id, b.passenger_id, b.booked_at, b.payment_ref, \
                r.ride_id, r.start_location, r.end_location, r.status, r.duration_minutes, \
                r.profit, r.environmental \
         FROM bookings b JOIN rides r ON r.ride_id = b.ride_id \
         WHERE b.passenger_id = ?1 ORDER BY b.booked_at DESC, b.ride_id DESC",
    )?;
    let rows = stmt.query_map([passenger], |row| {
        Ok(BookedRide {
            booking: booking_from_row(row)?,
            ride: Ride {
                id: row.get(4)?,
                start: row.get(5)?,
                end: row.get(6)?,
                status: row.get(7)?,
                duration_minutes: row.get(8)?,
                profit: row.get(9)?,
                environmental: row.get(10)?,
            },
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
