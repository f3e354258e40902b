//! Reproducible sample data for demos and manual testing.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use dispatch_core::ledger::{BookingLedger, PaymentConfirmation};
use dispatch_core::model::{Coord, RideId};
use dispatch_core::store::{fleet, locations, Db};
use dispatch_core::{ConflictKind, DispatchError, RideStore};

use crate::CliError;

const LOCATIONS: &[(&str, f64, f64)] = &[
    ("KL Sentral", 3.1342, 101.6865),
    ("Pasar Seni", 3.1425, 101.6955),
    ("KLCC", 3.1579, 101.7116),
    ("Bukit Bintang", 3.1466, 101.7113),
    ("Mid Valley", 3.1177, 101.6774),
    ("Bangsar", 3.1300, 101.6790),
    ("Sentul", 3.1833, 101.6889),
    ("Titiwangsa", 3.1735, 101.6953),
];

const VEHICLES: &[(u32, u32, &str)] = &[
    (12, 2, "WKL1001"),
    (16, 2, "WKL1002"),
    (20, 4, "WKL1003"),
];

const DRIVERS: &[(&str, &str)] = &[
    ("Aminah Razak", "aminah@fleet.example"),
    ("Daniel Lim", "daniel@fleet.example"),
    ("Kavitha Nair", "kavitha@fleet.example"),
];

const PASSENGERS: usize = 24;

#[derive(Debug, Default, Serialize)]
pub struct SeedSummary {
    pub seed: u64,
    pub locations: usize,
    pub vehicles: usize,
    pub drivers: usize,
    pub passengers: usize,
    pub rides: Vec<RideId>,
    pub bookings: usize,
}

/// Insert the fixed fleet and a seeded set of pending rides with bookings.
///
/// Running it twice against the same store fails on the first duplicate name.
pub fn seed(db: &mut Db, rides: &RideStore, seed: u64, ride_count: usize) -> Result<SeedSummary, CliError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut summary = SeedSummary {
        seed,
        ..Default::default()
    };

    let mut stops = Vec::with_capacity(LOCATIONS.len());
    for &(name, lat, lng) in LOCATIONS {
        stops.push(locations::add_location(db, name, Coord::new(lat, lng)?)?);
    }
    summary.locations = stops.len();

    for &(capacity, accessible, licence) in VEHICLES {
        fleet::register_vehicle(db, capacity, accessible, licence)?;
        summary.vehicles += 1;
    }
    for (i, &(name, email)) in DRIVERS.iter().enumerate() {
        let driver = fleet::register_driver(db, name, email, &format!("seed-{seed}-{i}"))?;
        fleet::assign_vehicle(db, driver.id, VEHICLES[i % VEHICLES.len()].2)?;
        summary.drivers += 1;
    }

    let mut riders = Vec::with_capacity(PASSENGERS);
    for i in 0..PASSENGERS {
        let phone = format!("+6012{:07}", rng.gen_range(0..10_000_000));
        riders.push(fleet::register_passenger(
            db,
            &format!("Passenger {i}"),
            &format!("passenger{i}@riders.example"),
            Some(&phone),
        )?);
    }
    summary.passengers = riders.len();
    riders.shuffle(&mut rng);

    let mut waiting = riders.into_iter();
    for _ in 0..ride_count {
        let mut route = stops.choose_multiple(&mut rng, 2);
        let (Some(start), Some(end)) = (route.next(), route.next()) else {
            break;
        };
        let headcount = rng.gen_range(1..=4);
        let group: Vec<_> = waiting.by_ref().take(headcount).collect();
        let Some(first) = group.first() else {
            break;
        };

        let quote = match rides.quote(db, start.id, end.id, first.id) {
            Ok(quote) => quote,
            Err(DispatchError::Conflict(ConflictKind::PassengerHasOpenBooking { .. })) => continue,
            Err(err) => return Err(err.into()),
        };
        if !quote.reused {
            summary.rides.push(quote.ride.id);
        }
        for rider in &group {
            let event = PaymentConfirmation {
                ride_id: quote.ride.id,
                passenger_id: rider.id,
                payment_ref: format!("seed-{seed}-{}-{}", quote.ride.id, rider.id),
            };
            if BookingLedger::confirm_payment(db, &event)?.is_created() {
                summary.bookings += 1;
            }
        }
    }

    tracing::info!(
        seed,
        rides = summary.rides.len(),
        bookings = summary.bookings,
        "sample data seeded"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dispatch_core::config::PricingConfig;
    use dispatch_core::routing::GridTravelTimeOracle;
    use dispatch_core::test_helpers::memory_db;

    use super::*;

    fn store() -> RideStore {
        RideStore::new(Arc::new(GridTravelTimeOracle::default()), PricingConfig::default())
    }

    #[test]
    fn same_seed_same_rides() {
        let (mut a, mut b) = (memory_db(), memory_db());
        let first = seed(&mut a, &store(), 7, 5).expect("first seed");
        let second = seed(&mut b, &store(), 7, 5).expect("second seed");
        assert_eq!(first.rides, second.rides);
        assert_eq!(first.bookings, second.bookings);
        assert!(first.bookings >= first.rides.len());
        assert_eq!(first.passengers, PASSENGERS);
    }

    #[test]
    fn reseeding_a_store_fails() {
        let mut db = memory_db();
        seed(&mut db, &store(), 1, 2).expect("seed");
        assert!(matches!(
            seed(&mut db, &store(), 1, 2),
            Err(CliError::Dispatch(DispatchError::Conflict(
                ConflictKind::DuplicateLocationName
            )))
        ));
    }
}
