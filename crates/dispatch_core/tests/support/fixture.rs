#![allow(dead_code)]

use std::sync::Arc;

use dispatch_core::config::{PricingConfig, StoreConfig};
use dispatch_core::ledger::{BookingLedger, PaymentConfirmation};
use dispatch_core::model::{Coord, Driver, Location, Passenger, RideId};
use dispatch_core::routing::{FixedTableOracle, TravelTimeOracle};
use dispatch_core::store::{fleet, locations, Db};
use dispatch_core::RideStore;
use dispatch_core::test_helpers::coord;
use tempfile::TempDir;

/// An on-disk database that every test thread can open its own handle to.
pub struct TestStore {
    _dir: TempDir,
    config: StoreConfig,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = StoreConfig {
            path: dir.path().join("minibus.db"),
            busy_timeout_ms: 10_000,
        };
        Db::open(&config).expect("open").migrate().expect("migrate");
        Self { _dir: dir, config }
    }

    /// A fresh connection, as a separate request handler would open.
    pub fn open(&self) -> Db {
        Db::open(&self.config).expect("open handle")
    }
}

pub fn location(db: &mut Db, name: &str, lat: f64, lng: f64) -> Location {
    locations::add_location(db, name, coord(lat, lng)).expect("location")
}

pub fn driver(db: &mut Db, name: &str) -> Driver {
    let email = format!("{}@drivers.test", name.to_lowercase());
    fleet::register_driver(db, name, &email, "hash").expect("driver")
}

/// `count` passengers with distinct emails and phone numbers.
pub fn passengers(db: &mut Db, prefix: &str, count: usize) -> Vec<Passenger> {
    (0..count)
        .map(|i| {
            let email = format!("{prefix}{i}@riders.test");
            let phone = format!("+6010{i:07}");
            fleet::register_passenger(db, &format!("{prefix} {i}"), &email, Some(&phone))
                .expect("passenger")
        })
        .collect()
}

/// Quote `start -> end` and confirm a booking for every passenger.
pub fn book_ride(
    db: &mut Db,
    rides: &RideStore,
    start: &Location,
    end: &Location,
    riders: &[Passenger],
) -> RideId {
    let first = riders.first().expect("at least one passenger");
    let quote = rides.quote(db, start.id, end.id, first.id).expect("quote");
    for rider in riders {
        let event = PaymentConfirmation {
            ride_id: quote.ride.id,
            passenger_id: rider.id,
            payment_ref: format!("pay-{}-{}", quote.ride.id, rider.id),
        };
        BookingLedger::confirm_payment(db, &event).expect("booking");
    }
    quote.ride.id
}

/// Three pending rides with headcounts 2, 3 and 1; route times 10, 8 and 20
/// minutes; approach times 3, 12 and 1 minutes from `depot`.
pub struct ThreeRideScenario {
    pub store: TestStore,
    pub depot: Coord,
    pub rides: [RideId; 3],
    pub starts: [Location; 3],
    pub driver: Driver,
    pub oracle: Arc<FixedTableOracle>,
}

impl ThreeRideScenario {
    pub const EXPECTED_ROUTE_PROFIT: [f64; 3] = [1174.0, 2120.0, 558.0];

    pub fn build() -> Self {
        Self::build_with(|table| table)
    }

    /// Build the scenario, letting the caller adjust the travel-time table.
    pub fn build_with(adjust: impl FnOnce(FixedTableOracle) -> FixedTableOracle) -> Self {
        let store = TestStore::new();
        let mut db = store.open();
        let depot = coord(3.1390, 101.6869);

        let a_start = location(&mut db, "Pasar Seni", 3.1425, 101.6955);
        let a_end = location(&mut db, "Bangsar", 3.1300, 101.6790);
        let b_start = location(&mut db, "Sentul", 3.1833, 101.6889);
        let b_end = location(&mut db, "Titiwangsa", 3.1735, 101.6953);
        let c_start = location(&mut db, "KLCC", 3.1579, 101.7116);
        let c_end = location(&mut db, "Putrajaya", 2.9264, 101.6964);

        let table = FixedTableOracle::new()
            .with_route(a_start.coord, a_end.coord, 10.0)
            .with_route(b_start.coord, b_end.coord, 8.0)
            .with_route(c_start.coord, c_end.coord, 20.0)
            .with_route(depot, a_start.coord, 3.0)
            .with_route(depot, b_start.coord, 12.0)
            .with_route(depot, c_start.coord, 1.0);
        let oracle = Arc::new(adjust(table));
        let rides = RideStore::new(oracle.clone(), PricingConfig::default());

        let riders = passengers(&mut db, "rider", 6);
        let a = book_ride(&mut db, &rides, &a_start, &a_end, &riders[0..2]);
        let b = book_ride(&mut db, &rides, &b_start, &b_end, &riders[2..5]);
        let c = book_ride(&mut db, &rides, &c_start, &c_end, &riders[5..6]);
        let driver = driver(&mut db, "Hafiz");

        Self {
            store,
            depot,
            rides: [a, b, c],
            starts: [a_start, b_start, c_start],
            driver,
            oracle,
        }
    }

    pub fn oracle(&self) -> Arc<dyn TravelTimeOracle> {
        self.oracle.clone()
    }
}
