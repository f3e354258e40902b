mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dispatch_core::config::{PricingConfig, ScoringConfig};
use dispatch_core::model::{Coord, RideId, RideStatus};
use dispatch_core::notify::{ride_starting_message, LogNotificationGateway};
use dispatch_core::routing::{GridTravelTimeOracle, OracleError, TravelTimeOracle};
use dispatch_core::store::rides::{active_assignment, get_ride};
use dispatch_core::store::Db;
use dispatch_core::test_helpers::{coord, FailingNotifier, FlakyOracle, RecordingNotifier};
use dispatch_core::{ConflictKind, DispatchEngine, DispatchError, RideStore, UnavailableReason};
use support::fixture::{book_ride, driver, location, passengers, TestStore, ThreeRideScenario};

fn engine(
    oracle: Arc<dyn TravelTimeOracle>,
    notifier: Arc<dyn dispatch_core::notify::NotificationGateway>,
) -> DispatchEngine {
    DispatchEngine::new(oracle, notifier, ScoringConfig::default())
}

#[test]
fn claims_the_most_profitable_ride() {
    let scenario = ThreeRideScenario::build();
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = engine(scenario.oracle(), notifier.clone());
    let mut db = scenario.store.open();

    let claim = engine
        .claim_best_ride(&mut db, scenario.driver.id, scenario.depot)
        .expect("claim");

    let [_, b, _] = scenario.rides;
    assert_eq!(claim.ride.ride_id, b);
    assert_eq!(claim.route_profit, ThreeRideScenario::EXPECTED_ROUTE_PROFIT[1]);
    assert!((claim.carbon_saved - 14.82).abs() < 1e-9);
    assert_eq!(claim.ride.num_passengers, 3);
    assert_eq!(claim.ride.passengers.len(), 3);
    assert_eq!(claim.ride.time_start_end, 8.0);
    assert_eq!(claim.ride.time_vehicle_start, 12.0);
    assert_eq!(claim.ride.start.name, "Sentul");

    let stored = get_ride(&db, b).expect("ride");
    assert_eq!(stored.status, RideStatus::Active);
    assert_eq!(stored.profit, Some(2120.0));
    assert_eq!(stored.duration_minutes, 8.0);
    assert!(stored.environmental.is_some());

    let assignment = active_assignment(&db, scenario.driver.id)
        .expect("lookup")
        .expect("assignment");
    assert_eq!(assignment.ride, b);

    for other in [scenario.rides[0], scenario.rides[2]] {
        assert_eq!(get_ride(&db, other).expect("ride").status, RideStatus::Pending);
    }

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].phone_numbers.len(), 3);
    assert_eq!(
        sent[0].message,
        ride_starting_message("Sentul", "Titiwangsa", 12.0, 8.0)
    );
}

#[test]
fn second_claim_before_completion_conflicts() {
    let scenario = ThreeRideScenario::build();
    let engine = engine(scenario.oracle(), Arc::new(RecordingNotifier::default()));
    let mut db = scenario.store.open();

    let first = engine
        .claim_best_ride(&mut db, scenario.driver.id, scenario.depot)
        .expect("first claim");
    let err = engine
        .claim_best_ride(&mut db, scenario.driver.id, scenario.depot)
        .expect_err("second claim");
    assert!(matches!(
        err,
        DispatchError::Conflict(ConflictKind::DriverAlreadyAssigned { ride }) if ride == first.ride.ride_id
    ));

    // Once the ride completes the driver is free again and gets the next best.
    let rides = RideStore::new(scenario.oracle(), Default::default());
    rides.complete(&mut db, first.ride.ride_id).expect("complete");
    assert!(active_assignment(&db, scenario.driver.id)
        .expect("lookup")
        .is_none());
    let next = engine
        .claim_best_ride(&mut db, scenario.driver.id, scenario.depot)
        .expect("next claim");
    assert_eq!(next.ride.ride_id, scenario.rides[0]);
    assert_eq!(next.route_profit, ThreeRideScenario::EXPECTED_ROUTE_PROFIT[0]);
}

#[test]
fn notification_failure_keeps_the_claim() {
    let scenario = ThreeRideScenario::build();
    let notifier = Arc::new(FailingNotifier::default());
    let engine = engine(scenario.oracle(), notifier.clone());
    let mut db = scenario.store.open();

    let claim = engine
        .claim_best_ride(&mut db, scenario.driver.id, scenario.depot)
        .expect("claim despite notifier failure");
    assert_eq!(notifier.attempts(), 1);
    assert_eq!(
        get_ride(&db, claim.ride.ride_id).expect("ride").status,
        RideStatus::Active
    );
}

#[test]
fn failed_estimate_only_drops_that_candidate() {
    let scenario = ThreeRideScenario::build();
    let flaky = FlakyOracle::new(scenario.oracle.clone())
        .failing_route(scenario.depot, scenario.starts[1].coord);
    let engine = engine(Arc::new(flaky), Arc::new(RecordingNotifier::default()));
    let mut db = scenario.store.open();

    let claim = engine
        .claim_best_ride(&mut db, scenario.driver.id, scenario.depot)
        .expect("claim");
    assert_eq!(claim.ride.ride_id, scenario.rides[0]);
    assert_eq!(
        get_ride(&db, scenario.rides[1]).expect("ride").status,
        RideStatus::Pending
    );
}

#[test]
fn no_estimates_at_all_is_unavailable() {
    let scenario = ThreeRideScenario::build();
    let mut flaky = FlakyOracle::new(scenario.oracle.clone());
    for start in &scenario.starts {
        flaky = flaky.failing_route(scenario.depot, start.coord);
    }
    let engine = engine(Arc::new(flaky), Arc::new(RecordingNotifier::default()));
    let mut db = scenario.store.open();

    let err = engine
        .claim_best_ride(&mut db, scenario.driver.id, scenario.depot)
        .expect_err("nothing scorable");
    assert!(matches!(
        err,
        DispatchError::Unavailable(UnavailableReason::NoRouteEstimates { candidates: 3 })
    ));
    assert!(err.is_retryable());
    for ride in scenario.rides {
        assert_eq!(get_ride(&db, ride).expect("ride").status, RideStatus::Pending);
    }
}

#[test]
fn each_route_is_estimated_once_per_claim() {
    let scenario = ThreeRideScenario::build();
    let counting = Arc::new(FlakyOracle::new(scenario.oracle.clone()));
    let engine = engine(counting.clone(), Arc::new(RecordingNotifier::default()));
    let mut db = scenario.store.open();

    engine
        .claim_best_ride(&mut db, scenario.driver.id, scenario.depot)
        .expect("claim");
    assert_eq!(counting.calls(), 6);
}

/// Every estimate lets a rival driver take the only pending ride while a new
/// booking arrives on a fresh route.
struct RivalDemandOracle {
    store: Arc<TestStore>,
    arrivals: AtomicUsize,
}

impl RivalDemandOracle {
    fn arrive(&self, db: &mut Db) -> RideId {
        let n = self.arrivals.fetch_add(1, Ordering::SeqCst);
        let lat = 3.0 + n as f64 * 0.01;
        let start = location(db, &format!("north {n}"), lat, 101.60);
        let end = location(db, &format!("south {n}"), lat, 101.70);
        let riders = passengers(db, &format!("arrival{n}-"), 1);
        let rides = RideStore::new(
            Arc::new(GridTravelTimeOracle::default()),
            PricingConfig::default(),
        );
        book_ride(db, &rides, &start, &end, &riders)
    }
}

impl TravelTimeOracle for RivalDemandOracle {
    fn estimate(&self, from: Coord, to: Coord) -> Result<f64, OracleError> {
        let mut db = self.store.open();
        let name = format!("Rival{}", self.arrivals.load(Ordering::SeqCst));
        let rival = driver(&mut db, &name);
        engine(
            Arc::new(GridTravelTimeOracle::default()),
            Arc::new(LogNotificationGateway),
        )
        .claim_best_ride(&mut db, rival.id, coord(3.0, 101.65))
        .expect("rival claim");
        self.arrive(&mut db);
        GridTravelTimeOracle::default().estimate(from, to)
    }
}

#[test]
fn gives_up_only_while_new_rides_keep_being_taken() {
    let store = Arc::new(TestStore::new());
    let oracle = Arc::new(RivalDemandOracle {
        store: store.clone(),
        arrivals: AtomicUsize::new(0),
    });
    let mut db = store.open();
    let first = oracle.arrive(&mut db);
    let me = driver(&mut db, "Hafiz");

    let err = engine(oracle.clone(), Arc::new(RecordingNotifier::default()))
        .with_max_claim_attempts(3)
        .claim_best_ride(&mut db, me.id, coord(3.0, 101.65))
        .expect_err("every ride was taken first");

    assert!(matches!(
        err,
        DispatchError::Unavailable(UnavailableReason::ContentionExhausted { attempts: 3 })
    ));
    assert!(err.is_retryable());
    assert!(active_assignment(&db, me.id).expect("assignment").is_none());
    assert_eq!(get_ride(&db, first).expect("ride").status, RideStatus::Active);
}
