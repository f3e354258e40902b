//! Test doubles and fixtures shared by unit and integration tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::model::Coord;
use crate::notify::{NotificationGateway, NotifyError};
use crate::routing::{OracleError, TravelTimeOracle};
use crate::store::Db;

/// A migrated in-memory database.
///
/// # Panics
///
/// Panics if SQLite cannot open or migrate an in-memory database.
pub fn memory_db() -> Db {
    let db = Db::open_in_memory().expect("in-memory database");
    db.migrate().expect("schema migration");
    db
}

/// Build a coordinate from known-good test values.
///
/// # Panics
///
/// Panics if the values are not a valid coordinate.
pub fn coord(lat: f64, lng: f64) -> Coord {
    Coord::new(lat, lng).expect("test coordinate")
}

/// One call to [`RecordingNotifier::notify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub phone_numbers: Vec<String>,
    pub message: String,
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl NotificationGateway for RecordingNotifier {
    fn notify(&self, phone_numbers: &[String], message: &str) -> Result<(), NotifyError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentNotification {
                phone_numbers: phone_numbers.to_vec(),
                message: message.to_string(),
            });
        }
        Ok(())
    }
}

/// Fails every delivery, counting the attempts.
#[derive(Debug, Default)]
pub struct FailingNotifier {
    attempts: AtomicUsize,
}

impl FailingNotifier {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl NotificationGateway for FailingNotifier {
    fn notify(&self, phone_numbers: &[String], _message: &str) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError::Delivery {
            recipient: phone_numbers.first().cloned().unwrap_or_default(),
            reason: "gateway unreachable".into(),
        })
    }
}

type RouteKey = ((u64, u64), (u64, u64));

fn route_key(from: Coord, to: Coord) -> RouteKey {
    (
        (from.lat.to_bits(), from.lng.to_bits()),
        (to.lat.to_bits(), to.lng.to_bits()),
    )
}

/// Wraps an oracle and times out on selected routes. Counts every call.
pub struct FlakyOracle<O> {
    inner: O,
    failing: HashSet<RouteKey>,
    calls: AtomicUsize,
}

impl<O: TravelTimeOracle> FlakyOracle<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make `from -> to` fail with an HTTP timeout.
    pub fn failing_route(mut self, from: Coord, to: Coord) -> Self {
        self.failing.insert(route_key(from, to));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<O: TravelTimeOracle> TravelTimeOracle for FlakyOracle<O> {
    fn estimate(&self, from: Coord, to: Coord) -> Result<f64, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&route_key(from, to)) {
            return Err(OracleError::Http("operation timed out".into()));
        }
        self.inner.estimate(from, to)
    }
}
