//! Persistent entities of the minibus fleet: locations, vehicles, drivers,
//! passengers, rides, bookings and driver assignments.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($name)
            }
        }
    };
}

id_type!(
    /// Row id of a named pickup/drop-off point.
    LocationId
);
id_type!(VehicleId);
id_type!(DriverId);
id_type!(PassengerId);
id_type!(
    /// Row id of a ride; also the dispatch tie-break key (lowest wins).
    RideId
);

/// A validated latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lng: f64,
}

impl Coord {
    /// Build a coordinate, rejecting non-finite or out-of-range values.
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        h3o::LatLng::new(lat, lng)
            .map_err(|err| DispatchError::validation(format!("invalid coordinate: {err}")))?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(DispatchError::validation(format!(
                "coordinate ({lat}, {lng}) out of range"
            )));
        }
        Ok(Self { lat, lng })
    }

    /// The `(0, 0)` fix some GPS stacks report when they have no position.
    pub fn is_null_island(&self) -> bool {
        self.lat == 0.0 && self.lng == 0.0
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

/// Lifecycle of a ride. Transitions only move forward:
/// `Pending -> Active -> Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    Active,
    Complete,
}

impl RideStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Active => "active",
            RideStatus::Complete => "complete",
        }
    }

    /// Pending and Active rides are still unresolved for their passengers.
    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Complete)
    }

    pub fn can_transition_to(self, next: RideStatus) -> bool {
        matches!(
            (self, next),
            (RideStatus::Pending, RideStatus::Active) | (RideStatus::Active, RideStatus::Complete)
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RideStatus::Pending),
            "active" => Ok(RideStatus::Active),
            "complete" => Ok(RideStatus::Complete),
            other => Err(format!("unknown ride status '{other}'")),
        }
    }
}

impl ToSql for RideStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RideStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|err: String| FromSqlError::Other(err.into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub coord: Coord,
}

/// A minibus. `disability_seats <= capacity` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub capacity: u32,
    pub disability_seats: u32,
    /// Last reported position; `None` until its driver first reports one.
    pub coord: Option<Coord>,
    pub licence_tag: String,
}

/// Longest licence tag a vehicle may carry.
pub const MAX_LICENCE_TAG_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub name: String,
    pub email: String,
    /// Opaque credential digest issued outside this crate.
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub assigned_vehicle: Option<VehicleId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passenger {
    pub id: PassengerId,
    pub name: String,
    pub email: String,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: RideId,
    pub start: LocationId,
    pub end: LocationId,
    pub status: RideStatus,
    /// Estimated start-to-end travel time in minutes.
    pub duration_minutes: f64,
    /// Route profit recorded when the ride was claimed.
    pub profit: Option<f64>,
    /// Carbon saved (same units as the scoring rates), recorded on claim.
    pub environmental: Option<f64>,
}

/// One paid seat; identity is `(ride, passenger)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub ride: RideId,
    pub passenger: PassengerId,
    pub booked_at: DateTime<Utc>,
    pub payment_ref: String,
}

/// Binds a driver to the ride they operate. `active` drops to false when the
/// ride completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub driver: DriverId,
    pub ride: RideId,
    pub active: bool,
    pub assigned_at: DateTime<Utc>,
}
