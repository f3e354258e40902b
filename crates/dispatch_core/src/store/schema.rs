/// Full schema, safe to apply repeatedly.
pub(super) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS locations (
    location_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT    NOT NULL UNIQUE CHECK (length(name) BETWEEN 1 AND 80),
    lat             REAL    NOT NULL,
    lng             REAL    NOT NULL
);

CREATE TABLE IF NOT EXISTS vehicles (
    vehicle_id          INTEGER PRIMARY KEY AUTOINCREMENT,
    capacity            INTEGER NOT NULL CHECK (capacity > 0),
    disability_seats    INTEGER NOT NULL CHECK (disability_seats >= 0 AND disability_seats <= capacity),
    lat                 REAL,
    lng                 REAL,
    licence_tag         TEXT    NOT NULL UNIQUE CHECK (length(licence_tag) BETWEEN 1 AND 8)
);

CREATE TABLE IF NOT EXISTS drivers (
    driver_id           INTEGER PRIMARY KEY AUTOINCREMENT,
    name                TEXT    NOT NULL,
    email               TEXT    NOT NULL UNIQUE,
    credential_hash     TEXT    NOT NULL,
    assigned_vehicle    INTEGER REFERENCES vehicles(vehicle_id)
);

CREATE TABLE IF NOT EXISTS passengers (
    passenger_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT    NOT NULL,
    email           TEXT    NOT NULL UNIQUE,
    phone_number    TEXT
);

CREATE TABLE IF NOT EXISTS rides (
    ride_id             INTEGER PRIMARY KEY AUTOINCREMENT,
    start_location      INTEGER NOT NULL REFERENCES locations(location_id),
    end_location        INTEGER NOT NULL REFERENCES locations(location_id),
    status              TEXT    NOT NULL CHECK (status IN ('pending', 'active', 'complete')),
    duration_minutes    REAL    NOT NULL,
    profit              REAL,
    environmental       REAL,
    created_at          TEXT    NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS rides_one_pending_per_route
    ON rides (start_location, end_location) WHERE status = 'pending';

CREATE INDEX IF NOT EXISTS rides_by_status ON rides (status);

CREATE TRIGGER IF NOT EXISTS rides_status_forward_only
BEFORE UPDATE OF status ON rides
WHEN NOT (
    OLD.status = NEW.status
    OR (OLD.status = 'pending' AND NEW.status = 'active')
    OR (OLD.status = 'active' AND NEW.status = 'complete')
)
BEGIN
    SELECT RAISE(ABORT, 'ride status may only move forward');
END;

CREATE TABLE IF NOT EXISTS bookings (
    ride_id         INTEGER NOT NULL REFERENCES rides(ride_id),
    passenger_id    INTEGER NOT NULL REFERENCES passengers(passenger_id),
    booked_at       TEXT    NOT NULL,
    payment_ref     TEXT    NOT NULL,
    PRIMARY KEY (ride_id, passenger_id)
);

CREATE INDEX IF NOT EXISTS bookings_by_passenger ON bookings (passenger_id);
CREATE INDEX IF NOT EXISTS bookings_by_date ON bookings (booked_at);

CREATE TABLE IF NOT EXISTS operates (
    ride_id         INTEGER PRIMARY KEY REFERENCES rides(ride_id),
    driver_id       INTEGER NOT NULL REFERENCES drivers(driver_id),
    active          INTEGER NOT NULL CHECK (active IN (0, 1)),
    assigned_at     TEXT    NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS operates_one_active_per_driver
    ON operates (driver_id) WHERE active = 1;
"#;
