//! Vehicles, drivers and passengers, plus the handlers that bind a driver to a
//! vehicle and move that vehicle around.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{coord_from_columns, to_u32, Db};
use crate::error::{is_unique_violation, ConflictKind, DispatchError, Result};
use crate::model::{
    Coord, Driver, DriverId, Passenger, PassengerId, Vehicle, VehicleId, MAX_LICENCE_TAG_LEN,
};

// ── Vehicles ────────────────────────────────────────────────────────────

fn vehicle_from_row(row: &Row<'_>) -> rusqlite::Result<Vehicle> {
    Ok(Vehicle {
        id: row.get(0)?,
        capacity: to_u32(row.get(1)?, 1)?,
        disability_seats: to_u32(row.get(2)?, 2)?,
        coord: coord_from_columns(row.get(3)?, row.get(4)?),
        licence_tag: row.get(5)?,
    })
}

const VEHICLE_COLUMNS: &str = "vehicle_id, capacity, disability_seats, lat, lng, licence_tag";

pub fn register_vehicle(
    db: &mut Db,
    capacity: u32,
    disability_seats: u32,
    licence_tag: &str,
) -> Result<Vehicle> {
    let licence_tag = licence_tag.trim();
    if licence_tag.is_empty() || licence_tag.chars().count() > MAX_LICENCE_TAG_LEN {
        return Err(DispatchError::validation(format!(
            "licence tag must be 1..={MAX_LICENCE_TAG_LEN} characters"
        )));
    }
    if capacity == 0 {
        return Err(DispatchError::validation("capacity must be positive"));
    }
    if disability_seats > capacity {
        return Err(DispatchError::validation(format!(
            "disability seats ({disability_seats}) exceed capacity ({capacity})"
        )));
    }

    let tx = db.write_tx()?;
    let inserted = tx.execute(
        "INSERT INTO vehicles (capacity, disability_seats, licence_tag) VALUES (?1, ?2, ?3)",
        params![i64::from(capacity), i64::from(disability_seats), licence_tag],
    );
    match inserted {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(DispatchError::Conflict(ConflictKind::DuplicateLicence));
        }
        Err(err) => return Err(err.into()),
    }
    let id = VehicleId(tx.last_insert_rowid());
    tx.commit()?;

    tracing::info!(vehicle = %id, %licence_tag, capacity, "vehicle registered");
    Ok(Vehicle {
        id,
        capacity,
        disability_seats,
        coord: None,
        licence_tag: licence_tag.to_string(),
    })
}

pub fn list_vehicles(db: &Db) -> Result<Vec<Vehicle>> {
    let mut stmt = db.conn().prepare(&format!(
        "SELECT {VEHICLE_COLUMNS} FROM vehicles ORDER BY vehicle_id"
    ))?;
    let rows = stmt.query_map([], vehicle_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn vehicle_by_licence(conn: &Connection, licence_tag: &str) -> Result<Vehicle> {
    conn.query_row(
        &format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE licence_tag = ?1"),
        [licence_tag],
        vehicle_from_row,
    )
    .optional()?
    .ok_or_else(|| DispatchError::not_found("vehicle", licence_tag))
}

// ── Drivers ─────────────────────────────────────────────────────────────

fn driver_from_row(row: &Row<'_>) -> rusqlite::Result<Driver> {
    Ok(Driver {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        credential_hash: row.get(3)?,
        assigned_vehicle: row.get(4)?,
    })
}

const DRIVER_COLUMNS: &str = "driver_id, name, email, credential_hash, assigned_vehicle";

pub(crate) fn find_driver(conn: &Connection, id: DriverId) -> Result<Option<Driver>> {
    Ok(conn
        .query_row(
            &format!("SELECT {DRIVER_COLUMNS} FROM drivers WHERE driver_id = ?1"),
            [id],
            driver_from_row,
        )
        .optional()?)
}

pub fn list_drivers(db: &Db) -> Result<Vec<Driver>> {
    let mut stmt = db
        .conn()
        .prepare(&format!("SELECT {DRIVER_COLUMNS} FROM drivers ORDER BY driver_id"))?;
    let rows = stmt.query_map([], driver_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn check_identity(name: &str, email: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(DispatchError::validation("name must not be empty"));
    }
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(DispatchError::validation(format!(
            "'{email}' is not an email address"
        ))),
    }
}

/// Register a driver. `credential_hash` is issued and checked outside the core.
pub fn register_driver(
    db: &mut Db,
    name: &str,
    email: &str,
    credential_hash: &str,
) -> Result<Driver> {
    check_identity(name, email)?;
    if credential_hash.is_empty() {
        return Err(DispatchError::validation("credential hash must not be empty"));
    }

    let tx = db.write_tx()?;
    let inserted = tx.execute(
        "INSERT INTO drivers (name, email, credential_hash) VALUES (?1, ?2, ?3)",
        params![name.trim(), email.trim(), credential_hash],
    );
    match inserted {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(DispatchError::Conflict(ConflictKind::DuplicateEmail));
        }
        Err(err) => return Err(err.into()),
    }
    let id = DriverId(tx.last_insert_rowid());
    tx.commit()?;

    tracing::info!(driver = %id, "driver registered");
    Ok(Driver {
        id,
        name: name.trim().to_string(),
        email: email.trim().to_string(),
        credential_hash: credential_hash.to_string(),
        assigned_vehicle: None,
    })
}

pub fn get_driver(db: &Db, id: DriverId) -> Result<Driver> {
    find_driver(db.conn(), id)?.ok_or_else(|| DispatchError::not_found("driver", id))
}

/// Bind `driver` to the vehicle carrying `licence_tag`.
///
/// Re-assigning the same pair is a no-op. A vehicle drives for one driver at a
/// time; a driver swapping vehicles is simply rebound.
pub fn assign_vehicle(db: &mut Db, driver: DriverId, licence_tag: &str) -> Result<Vehicle> {
    let tx = db.write_tx()?;
    let current = find_driver(&tx, driver)?.ok_or_else(|| DispatchError::not_found("driver", driver))?;
    let vehicle = vehicle_by_licence(&tx, licence_tag.trim())?;

    if current.assigned_vehicle == Some(vehicle.id) {
        return Ok(vehicle);
    }
    let holder: Option<DriverId> = tx
        .query_row(
            "SELECT driver_id FROM drivers WHERE assigned_vehicle = ?1 AND driver_id != ?2",
            params![vehicle.id, driver],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(holder) = holder {
        return Err(DispatchError::Conflict(ConflictKind::VehicleAlreadyAssigned {
            driver: holder,
        }));
    }

    tx.execute(
        "UPDATE drivers SET assigned_vehicle = ?1 WHERE driver_id = ?2",
        params![vehicle.id, driver],
    )?;
    tx.commit()?;
    tracing::info!(%driver, vehicle = %vehicle.id, "vehicle assigned");
    Ok(vehicle)
}

/// Release the driver's binding to the vehicle carrying `licence_tag`.
pub fn unassign_vehicle(db: &mut Db, driver: DriverId, licence_tag: &str) -> Result<()> {
    let tx = db.write_tx()?;
    let current = find_driver(&tx, driver)?.ok_or_else(|| DispatchError::not_found("driver", driver))?;
    let vehicle = vehicle_by_licence(&tx, licence_tag.trim())?;
    if current.assigned_vehicle != Some(vehicle.id) {
        return Err(DispatchError::validation(format!(
            "driver {driver} is not assigned to vehicle {}",
            vehicle.licence_tag
        )));
    }
    tx.execute(
        "UPDATE drivers SET assigned_vehicle = NULL WHERE driver_id = ?1",
        [driver],
    )?;
    tx.commit()?;
    tracing::info!(%driver, vehicle = %vehicle.id, "vehicle unassigned");
    Ok(())
}

/// Record the driver's reported position on their assigned vehicle. This is the
/// only writer of vehicle coordinates.
pub fn update_location(db: &mut Db, driver: DriverId, coord: Coord) -> Result<Vehicle> {
    if coord.is_null_island() {
        return Err(DispatchError::validation(
            "location (0, 0) is not a valid position fix",
        ));
    }
    let tx = db.write_tx()?;
    let current = find_driver(&tx, driver)?.ok_or_else(|| DispatchError::not_found("driver", driver))?;
    let Some(vehicle_id) = current.assigned_vehicle else {
        return Err(DispatchError::validation(format!(
            "driver {driver} has no assigned vehicle"
        )));
    };
    tx.execute(
        "UPDATE vehicles SET lat = ?1, lng = ?2 WHERE vehicle_id = ?3",
        params![coord.lat, coord.lng, vehicle_id],
    )?;
    let vehicle = tx.query_row(
        &format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE vehicle_id = ?1"),
        [vehicle_id],
        vehicle_from_row,
    )?;
    tx.commit()?;
    tracing::debug!(%driver, vehicle = %vehicle_id, %coord, "vehicle position updated");
    Ok(vehicle)
}

// ── Passengers ──────────────────────────────────────────────────────────

fn passenger_from_row(row: &Row<'_>) -> rusqlite::Result<Passenger> {
    Ok(Passenger {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone_number: row.get(3)?,
    })
}

pub(crate) fn find_passenger(conn: &Connection, id: PassengerId) -> Result<Option<Passenger>> {
    Ok(conn
        .query_row(
            "SELECT passenger_id, name, email, phone_number FROM passengers WHERE passenger_id = ?1",
            [id],
            passenger_from_row,
        )
        .optional()?)
}

pub fn register_passenger(
    db: &mut Db,
    name: &str,
    email: &str,
    phone_number: Option<&str>,
) -> Result<Passenger> {
    check_identity(name, email)?;
    let phone_number = phone_number.map(str::trim).filter(|p| !p.is_empty());

    let tx = db.write_tx()?;
    let inserted = tx.execute(
        "INSERT INTO passengers (name, email, phone_number) VALUES (?1, ?2, ?3)",
        params![name.trim(), email.trim(), phone_number],
    );
    match inserted {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(DispatchError::Conflict(ConflictKind::DuplicateEmail));
        }
        Err(err) => return Err(err.into()),
    }
    let id = PassengerId(tx.last_insert_rowid());
    tx.commit()?;

    tracing::info!(passenger = %id, "passenger registered");
    Ok(Passenger {
        id,
        name: name.trim().to_string(),
        email: email.trim().to_string(),
        phone_number: phone_number.map(str::to_string),
    })
}

pub fn get_passenger(db: &Db, id: PassengerId) -> Result<Passenger> {
    find_passenger(db.conn(), id)?.ok_or_else(|| DispatchError::not_found("passenger", id))
}
