//! Named pickup and drop-off points.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::Db;
use crate::error::{is_unique_violation, ConflictKind, DispatchError, Result};
use crate::model::{Coord, Location, LocationId, RideId};

const MAX_NAME_LEN: usize = 80;

pub(crate) fn location_from_row(row: &Row<'_>) -> rusqlite::Result<Location> {
    Ok(Location {
        id: row.get("location_id")?,
        name: row.get("name")?,
        coord: Coord {
            lat: row.get("lat")?,
            lng: row.get("lng")?,
        },
    })
}

/// Register a new location. Names are unique.
pub fn add_location(db: &mut Db, name: &str, coord: Coord) -> Result<Location> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(DispatchError::validation(format!(
            "location name must be 1..={MAX_NAME_LEN} characters"
        )));
    }

    let tx = db.write_tx()?;
    let inserted = tx.execute(
        "INSERT INTO locations (name, lat, lng) VALUES (?1, ?2, ?3)",
        params![name, coord.lat, coord.lng],
    );
    match inserted {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(DispatchError::Conflict(ConflictKind::DuplicateLocationName));
        }
        Err(err) => return Err(err.into()),
    }
    let id = LocationId(tx.last_insert_rowid());
    tx.commit()?;

    tracing::info!(location = %id, %name, "location added");
    Ok(Location {
        id,
        name: name.to_string(),
        coord,
    })
}

pub fn list_locations(db: &Db) -> Result<Vec<Location>> {
    let mut stmt = db
        .conn()
        .prepare("SELECT location_id, name, lat, lng FROM locations ORDER BY location_id")?;
    let rows = stmt.query_map([], location_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn find_location(conn: &Connection, id: LocationId) -> Result<Option<Location>> {
    Ok(conn
        .query_row(
            "SELECT location_id, name, lat, lng FROM locations WHERE location_id = ?1",
            [id],
            location_from_row,
        )
        .optional()?)
}

pub fn get_location(db: &Db, id: LocationId) -> Result<Location> {
    find_location(db.conn(), id)?.ok_or_else(|| DispatchError::not_found("location", id))
}

/// Delete a location no ride has ever referenced.
pub fn delete_location(db: &mut Db, id: LocationId) -> Result<()> {
    let tx = db.write_tx()?;
    if find_location(&tx, id)?.is_none() {
        return Err(DispatchError::not_found("location", id));
    }
    let referencing: Option<RideId> = tx
        .query_row(
            "SELECT ride_id FROM rides WHERE start_location = ?1 OR end_location = ?1 LIMIT 1",
            [id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(ride) = referencing {
        return Err(DispatchError::Conflict(ConflictKind::LocationInUse { ride }));
    }
    tx.execute("DELETE FROM locations WHERE location_id = ?1", [id])?;
    tx.commit()?;
    tracing::info!(location = %id, "location deleted");
    Ok(())
}
