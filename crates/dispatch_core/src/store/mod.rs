//! Durable storage backed by SQLite.
//!
//! A [`Db`] wraps exactly one connection and is passed explicitly into every
//! operation; each request handler opens its own. Handlers in different
//! processes coordinate only through the database file:
//!
//! - writes run inside `BEGIN IMMEDIATE` transactions, so the write lock is
//!   taken up front and a read-then-write never deadlocks on upgrade;
//! - the schema carries the invariants that must survive concurrent handlers
//!   (one pending ride per route, one booking per ride and passenger, one
//!   active assignment per driver, forward-only ride status).

pub mod fleet;
pub mod locations;
pub mod rides;
mod schema;

use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::config::StoreConfig;
use crate::error::Result;
use crate::model::Coord;

/// Handle to the durable store.
pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) the database file described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        tracing::debug!(path = %config.path.display(), journal_mode = %mode, "opened store");
        Ok(Self { conn })
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// Create every table, index and trigger that does not exist yet.
    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(schema::SCHEMA)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Start a write transaction holding the database write lock.
    ///
    /// Dropping the returned transaction without committing rolls back every
    /// write made through it.
    pub(crate) fn write_tx(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}

/// Read an optional coordinate stored as two nullable columns.
pub(crate) fn coord_from_columns(lat: Option<f64>, lng: Option<f64>) -> Option<Coord> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Some(Coord { lat, lng }),
        _ => None,
    }
}

/// Convert an SQLite integer into a count, mapping negatives to a read error.
pub(crate) fn to_u32(value: i64, column: usize) -> rusqlite::Result<u32> {
    u32::try_from(value).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Integer,
            Box::new(err),
        )
    })
}
