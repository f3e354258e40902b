//! Booking reports over a closed range of past days.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::error::{DispatchError, Result};
use crate::model::{PassengerId, RideId, RideStatus};
use crate::store::Db;

/// One ride that took bookings inside the report range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    pub ride_id: RideId,
    /// UTC day of the ride's first booking in range.
    pub booked_on: NaiveDate,
    pub start_name: String,
    pub end_name: String,
    pub status: RideStatus,
    pub passenger_count: u32,
    pub passengers: Vec<PassengerId>,
    pub duration_minutes: f64,
    pub profit: Option<f64>,
    pub environmental: Option<f64>,
}

impl ReportEntry {
    /// Passenger ids joined with `;`, for flat export formats.
    pub fn passenger_list(&self) -> String {
        self.passengers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportSummary {
    pub rides: usize,
    pub bookings: usize,
    pub total_duration_minutes: f64,
    /// Sum over rides that have been claimed; pending rides carry no profit yet.
    pub total_profit: f64,
    pub total_environmental: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub entries: Vec<ReportEntry>,
    pub summary: ReportSummary,
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// Summarise bookings made between `from` and `to` inclusive.
///
/// Both days must lie strictly before `today`, so a report never covers a day
/// that can still change.
pub fn generate_report(
    db: &Db,
    from: NaiveDate,
    to: NaiveDate,
    today: NaiveDate,
) -> Result<RideReport> {
    if to < from {
        return Err(DispatchError::validation(format!(
            "report range ends ({to}) before it starts ({from})"
        )));
    }
    if to >= today {
        return Err(DispatchError::validation(format!(
            "report range must end before today ({today})"
        )));
    }
    let end_exclusive = to
        .succ_opt()
        .ok_or_else(|| DispatchError::validation("report range ends at the last representable day"))?;

    let mut stmt = db.conn().prepare(
        "SELECT b.ride_id, b.passenger_id, b.booked_at, r.status, r.duration_minutes, \
                r.profit, r.environmental, s.name, e.name \
         FROM bookings b \
         JOIN rides r ON r.ride_id = b.ride_id \
         JOIN locations s ON s.location_id = r.start_location \
         JOIN locations e ON e.location_id = r.end_location \
         WHERE b.booked_at >= ?1 AND b.booked_at < ?2 \
         ORDER BY b.booked_at, b.ride_id, b.passenger_id",
    )?;
    let mut rows = stmt.query([start_of_day(from), start_of_day(end_exclusive)])?;

    let mut entries: Vec<ReportEntry> = Vec::new();
    let mut by_ride: HashMap<RideId, usize> = HashMap::new();
    let mut bookings = 0;
    while let Some(row) = rows.next()? {
        bookings += 1;
        let ride_id: RideId = row.get(0)?;
        let passenger: PassengerId = row.get(1)?;
        if let Some(&index) = by_ride.get(&ride_id) {
            let entry = &mut entries[index];
            entry.passengers.push(passenger);
            entry.passenger_count += 1;
            continue;
        }
        let booked_at: DateTime<Utc> = row.get(2)?;
        by_ride.insert(ride_id, entries.len());
        entries.push(ReportEntry {
            ride_id,
            booked_on: booked_at.date_naive(),
            status: row.get(3)?,
            duration_minutes: row.get(4)?,
            profit: row.get(5)?,
            environmental: row.get(6)?,
            start_name: row.get(7)?,
            end_name: row.get(8)?,
            passenger_count: 1,
            passengers: vec![passenger],
        });
    }

    entries.sort_by(|a, b| a.booked_on.cmp(&b.booked_on).then(a.ride_id.cmp(&b.ride_id)));
    let summary = ReportSummary {
        rides: entries.len(),
        bookings,
        total_duration_minutes: entries.iter().map(|e| e.duration_minutes).sum(),
        total_profit: entries.iter().filter_map(|e| e.profit).sum(),
        total_environmental: entries.iter().filter_map(|e| e.environmental).sum(),
    };
    tracing::debug!(%from, %to, rides = summary.rides, bookings, "report generated");

    Ok(RideReport {
        from,
        to,
        entries,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    fn db() -> Db {
        let db = Db::open_in_memory().expect("db");
        db.migrate().expect("migrate");
        db
    }

    #[test]
    fn rejects_inverted_and_current_ranges() {
        let db = db();
        assert!(matches!(
            generate_report(&db, day(2025, 3, 5), day(2025, 3, 1), day(2025, 4, 1)),
            Err(DispatchError::Validation(_))
        ));
        assert!(matches!(
            generate_report(&db, day(2025, 3, 1), day(2025, 4, 1), day(2025, 4, 1)),
            Err(DispatchError::Validation(_))
        ));
    }

    #[test]
    fn empty_range_yields_empty_report() {
        let db = db();
        let report = generate_report(&db, day(2025, 3, 1), day(2025, 3, 1), day(2025, 3, 2))
            .expect("report");
        assert!(report.entries.is_empty());
        assert_eq!(report.summary, ReportSummary::default());
    }

    #[test]
    fn passenger_list_is_semicolon_separated() {
        let entry = ReportEntry {
            ride_id: RideId(1),
            booked_on: day(2025, 1, 1),
            start_name: "A".into(),
            end_name: "B".into(),
            status: RideStatus::Complete,
            passenger_count: 2,
            passengers: vec![PassengerId(4), PassengerId(7)],
            duration_minutes: 10.0,
            profit: Some(1.0),
            environmental: None,
        };
        assert_eq!(entry.passenger_list(), "4;7");
    }
}
