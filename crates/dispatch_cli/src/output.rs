use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use clap::ValueEnum;
use dispatch_core::report::RideReport;
use serde::Serialize;

use crate::CliError;

#[derive(Clone, Copy, ValueEnum)]
pub enum ReportFormat {
    Json,
    Csv,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

pub fn write_report(
    report: &RideReport,
    format: ReportFormat,
    path: Option<&Path>,
) -> Result<(), CliError> {
    let sink: Box<dyn Write> = match path {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };
    match format {
        ReportFormat::Json => {
            let mut sink = sink;
            serde_json::to_writer_pretty(&mut sink, report)?;
            writeln!(sink)?;
        }
        ReportFormat::Csv => write_csv(report, sink)?,
    }
    if let Some(path) = path {
        tracing::info!(path = %path.display(), rides = report.summary.rides, "report written");
    }
    Ok(())
}

/// One row per ride; the summary is left to the JSON format.
fn write_csv(report: &RideReport, sink: Box<dyn Write>) -> Result<(), CliError> {
    let mut wtr = csv::Writer::from_writer(sink);
    wtr.write_record([
        "ride_id",
        "booked_on",
        "start",
        "end",
        "status",
        "passenger_count",
        "passengers",
        "duration_minutes",
        "profit",
        "environmental",
    ])?;
    for entry in &report.entries {
        wtr.write_record([
            entry.ride_id.to_string(),
            entry.booked_on.to_string(),
            entry.start_name.clone(),
            entry.end_name.clone(),
            entry.status.to_string(),
            entry.passenger_count.to_string(),
            entry.passenger_list(),
            format!("{:.2}", entry.duration_minutes),
            entry.profit.map(|p| format!("{p:.2}")).unwrap_or_default(),
            entry
                .environmental
                .map(|e| format!("{e:.3}"))
                .unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
