mod output;
mod seed;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use dispatch_core::config::DispatchConfig;
use dispatch_core::ledger::{BookingLedger, PaymentConfirmation};
use dispatch_core::model::{Coord, DriverId, LocationId, PassengerId, RideId, RideStatus};
use dispatch_core::notify::LogNotificationGateway;
use dispatch_core::report::generate_report;
use dispatch_core::routing::{build_oracle, TravelTimeOracle};
use dispatch_core::store::{fleet, locations, rides, Db};
use dispatch_core::{DispatchEngine, DispatchError, RideStore};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::output::{print_json, write_report, ReportFormat};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "minibus",
    about = "Shared minibus dispatch: quotes, bookings and driver claims",
    long_about = "Operator CLI over the minibus dispatch store.\n\
                  Every invocation opens its own database handle, so several\n\
                  can run at once against the same file."
)]
struct Cli {
    /// JSON config file; missing fields take their defaults
    #[arg(long, global = true, env = "MINIBUS_CONFIG")]
    config: Option<PathBuf>,
    /// Database file, overriding the config
    #[arg(long, global = true, env = "MINIBUS_DB")]
    db: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    /// Acting identity: `admin`, `driver:<id>` or `passenger:<id>`
    #[arg(long = "as", global = true, env = "MINIBUS_AS", value_name = "ROLE")]
    caller: Option<Caller>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema
    Init,
    /// Fill the store with reproducible sample data
    Seed {
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Number of pending rides to request
        #[arg(long, default_value_t = 6)]
        rides: usize,
    },
    /// Add a named pickup/drop-off point
    AddLocation {
        #[arg(long)]
        name: String,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
    },
    /// List locations
    Locations,
    /// Delete a location no ride references
    DeleteLocation {
        #[arg(long)]
        id: i64,
    },
    /// Register a minibus
    RegisterVehicle {
        #[arg(long)]
        capacity: u32,
        #[arg(long, default_value_t = 0)]
        disability_seats: u32,
        #[arg(long)]
        licence: String,
    },
    /// List vehicles
    Vehicles,
    /// List drivers
    Drivers,
    RegisterDriver {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Credential digest issued by the identity service
        #[arg(long)]
        credential_hash: String,
    },
    RegisterPassenger {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Bind a driver to a vehicle by licence tag
    AssignVehicle {
        #[arg(long)]
        driver: i64,
        #[arg(long)]
        licence: String,
    },
    /// Release a driver's vehicle
    UnassignVehicle {
        #[arg(long)]
        driver: i64,
        #[arg(long)]
        licence: String,
    },
    /// Report a driver's current position
    UpdateLocation {
        #[arg(long)]
        driver: i64,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
    },
    /// Quote a ride, joining the pending ride for the route if one exists
    Quote {
        #[arg(long)]
        start: i64,
        #[arg(long)]
        end: i64,
        #[arg(long)]
        passenger: i64,
    },
    /// Estimate travel time between two locations
    Estimate {
        #[arg(long)]
        start: i64,
        #[arg(long)]
        end: i64,
    },
    /// Record a payment confirmation (idempotent)
    ConfirmPayment {
        /// Raw event payload: {"ride_id", "passenger_id", "payment_ref"}
        #[arg(long, conflicts_with_all = ["ride", "passenger", "payment_ref"])]
        event: Option<String>,
        #[arg(long, requires_all = ["passenger", "payment_ref"])]
        ride: Option<i64>,
        #[arg(long)]
        passenger: Option<i64>,
        #[arg(long)]
        payment_ref: Option<String>,
    },
    /// Claim the most profitable pending ride for a driver
    Claim {
        #[arg(long)]
        driver: i64,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
    },
    /// Mark an active ride complete
    Complete {
        #[arg(long)]
        ride: i64,
    },
    /// List rides
    Rides {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    /// A passenger's bookings, newest first
    Bookings {
        #[arg(long)]
        passenger: i64,
    },
    /// Re-estimate durations of every pending ride
    RefreshDurations,
    /// Booking report over past days
    Report {
        /// First day, YYYY-MM-DD
        #[arg(long)]
        from: NaiveDate,
        /// Last day (inclusive), YYYY-MM-DD
        #[arg(long)]
        to: NaiveDate,
        #[arg(value_enum, long, default_value_t = ReportFormat::Json)]
        format: ReportFormat,
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Active,
    Complete,
}

impl From<StatusArg> for RideStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => RideStatus::Pending,
            StatusArg::Active => RideStatus::Active,
            StatusArg::Complete => RideStatus::Complete,
        }
    }
}

/// Identity the invocation acts on behalf of.
///
/// Issued by the surrounding auth layer; the core never reads it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Caller {
    Admin,
    Driver(DriverId),
    Passenger(PassengerId),
}

impl FromStr for Caller {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parse_id = |id: &str| {
            id.parse::<i64>()
                .map_err(|_| format!("`{raw}`: expected a numeric id after the colon"))
        };
        match raw.split_once(':') {
            None if raw == "admin" => Ok(Caller::Admin),
            Some(("driver", id)) => Ok(Caller::Driver(DriverId(parse_id(id)?))),
            Some(("passenger", id)) => Ok(Caller::Passenger(PassengerId(parse_id(id)?))),
            _ => Err(format!(
                "`{raw}`: expected admin, driver:<id> or passenger:<id>"
            )),
        }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::Admin => f.write_str("admin"),
            Caller::Driver(id) => write!(f, "driver:{id}"),
            Caller::Passenger(id) => write!(f, "passenger:{id}"),
        }
    }
}

/// Who may run a command.
#[derive(Debug, PartialEq, Eq)]
enum Access {
    Anyone,
    Admin,
    Driver(DriverId),
    AnyDriver,
    Passenger(PassengerId),
}

impl Commands {
    fn access(&self) -> Access {
        match *self {
            Commands::Locations | Commands::Estimate { .. } | Commands::RegisterPassenger { .. } => {
                Access::Anyone
            }
            Commands::Init
            | Commands::Seed { .. }
            | Commands::AddLocation { .. }
            | Commands::DeleteLocation { .. }
            | Commands::RegisterVehicle { .. }
            | Commands::Vehicles
            | Commands::Drivers
            | Commands::RegisterDriver { .. }
            | Commands::ConfirmPayment { .. }
            | Commands::Rides { .. }
            | Commands::RefreshDurations
            | Commands::Report { .. } => Access::Admin,
            Commands::AssignVehicle { driver, .. }
            | Commands::UnassignVehicle { driver, .. }
            | Commands::UpdateLocation { driver, .. }
            | Commands::Claim { driver, .. } => Access::Driver(DriverId(driver)),
            // Which driver is checked against the ride's assignment once the store is open.
            Commands::Complete { .. } => Access::AnyDriver,
            Commands::Quote { passenger, .. } | Commands::Bookings { passenger } => {
                Access::Passenger(PassengerId(passenger))
            }
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Anyone => f.write_str("anyone"),
            Access::Admin => f.write_str("admin"),
            Access::Driver(id) => write!(f, "driver:{id}"),
            Access::AnyDriver => f.write_str("a driver"),
            Access::Passenger(id) => write!(f, "passenger:{id}"),
        }
    }
}

fn authorize(caller: Option<Caller>, access: &Access) -> Result<(), CliError> {
    let allowed = match (access, caller) {
        (Access::Anyone, _) => true,
        (Access::Admin, Some(Caller::Admin)) => true,
        (Access::AnyDriver, Some(Caller::Driver(_))) => true,
        (Access::Driver(want), Some(Caller::Driver(got))) => *want == got,
        (Access::Passenger(want), Some(Caller::Passenger(got))) => *want == got,
        _ => false,
    };
    if allowed {
        return Ok(());
    }
    let acting = caller.map_or_else(|| "nobody (pass --as)".to_string(), |c| c.to_string());
    Err(CliError::Usage(format!(
        "{acting} may not run this command; it needs {access}"
    )))
}

// ── errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("cannot build travel-time oracle: {0}")]
    Oracle(#[from] dispatch_core::routing::OracleError),
    #[error("malformed payment event: {0}")]
    Event(serde_json::Error),
    #[error("output failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("{0}")]
    Usage(String),
}

impl CliError {
    /// `EX_TEMPFAIL` for errors worth retrying, 1 otherwise.
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Dispatch(err) if err.is_retryable() => ExitCode::from(75),
            _ => ExitCode::FAILURE,
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<DispatchConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => DispatchConfig::from_json_file(path)?,
        None => DispatchConfig::default(),
    };
    if let Some(path) = &cli.db {
        config = config.with_store_path(path);
    }
    Ok(config)
}

/// Collaborators built once per invocation from config.
struct Services {
    oracle: Arc<dyn TravelTimeOracle>,
    config: DispatchConfig,
}

impl Services {
    fn new(config: DispatchConfig) -> Result<Self, CliError> {
        let oracle: Arc<dyn TravelTimeOracle> = Arc::from(build_oracle(&config.oracle)?);
        Ok(Self { oracle, config })
    }

    fn rides(&self) -> RideStore {
        RideStore::new(self.oracle.clone(), self.config.pricing)
    }

    fn engine(&self) -> DispatchEngine {
        DispatchEngine::from_config(
            &self.config,
            self.oracle.clone(),
            Arc::new(LogNotificationGateway),
        )
    }
}

fn payment_event(
    event: Option<String>,
    ride: Option<i64>,
    passenger: Option<i64>,
    payment_ref: Option<String>,
) -> Result<PaymentConfirmation, CliError> {
    if let Some(raw) = event {
        return serde_json::from_str(&raw).map_err(CliError::Event);
    }
    match (ride, passenger, payment_ref) {
        (Some(ride), Some(passenger), Some(payment_ref)) => Ok(PaymentConfirmation {
            ride_id: RideId(ride),
            passenger_id: PassengerId(passenger),
            payment_ref,
        }),
        _ => Err(CliError::Usage(
            "pass --event or all of --ride, --passenger and --payment-ref".into(),
        )),
    }
}

// ── main ───────────────────────────────────────────────────────────

fn run(cli: Cli) -> Result<(), CliError> {
    authorize(cli.caller, &cli.command.access())?;
    let config = load_config(&cli)?;
    let mut db = Db::open(&config.store)?;
    let services = Services::new(config)?;

    match cli.command {
        Commands::Init => {
            db.migrate()?;
            tracing::info!(path = %services.config.store.path.display(), "schema ready");
        }
        Commands::Seed { seed, rides } => {
            db.migrate()?;
            let summary = seed::seed(&mut db, &services.rides(), seed, rides)?;
            print_json(&summary)?;
        }
        Commands::AddLocation { name, lat, lng } => {
            let location = locations::add_location(&mut db, &name, Coord::new(lat, lng)?)?;
            print_json(&location)?;
        }
        Commands::Locations => print_json(&locations::list_locations(&db)?)?,
        Commands::DeleteLocation { id } => {
            locations::delete_location(&mut db, LocationId(id))?;
        }
        Commands::RegisterVehicle {
            capacity,
            disability_seats,
            licence,
        } => {
            let vehicle = fleet::register_vehicle(&mut db, capacity, disability_seats, &licence)?;
            print_json(&vehicle)?;
        }
        Commands::Vehicles => print_json(&fleet::list_vehicles(&db)?)?,
        Commands::Drivers => print_json(&fleet::list_drivers(&db)?)?,
        Commands::RegisterDriver {
            name,
            email,
            credential_hash,
        } => {
            let driver = fleet::register_driver(&mut db, &name, &email, &credential_hash)?;
            print_json(&driver)?;
        }
        Commands::RegisterPassenger { name, email, phone } => {
            let passenger = fleet::register_passenger(&mut db, &name, &email, phone.as_deref())?;
            print_json(&passenger)?;
        }
        Commands::AssignVehicle { driver, licence } => {
            let vehicle = fleet::assign_vehicle(&mut db, DriverId(driver), &licence)?;
            print_json(&vehicle)?;
        }
        Commands::UnassignVehicle { driver, licence } => {
            fleet::unassign_vehicle(&mut db, DriverId(driver), &licence)?;
        }
        Commands::UpdateLocation { driver, lat, lng } => {
            let vehicle = fleet::update_location(&mut db, DriverId(driver), Coord::new(lat, lng)?)?;
            print_json(&vehicle)?;
        }
        Commands::Quote {
            start,
            end,
            passenger,
        } => {
            let quote = services.rides().quote(
                &mut db,
                LocationId(start),
                LocationId(end),
                PassengerId(passenger),
            )?;
            print_json(&quote)?;
        }
        Commands::Estimate { start, end } => {
            let minutes =
                services
                    .rides()
                    .estimate_route(&db, LocationId(start), LocationId(end))?;
            print_json(&serde_json::json!({ "duration_minutes": minutes }))?;
        }
        Commands::ConfirmPayment {
            event,
            ride,
            passenger,
            payment_ref,
        } => {
            let event = payment_event(event, ride, passenger, payment_ref)?;
            let outcome = BookingLedger::confirm_payment(&mut db, &event)?;
            print_json(&outcome)?;
        }
        Commands::Claim { driver, lat, lng } => {
            let claim =
                services
                    .engine()
                    .claim_best_ride(&mut db, DriverId(driver), Coord::new(lat, lng)?)?;
            print_json(&claim)?;
        }
        Commands::Complete { ride } => {
            let ride = RideId(ride);
            if let Some(Caller::Driver(driver)) = cli.caller {
                let operating = rides::active_assignment(&db, driver)?.map(|a| a.ride);
                if operating != Some(ride) {
                    return Err(CliError::Usage(format!(
                        "driver {driver} is not operating ride {ride}"
                    )));
                }
            }
            let ride = services.rides().complete(&mut db, ride)?;
            print_json(&ride)?;
        }
        Commands::Rides { status } => {
            print_json(&rides::list_rides(&db, status.map(RideStatus::from))?)?;
        }
        Commands::Bookings { passenger } => {
            print_json(&rides::bookings_for_passenger(&db, PassengerId(passenger))?)?;
        }
        Commands::RefreshDurations => {
            let updated = services.rides().refresh_pending_durations(&mut db)?;
            print_json(&serde_json::json!({ "updated": updated }))?;
        }
        Commands::Report {
            from,
            to,
            format,
            output,
        } => {
            let report = generate_report(&db, from, to, Utc::now().date_naive())?;
            write_report(&report, format, output.as_deref())?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("error: {err}");
            err.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn payment_event_from_flags_or_json() {
        let from_flags =
            payment_event(None, Some(4), Some(9), Some("pi_1".into())).expect("flags");
        let from_json = payment_event(
            Some(r#"{"ride_id": 4, "passenger_id": 9, "payment_ref": "pi_1"}"#.into()),
            None,
            None,
            None,
        )
        .expect("json");
        assert_eq!(from_flags, from_json);
        assert!(matches!(
            payment_event(None, Some(4), None, None),
            Err(CliError::Usage(_))
        ));
    }

    #[test]
    fn negative_coordinates_parse() {
        let cli = Cli::try_parse_from([
            "minibus", "claim", "--driver", "3", "--lat", "-33.86", "--lng", "151.2",
        ])
        .expect("parse");
        assert!(matches!(cli.command, Commands::Claim { driver: 3, .. }));
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("minibus").chain(args.iter().copied()))
            .expect("parse")
    }

    fn check(args: &[&str]) -> Result<(), CliError> {
        let cli = parse(args);
        authorize(cli.caller, &cli.command.access())
    }

    #[test]
    fn caller_parses_roles() {
        assert_eq!("admin".parse::<Caller>(), Ok(Caller::Admin));
        assert_eq!("driver:3".parse::<Caller>(), Ok(Caller::Driver(DriverId(3))));
        assert_eq!(
            "passenger:9".parse::<Caller>(),
            Ok(Caller::Passenger(PassengerId(9)))
        );
        assert!("driver:x".parse::<Caller>().is_err());
        assert!("root".parse::<Caller>().is_err());
        assert!(Cli::try_parse_from(["minibus", "--as", "admin:1", "vehicles"]).is_err());
    }

    #[test]
    fn admin_commands_need_admin() {
        check(&["--as", "admin", "delete-location", "--id", "4"]).expect("admin");
        check(&["drivers", "--as", "admin"]).expect("global flag after subcommand");
        assert!(matches!(
            check(&["delete-location", "--id", "4"]),
            Err(CliError::Usage(_))
        ));
        assert!(matches!(
            check(&["--as", "driver:3", "register-driver", "--name", "N", "--email", "n@x.test",
                "--credential-hash", "h"]),
            Err(CliError::Usage(_))
        ));
    }

    #[test]
    fn drivers_act_only_for_themselves() {
        let claim = ["claim", "--driver", "3", "--lat", "3.1", "--lng", "101.6"];
        let as_caller = |role: &str| {
            let mut args = vec!["--as", role];
            args.extend_from_slice(&claim);
            check(&args)
        };
        as_caller("driver:3").expect("own claim");
        assert!(matches!(as_caller("driver:4"), Err(CliError::Usage(_))));
        assert!(matches!(as_caller("admin"), Err(CliError::Usage(_))));
        assert!(matches!(as_caller("passenger:3"), Err(CliError::Usage(_))));
        check(&["--as", "driver:7", "complete", "--ride", "2"]).expect("any driver reaches the store check");
    }

    #[test]
    fn passengers_quote_only_for_themselves() {
        check(&["--as", "passenger:9", "quote", "--start", "1", "--end", "2", "--passenger", "9"])
            .expect("own quote");
        let err = check(&["--as", "passenger:8", "bookings", "--passenger", "9"])
            .expect_err("someone else's bookings");
        assert!(err.to_string().contains("passenger:9"), "{err}");
        check(&["locations"]).expect("open to anyone");
    }
}
