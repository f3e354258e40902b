use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;
use serde::Serialize;

use super::scoring::{best_candidate, RouteScore, ScoredRide, TravelTimes};
use crate::config::{DispatchConfig, ScoringConfig, DEFAULT_MAX_CLAIM_ATTEMPTS};
use crate::error::{is_unique_violation, ConflictKind, DispatchError, Result, UnavailableReason};
use crate::model::{Coord, DriverId, Location, LocationId, PassengerId, RideId, RideStatus};
use crate::notify::{ride_starting_message, NotificationGateway};
use crate::routing::TravelTimeOracle;
use crate::store::fleet::find_driver;
use crate::store::rides::{
    find_active_assignment, headcount, passengers_on_ride, pending_candidates, PendingCandidate,
};
use crate::store::Db;

/// What the driver is told about the ride they just claimed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideDetails {
    pub ride_id: RideId,
    pub num_passengers: u32,
    pub passengers: Vec<PassengerId>,
    pub start: Location,
    pub end: Location,
    /// Minutes from ride start to ride end.
    pub time_start_end: f64,
    /// Minutes from the driver's position to ride start.
    pub time_vehicle_start: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimedRide {
    pub route_profit: f64,
    pub ride: RideDetails,
    pub carbon_saved: f64,
}

/// Oracle results for the lifetime of one claim call. Failures are remembered
/// too so a retry after a lost race does not hit the oracle again.
#[derive(Default)]
struct EstimateMemo {
    routes: HashMap<(LocationId, LocationId), Option<f64>>,
    approaches: HashMap<LocationId, Option<f64>>,
}

enum ClaimAttempt {
    Claimed {
        claim: ClaimedRide,
        phone_numbers: Vec<String>,
    },
    /// Another driver moved the ride out of pending first.
    Lost,
}

/// Picks the most profitable pending ride for a driver and claims it.
///
/// Scoring runs with no transaction open; only the final compare-and-swap on
/// the ride's status holds the write lock. Losing that race re-reads the
/// pending set and tries again, up to `max_claim_attempts` times.
///
/// Each lost race removes a ride from the pending set, so a fixed set of
/// rides always ends in a claim or in `NoPendingRides`. The attempt cap, and
/// its `ContentionExhausted` error, only fires while new pending rides keep
/// arriving and keep being taken by other drivers first.
pub struct DispatchEngine {
    oracle: Arc<dyn TravelTimeOracle>,
    notifier: Arc<dyn NotificationGateway>,
    scoring: ScoringConfig,
    max_claim_attempts: u32,
}

impl DispatchEngine {
    pub fn new(
        oracle: Arc<dyn TravelTimeOracle>,
        notifier: Arc<dyn NotificationGateway>,
        scoring: ScoringConfig,
    ) -> Self {
        Self {
            oracle,
            notifier,
            scoring,
            max_claim_attempts: DEFAULT_MAX_CLAIM_ATTEMPTS,
        }
    }

    pub fn from_config(
        config: &DispatchConfig,
        oracle: Arc<dyn TravelTimeOracle>,
        notifier: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self::new(oracle, notifier, config.scoring)
            .with_max_claim_attempts(config.max_claim_attempts)
    }

    pub fn with_max_claim_attempts(mut self, attempts: u32) -> Self {
        self.max_claim_attempts = attempts.max(1);
        self
    }

    pub fn claim_best_ride(
        &self,
        db: &mut Db,
        driver: DriverId,
        driver_location: Coord,
    ) -> Result<ClaimedRide> {
        let driver_location = Coord::new(driver_location.lat, driver_location.lng)?;
        if driver_location.is_null_island() {
            return Err(DispatchError::validation(
                "driver location (0, 0) is not a valid position fix",
            ));
        }
        let _span = tracing::info_span!("claim_best_ride", %driver).entered();

        if find_driver(db.conn(), driver)?.is_none() {
            return Err(DispatchError::not_found("driver", driver));
        }
        if let Some(assignment) = find_active_assignment(db.conn(), driver)? {
            return Err(DispatchError::Conflict(ConflictKind::DriverAlreadyAssigned {
                ride: assignment.ride,
            }));
        }

        let mut memo = EstimateMemo::default();
        for attempt in 1..=self.max_claim_attempts {
            let candidates = pending_candidates(db)?;
            if candidates.is_empty() {
                return Err(DispatchError::Unavailable(UnavailableReason::NoPendingRides));
            }
            let scored = self.score_candidates(&candidates, driver_location, &mut memo);
            let Some(best) = best_candidate(&scored).copied() else {
                return Err(DispatchError::Unavailable(UnavailableReason::NoRouteEstimates {
                    candidates: candidates.len(),
                }));
            };
            let Some(candidate) = candidates.iter().find(|c| c.ride.id == best.ride) else {
                continue;
            };
            tracing::debug!(
                attempt,
                ride = %best.ride,
                route_profit = best.score.route_profit,
                candidates = candidates.len(),
                "attempting claim"
            );

            match self.try_claim(db, driver, candidate, best.times)? {
                ClaimAttempt::Claimed {
                    claim,
                    phone_numbers,
                } => {
                    tracing::info!(
                        ride = %claim.ride.ride_id,
                        route_profit = claim.route_profit,
                        carbon_saved = claim.carbon_saved,
                        attempt,
                        "ride claimed"
                    );
                    self.notify_passengers(&claim, &phone_numbers);
                    return Ok(claim);
                }
                ClaimAttempt::Lost => {
                    tracing::debug!(attempt, ride = %best.ride, "lost claim race, rescoring");
                }
            }
        }

        tracing::warn!(attempts = self.max_claim_attempts, "claim attempts exhausted");
        Err(DispatchError::Unavailable(
            UnavailableReason::ContentionExhausted {
                attempts: self.max_claim_attempts,
            },
        ))
    }

    fn score_candidates(
        &self,
        candidates: &[PendingCandidate],
        driver_location: Coord,
        memo: &mut EstimateMemo,
    ) -> Vec<ScoredRide> {
        let mut scored = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let route = *memo
                .routes
                .entry((candidate.start.id, candidate.end.id))
                .or_insert_with(|| {
                    self.estimate(candidate.ride.id, candidate.start.coord, candidate.end.coord)
                });
            let approach = *memo
                .approaches
                .entry(candidate.start.id)
                .or_insert_with(|| {
                    self.estimate(candidate.ride.id, driver_location, candidate.start.coord)
                });
            if let (Some(route), Some(approach)) = (route, approach) {
                scored.push(ScoredRide::new(
                    candidate.ride.id,
                    candidate.headcount,
                    TravelTimes { route, approach },
                    &self.scoring,
                ));
            }
        }
        scored
    }

    fn estimate(&self, ride: RideId, from: Coord, to: Coord) -> Option<f64> {
        match self.oracle.estimate(from, to) {
            Ok(minutes) => Some(minutes),
            Err(err) => {
                tracing::warn!(%ride, %from, %to, error = %err, "dropping candidate without estimate");
                None
            }
        }
    }

    /// Compare-and-swap the ride from pending to active and bind the driver,
    /// all in one write transaction.
    fn try_claim(
        &self,
        db: &mut Db,
        driver: DriverId,
        candidate: &PendingCandidate,
        times: TravelTimes,
    ) -> Result<ClaimAttempt> {
        let ride = candidate.ride.id;
        let tx = db.write_tx()?;

        if let Some(assignment) = find_active_assignment(&tx, driver)? {
            return Err(DispatchError::Conflict(ConflictKind::DriverAlreadyAssigned {
                ride: assignment.ride,
            }));
        }

        // Bookings may have landed since the candidate set was read.
        let score = RouteScore::compute(headcount(&tx, ride)?, times, &self.scoring);
        let swapped = tx.execute(
            "UPDATE rides SET status = ?1, profit = ?2, environmental = ?3, duration_minutes = ?4 \
             WHERE ride_id = ?5 AND status = ?6",
            params![
                RideStatus::Active,
                score.route_profit,
                score.carbon_saved,
                times.route,
                ride,
                RideStatus::Pending
            ],
        )?;
        if swapped == 0 {
            return Ok(ClaimAttempt::Lost);
        }

        let bound = tx.execute(
            "INSERT INTO operates (ride_id, driver_id, active, assigned_at) VALUES (?1, ?2, 1, ?3)",
            params![ride, driver, Utc::now()],
        );
        match bound {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return match find_active_assignment(&tx, driver)? {
                    Some(assignment) => Err(DispatchError::Conflict(
                        ConflictKind::DriverAlreadyAssigned {
                            ride: assignment.ride,
                        },
                    )),
                    None => Err(err.into()),
                };
            }
            Err(err) => return Err(err.into()),
        }

        let passengers = passengers_on_ride(&tx, ride)?;
        tx.commit()?;

        let phone_numbers = passengers
            .iter()
            .filter_map(|p| p.phone_number.clone())
            .collect();
        Ok(ClaimAttempt::Claimed {
            claim: ClaimedRide {
                route_profit: score.route_profit,
                carbon_saved: score.carbon_saved,
                ride: RideDetails {
                    ride_id: ride,
                    num_passengers: score.headcount,
                    passengers: passengers.iter().map(|p| p.id).collect(),
                    start: candidate.start.clone(),
                    end: candidate.end.clone(),
                    time_start_end: times.route,
                    time_vehicle_start: times.approach,
                },
            },
            phone_numbers,
        })
    }

    fn notify_passengers(&self, claim: &ClaimedRide, phone_numbers: &[String]) {
        if phone_numbers.is_empty() {
            return;
        }
        let details = &claim.ride;
        let message = ride_starting_message(
            &details.start.name,
            &details.end.name,
            details.time_vehicle_start,
            details.time_start_end,
        );
        if let Err(err) = self.notifier.notify(phone_numbers, &message) {
            tracing::warn!(ride = %details.ride_id, error = %err, "passenger notification failed");
        }
    }
}
