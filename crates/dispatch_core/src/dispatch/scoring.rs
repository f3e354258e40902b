use std::cmp::Ordering;

use serde::Serialize;

use crate::config::ScoringConfig;
use crate::model::RideId;

/// Oracle estimates for one candidate, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TravelTimes {
    /// Ride start to ride end.
    pub route: f64,
    /// Driver's position to ride start.
    pub approach: f64,
}

/// Score of serving one pending ride with one driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteScore {
    pub headcount: u32,
    pub profit: f64,
    pub route_profit: f64,
    pub carbon_saved: f64,
}

impl RouteScore {
    /// `profit = headcount * t_route * profit_rate`
    /// `route_profit = profit * headcount - cost_rate * (t_route + t_approach)`
    /// `carbon_saved = car_rate * headcount * t_route - bus_rate * headcount * (t_route + t_approach)`
    pub fn compute(headcount: u32, times: TravelTimes, rates: &ScoringConfig) -> Self {
        let people = f64::from(headcount);
        let driven = times.route + times.approach;
        let profit = people * times.route * rates.profit_rate;
        let route_profit = profit * people - rates.cost_rate * driven;
        let carbon_saved =
            rates.carbon_car_rate * people * times.route - rates.carbon_bus_rate * people * driven;
        Self {
            headcount,
            profit,
            route_profit,
            carbon_saved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredRide {
    pub ride: RideId,
    pub times: TravelTimes,
    pub score: RouteScore,
}

impl ScoredRide {
    pub fn new(ride: RideId, headcount: u32, times: TravelTimes, rates: &ScoringConfig) -> Self {
        Self {
            ride,
            times,
            score: RouteScore::compute(headcount, times, rates),
        }
    }
}

/// Best first: highest `route_profit`, then lowest ride id among equals.
fn claim_order(a: &ScoredRide, b: &ScoredRide) -> Ordering {
    b.score
        .route_profit
        .total_cmp(&a.score.route_profit)
        .then_with(|| a.ride.cmp(&b.ride))
}

/// Sort candidates into claim order.
pub fn rank_by_route_profit(scored: &mut [ScoredRide]) {
    scored.sort_by(claim_order);
}

/// The candidate a driver should claim, without sorting the whole set.
pub fn best_candidate(scored: &[ScoredRide]) -> Option<&ScoredRide> {
    scored.iter().min_by(|a, b| claim_order(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(route: f64, approach: f64) -> TravelTimes {
        TravelTimes { route, approach }
    }

    #[test]
    fn three_ride_scenario() {
        let rates = ScoringConfig::default();
        let a = ScoredRide::new(RideId(1), 2, times(10.0, 3.0), &rates);
        let b = ScoredRide::new(RideId(2), 3, times(8.0, 12.0), &rates);
        let c = ScoredRide::new(RideId(3), 1, times(20.0, 1.0), &rates);

        assert_eq!(a.score.route_profit, 1174.0);
        assert_eq!(b.score.route_profit, 2120.0);
        assert_eq!(c.score.route_profit, 558.0);
        assert!((b.score.carbon_saved - 14.82).abs() < 1e-9);

        let mut ranked = vec![a, c, b];
        rank_by_route_profit(&mut ranked);
        let order: Vec<_> = ranked.iter().map(|s| s.ride).collect();
        assert_eq!(order, vec![RideId(2), RideId(1), RideId(3)]);
        assert_eq!(best_candidate(&[a, b, c]).map(|s| s.ride), Some(RideId(2)));
    }

    #[test]
    fn ties_go_to_the_lowest_ride_id() {
        let rates = ScoringConfig::default();
        let late = ScoredRide::new(RideId(9), 2, times(10.0, 3.0), &rates);
        let early = ScoredRide::new(RideId(4), 2, times(10.0, 3.0), &rates);
        assert_eq!(best_candidate(&[late, early]).map(|s| s.ride), Some(RideId(4)));
    }

    #[test]
    fn empty_ride_only_costs() {
        let score = RouteScore::compute(0, times(10.0, 5.0), &ScoringConfig::default());
        assert_eq!(score.profit, 0.0);
        assert_eq!(score.route_profit, -30.0);
        assert_eq!(score.carbon_saved, 0.0);
    }
}
