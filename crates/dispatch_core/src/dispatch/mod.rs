//! Driver dispatch: rank every pending ride for one driver, then claim the best.

pub mod engine;
pub mod scoring;

pub use engine::{ClaimedRide, DispatchEngine, RideDetails};
pub use scoring::{best_candidate, rank_by_route_profit, RouteScore, ScoredRide, TravelTimes};
