//! Fare quoting for a requested ride.

use crate::config::PricingConfig;

/// Price of a ride in cents, derived only from its estimated duration.
///
/// Formula: `floor(duration_minutes * cents_per_minute)`. Pure, so it is safe
/// to recompute whenever a quote is shown again.
pub fn quote_price_cents(duration_minutes: f64, pricing: &PricingConfig) -> i64 {
    if !duration_minutes.is_finite() || duration_minutes <= 0.0 {
        return 0;
    }
    (duration_minutes * pricing.cents_per_minute).floor() as i64
}
