//! Fire-and-forget passenger notifications sent once a ride is claimed.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("notification to {recipient} failed: {reason}")]
    Delivery { recipient: String, reason: String },
}

/// Outbound message channel (SMS in production).
///
/// Delivery is best effort: the dispatch engine logs an error and moves on.
pub trait NotificationGateway: Send + Sync {
    fn notify(&self, phone_numbers: &[String], message: &str) -> Result<(), NotifyError>;
}

/// Writes every notification to the log instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationGateway;

impl NotificationGateway for LogNotificationGateway {
    fn notify(&self, phone_numbers: &[String], message: &str) -> Result<(), NotifyError> {
        for phone in phone_numbers {
            tracing::info!(recipient = %phone, %message, "passenger notification");
        }
        Ok(())
    }
}

/// Text sent to passengers when their ride has been claimed by a driver.
/// Minutes are truncated to whole numbers.
pub fn ride_starting_message(
    start_name: &str,
    end_name: &str,
    approach_minutes: f64,
    route_minutes: f64,
) -> String {
    format!(
        "Your booking from {start_name} to {end_name} is starting! \
         Expect a bus to arrive within {} minutes. The trip will take {} minutes.",
        approach_minutes.max(0.0) as i64,
        route_minutes.max(0.0) as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_truncates_minutes() {
        let msg = ride_starting_message("KL Tower", "Batu Caves", 4.9, 21.2);
        assert_eq!(
            msg,
            "Your booking from KL Tower to Batu Caves is starting! \
             Expect a bus to arrive within 4 minutes. The trip will take 21 minutes."
        );
    }

    #[test]
    fn log_gateway_never_fails() {
        let phones = vec!["+60123456789".to_string()];
        assert!(LogNotificationGateway.notify(&phones, "hello").is_ok());
    }
}
