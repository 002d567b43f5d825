//! Engine configuration.
//!
//! Values here shape business rules (durations, timezone), not infrastructure. Connection
//! settings live in `branchline-server`.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

/// Default length of one appointment, used for overlap detection.
pub const DEFAULT_SERVICE_DURATION_MINUTES: i64 = 30;

/// Default per-ticket wait estimate.
pub const DEFAULT_MINUTES_PER_TICKET: i64 = 15;

/// Default lifetime of a queue cache list.
pub const DEFAULT_QUEUE_CACHE_TTL_SECONDS: u64 = 48 * 60 * 60;

/// Business-rule configuration shared by both engines.
///
/// The timezone has no default: the service day that scopes token numbers must be chosen
/// explicitly.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timezone whose local midnight starts a new service day.
    pub timezone: Tz,

    /// Length of an appointment.
    ///
    /// Default: 30 minutes
    pub service_duration: Duration,

    /// Wait estimate per ticket ahead in the queue.
    ///
    /// Default: 15 minutes
    pub minutes_per_ticket: i64,

    /// Re-run availability and conflict checks on `UpdateAppointment`.
    ///
    /// Default: `false` (updates overwrite without checks)
    pub revalidate_updates: bool,

    /// Expiry applied to queue cache lists.
    ///
    /// Default: 48 hours
    pub queue_cache_ttl_seconds: u64,
}

impl EngineConfig {
    /// Create a configuration for `timezone` with default durations.
    #[must_use]
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            service_duration: Duration::minutes(DEFAULT_SERVICE_DURATION_MINUTES),
            minutes_per_ticket: DEFAULT_MINUTES_PER_TICKET,
            revalidate_updates: false,
            queue_cache_ttl_seconds: DEFAULT_QUEUE_CACHE_TTL_SECONDS,
        }
    }

    /// Set the appointment length.
    #[must_use]
    pub const fn with_service_duration(mut self, duration: Duration) -> Self {
        self.service_duration = duration;
        self
    }

    /// Set the per-ticket wait estimate.
    #[must_use]
    pub const fn with_minutes_per_ticket(mut self, minutes: i64) -> Self {
        self.minutes_per_ticket = minutes;
        self
    }

    /// Enable or disable re-validation on update.
    #[must_use]
    pub const fn with_revalidate_updates(mut self, enabled: bool) -> Self {
        self.revalidate_updates = enabled;
        self
    }

    /// Set the queue cache expiry.
    #[must_use]
    pub const fn with_queue_cache_ttl_seconds(mut self, seconds: u64) -> Self {
        self.queue_cache_ttl_seconds = seconds;
        self
    }

    /// The service day `instant` belongs to, in the configured timezone.
    #[must_use]
    pub fn service_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = EngineConfig::new(chrono_tz::UTC);
        assert_eq!(config.service_duration, Duration::minutes(30));
        assert_eq!(config.minutes_per_ticket, 15);
        assert!(!config.revalidate_updates);
    }

    #[test]
    fn service_day_follows_the_configured_timezone() {
        // 23:30 UTC on the 10th is already the 11th in Tokyo and still the 10th in New York.
        let instant = Utc
            .with_ymd_and_hms(2025, 3, 10, 23, 30, 0)
            .single()
            .unwrap_or_default();

        let tokyo = EngineConfig::new(chrono_tz::Asia::Tokyo);
        let new_york = EngineConfig::new(chrono_tz::America::New_York);

        assert_eq!(
            tokyo.service_date(instant),
            NaiveDate::from_ymd_opt(2025, 3, 11).unwrap_or_default()
        );
        assert_eq!(
            new_york.service_date(instant),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap_or_default()
        );
    }
}
