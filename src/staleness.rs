/// staleness.rs – Decide whether an account's feed is offline.
///
/// The upstream writer sometimes stamps rows in a different UTC offset than
/// the viewer's clock. A difference above `skew_trigger_seconds` is assumed to
/// carry a fixed `skew_offset_seconds` error (7 h by default) and is corrected
/// before the offline threshold is applied.
///
/// This is an approximation: a row that is genuinely stale by roughly seven
/// hours reads as fresh, and any other large gap is measured against the
/// offset rather than against zero.
use chrono::{DateTime, Utc};

pub const OFFLINE_AFTER_SECONDS: f64 = 180.0;
pub const SKEW_TRIGGER_SECONDS: f64 = 20_000.0;
pub const SKEW_OFFSET_SECONDS: f64 = 25_200.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StalenessRule {
    pub offline_after_seconds: f64,
    pub skew_trigger_seconds: f64,
    pub skew_offset_seconds: f64,
}

impl Default for StalenessRule {
    fn default() -> Self {
        Self {
            offline_after_seconds: OFFLINE_AFTER_SECONDS,
            skew_trigger_seconds: SKEW_TRIGGER_SECONDS,
            skew_offset_seconds: SKEW_OFFSET_SECONDS,
        }
    }
}

impl StalenessRule {
    /// Age of the row in seconds after the skew correction, or `None` when
    /// the row has no timestamp.
    pub fn effective_age_seconds(
        &self,
        last_updated_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let updated = last_updated_at?;
        let diff = (now - updated).num_milliseconds().abs() as f64 / 1000.0;
        if diff > self.skew_trigger_seconds {
            Some((diff - self.skew_offset_seconds).abs())
        } else {
            Some(diff)
        }
    }

    pub fn is_offline(&self, last_updated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match self.effective_age_seconds(last_updated_at, now) {
            Some(age) => age > self.offline_after_seconds,
            None => true,
        }
    }
}
