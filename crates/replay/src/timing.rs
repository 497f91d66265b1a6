//! Timestamp rebasing and pacing.

use chrono::{DateTime, Utc};
use std::time::Duration;

use telvault_core::{Error, Result, TimestampAdjustment};

/// Reject speed multipliers that cannot divide a delay.
pub fn validate_speed(speed_multiplier: f64) -> Result<()> {
    if speed_multiplier.is_finite() && speed_multiplier > 0.0 {
        Ok(())
    } else {
        Err(Error::invalid_request(format!(
            "speed multiplier must be a finite positive number, got {}",
            speed_multiplier
        )))
    }
}

/// Timestamp a record is delivered with.
///
/// `Current` shifts by `replay_start - capture_start`, so deltas between
/// records are preserved.
pub fn target_timestamp(
    captured_at: DateTime<Utc>,
    adjustment: TimestampAdjustment,
    capture_start: DateTime<Utc>,
    replay_start: DateTime<Utc>,
) -> DateTime<Utc> {
    match adjustment {
        TimestampAdjustment::Original => captured_at,
        TimestampAdjustment::Current => captured_at + (replay_start - capture_start),
    }
}

/// Delay before delivering a record captured at `current`, given the
/// previously delivered one.
///
/// Out-of-order captures (clock steps) yield zero.
pub fn pacing_delay(
    previous: Option<DateTime<Utc>>,
    current: DateTime<Utc>,
    speed_multiplier: f64,
) -> Duration {
    let Some(previous) = previous else {
        return Duration::ZERO;
    };
    let gap = match (current - previous).to_std() {
        Ok(gap) => gap,
        Err(_) => return Duration::ZERO,
    };
    Duration::try_from_secs_f64(gap.as_secs_f64() / speed_multiplier).unwrap_or(Duration::ZERO)
}
