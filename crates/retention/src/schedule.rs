//! Cleanup schedule expressions.
//!
//! Accepted forms:
//! - `@hourly`, `@daily`
//! - `@every <n><s|m|h|d>`, at most [`Schedule::MAX_INTERVAL`]
//! - five-field cron (`min hour dom month dow`) where minute and hour are `*`,
//!   `N`, `*/N` or a comma list of `N`, and the remaining fields are `*`

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use telvault_core::{Error, Result};

/// When a recurring job fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval from the previous run.
    Every(Duration),
    /// Wall-clock minutes and hours (UTC), both sorted and non-empty.
    Cron { minutes: Vec<u32>, hours: Vec<u32> },
}

impl Schedule {
    /// Longest accepted `@every` interval.
    pub const MAX_INTERVAL: Duration = Duration::from_secs(366 * 86_400);

    /// Parse a schedule expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        match expr {
            "@hourly" => {
                return Ok(Schedule::Cron {
                    minutes: vec![0],
                    hours: (0..24).collect(),
                })
            }
            "@daily" | "@midnight" => {
                return Ok(Schedule::Cron {
                    minutes: vec![0],
                    hours: vec![0],
                })
            }
            _ => {}
        }
        if let Some(spec) = expr.strip_prefix("@every") {
            return parse_every(expr, spec.trim());
        }

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(expr, "expected five fields"));
        }
        if fields[2..].iter().any(|f| *f != "*") {
            return Err(invalid(
                expr,
                "day-of-month, month and day-of-week must be '*'",
            ));
        }
        Ok(Schedule::Cron {
            minutes: parse_field(expr, fields[0], 59)?,
            hours: parse_field(expr, fields[1], 23)?,
        })
    }

    /// First firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Schedule::Every(interval) => ChronoDuration::from_std(*interval)
                .ok()
                .and_then(|step| now.checked_add_signed(step))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Schedule::Cron { minutes, hours } => {
                let start = now
                    .duration_trunc(ChronoDuration::minutes(1))
                    .unwrap_or(now)
                    + ChronoDuration::minutes(1);
                for day in 0..=1 {
                    let date = start.date_naive() + ChronoDuration::days(day);
                    for &hour in hours {
                        for &minute in minutes {
                            let Some(candidate) = date.and_hms_opt(hour, minute, 0) else {
                                continue;
                            };
                            let candidate = candidate.and_utc();
                            if candidate >= start {
                                return candidate;
                            }
                        }
                    }
                }
                start + ChronoDuration::days(1)
            }
        }
    }

    /// Time to wait from `now` until the next firing.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        (self.next_after(now) - now).to_std().unwrap_or(Duration::ZERO)
    }
}

impl FromStr for Schedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Schedule::parse(s)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Every(interval) => write!(f, "@every {}s", interval.as_secs()),
            Schedule::Cron { minutes, hours } => {
                let join = |v: &[u32]| {
                    v.iter()
                        .map(|n| n.to_string())
                        .collect::<Vec<_>>()
                        .join(",")
                };
                write!(f, "{} {} * * *", join(minutes), join(hours))
            }
        }
    }
}

fn invalid(expr: &str, reason: &str) -> Error {
    Error::invalid_request(format!("invalid cleanup schedule '{}': {}", expr, reason))
}

fn parse_every(expr: &str, spec: &str) -> Result<Schedule> {
    let unit_at = spec
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| invalid(expr, "missing unit"))?;
    let (count, unit) = spec.split_at(unit_at);
    let count: u64 = count
        .parse()
        .map_err(|_| invalid(expr, "missing interval count"))?;
    let seconds = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => return Err(invalid(expr, "unit must be one of s, m, h, d")),
    };
    if count == 0 {
        return Err(invalid(expr, "interval must be positive"));
    }
    let interval = count
        .checked_mul(seconds)
        .map(Duration::from_secs)
        .filter(|interval| *interval <= Schedule::MAX_INTERVAL)
        .ok_or_else(|| invalid(expr, "interval too large"))?;
    Ok(Schedule::Every(interval))
}

fn parse_field(expr: &str, field: &str, max: u32) -> Result<Vec<u32>> {
    let mut values: Vec<u32> = if field == "*" {
        (0..=max).collect()
    } else if let Some(step) = field.strip_prefix("*/") {
        let step: u32 = step.parse().map_err(|_| invalid(expr, "bad step"))?;
        if step == 0 || step > max {
            return Err(invalid(expr, "step out of range"));
        }
        (0..=max).step_by(step as usize).collect()
    } else {
        field
            .split(',')
            .map(|part| match part.parse::<u32>() {
                Ok(n) if n <= max => Ok(n),
                _ => Err(invalid(expr, "value out of range")),
            })
            .collect::<Result<_>>()?
    };
    values.sort_unstable();
    values.dedup();
    Ok(values)
}
