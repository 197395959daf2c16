//! Daily trigger: a six-field cron schedule built from `schedule.daily_at`.

use std::str::FromStr;

use chrono::{DateTime, NaiveTime, TimeZone, Timelike};
use cron::Schedule;
use paperdrop_common::{PaperdropError, Result};

/// `sec min hour * * *` firing once a day at `at`.
pub fn daily_schedule(at: NaiveTime) -> Result<Schedule> {
    let expr = format!("0 {} {} * * *", at.minute(), at.hour());
    Schedule::from_str(&expr)
        .map_err(|e| PaperdropError::Config(format!("invalid daily schedule {:?}: {}", expr, e)))
}

/// First firing strictly after `now`, on `now`'s wall clock.
pub fn next_run<Tz: TimeZone>(schedule: &Schedule, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    schedule.after(now).next()
}
