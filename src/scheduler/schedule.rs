//! Daily wall-clock schedule and next-occurrence arithmetic.

use crate::error::{Result, RunnerError};
use chrono::{DateTime, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Days searched for a representable local time before giving up.
const MAX_LOOKAHEAD_DAYS: usize = 7;

/// Fire once per day at `hour:minute` local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawScheduleSpec")]
pub struct ScheduleSpec {
    hour: u8,
    minute: u8,
}

#[derive(Deserialize)]
struct RawScheduleSpec {
    hour: u8,
    minute: u8,
}

impl TryFrom<RawScheduleSpec> for ScheduleSpec {
    type Error = RunnerError;

    fn try_from(raw: RawScheduleSpec) -> Result<Self> {
        Self::new(raw.hour, raw.minute)
    }
}

impl ScheduleSpec {
    /// Rejects hours above 23 and minutes above 59.
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(RunnerError::Schedule(format!(
                "invalid time of day {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// The first occurrence strictly after `now`.
    ///
    /// A target equal to `now` counts as passed and rolls to tomorrow.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<DateTime<Tz>> {
        self.first_from(now.date_naive(), now)
    }

    /// The occurrence on the day after `fired_at`.
    pub fn next_day_after<Tz: TimeZone>(&self, fired_at: &DateTime<Tz>) -> Result<DateTime<Tz>> {
        let tomorrow = fired_at
            .date_naive()
            .succ_opt()
            .ok_or_else(|| RunnerError::Schedule("date out of range".to_owned()))?;
        self.first_from(tomorrow, fired_at)
    }

    /// Scan forward from `date` for the first representable occurrence later
    /// than `after`. Ambiguous local times take the earliest instant; times
    /// inside a DST gap skip to the next day.
    fn first_from<Tz: TimeZone>(
        &self,
        mut date: NaiveDate,
        after: &DateTime<Tz>,
    ) -> Result<DateTime<Tz>> {
        let tz = after.timezone();
        for _ in 0..MAX_LOOKAHEAD_DAYS {
            let local = date.and_hms_opt(u32::from(self.hour), u32::from(self.minute), 0);
            let candidate = local.and_then(|l| tz.from_local_datetime(&l).earliest());
            if let Some(candidate) = candidate.filter(|c| c > after) {
                return Ok(candidate);
            }
            date = date
                .succ_opt()
                .ok_or_else(|| RunnerError::Schedule("date out of range".to_owned()))?;
        }
        Err(RunnerError::Schedule(format!(
            "no representable occurrence of {self} within {MAX_LOOKAHEAD_DAYS} days"
        )))
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "daily at {:02}:{:02}", self.hour, self.minute)
    }
}
