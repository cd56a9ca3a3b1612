//! Date ranges, hour-of-day schedules and store time axes.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConversionError, ConversionResult};

/// A closed range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Number of days covered, inclusive of both ends.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn validate(&self) -> ConversionResult<()> {
        if self.is_empty() {
            return Err(ConversionError::configuration(format!(
                "date range {} .. {} is empty",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// Midnight UTC on the first day.
    pub fn start_time(&self) -> DateTime<Utc> {
        midnight(self.start)
    }

    /// Midnight UTC on the day after the last day (exclusive end).
    pub fn end_time_exclusive(&self) -> DateTime<Utc> {
        midnight(self.end) + Duration::days(1)
    }
}

/// Hours of the day at which a variable's records exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Hours of day (0..24), ascending.
    pub hours: Vec<u32>,
    /// Forecast step carried by the records, 0 for analyses.
    #[serde(default)]
    pub step: u32,
}

impl Schedule {
    /// Every hour of the day.
    pub fn hourly() -> Self {
        Self::every(1)
    }

    /// Analyses at every step of an axis with the given resolution.
    pub fn every(resolution_hours: u32) -> Self {
        Self {
            hours: (0..24).step_by(resolution_hours.max(1) as usize).collect(),
            step: 0,
        }
    }

    /// Forecast records issued at the given hours.
    pub fn forecast(hours: &[u32], step: u32) -> Self {
        Self {
            hours: hours.to_vec(),
            step,
        }
    }

    pub fn is_scheduled(&self, time: DateTime<Utc>) -> bool {
        time.minute() == 0 && time.second() == 0 && self.hours.contains(&time.hour())
    }

    pub fn validate(&self) -> ConversionResult<()> {
        if self.hours.is_empty() {
            return Err(ConversionError::configuration("schedule has no hours"));
        }
        if let Some(bad) = self.hours.iter().find(|h| **h >= 24) {
            return Err(ConversionError::configuration(format!(
                "schedule hour {} is outside 0..24",
                bad
            )));
        }
        if self.hours.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConversionError::configuration(
                "schedule hours must be strictly ascending",
            ));
        }
        Ok(())
    }
}

/// Evenly spaced time axis of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAxis {
    pub start: DateTime<Utc>,
    pub resolution_hours: u32,
    pub len: u64,
}

impl TimeAxis {
    pub fn new(start: DateTime<Utc>, resolution_hours: u32, len: u64) -> Self {
        Self {
            start,
            resolution_hours,
            len,
        }
    }

    /// Axis covering every day of the range at the given resolution.
    pub fn from_date_range(range: &DateRange, resolution_hours: u32) -> ConversionResult<Self> {
        range.validate()?;
        if resolution_hours == 0 || 24 % resolution_hours != 0 {
            return Err(ConversionError::configuration(format!(
                "time resolution {}h does not divide a day",
                resolution_hours
            )));
        }
        let len = range.days() as u64 * (24 / resolution_hours) as u64;
        Ok(Self::new(range.start_time(), resolution_hours, len))
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn step(&self) -> Duration {
        Duration::hours(self.resolution_hours as i64)
    }

    pub fn time_at(&self, index: u64) -> DateTime<Utc> {
        self.start + Duration::hours(index as i64 * self.resolution_hours as i64)
    }

    /// Last instant on the axis.
    pub fn last(&self) -> Option<DateTime<Utc>> {
        if self.len == 0 {
            None
        } else {
            Some(self.time_at(self.len - 1))
        }
    }

    /// Index of an instant on the axis, if it falls exactly on a step.
    pub fn index_of(&self, time: DateTime<Utc>) -> Option<u64> {
        let offset = (time - self.start).num_seconds();
        let step = self.resolution_hours as i64 * 3600;
        if offset < 0 || offset % step != 0 {
            return None;
        }
        let index = (offset / step) as u64;
        (index < self.len).then_some(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        (0..self.len).map(move |i| self.time_at(i))
    }

    /// Coordinate labels in hours since the axis start.
    pub fn labels(&self) -> Vec<i64> {
        (0..self.len)
            .map(|i| i as i64 * self.resolution_hours as i64)
            .collect()
    }

    /// CF-style units string for [`TimeAxis::labels`].
    pub fn units(&self) -> String {
        format!("hours since {}", self.start.format("%Y-%m-%dT%H:%M:%S"))
    }

    /// Number of chunks needed to cover the axis.
    pub fn chunk_count(&self, chunk_length: u64) -> u64 {
        if chunk_length == 0 {
            return 0;
        }
        self.len.div_ceil(chunk_length)
    }

    /// If `other` lies on this axis as a contiguous run with the same
    /// resolution, return its offset into this axis.
    pub fn contains_subrange(&self, other: &TimeAxis) -> Option<u64> {
        if other.resolution_hours != self.resolution_hours {
            return None;
        }
        if other.len == 0 {
            return Some(0);
        }
        let offset = self.index_of(other.start)?;
        (offset + other.len <= self.len).then_some(offset)
    }

    /// The same axis with `len` extended; shorter lengths are rejected.
    pub fn extended_to(&self, len: u64) -> ConversionResult<TimeAxis> {
        if len < self.len {
            return Err(ConversionError::configuration(format!(
                "cannot shrink time axis from {} to {} steps",
                self.len, len
            )));
        }
        Ok(TimeAxis { len, ..*self })
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}
