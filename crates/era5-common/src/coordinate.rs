//! Logical (time, level) coordinates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point on a variable's time × vertical axes.
///
/// Ordering is by time, then level, which is the order the locator yields
/// and the assembler consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub time: DateTime<Utc>,
    /// `None` for single-level variables.
    pub level: Option<u32>,
}

impl Coordinate {
    pub fn new(time: DateTime<Utc>, level: Option<u32>) -> Self {
        Self { time, level }
    }

    pub fn surface(time: DateTime<Utc>) -> Self {
        Self { time, level: None }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            Some(level) => write!(f, "{} level {}", self.time.format("%Y-%m-%dT%H:%MZ"), level),
            None => write!(f, "{}", self.time.format("%Y-%m-%dT%H:%MZ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ordering_time_then_level() {
        let t0 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2020, 1, 1, 1, 0, 0).unwrap();
        let mut coords = vec![
            Coordinate::new(t1, Some(1)),
            Coordinate::new(t0, Some(2)),
            Coordinate::new(t0, Some(1)),
        ];
        coords.sort();
        assert_eq!(coords[0], Coordinate::new(t0, Some(1)));
        assert_eq!(coords[1], Coordinate::new(t0, Some(2)));
        assert_eq!(coords[2], Coordinate::new(t1, Some(1)));
    }

    #[test]
    fn test_display() {
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 6, 0, 0).unwrap();
        assert_eq!(Coordinate::surface(t).to_string(), "2020-01-01T06:00Z");
        assert_eq!(Coordinate::new(t, Some(500)).to_string(), "2020-01-01T06:00Z level 500");
    }
}
