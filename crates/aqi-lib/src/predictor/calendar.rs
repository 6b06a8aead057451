//! Calendar context for feature extraction
//!
//! The classifier was trained with date features, so every prediction reads
//! the current date. The clock is injectable to keep the transform
//! reproducible under test.

use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate};
use std::f64::consts::PI;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Wall clock in the host's local timezone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().into()
    }
}

/// Clock frozen at a single instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<FixedOffset>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

/// Season, encoded in alphabetical order as the training label encoder did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    Fall,
    Spring,
    Summer,
    Winter,
}

impl Season {
    pub fn from_month(month: u32) -> Self {
        match month {
            12 | 1 | 2 => Season::Winter,
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            _ => Season::Fall,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Season::Fall => 0,
            Season::Spring => 1,
            Season::Summer => 2,
            Season::Winter => 3,
        }
    }
}

/// Date-derived features for one prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarFeatures {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    /// Monday = 0 .. Sunday = 6
    pub day_of_week: u32,
    pub season: Season,
}

impl CalendarFeatures {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
            day_of_week: date.weekday().num_days_from_monday(),
            season: Season::from_month(date.month()),
        }
    }

    pub fn month_cycle(&self) -> (f64, f64) {
        cyclical(self.month as f64, 12.0)
    }

    pub fn day_of_week_cycle(&self) -> (f64, f64) {
        cyclical(self.day_of_week as f64, 7.0)
    }

    pub fn day_cycle(&self) -> (f64, f64) {
        cyclical(self.day as f64, 31.0)
    }
}

/// `(sin(2πv/period), cos(2πv/period))`
pub fn cyclical(value: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * value / period;
    (angle.sin(), angle.cos())
}
