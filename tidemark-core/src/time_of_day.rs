//! Recurring daily sub-window filter.

use crate::{TidemarkResult, Timestamp, ValidationError};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Last representable instant of a day.
pub const END_OF_DAY: NaiveTime = match NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999) {
    Some(t) => t,
    None => NaiveTime::MIN,
};

/// A clock-time window applied to every day of a read, e.g. trading hours.
///
/// Clock times are evaluated in UTC. A missing bound means the window is open
/// on that side. When filtering rows, `from` is inclusive and `to` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TimeOfDayWindow {
    from: Option<NaiveTime>,
    to: Option<NaiveTime>,
}

impl TimeOfDayWindow {
    /// A window that accepts every time of day.
    pub fn all_day() -> Self {
        Self::default()
    }

    /// A window bounded on both sides.
    pub fn between(from: NaiveTime, to: NaiveTime) -> TidemarkResult<Self> {
        Self::new(Some(from), Some(to))
    }

    /// A window with optional bounds, rejecting `from > to`.
    pub fn new(from: Option<NaiveTime>, to: Option<NaiveTime>) -> TidemarkResult<Self> {
        let window = Self { from, to };
        window.validate()?;
        Ok(window)
    }

    pub fn from(&self) -> Option<NaiveTime> {
        self.from
    }

    pub fn to(&self) -> Option<NaiveTime> {
        self.to
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// Bounds with defaults applied: midnight and [`END_OF_DAY`].
    pub fn bounds(&self) -> (NaiveTime, NaiveTime) {
        (
            self.from.unwrap_or(NaiveTime::MIN),
            self.to.unwrap_or(END_OF_DAY),
        )
    }

    pub fn validate(&self) -> TidemarkResult<()> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(ValidationError::invalid_range("time_of_day", from, to).into());
            }
        }
        Ok(())
    }

    /// Row filter: clock time `>= from` and `< to`.
    pub fn contains(&self, timestamp: &Timestamp) -> bool {
        let time = timestamp.time();
        self.from.map_or(true, |from| time >= from) && self.to.map_or(true, |to| time < to)
    }
}

impl fmt::Display for TimeOfDayWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.from, self.to) {
            (None, None) => f.write_str("all day"),
            (from, to) => {
                let (from_default, to_default) = self.bounds();
                write!(
                    f,
                    "{}..{}",
                    from.unwrap_or(from_default),
                    to.unwrap_or(to_default)
                )
            }
        }
    }
}
