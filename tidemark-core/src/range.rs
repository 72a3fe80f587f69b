//! Temporal ranges and their canonical orderings.

use crate::{TidemarkResult, ValidationError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// An immutable `(from, to)` pair over an ordered time type.
///
/// Whether `to` is inclusive depends on where the range is used. Ranges kept
/// in the range index are closed; ranges bounding a data read are half-open.
///
/// The derived ordering is from-then-to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemporalRange<T> {
    from: T,
    to: T,
}

impl<T: Ord + Copy> TemporalRange<T> {
    /// Build a range without checking `from <= to`.
    ///
    /// Algebra functions that must reject inverted ranges validate their
    /// inputs themselves; use [`TemporalRange::try_new`] at API boundaries.
    pub fn new(from: T, to: T) -> Self {
        Self { from, to }
    }

    /// Build a range, rejecting `from > to`.
    pub fn try_new(from: T, to: T) -> TidemarkResult<Self>
    where
        T: fmt::Display,
    {
        if from > to {
            return Err(ValidationError::invalid_range("range", from, to).into());
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> T {
        self.from
    }

    pub fn to(&self) -> T {
        self.to
    }

    /// True when `from <= to`.
    pub fn is_valid(&self) -> bool {
        self.from <= self.to
    }

    /// Closed containment: both bounds included.
    pub fn contains(&self, t: &T) -> bool {
        self.from <= *t && *t <= self.to
    }

    /// Half-open containment: `from` included, `to` excluded.
    pub fn contains_half_open(&self, t: &T) -> bool {
        self.from <= *t && *t < self.to
    }

    /// Closed intersection test. Ranges sharing only an endpoint intersect.
    pub fn intersects(&self, other: &Self) -> bool {
        self.from <= other.to && other.from <= self.to
    }
}

impl<T: fmt::Display> fmt::Display for TemporalRange<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Orders by `from` ascending, ties broken by `to` ascending.
pub fn from_then_to<T: Ord>(a: &TemporalRange<T>, b: &TemporalRange<T>) -> Ordering {
    a.from.cmp(&b.from).then_with(|| a.to.cmp(&b.to))
}

/// Orders by `to` ascending, ties broken by `from` ascending.
pub fn to_then_from<T: Ord>(a: &TemporalRange<T>, b: &TemporalRange<T>) -> Ordering {
    a.to.cmp(&b.to).then_with(|| a.from.cmp(&b.from))
}

// ============================================================================
// SORT DIRECTION
// ============================================================================

/// Ordering of query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ascending",
            SortDirection::Descending => "descending",
        }
    }

    pub fn is_ascending(&self) -> bool {
        matches!(self, SortDirection::Ascending)
    }

    /// Sort ranges for presentation.
    ///
    /// Ascending uses from-then-to. Descending uses to-then-from reversed, so
    /// the range with the latest end comes first and ties go to the latest start.
    pub fn sort_ranges<T: Ord>(&self, ranges: &mut [TemporalRange<T>]) {
        match self {
            SortDirection::Ascending => ranges.sort_by(from_then_to),
            SortDirection::Descending => ranges.sort_by(|a, b| to_then_from(b, a)),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ascending" | "asc" => Ok(SortDirection::Ascending),
            "descending" | "desc" => Ok(SortDirection::Descending),
            other => Err(ValidationError::InvalidValue {
                field: "sort_direction".to_string(),
                reason: format!("unknown direction '{}'", other),
            }),
        }
    }
}
