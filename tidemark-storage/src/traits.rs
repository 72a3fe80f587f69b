//! Persistence contracts consumed by the range index and the orchestrator.

use async_trait::async_trait;
use tidemark_core::{
    Observation, SeriesKey, SortDirection, TemporalRange, TidemarkResult, TimeOfDayWindow,
    Timestamp, ValidationError,
};

// ============================================================================
// OBSERVATION ROWS
// ============================================================================

/// One page of a data read.
///
/// The window is half-open: `from <= timestamp < to`. Rows are ordered by
/// timestamp in `direction`. `after` is a keyset cursor: only rows strictly
/// past it in read order are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub from: Timestamp,
    pub to: Timestamp,
    pub time_of_day: TimeOfDayWindow,
    pub direction: SortDirection,
    pub after: Option<Timestamp>,
    pub limit: usize,
}

impl PageRequest {
    pub fn new(from: Timestamp, to: Timestamp) -> Self {
        Self {
            from,
            to,
            time_of_day: TimeOfDayWindow::all_day(),
            direction: SortDirection::Ascending,
            after: None,
            limit: 1000,
        }
    }

    pub fn with_time_of_day(mut self, time_of_day: TimeOfDayWindow) -> Self {
        self.time_of_day = time_of_day;
        self
    }

    pub fn with_direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_after(mut self, after: Option<Timestamp>) -> Self {
        self.after = after;
        self
    }

    pub fn validate(&self) -> TidemarkResult<()> {
        if self.from > self.to {
            return Err(ValidationError::invalid_range("read window", self.from, self.to).into());
        }
        if self.limit == 0 {
            return Err(ValidationError::InvalidValue {
                field: "limit".to_string(),
                reason: "page limit must be greater than zero".to_string(),
            }
            .into());
        }
        self.time_of_day.validate()
    }

    /// Whether a row at `timestamp` belongs in this page, ignoring `limit`.
    pub fn admits(&self, timestamp: &Timestamp) -> bool {
        if *timestamp < self.from || *timestamp >= self.to {
            return false;
        }
        let past_cursor = match (self.after, self.direction) {
            (None, _) => true,
            (Some(after), SortDirection::Ascending) => *timestamp > after,
            (Some(after), SortDirection::Descending) => *timestamp < after,
        };
        past_cursor && self.time_of_day.contains(timestamp)
    }
}

/// Per-key store of observation rows, unique on `(key, timestamp)`.
#[async_trait]
pub trait DataStore<K: SeriesKey, P: Send + Sync + 'static>: Send + Sync {
    /// Insert one row. A duplicate `(key, timestamp)` is left untouched and
    /// reported as `false`.
    async fn insert(&self, key: &K, observation: &Observation<P>) -> TidemarkResult<bool>;

    /// Insert several rows, returning how many were new.
    async fn insert_batch(
        &self,
        key: &K,
        observations: &[Observation<P>],
    ) -> TidemarkResult<usize> {
        let mut inserted = 0;
        for observation in observations {
            if self.insert(key, observation).await? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Read one page. Returns at most `request.limit` rows.
    async fn read_page(&self, key: &K, request: &PageRequest)
        -> TidemarkResult<Vec<Observation<P>>>;
}

// ============================================================================
// RANGE TABLE
// ============================================================================

/// Per-key table of closed ranges known to be fully cached.
///
/// Entries may overlap; readers squash. Inserts are idempotent.
#[async_trait]
pub trait RangeStore<K: SeriesKey>: Send + Sync {
    /// Insert a range. Returns `false` when the identical range was present.
    async fn insert_range(&self, key: &K, range: TemporalRange<Timestamp>) -> TidemarkResult<bool>;

    /// Every stored range intersecting, containing or contained by
    /// `[from, to]`, bounds inclusive. Order is unspecified.
    async fn query_ranges(
        &self,
        key: &K,
        from: Timestamp,
        to: Timestamp,
    ) -> TidemarkResult<Vec<TemporalRange<Timestamp>>>;

    /// Remove an exact range. Returns whether it existed.
    async fn remove_range(&self, key: &K, range: TemporalRange<Timestamp>) -> TidemarkResult<bool>;

    /// Every stored range for `key`, sorted from-then-to.
    async fn ranges_for_key(&self, key: &K) -> TidemarkResult<Vec<TemporalRange<Timestamp>>>;
}
