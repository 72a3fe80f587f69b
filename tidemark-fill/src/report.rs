//! Fetch results: the row cursor plus an account of what the fill did.

use serde::{Deserialize, Serialize};
use tidemark_core::{FeedError, SeriesKey, TemporalRange, TidemarkResult, Timestamp};
use tidemark_storage::{DataStore, ObservationCursor};

/// A gap the feed could not fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapFailure {
    pub window: TemporalRange<Timestamp>,
    pub error: FeedError,
}

/// Per-gap point counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointCounts {
    /// Rows newly written to the data store.
    pub ingested: usize,
    /// Points already present in the data store.
    pub duplicates: usize,
    /// Points outside the requested gap, dropped.
    pub rejected: usize,
}

impl PointCounts {
    pub fn merge(&mut self, other: PointCounts) {
        self.ingested += other.ingested;
        self.duplicates += other.duplicates;
        self.rejected += other.rejected;
    }
}

/// What happened while serving one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillReport {
    /// The requested window, closed.
    pub window: TemporalRange<Timestamp>,
    /// Gaps computed from the range index.
    pub gaps: Vec<TemporalRange<Timestamp>>,
    /// Gaps filled and recorded in the range index.
    pub committed: Vec<TemporalRange<Timestamp>>,
    /// Gaps left unfilled.
    pub failed: Vec<GapFailure>,
    pub points: PointCounts,
}

impl FillReport {
    pub fn new(window: TemporalRange<Timestamp>, gaps: Vec<TemporalRange<Timestamp>>) -> Self {
        Self {
            window,
            gaps,
            committed: Vec::new(),
            failed: Vec::new(),
            points: PointCounts::default(),
        }
    }

    /// Whether every requested row came from a fully cached range.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Whether the whole window was already cached.
    pub fn was_fully_cached(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn failed_windows(&self) -> Vec<TemporalRange<Timestamp>> {
        self.failed.iter().map(|f| f.window).collect()
    }
}

/// Result of a fetch: a lazy row cursor and the fill report.
///
/// Rows are served even when some gaps failed. Check [`SeriesRead::is_complete`]
/// or call [`SeriesRead::require_complete`] when partial data is unacceptable.
pub struct SeriesRead<K, P, D> {
    cursor: ObservationCursor<K, P, D>,
    report: FillReport,
}

impl<K, P, D> SeriesRead<K, P, D>
where
    K: SeriesKey,
    P: Send + Sync + 'static,
    D: DataStore<K, P>,
{
    pub fn new(cursor: ObservationCursor<K, P, D>, report: FillReport) -> Self {
        Self { cursor, report }
    }

    pub fn report(&self) -> &FillReport {
        &self.report
    }

    pub fn is_complete(&self) -> bool {
        self.report.is_complete()
    }

    pub fn cursor(&mut self) -> &mut ObservationCursor<K, P, D> {
        &mut self.cursor
    }

    pub fn into_parts(self) -> (ObservationCursor<K, P, D>, FillReport) {
        (self.cursor, self.report)
    }

    pub fn into_cursor(self) -> ObservationCursor<K, P, D> {
        self.cursor
    }

    /// The cursor, or a [`FeedError::PartialFill`] naming the unfilled windows.
    pub fn require_complete(self) -> TidemarkResult<ObservationCursor<K, P, D>> {
        if self.report.is_complete() {
            return Ok(self.cursor);
        }
        Err(FeedError::PartialFill {
            windows: self.report.failed_windows(),
        }
        .into())
    }
}
