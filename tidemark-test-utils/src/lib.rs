//! Tidemark Test Utilities
//!
//! Shared test infrastructure for the Tidemark workspace:
//! - Store wrappers that count or inject failures
//! - Proptest generators for ranges and windows
//! - Fixtures for timestamps and observation series
//! - Assertions on error variants

pub use tidemark_core::{
    FeedError, Observation, SeriesKey, StorageError, TemporalRange, TidemarkConfig,
    TidemarkError, TidemarkResult, TimeOfDayWindow, Timestamp, ValidationError,
};
pub use tidemark_storage::{
    DataStore, InMemoryDataStore, InMemoryRangeStore, PageRequest, RangeStore,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// STORE WRAPPERS
// ============================================================================

/// Call counters shared between a [`CountingRangeStore`] and the test.
#[derive(Debug, Clone, Default)]
pub struct RangeStoreCounters {
    inserts: Arc<AtomicUsize>,
    queries: Arc<AtomicUsize>,
    removes: Arc<AtomicUsize>,
}

impl RangeStoreCounters {
    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }
}

/// Range store that counts calls before delegating.
#[derive(Debug, Default)]
pub struct CountingRangeStore<R> {
    inner: R,
    counters: RangeStoreCounters,
}

impl<R> CountingRangeStore<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            counters: RangeStoreCounters::default(),
        }
    }

    /// Handle on the counters that outlives moving the store.
    pub fn counters(&self) -> RangeStoreCounters {
        self.counters.clone()
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<K, R> RangeStore<K> for CountingRangeStore<R>
where
    K: SeriesKey,
    R: RangeStore<K>,
{
    async fn insert_range(&self, key: &K, range: TemporalRange<Timestamp>) -> TidemarkResult<bool> {
        self.counters.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_range(key, range).await
    }

    async fn query_ranges(
        &self,
        key: &K,
        from: Timestamp,
        to: Timestamp,
    ) -> TidemarkResult<Vec<TemporalRange<Timestamp>>> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query_ranges(key, from, to).await
    }

    async fn remove_range(&self, key: &K, range: TemporalRange<Timestamp>) -> TidemarkResult<bool> {
        self.counters.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove_range(key, range).await
    }

    async fn ranges_for_key(&self, key: &K) -> TidemarkResult<Vec<TemporalRange<Timestamp>>> {
        self.inner.ranges_for_key(key).await
    }
}

/// Data store whose inserts start failing after a set number of successes.
#[derive(Debug)]
pub struct FailingDataStore<K, P> {
    inner: InMemoryDataStore<K, P>,
    successes_left: AtomicUsize,
}

impl<K, P> FailingDataStore<K, P>
where
    K: SeriesKey,
    P: Clone + Send + Sync + 'static,
{
    pub fn fail_inserts_after(successes: usize) -> Self {
        Self {
            inner: InMemoryDataStore::new(),
            successes_left: AtomicUsize::new(successes),
        }
    }

    pub fn inner(&self) -> &InMemoryDataStore<K, P> {
        &self.inner
    }
}

#[async_trait]
impl<K, P> DataStore<K, P> for FailingDataStore<K, P>
where
    K: SeriesKey,
    P: Clone + Send + Sync + 'static,
{
    async fn insert(&self, key: &K, observation: &Observation<P>) -> TidemarkResult<bool> {
        let allowed = self
            .successes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(StorageError::TransactionFailed {
                reason: "injected insert failure".to_string(),
            }
            .into());
        }
        self.inner.insert(key, observation).await
    }

    async fn read_page(
        &self,
        key: &K,
        request: &PageRequest,
    ) -> TidemarkResult<Vec<Observation<P>>> {
        self.inner.read_page(key, request).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Tidemark types.

    use super::*;
    use chrono::{DateTime, NaiveTime, TimeDelta};
    use proptest::prelude::*;

    /// 2020-01-01T00:00:00Z.
    const BASE_SECS: i64 = 1_577_836_800;

    fn at_minute(minute: i64) -> Timestamp {
        DateTime::from_timestamp(BASE_SECS + minute * 60, 0).unwrap_or_default()
    }

    /// A timestamp on a minute boundary within the first `span_minutes` of 2020.
    pub fn arb_timestamp(span_minutes: i64) -> impl Strategy<Value = Timestamp> {
        (0..span_minutes).prop_map(at_minute)
    }

    /// A valid range whose endpoints fall within the first `span_minutes` of 2020.
    pub fn arb_range(span_minutes: i64) -> impl Strategy<Value = TemporalRange<Timestamp>> {
        (0..span_minutes, 0..span_minutes).prop_map(|(a, b)| {
            TemporalRange::new(at_minute(a.min(b)), at_minute(a.max(b)))
        })
    }

    /// Up to `max_len` valid ranges, unsorted and possibly overlapping.
    pub fn arb_ranges(
        span_minutes: i64,
        max_len: usize,
    ) -> impl Strategy<Value = Vec<TemporalRange<Timestamp>>> {
        prop::collection::vec(arb_range(span_minutes), 0..=max_len)
    }

    /// Small non-negative exclusivity offset, or none.
    pub fn arb_offset() -> impl Strategy<Value = Option<TimeDelta>> {
        prop::option::of((0i64..=120).prop_map(TimeDelta::seconds))
    }

    /// A valid time-of-day window on whole minutes.
    pub fn arb_time_of_day_window() -> impl Strategy<Value = TimeOfDayWindow> {
        (0u32..1440, 0u32..1440).prop_map(|(a, b)| {
            let lo = a.min(b);
            let hi = a.max(b);
            let time =
                |m: u32| NaiveTime::from_hms_opt(m / 60, m % 60, 0).unwrap_or(NaiveTime::MIN);
            TimeOfDayWindow::between(time(lo), time(hi)).unwrap_or_default()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for common test scenarios.

    use super::*;
    use chrono::{NaiveDateTime, TimeDelta};

    /// Parse `YYYY-MM-DDTHH:MM` or `YYYY-MM-DDTHH:MM:SS` as UTC.
    #[track_caller]
    pub fn ts(text: &str) -> Timestamp {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M"))
            .expect("fixture timestamp should parse")
            .and_utc()
    }

    /// Closed range between two [`ts`] strings.
    #[track_caller]
    pub fn range(from: &str, to: &str) -> TemporalRange<Timestamp> {
        TemporalRange::new(ts(from), ts(to))
    }

    /// One observation every `step` from `from` through `to` inclusive; the
    /// payload is the index of the point.
    pub fn series(from: Timestamp, to: Timestamp, step: TimeDelta) -> Vec<Observation<u64>> {
        let mut out = Vec::new();
        let mut at = from;
        let mut index = 0u64;
        while at <= to {
            out.push(Observation::new(at, index));
            index += 1;
            at += step;
        }
        out
    }

    /// Hourly points over `[from, to]`.
    pub fn hourly(from: &str, to: &str) -> Vec<Observation<u64>> {
        series(ts(from), ts(to), TimeDelta::hours(1))
    }

    /// Config tuned for tests: small pages so cursors cross page boundaries.
    pub fn small_page_config() -> TidemarkConfig {
        TidemarkConfig::default()
            .with_page_size(7)
            .with_feed_channel_capacity(4)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on Tidemark error variants and range sets.

    use super::*;

    /// Assert that a result is a validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &TidemarkResult<T>) {
        match result {
            Err(TidemarkError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a result is a storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &TidemarkResult<T>) {
        match result {
            Err(TidemarkError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a result is a feed error.
    #[track_caller]
    pub fn assert_feed_error<T: std::fmt::Debug>(result: &TidemarkResult<T>) {
        match result {
            Err(TidemarkError::Feed(_)) => {}
            other => panic!("Expected Feed error, got: {:?}", other),
        }
    }

    /// Assert that `ranges` are sorted, valid and pairwise disjoint.
    #[track_caller]
    pub fn assert_disjoint_sorted(ranges: &[TemporalRange<Timestamp>]) {
        for range in ranges {
            assert!(range.is_valid(), "inverted range {}", range);
        }
        for pair in ranges.windows(2) {
            assert!(
                pair[0].to() < pair[1].from(),
                "ranges {} and {} overlap or are out of order",
                pair[0],
                pair[1]
            );
        }
    }
}
