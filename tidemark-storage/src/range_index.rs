//! Per-key record of fully cached intervals.
//!
//! Writers never squash. Two requests committing adjacent gaps concurrently
//! may leave overlapping or touching entries behind, so every read path
//! squashes before it trusts the result. [`RangeIndex::compact`] rewrites a
//! key's entries when the table has grown fragmented.

use chrono::TimeDelta;
use tidemark_core::algebra::{clamp_to_window, missing, squash};
use tidemark_core::{
    SeriesKey, SortDirection, TemporalRange, TidemarkResult, Timestamp, ValidationError,
};

use crate::traits::RangeStore;

/// Range bookkeeping on top of a [`RangeStore`].
#[derive(Debug, Clone)]
pub struct RangeIndex<R> {
    store: R,
}

impl<R> RangeIndex<R> {
    pub fn new(store: R) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn into_store(self) -> R {
        self.store
    }

    /// Record `range` as fully cached for `key`.
    ///
    /// Only call this after every row of `range` has been written to the data
    /// store. Returns whether the exact range was new.
    pub async fn mark_complete<K>(
        &self,
        key: &K,
        range: TemporalRange<Timestamp>,
    ) -> TidemarkResult<bool>
    where
        K: SeriesKey,
        R: RangeStore<K>,
    {
        validate(&range, "completed range")?;
        self.store.insert_range(key, range).await
    }

    /// Stored ranges touching `[from, to]`, inclusive, in presentation order.
    ///
    /// Results are not squashed and may extend beyond the window.
    pub async fn query<K>(
        &self,
        key: &K,
        from: Timestamp,
        to: Timestamp,
        direction: SortDirection,
    ) -> TidemarkResult<Vec<TemporalRange<Timestamp>>>
    where
        K: SeriesKey,
        R: RangeStore<K>,
    {
        validate(&TemporalRange::new(from, to), "query window")?;
        let mut ranges = self.store.query_ranges(key, from, to).await?;
        direction.sort_ranges(&mut ranges);
        Ok(ranges)
    }

    /// Disjoint cached ranges inside `[from, to]`, sorted ascending.
    pub async fn valid_ranges<K>(
        &self,
        key: &K,
        from: Timestamp,
        to: Timestamp,
    ) -> TidemarkResult<Vec<TemporalRange<Timestamp>>>
    where
        K: SeriesKey,
        R: RangeStore<K>,
    {
        let stored = self.query(key, from, to, SortDirection::Ascending).await?;
        clamp_to_window(&squash(&stored), from, to)
    }

    /// Sub-ranges of `[from, to]` that still have to be fetched.
    pub async fn missing<K>(
        &self,
        key: &K,
        from: Timestamp,
        to: Timestamp,
        from_offset: Option<TimeDelta>,
        to_offset: Option<TimeDelta>,
    ) -> TidemarkResult<Vec<TemporalRange<Timestamp>>>
    where
        K: SeriesKey,
        R: RangeStore<K>,
    {
        let valid = self.valid_ranges(key, from, to).await?;
        missing(from, to, &valid, from_offset, to_offset)
    }

    /// Replace a key's entries with their squashed union.
    ///
    /// Merged ranges are inserted before the entries they supersede are
    /// removed, so an interruption leaves redundant entries, never holes.
    /// Returns how many entries were removed.
    pub async fn compact<K>(&self, key: &K) -> TidemarkResult<usize>
    where
        K: SeriesKey,
        R: RangeStore<K>,
    {
        let stored = self.store.ranges_for_key(key).await?;
        let merged = squash(&stored);
        if merged.len() == stored.len() {
            return Ok(0);
        }

        for range in &merged {
            self.store.insert_range(key, *range).await?;
        }

        let mut removed = 0;
        for range in stored.iter().filter(|r| !merged.contains(r)) {
            if self.store.remove_range(key, *range).await? {
                removed += 1;
            }
        }

        tracing::debug!(
            key = %key,
            before = stored.len(),
            after = merged.len(),
            "compacted range index"
        );
        Ok(removed)
    }
}

fn validate(range: &TemporalRange<Timestamp>, field: &str) -> TidemarkResult<()> {
    if !range.is_valid() {
        return Err(ValidationError::invalid_range(field, range.from(), range.to()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRangeStore;
    use chrono::NaiveDateTime;
    use tidemark_core::TidemarkError;

    fn ts(s: &str) -> Timestamp {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
            .expect("fixture timestamp should parse")
            .and_utc()
    }

    fn range(from: &str, to: &str) -> TemporalRange<Timestamp> {
        TemporalRange::new(ts(from), ts(to))
    }

    async fn week_index() -> RangeIndex<InMemoryRangeStore<String>> {
        let index = RangeIndex::new(InMemoryRangeStore::new());
        let key = "AAPL".to_string();
        for r in [
            range("2021-01-01T01:00", "2021-01-03T12:30"),
            range("2021-01-02T00:00", "2021-01-04T00:00"),
            range("2021-01-05T09:00", "2021-01-06T01:00"),
            range("2021-01-06T04:00", "2021-01-06T08:00"),
        ] {
            index.mark_complete(&key, r).await.expect("mark should succeed");
        }
        index
    }

    #[tokio::test]
    async fn test_missing_for_week() {
        let index = week_index().await;
        let gaps = index
            .missing(
                &"AAPL".to_string(),
                ts("2021-01-01T00:00"),
                ts("2021-01-07T00:00"),
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            gaps,
            vec![
                range("2021-01-01T00:00", "2021-01-01T01:00"),
                range("2021-01-04T00:00", "2021-01-05T09:00"),
                range("2021-01-06T01:00", "2021-01-06T04:00"),
                range("2021-01-06T08:00", "2021-01-07T00:00"),
            ]
        );
    }

    #[tokio::test]
    async fn test_valid_ranges_squash_and_clamp() {
        let index = week_index().await;
        let valid = index
            .valid_ranges(&"AAPL".to_string(), ts("2021-01-02T00:00"), ts("2021-01-05T12:00"))
            .await
            .unwrap();

        assert_eq!(
            valid,
            vec![
                range("2021-01-02T00:00", "2021-01-04T00:00"),
                range("2021-01-05T09:00", "2021-01-05T12:00"),
            ]
        );
    }

    #[tokio::test]
    async fn test_query_sorted_by_direction() {
        let index = week_index().await;
        let key = "AAPL".to_string();
        let from = ts("2021-01-01T00:00");
        let to = ts("2021-01-07T00:00");

        let asc = index.query(&key, from, to, SortDirection::Ascending).await.unwrap();
        assert_eq!(asc.first(), Some(&range("2021-01-01T01:00", "2021-01-03T12:30")));

        let desc = index.query(&key, from, to, SortDirection::Descending).await.unwrap();
        assert_eq!(desc.first(), Some(&range("2021-01-06T04:00", "2021-01-06T08:00")));
        assert_eq!(desc.len(), 4);
    }

    #[tokio::test]
    async fn test_query_rejects_inverted_window() {
        let index = week_index().await;
        let err = index
            .query(
                &"AAPL".to_string(),
                ts("2021-01-02T00:00"),
                ts("2021-01-01T00:00"),
                SortDirection::Ascending,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TidemarkError::Validation(_)));
    }

    #[tokio::test]
    async fn test_mark_complete_is_idempotent_and_validated() {
        let index = RangeIndex::new(InMemoryRangeStore::new());
        let key = "AAPL".to_string();
        let r = range("2021-01-01T00:00", "2021-01-02T00:00");

        assert!(index.mark_complete(&key, r).await.unwrap());
        assert!(!index.mark_complete(&key, r).await.unwrap());
        assert!(index
            .mark_complete(&key, range("2021-01-02T00:00", "2021-01-01T00:00"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_compact_merges_entries_without_losing_coverage() {
        let index = week_index().await;
        let key = "AAPL".to_string();
        let from = ts("2021-01-01T00:00");
        let to = ts("2021-01-07T00:00");
        let before = index.valid_ranges(&key, from, to).await.unwrap();

        let removed = index.compact(&key).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(index.store().ranges_for_key(&key).await.unwrap().len(), 3);
        assert_eq!(index.valid_ranges(&key, from, to).await.unwrap(), before);

        assert_eq!(index.compact(&key).await.unwrap(), 0);
    }
}
