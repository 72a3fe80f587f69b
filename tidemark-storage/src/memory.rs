//! In-memory stores for tests and embedding.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use tidemark_core::{
    Observation, SeriesKey, SortDirection, TemporalRange, TidemarkResult, Timestamp,
};
use tokio::sync::RwLock;

use crate::traits::{DataStore, PageRequest, RangeStore};

/// Observation rows held in a `BTreeMap` per key.
#[derive(Debug)]
pub struct InMemoryDataStore<K, P> {
    rows: RwLock<HashMap<K, BTreeMap<Timestamp, P>>>,
}

impl<K: SeriesKey, P: Clone + Send + Sync + 'static> InMemoryDataStore<K, P> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Total rows stored for `key`.
    pub async fn row_count(&self, key: &K) -> usize {
        self.rows.read().await.get(key).map_or(0, BTreeMap::len)
    }
}

impl<K: SeriesKey, P: Clone + Send + Sync + 'static> Default for InMemoryDataStore<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, P> DataStore<K, P> for InMemoryDataStore<K, P>
where
    K: SeriesKey,
    P: Clone + Send + Sync + 'static,
{
    async fn insert(&self, key: &K, observation: &Observation<P>) -> TidemarkResult<bool> {
        let mut rows = self.rows.write().await;
        let series = rows.entry(key.clone()).or_default();
        if series.contains_key(&observation.timestamp) {
            return Ok(false);
        }
        series.insert(observation.timestamp, observation.payload.clone());
        Ok(true)
    }

    async fn read_page(
        &self,
        key: &K,
        request: &PageRequest,
    ) -> TidemarkResult<Vec<Observation<P>>> {
        request.validate()?;
        let rows = self.rows.read().await;
        let Some(series) = rows.get(key) else {
            return Ok(Vec::new());
        };

        let window = series.range(request.from..request.to);
        let admitted = |(ts, payload): (&Timestamp, &P)| {
            request
                .admits(ts)
                .then(|| Observation::new(*ts, payload.clone()))
        };
        let page = match request.direction {
            SortDirection::Ascending => window.filter_map(admitted).take(request.limit).collect(),
            SortDirection::Descending => window
                .rev()
                .filter_map(admitted)
                .take(request.limit)
                .collect(),
        };
        Ok(page)
    }
}

/// Range table held in a `BTreeSet` per key.
#[derive(Debug)]
pub struct InMemoryRangeStore<K> {
    ranges: RwLock<HashMap<K, BTreeSet<TemporalRange<Timestamp>>>>,
}

impl<K: SeriesKey> InMemoryRangeStore<K> {
    pub fn new() -> Self {
        Self {
            ranges: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: SeriesKey> Default for InMemoryRangeStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: SeriesKey> RangeStore<K> for InMemoryRangeStore<K> {
    async fn insert_range(&self, key: &K, range: TemporalRange<Timestamp>) -> TidemarkResult<bool> {
        let mut ranges = self.ranges.write().await;
        Ok(ranges.entry(key.clone()).or_default().insert(range))
    }

    async fn query_ranges(
        &self,
        key: &K,
        from: Timestamp,
        to: Timestamp,
    ) -> TidemarkResult<Vec<TemporalRange<Timestamp>>> {
        let window = TemporalRange::new(from, to);
        let ranges = self.ranges.read().await;
        Ok(ranges
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|r| r.intersects(&window))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove_range(&self, key: &K, range: TemporalRange<Timestamp>) -> TidemarkResult<bool> {
        let mut ranges = self.ranges.write().await;
        Ok(ranges
            .get_mut(key)
            .map(|set| set.remove(&range))
            .unwrap_or(false))
    }

    async fn ranges_for_key(&self, key: &K) -> TidemarkResult<Vec<TemporalRange<Timestamp>>> {
        let ranges = self.ranges.read().await;
        Ok(ranges
            .get(key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }
}
