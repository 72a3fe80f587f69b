//! Lazy, paginated, forward-only reads over a [`DataStore`].

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use tidemark_core::{Observation, SeriesKey, TidemarkError, TidemarkResult};

use crate::traits::{DataStore, PageRequest};

/// Forward-only cursor over observation rows.
///
/// Pages are fetched on demand with keyset pagination, so rows inserted behind
/// the cursor while it is open are never yielded twice. Only one page is held
/// in memory at a time. The cursor cannot be rewound; open a new one instead.
pub struct ObservationCursor<K, P, D> {
    store: Arc<D>,
    key: K,
    request: PageRequest,
    buffer: VecDeque<Observation<P>>,
    exhausted: bool,
    yielded: usize,
    _payload: PhantomData<fn() -> P>,
}

impl<K, P, D> ObservationCursor<K, P, D>
where
    K: SeriesKey,
    P: Send + Sync + 'static,
    D: DataStore<K, P>,
{
    /// Open a cursor. No rows are read until the first call to `next`.
    pub fn open(store: Arc<D>, key: K, request: PageRequest) -> TidemarkResult<Self> {
        request.validate()?;
        Ok(Self {
            store,
            key,
            request: request.with_after(None),
            buffer: VecDeque::new(),
            exhausted: false,
            yielded: 0,
            _payload: PhantomData,
        })
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn request(&self) -> &PageRequest {
        &self.request
    }

    /// Rows handed out so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// Whether the last page has been read and drained.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.buffer.is_empty()
    }

    /// Next row, or `None` once the window is drained.
    pub async fn next(&mut self) -> TidemarkResult<Option<Observation<P>>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        let next = self.buffer.pop_front();
        if next.is_some() {
            self.yielded += 1;
        }
        Ok(next)
    }

    async fn fetch_page(&mut self) -> TidemarkResult<()> {
        let page = self.store.read_page(&self.key, &self.request).await?;
        if page.len() < self.request.limit {
            self.exhausted = true;
        }
        match page.last() {
            Some(last) => self.request.after = Some(last.timestamp),
            None => self.exhausted = true,
        }
        self.buffer.extend(page);
        Ok(())
    }

    /// Drain the remaining rows into memory.
    pub async fn collect_all(mut self) -> TidemarkResult<Vec<Observation<P>>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Adapt into a `Stream`. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = TidemarkResult<Observation<P>>> {
        stream::try_unfold(self, |mut cursor| async move {
            let next = cursor.next().await?;
            Ok::<_, TidemarkError>(next.map(|row| (row, cursor)))
        })
    }
}
