//! Cache fill orchestration.
//!
//! For each request the orchestrator asks the range index which sub-windows
//! are missing, fetches exactly those from the feed, writes the points, and
//! only then records each sub-window as complete. Rows are always served from
//! the data store, whether they were cached before or fetched just now.
//!
//! # Ordering
//!
//! Rows of a gap are written before the gap is recorded in the range index. A
//! gap is never recorded unless the feed sent its completion message. A
//! crash in between leaves rows without a covering range, which the next
//! request simply fetches again (inserts are idempotent).
//!
//! # Failures
//!
//! Feed failures stay local to their gap: the gap is reported in
//! [`FillReport::failed`] and the request still streams whatever the store
//! holds. Store errors abort the whole request.

use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tidemark_core::{
    FeedError, SeriesKey, SortDirection, TemporalRange, TidemarkConfig, TidemarkError,
    TidemarkResult, TimeOfDayWindow, Timestamp, ValidationError,
};
use tidemark_storage::{DataStore, ObservationCursor, PageRequest, RangeIndex, RangeStore};

use crate::feed::{FeedConnector, FeedMessage};
use crate::report::{FillReport, GapFailure, PointCounts, SeriesRead};
use crate::state::{FillPhase, FillProgress};

/// A read of one series over one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest<K> {
    pub key: K,
    /// Closed for gap computation, half-open (`to` excluded) for the row read.
    pub window: TemporalRange<Timestamp>,
    pub time_of_day: TimeOfDayWindow,
    pub direction: SortDirection,
}

impl<K> SeriesRequest<K> {
    pub fn new(key: K, from: Timestamp, to: Timestamp) -> Self {
        Self {
            key,
            window: TemporalRange::new(from, to),
            time_of_day: TimeOfDayWindow::all_day(),
            direction: SortDirection::Ascending,
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

    pub fn validate(&self) -> TidemarkResult<()> {
        if !self.window.is_valid() {
            return Err(ValidationError::invalid_range(
                "request window",
                self.window.from(),
                self.window.to(),
            )
            .into());
        }
        self.time_of_day.validate()
    }
}

/// Outcome of one gap.
struct GapOutcome {
    gap: TemporalRange<Timestamp>,
    points: PointCounts,
    result: Result<(), FeedError>,
}

/// Serves series reads from the cache, filling gaps from the feed first.
pub struct CacheFillOrchestrator<K, P, D, R, F> {
    data: Arc<D>,
    index: RangeIndex<R>,
    feed: Arc<F>,
    config: TidemarkConfig,
    _types: PhantomData<fn() -> (K, P)>,
}

impl<K, P, D, R, F> CacheFillOrchestrator<K, P, D, R, F>
where
    K: SeriesKey,
    P: Send + Sync + 'static,
    D: DataStore<K, P>,
    R: RangeStore<K>,
    F: FeedConnector<K, P>,
{
    pub fn new(
        data: Arc<D>,
        ranges: R,
        feed: Arc<F>,
        config: TidemarkConfig,
    ) -> TidemarkResult<Self> {
        config.validate()?;
        Ok(Self {
            data,
            index: RangeIndex::new(ranges),
            feed,
            config,
            _types: PhantomData,
        })
    }

    pub fn index(&self) -> &RangeIndex<R> {
        &self.index
    }

    pub fn data_store(&self) -> &Arc<D> {
        &self.data
    }

    pub fn config(&self) -> &TidemarkConfig {
        &self.config
    }

    /// Fill any gaps in the request window, then open a cursor over it.
    pub async fn fetch(&self, request: SeriesRequest<K>) -> TidemarkResult<SeriesRead<K, P, D>> {
        let mut progress = FillProgress::for_request(request.window);
        let report = self.fill(&request, &mut progress).await?;

        progress.advance(FillPhase::Streaming)?;
        let page = PageRequest::new(request.window.from(), request.window.to())
            .with_time_of_day(request.time_of_day)
            .with_direction(request.direction)
            .with_limit(self.config.page_size);
        let cursor = match ObservationCursor::open(self.data.clone(), request.key.clone(), page) {
            Ok(cursor) => cursor,
            Err(e) => {
                progress.advance(FillPhase::Failed)?;
                return Err(e);
            }
        };
        progress.advance(FillPhase::Done)?;

        tracing::info!(
            key = %request.key,
            window = %request.window,
            gaps = report.gaps.len(),
            committed = report.committed.len(),
            failed = report.failed.len(),
            ingested = report.points.ingested,
            "series read ready"
        );
        Ok(SeriesRead::new(cursor, report))
    }

    /// Fill any gaps in `[from, to]` without reading rows back.
    pub async fn prefetch(
        &self,
        key: K,
        from: Timestamp,
        to: Timestamp,
    ) -> TidemarkResult<FillReport> {
        let request = SeriesRequest::new(key, from, to);
        let mut progress = FillProgress::for_request(request.window);
        let report = self.fill(&request, &mut progress).await?;
        progress.advance(FillPhase::Streaming)?;
        progress.advance(FillPhase::Done)?;
        Ok(report)
    }

    async fn fill(
        &self,
        request: &SeriesRequest<K>,
        progress: &mut FillProgress,
    ) -> TidemarkResult<FillReport> {
        progress.advance(FillPhase::ComputingGaps)?;
        let gaps = match self.compute_gaps(request).await {
            Ok(gaps) => gaps,
            Err(e) => {
                progress.advance(FillPhase::Failed)?;
                return Err(e);
            }
        };
        tracing::debug!(
            key = %request.key,
            window = %request.window,
            gaps = gaps.len(),
            "computed gaps"
        );

        let mut report = FillReport::new(request.window, gaps.clone());
        if gaps.is_empty() {
            return Ok(report);
        }

        progress.advance(FillPhase::FillingFeed)?;
        let key = &request.key;
        let outcomes = stream::iter(gaps)
            .map(move |gap| self.fill_gap(key, gap))
            .buffer_unordered(self.config.max_concurrent_gaps)
            .try_collect::<Vec<_>>()
            .await;
        let outcomes = match outcomes {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::error!(key = %request.key, error = %e, "fill aborted by store error");
                progress.advance(FillPhase::Failed)?;
                return Err(e);
            }
        };

        for outcome in outcomes {
            report.points.merge(outcome.points);
            match outcome.result {
                Ok(()) => report.committed.push(outcome.gap),
                Err(error) => report.failed.push(GapFailure {
                    window: outcome.gap,
                    error,
                }),
            }
        }
        report.committed.sort();
        report.failed.sort_by_key(|f| f.window);
        Ok(report)
    }

    async fn compute_gaps(
        &self,
        request: &SeriesRequest<K>,
    ) -> TidemarkResult<Vec<TemporalRange<Timestamp>>> {
        request.validate()?;
        self.index
            .missing(
                &request.key,
                request.window.from(),
                request.window.to(),
                self.config.from_exclusivity_offset(),
                self.config.to_exclusivity_offset(),
            )
            .await
    }

    async fn fill_gap(
        &self,
        key: &K,
        gap: TemporalRange<Timestamp>,
    ) -> TidemarkResult<GapOutcome> {
        let mut progress = FillProgress::for_gap(gap);
        let mut points = PointCounts::default();
        tracing::info!(key = %key, gap = %gap, "requesting gap from feed");

        let drained = match self.config.feed_timeout() {
            Some(limit) => {
                match tokio::time::timeout(limit, self.drain_feed(key, gap, &mut points)).await {
                    Ok(result) => result?,
                    Err(_) => Err(FeedError::TimedOut {
                        window: gap,
                        after: limit,
                    }),
                }
            }
            None => self.drain_feed(key, gap, &mut points).await?,
        };

        let result = match drained {
            Ok(()) => {
                progress.advance(FillPhase::Committing)?;
                if let Err(e) = self.index.mark_complete(key, gap).await {
                    progress.advance(FillPhase::Failed)?;
                    return Err(e);
                }
                progress.advance(FillPhase::Done)?;
                tracing::info!(key = %key, gap = %gap, ingested = points.ingested, "gap committed");
                Ok(())
            }
            Err(error) => {
                progress.advance(FillPhase::Failed)?;
                tracing::warn!(key = %key, gap = %gap, error = %error, "gap fill failed");
                Err(error)
            }
        };

        Ok(GapOutcome {
            gap,
            points,
            result,
        })
    }

    /// Pull one gap's points into the data store.
    ///
    /// The outer error is a store failure; the inner one a feed failure.
    async fn drain_feed(
        &self,
        key: &K,
        gap: TemporalRange<Timestamp>,
        points: &mut PointCounts,
    ) -> TidemarkResult<Result<(), FeedError>> {
        let mut handle = match self.feed.request_window(key, gap).await {
            Ok(handle) => handle,
            Err(TidemarkError::Feed(error)) => return Ok(Err(error)),
            Err(other) => {
                return Ok(Err(FeedError::RequestFailed {
                    window: gap,
                    reason: other.to_string(),
                }))
            }
        };

        while let Some(message) = handle.recv().await {
            match message {
                FeedMessage::Point(observation) => {
                    if !gap.contains(&observation.timestamp) {
                        points.rejected += 1;
                        tracing::warn!(
                            key = %key,
                            gap = %gap,
                            timestamp = %observation.timestamp,
                            "feed delivered point outside requested window"
                        );
                        continue;
                    }
                    if self.data.insert(key, &observation).await? {
                        points.ingested += 1;
                    } else {
                        points.duplicates += 1;
                    }
                }
                FeedMessage::Complete => return Ok(Ok(())),
                FeedMessage::Failed(reason) => {
                    return Ok(Err(FeedError::RequestFailed {
                        window: gap,
                        reason,
                    }))
                }
            }
        }
        Ok(Err(FeedError::Disconnected { window: gap }))
    }
}
