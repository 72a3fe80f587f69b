//! In-process feed driven by a fixed script.
//!
//! Serves canned observations per series and can be told to misbehave on
//! chosen windows. Useful for tests and for wiring demos without a live
//! upstream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tidemark_core::{
    FeedError, Observation, SeriesKey, TemporalRange, TidemarkResult, Timestamp,
};
use tokio::sync::Mutex;

use crate::feed::{feed_channel, FeedConnector, FeedHandle, FeedSender};

/// How a scripted request misbehaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailMode {
    /// `request_window` itself returns an error.
    Reject(String),
    /// Points are sent, then a `Failed` message.
    Fail(String),
    /// Points are sent, then the channel closes without a terminal message.
    Disconnect,
    /// Points are sent, then nothing until the handle is dropped.
    Stall,
}

#[derive(Debug, Clone)]
struct FailureRule {
    window: TemporalRange<Timestamp>,
    mode: FailMode,
    /// `None` fails every matching request.
    remaining: Option<usize>,
}

/// How spawned playback tasks ended.
#[derive(Debug, Default)]
struct PlaybackCounters {
    finished: AtomicUsize,
    cancelled: AtomicUsize,
}

/// Scripted [`FeedConnector`].
pub struct ScriptedFeed<K, P> {
    series: HashMap<K, Vec<Observation<P>>>,
    strays: HashMap<K, Vec<Observation<P>>>,
    rules: Mutex<Vec<FailureRule>>,
    requests: Mutex<Vec<(K, TemporalRange<Timestamp>)>>,
    playback: Arc<PlaybackCounters>,
    capacity: usize,
}

impl<K: SeriesKey, P> Default for ScriptedFeed<K, P> {
    fn default() -> Self {
        Self {
            series: HashMap::new(),
            strays: HashMap::new(),
            rules: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            playback: Arc::new(PlaybackCounters::default()),
            capacity: 64,
        }
    }
}

impl<K: SeriesKey, P: Clone + Send + Sync + 'static> ScriptedFeed<K, P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Observations the feed holds for `key`, served in timestamp order.
    pub fn with_series(mut self, key: K, rows: Vec<Observation<P>>) -> Self {
        let entry = self.series.entry(key).or_default();
        entry.extend(rows);
        entry.sort_by_key(|o| o.timestamp);
        self
    }

    /// Fail every request whose window intersects `window`.
    pub fn with_failure(self, window: TemporalRange<Timestamp>, mode: FailMode) -> Self {
        self.push_rule(window, mode, None)
    }

    /// Fail the next `times` requests whose window intersects `window`.
    pub fn with_failure_times(
        self,
        window: TemporalRange<Timestamp>,
        mode: FailMode,
        times: usize,
    ) -> Self {
        self.push_rule(window, mode, Some(times))
    }

    /// A point sent on every request for `key` whose window does not contain it.
    pub fn with_stray_point(mut self, key: K, observation: Observation<P>) -> Self {
        self.strays.entry(key).or_default().push(observation);
        self
    }

    fn push_rule(
        mut self,
        window: TemporalRange<Timestamp>,
        mode: FailMode,
        remaining: Option<usize>,
    ) -> Self {
        self.rules.get_mut().push(FailureRule {
            window,
            mode,
            remaining,
        });
        self
    }

    /// Every request received so far, in arrival order.
    pub async fn requests(&self) -> Vec<(K, TemporalRange<Timestamp>)> {
        self.requests.lock().await.clone()
    }

    /// Playback tasks that have ended, however they ended.
    pub fn finished_requests(&self) -> usize {
        self.playback.finished.load(Ordering::SeqCst)
    }

    /// Playback tasks that ended because the handle was dropped.
    pub fn cancelled_requests(&self) -> usize {
        self.playback.cancelled.load(Ordering::SeqCst)
    }

    async fn take_failure(&self, window: &TemporalRange<Timestamp>) -> Option<FailMode> {
        let mut rules = self.rules.lock().await;
        let rule = rules.iter_mut().find(|rule| {
            rule.window.intersects(window) && rule.remaining.map_or(true, |n| n > 0)
        })?;
        if let Some(n) = rule.remaining.as_mut() {
            *n -= 1;
        }
        Some(rule.mode.clone())
    }

    fn script_for(&self, key: &K, window: &TemporalRange<Timestamp>) -> Vec<Observation<P>> {
        let mut points: Vec<Observation<P>> = self
            .series
            .get(key)
            .map(|rows| {
                rows.iter()
                    .filter(|o| window.contains(&o.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(strays) = self.strays.get(key) {
            points.extend(
                strays
                    .iter()
                    .filter(|o| !window.contains(&o.timestamp))
                    .cloned(),
            );
        }
        points
    }
}

#[async_trait]
impl<K, P> FeedConnector<K, P> for ScriptedFeed<K, P>
where
    K: SeriesKey,
    P: Clone + Send + Sync + 'static,
{
    async fn request_window(
        &self,
        key: &K,
        window: TemporalRange<Timestamp>,
    ) -> TidemarkResult<FeedHandle<P>> {
        self.requests.lock().await.push((key.clone(), window));

        let failure = self.take_failure(&window).await;
        if let Some(FailMode::Reject(reason)) = failure {
            return Err(FeedError::RequestFailed { window, reason }.into());
        }

        let points = self.script_for(key, &window);
        let (tx, handle) = feed_channel(self.capacity);
        let playback = self.playback.clone();
        tokio::spawn(async move {
            if play(tx, points, failure).await {
                playback.cancelled.fetch_add(1, Ordering::SeqCst);
            }
            playback.finished.fetch_add(1, Ordering::SeqCst);
        });
        Ok(handle)
    }
}

/// Send the script, then end as `failure` says. Returns true when the
/// receiving handle was dropped first.
async fn play<P>(
    tx: FeedSender<P>,
    points: Vec<Observation<P>>,
    failure: Option<FailMode>,
) -> bool {
    for point in points {
        if tx.point(point).await.is_err() {
            return true;
        }
    }
    match failure {
        None => tx.complete().await.is_err(),
        Some(FailMode::Fail(reason)) => tx.fail(reason).await.is_err(),
        Some(FailMode::Stall) => {
            tx.closed().await;
            true
        }
        Some(FailMode::Disconnect) | Some(FailMode::Reject(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedMessage;
    use chrono::{TimeZone, Utc};
    use tidemark_core::TidemarkError;

    fn at(h: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2021, 1, 1, h, 0, 0).unwrap()
    }

    fn feed() -> ScriptedFeed<String, u32> {
        ScriptedFeed::new().with_series(
            "AAPL".to_string(),
            (0..24).map(|h| Observation::new(at(h), h)).collect(),
        )
    }

    async fn drain(mut handle: FeedHandle<u32>) -> Vec<FeedMessage<u32>> {
        let mut out = Vec::new();
        while let Some(message) = handle.recv().await {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn test_serves_window_then_completes() {
        let feed = feed();
        let key = "AAPL".to_string();
        let handle = feed
            .request_window(&key, TemporalRange::new(at(2), at(4)))
            .await
            .unwrap();
        let messages = drain(handle).await;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], FeedMessage::Point(Observation::new(at(2), 2)));
        assert_eq!(messages[3], FeedMessage::Complete);
        assert_eq!(feed.requests().await, vec![(key, TemporalRange::new(at(2), at(4)))]);
    }

    #[tokio::test]
    async fn test_reject_and_limited_failures() {
        let feed = feed().with_failure_times(
            TemporalRange::new(at(5), at(6)),
            FailMode::Reject("quota".to_string()),
            1,
        );
        let key = "AAPL".to_string();
        let window = TemporalRange::new(at(0), at(10));

        let err = feed.request_window(&key, window).await.unwrap_err();
        assert!(matches!(err, TidemarkError::Feed(FeedError::RequestFailed { .. })));

        let messages = drain(feed.request_window(&key, window).await.unwrap()).await;
        assert_eq!(messages.last(), Some(&FeedMessage::Complete));
    }

    #[tokio::test]
    async fn test_disconnect_has_no_terminal_message() {
        let feed = feed().with_failure(TemporalRange::new(at(0), at(1)), FailMode::Disconnect);
        let messages = drain(
            feed.request_window(&"AAPL".to_string(), TemporalRange::new(at(0), at(1)))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| !m.is_terminal()));
    }

    #[tokio::test]
    async fn test_dropped_handle_ends_stalled_playback() {
        let window = TemporalRange::new(at(0), at(3));
        let feed = feed().with_failure(window, FailMode::Stall);
        let key = "AAPL".to_string();

        let mut handle = feed.request_window(&key, window).await.unwrap();
        for h in 0..=3 {
            assert_eq!(
                handle.recv().await,
                Some(FeedMessage::Point(Observation::new(at(h), h)))
            );
        }
        assert_eq!(feed.finished_requests(), 0);

        drop(handle);
        for _ in 0..100 {
            if feed.finished_requests() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(feed.finished_requests(), 1);
        assert_eq!(feed.cancelled_requests(), 1);

        drain(feed.request_window(&key, TemporalRange::new(at(5), at(6))).await.unwrap()).await;
        for _ in 0..100 {
            if feed.finished_requests() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(feed.finished_requests(), 2);
        assert_eq!(feed.cancelled_requests(), 1);
    }

    #[tokio::test]
    async fn test_stray_point_only_outside_window() {
        let key = "AAPL".to_string();
        let feed = feed().with_stray_point(key.clone(), Observation::new(at(20), 99));

        let outside = drain(
            feed.request_window(&key, TemporalRange::new(at(0), at(0)))
                .await
                .unwrap(),
        )
        .await;
        assert!(outside.contains(&FeedMessage::Point(Observation::new(at(20), 99))));

        let inside = drain(
            feed.request_window(&key, TemporalRange::new(at(19), at(21)))
                .await
                .unwrap(),
        )
        .await;
        assert!(!inside.contains(&FeedMessage::Point(Observation::new(at(20), 99))));
    }
}
