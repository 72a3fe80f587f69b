//! Upstream feed contract.
//!
//! A connector answers a window request with a [`FeedHandle`]: the receiving
//! end of a bounded channel. The connector pushes points into the matching
//! [`FeedSender`] and finishes with exactly one terminal message, either
//! [`FeedMessage::Complete`] or [`FeedMessage::Failed`]. A channel that closes
//! without one counts as a failure.
//!
//! Dropping the handle tells the connector to stop: every further send fails
//! with [`FeedError::ReceiverDropped`].

use async_trait::async_trait;
use tidemark_core::{
    FeedError, Observation, SeriesKey, TemporalRange, TidemarkResult, Timestamp,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// One message on a feed channel.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage<P> {
    /// A data point.
    Point(Observation<P>),
    /// Every point of the requested window has been delivered.
    Complete,
    /// The request failed upstream.
    Failed(String),
}

impl<P> FeedMessage<P> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FeedMessage::Point(_))
    }
}

/// Build a connected sender and handle.
pub fn feed_channel<P>(capacity: usize) -> (FeedSender<P>, FeedHandle<P>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FeedSender { tx }, FeedHandle { rx })
}

/// Connector side of a feed channel.
#[derive(Debug)]
pub struct FeedSender<P> {
    tx: mpsc::Sender<FeedMessage<P>>,
}

impl<P> FeedSender<P> {
    /// Deliver one point. Waits while the channel is full.
    pub async fn point(&self, observation: Observation<P>) -> TidemarkResult<()> {
        self.send(FeedMessage::Point(observation)).await
    }

    /// Finish the request successfully.
    pub async fn complete(self) -> TidemarkResult<()> {
        self.send(FeedMessage::Complete).await
    }

    /// Finish the request with an error.
    pub async fn fail(self, reason: impl Into<String>) -> TidemarkResult<()> {
        self.send(FeedMessage::Failed(reason.into())).await
    }

    /// Resolves once the handle has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, message: FeedMessage<P>) -> TidemarkResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| FeedError::ReceiverDropped.into())
    }
}

/// Consumer side of a feed channel.
#[derive(Debug)]
pub struct FeedHandle<P> {
    rx: mpsc::Receiver<FeedMessage<P>>,
}

impl<P> FeedHandle<P> {
    /// Next message, or `None` once the sender is gone.
    pub async fn recv(&mut self) -> Option<FeedMessage<P>> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> ReceiverStream<FeedMessage<P>> {
        ReceiverStream::new(self.rx)
    }
}

/// Source of truth for observations.
#[async_trait]
pub trait FeedConnector<K: SeriesKey, P: Send + 'static>: Send + Sync {
    /// Start delivering the points of `window` with timestamps in
    /// `[from, to)`. A point exactly at `to` is accepted too, since gap
    /// checks treat the window as closed.
    ///
    /// An `Err` means the request was rejected outright. Failures after the
    /// handle is returned arrive as [`FeedMessage::Failed`].
    async fn request_window(
        &self,
        key: &K,
        window: TemporalRange<Timestamp>,
    ) -> TidemarkResult<FeedHandle<P>>;
}
