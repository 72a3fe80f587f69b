//! Tidemark cache fill.
//!
//! Computes the sub-windows a series is missing, pulls them from an upstream
//! feed, persists them, and serves the requested window from local storage.

pub mod feed;
pub mod orchestrator;
pub mod report;
pub mod scripted;
pub mod state;

pub use feed::{feed_channel, FeedConnector, FeedHandle, FeedMessage, FeedSender};
pub use orchestrator::{CacheFillOrchestrator, SeriesRequest};
pub use report::{FillReport, GapFailure, PointCounts, SeriesRead};
pub use scripted::{FailMode, ScriptedFeed};
pub use state::{FillPhase, FillProgress};
