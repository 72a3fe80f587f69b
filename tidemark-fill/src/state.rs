//! Fill lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tidemark_core::{TemporalRange, TidemarkResult, Timestamp, ValidationError};

// ============================================================================
// FILL PHASE
// ============================================================================

/// Phase of a fill, tracked per request and per gap.
///
/// ```text
/// Idle -> ComputingGaps -> FillingFeed -> Committing -> Streaming -> Done
///                |              |  ^           |
///                |              |  +-----------+   (next gap)
///                v              v              v
///              Failed         Failed         Failed
/// ```
///
/// A request with no gaps goes straight from `ComputingGaps` to `Streaming`.
/// A single gap ends in `Done` once committed or `Failed` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FillPhase {
    /// Nothing has happened yet
    Idle,
    /// Reading the range index and computing missing windows
    ComputingGaps,
    /// Waiting on the upstream feed for a gap
    FillingFeed,
    /// Recording a completed gap in the range index
    Committing,
    /// Serving rows from the data store
    Streaming,
    /// Finished
    Done,
    /// Aborted
    Failed,
}

impl FillPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillPhase::Idle => "Idle",
            FillPhase::ComputingGaps => "ComputingGaps",
            FillPhase::FillingFeed => "FillingFeed",
            FillPhase::Committing => "Committing",
            FillPhase::Streaming => "Streaming",
            FillPhase::Done => "Done",
            FillPhase::Failed => "Failed",
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, FillPhase::Done | FillPhase::Failed)
    }

    pub fn can_transition_to(&self, next: FillPhase) -> bool {
        use FillPhase::*;
        matches!(
            (self, next),
            (Idle, ComputingGaps)
                | (ComputingGaps, FillingFeed)
                | (ComputingGaps, Streaming)
                | (ComputingGaps, Failed)
                | (FillingFeed, Committing)
                | (FillingFeed, Streaming)
                | (FillingFeed, Failed)
                | (Committing, FillingFeed)
                | (Committing, Streaming)
                | (Committing, Done)
                | (Committing, Failed)
                | (Streaming, Done)
                | (Streaming, Failed)
        )
    }
}

impl fmt::Display for FillPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FillPhase {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(FillPhase::Idle),
            "computinggaps" | "computing_gaps" => Ok(FillPhase::ComputingGaps),
            "fillingfeed" | "filling_feed" => Ok(FillPhase::FillingFeed),
            "committing" => Ok(FillPhase::Committing),
            "streaming" => Ok(FillPhase::Streaming),
            "done" => Ok(FillPhase::Done),
            "failed" => Ok(FillPhase::Failed),
            _ => Err(ValidationError::InvalidValue {
                field: "fill_phase".to_string(),
                reason: format!("unknown phase '{}'", s),
            }),
        }
    }
}

// ============================================================================
// PROGRESS TRACKER
// ============================================================================

/// Current phase of one request or one gap, with logged transitions.
#[derive(Debug, Clone)]
pub struct FillProgress {
    window: TemporalRange<Timestamp>,
    phase: FillPhase,
    history: Vec<FillPhase>,
}

impl FillProgress {
    /// Progress of a whole request, starting at `Idle`.
    pub fn for_request(window: TemporalRange<Timestamp>) -> Self {
        Self::starting_at(window, FillPhase::Idle)
    }

    /// Progress of one gap, which starts out waiting on the feed.
    pub fn for_gap(gap: TemporalRange<Timestamp>) -> Self {
        Self::starting_at(gap, FillPhase::FillingFeed)
    }

    fn starting_at(window: TemporalRange<Timestamp>, phase: FillPhase) -> Self {
        Self {
            window,
            phase,
            history: vec![phase],
        }
    }

    pub fn phase(&self) -> FillPhase {
        self.phase
    }

    pub fn window(&self) -> TemporalRange<Timestamp> {
        self.window
    }

    /// Every phase visited, oldest first.
    pub fn history(&self) -> &[FillPhase] {
        &self.history
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn advance(&mut self, next: FillPhase) -> TidemarkResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(ValidationError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            }
            .into());
        }
        tracing::debug!(
            window = %self.window,
            from = %self.phase,
            to = %next,
            "fill phase transition"
        );
        self.phase = next;
        self.history.push(next);
        Ok(())
    }
}
