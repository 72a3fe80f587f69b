//! A single timestamped data point.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// One observation of a series. Unique per `(key, timestamp)` in a data store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation<P> {
    pub timestamp: Timestamp,
    pub payload: P,
}

impl<P> Observation<P> {
    pub fn new(timestamp: Timestamp, payload: P) -> Self {
        Self { timestamp, payload }
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}
