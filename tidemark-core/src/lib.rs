//! Tidemark Core - Range Types and Interval Algebra
//!
//! Pure data structures and pure functions. Every other crate depends on this.
//! Nothing in here performs I/O.

use chrono::{DateTime, Utc};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use uuid::Uuid;

pub mod algebra;
mod config;
mod error;
mod observation;
mod range;
mod time_of_day;

pub use config::*;
pub use error::*;
pub use observation::*;
pub use range::*;
pub use time_of_day::*;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone, nanosecond resolution.
pub type Timestamp = DateTime<Utc>;

/// Identifier of a single time series (ticker, sensor, account, ...).
///
/// Keys are independent of each other: nothing in the cache crosses keys.
/// `key_bytes` is a stable encoding used by ordered byte-keyed backends, so it
/// must never change for a given key value.
pub trait SeriesKey: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {
    /// Stable byte encoding of this key.
    fn key_bytes(&self) -> Vec<u8>;
}

impl SeriesKey for String {
    fn key_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl SeriesKey for Uuid {
    fn key_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl SeriesKey for u64 {
    fn key_bytes(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bytes_are_stable() {
        assert_eq!("AAPL".to_string().key_bytes(), b"AAPL".to_vec());
        assert_eq!(258u64.key_bytes(), vec![0, 0, 0, 0, 0, 0, 1, 2]);

        let id = Uuid::now_v7();
        assert_eq!(id.key_bytes(), id.as_bytes().to_vec());
    }
}
