//! Tidemark Storage - Stores, Range Index and Cursors
//!
//! Defines the two persistence contracts the cache relies on, the range index
//! built on top of the range table, and the lazy cursor used to stream rows
//! out. Ships in-memory and LMDB implementations of both contracts.

pub mod cursor;
pub mod lmdb;
pub mod memory;
pub mod range_index;
pub mod traits;

pub use cursor::ObservationCursor;
pub use lmdb::{LmdbDataStore, LmdbEnvironment, LmdbRangeStore, LmdbStoreError};
pub use memory::{InMemoryDataStore, InMemoryRangeStore};
pub use range_index::RangeIndex;
pub use traits::{DataStore, PageRequest, RangeStore};
