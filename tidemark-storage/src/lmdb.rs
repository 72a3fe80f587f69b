//! LMDB-backed observation and range stores.
//!
//! Uses the heed crate (Rust bindings for LMDB). Both tables live in one
//! environment as named databases, so open it once with
//! [`LmdbEnvironment::open`] and derive the stores from it.
//!
//! # Key layout
//!
//! - Rows: `[key len: u32 BE][key bytes][0xFF][timestamp]`
//! - Ranges: `[key len: u32 BE][key bytes][0xFF][from][to]`
//!
//! Timestamps encode as 12 bytes: seconds as a sign-flipped big-endian `i64`
//! followed by nanoseconds as a big-endian `u32`. Byte order therefore matches
//! time order, and LMDB range scans return a key's rows already sorted.
//!
//! Every read opens its own short-lived read transaction and drops it before
//! returning. No LMDB handle outlives the call that created it.

use std::marker::PhantomData;
use std::ops::Bound;
use std::path::Path;

use async_trait::async_trait;
use chrono::DateTime;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tidemark_core::{
    Observation, SeriesKey, SortDirection, StorageError, TemporalRange, TidemarkError,
    TidemarkResult, Timestamp,
};

use crate::traits::{DataStore, PageRequest, RangeStore};

/// Separator byte between the series key and the timestamp part.
const SEPARATOR: u8 = 0xFF;

const TIMESTAMP_LEN: usize = 12;

const OBSERVATIONS_DB: &str = "observations";
const RANGES_DB: &str = "ranges";

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A stored key did not match the expected layout.
    #[error("Corrupt key in {table}: {reason}")]
    CorruptKey { table: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for TidemarkError {
    fn from(e: LmdbStoreError) -> Self {
        let storage = match e {
            LmdbStoreError::Serialization(reason) => StorageError::Serialization { reason },
            LmdbStoreError::Deserialization(reason) => StorageError::Deserialization { reason },
            LmdbStoreError::CorruptKey { table, reason } => StorageError::CorruptKey {
                table: table.to_string(),
                reason,
            },
            LmdbStoreError::Io(io) => StorageError::Io {
                reason: io.to_string(),
            },
            other => StorageError::TransactionFailed {
                reason: other.to_string(),
            },
        };
        TidemarkError::Storage(storage)
    }
}

fn txn_error(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

// ============================================================================
// KEY ENCODING
// ============================================================================

fn series_prefix<K: SeriesKey>(key: &K) -> Vec<u8> {
    let bytes = key.key_bytes();
    let mut prefix = Vec::with_capacity(4 + bytes.len() + 1);
    prefix.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    prefix.extend_from_slice(&bytes);
    prefix.push(SEPARATOR);
    prefix
}

fn push_timestamp(out: &mut Vec<u8>, ts: Timestamp) {
    let secs = (ts.timestamp() as u64) ^ (1 << 63);
    out.extend_from_slice(&secs.to_be_bytes());
    out.extend_from_slice(&ts.timestamp_subsec_nanos().to_be_bytes());
}

fn read_timestamp(bytes: &[u8], table: &'static str) -> Result<Timestamp, LmdbStoreError> {
    let corrupt = |reason: &str| LmdbStoreError::CorruptKey {
        table,
        reason: reason.to_string(),
    };
    if bytes.len() != TIMESTAMP_LEN {
        return Err(corrupt("timestamp must be 12 bytes"));
    }
    let (secs, nanos) = bytes.split_at(8);
    let secs: [u8; 8] = secs.try_into().map_err(|_| corrupt("bad seconds"))?;
    let nanos: [u8; 4] = nanos.try_into().map_err(|_| corrupt("bad nanoseconds"))?;
    let secs = (u64::from_be_bytes(secs) ^ (1 << 63)) as i64;
    DateTime::from_timestamp(secs, u32::from_be_bytes(nanos))
        .ok_or_else(|| corrupt("timestamp out of range"))
}

fn row_key(prefix: &[u8], ts: Timestamp) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + TIMESTAMP_LEN);
    key.extend_from_slice(prefix);
    push_timestamp(&mut key, ts);
    key
}

fn range_key(prefix: &[u8], range: &TemporalRange<Timestamp>) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 2 * TIMESTAMP_LEN);
    key.extend_from_slice(prefix);
    push_timestamp(&mut key, range.from());
    push_timestamp(&mut key, range.to());
    key
}

fn decode_range_key(
    prefix_len: usize,
    key: &[u8],
) -> Result<TemporalRange<Timestamp>, LmdbStoreError> {
    let body = key.get(prefix_len..).unwrap_or_default();
    if body.len() != 2 * TIMESTAMP_LEN {
        return Err(LmdbStoreError::CorruptKey {
            table: RANGES_DB,
            reason: format!(
                "expected {} bytes after prefix, got {}",
                2 * TIMESTAMP_LEN,
                body.len()
            ),
        });
    }
    let (from, to) = body.split_at(TIMESTAMP_LEN);
    Ok(TemporalRange::new(
        read_timestamp(from, RANGES_DB)?,
        read_timestamp(to, RANGES_DB)?,
    ))
}

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// An opened LMDB environment holding the observation and range tables.
#[derive(Clone)]
pub struct LmdbEnvironment {
    env: Env,
    observations: Database<Bytes, Bytes>,
    ranges: Database<Bytes, Bytes>,
}

impl LmdbEnvironment {
    /// Open (or create) the environment at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `map_size_mb` - Maximum size of the database in megabytes
    pub fn open<Q: AsRef<Path>>(path: Q, map_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let observations: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(OBSERVATIONS_DB))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let ranges: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(RANGES_DB))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        tracing::debug!(path = %path.as_ref().display(), map_size_mb, "opened LMDB environment");

        Ok(Self {
            env,
            observations,
            ranges,
        })
    }

    /// Observation rows with payloads of type `P`, stored as JSON.
    pub fn data_store<P>(&self) -> LmdbDataStore<P> {
        LmdbDataStore {
            env: self.env.clone(),
            db: self.observations,
            _payload: PhantomData,
        }
    }

    pub fn range_store(&self) -> LmdbRangeStore {
        LmdbRangeStore {
            env: self.env.clone(),
            db: self.ranges,
        }
    }
}

// ============================================================================
// OBSERVATIONS
// ============================================================================

/// LMDB table of observation rows.
pub struct LmdbDataStore<P> {
    env: Env,
    db: Database<Bytes, Bytes>,
    _payload: PhantomData<fn() -> P>,
}

impl<P> LmdbDataStore<P>
where
    P: Serialize + DeserializeOwned,
{
    fn put_if_absent(
        &self,
        wtxn: &mut heed::RwTxn<'_>,
        key: &[u8],
        payload: &P,
    ) -> Result<bool, LmdbStoreError> {
        if self.db.get(wtxn, key).map_err(txn_error)?.is_some() {
            return Ok(false);
        }
        let value =
            serde_json::to_vec(payload).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;
        self.db.put(wtxn, key, &value).map_err(txn_error)?;
        Ok(true)
    }

    fn read_rows<'t, I>(
        iter: I,
        prefix_len: usize,
        request: &PageRequest,
    ) -> Result<Vec<Observation<P>>, LmdbStoreError>
    where
        I: Iterator<Item = heed::Result<(&'t [u8], &'t [u8])>>,
    {
        let mut page = Vec::new();
        for entry in iter {
            if page.len() >= request.limit {
                break;
            }
            let (key, value) = entry.map_err(txn_error)?;
            let ts_bytes = key.get(prefix_len..).unwrap_or_default();
            let timestamp = read_timestamp(ts_bytes, OBSERVATIONS_DB)?;
            if !request.admits(&timestamp) {
                continue;
            }
            let payload: P = serde_json::from_slice(value)
                .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?;
            page.push(Observation::new(timestamp, payload));
        }
        Ok(page)
    }
}

#[async_trait]
impl<K, P> DataStore<K, P> for LmdbDataStore<P>
where
    K: SeriesKey,
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn insert(&self, key: &K, observation: &Observation<P>) -> TidemarkResult<bool> {
        let row = row_key(&series_prefix(key), observation.timestamp);
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let inserted = self.put_if_absent(&mut wtxn, &row, &observation.payload)?;
        if inserted {
            wtxn.commit().map_err(txn_error)?;
        }
        Ok(inserted)
    }

    async fn insert_batch(
        &self,
        key: &K,
        observations: &[Observation<P>],
    ) -> TidemarkResult<usize> {
        let prefix = series_prefix(key);
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut inserted = 0;
        for observation in observations {
            let row = row_key(&prefix, observation.timestamp);
            if self.put_if_absent(&mut wtxn, &row, &observation.payload)? {
                inserted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(inserted)
    }

    async fn read_page(
        &self,
        key: &K,
        request: &PageRequest,
    ) -> TidemarkResult<Vec<Observation<P>>> {
        request.validate()?;
        if request.from >= request.to {
            return Ok(Vec::new());
        }

        let prefix = series_prefix(key);
        let from_key = row_key(&prefix, request.from);
        let to_key = row_key(&prefix, request.to);
        let after_key = request.after.map(|after| row_key(&prefix, after));

        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let page = match request.direction {
            SortDirection::Ascending => {
                let start = match (&after_key, request.after) {
                    (Some(after), Some(ts)) if ts >= request.from => {
                        Bound::Excluded(after.as_slice())
                    }
                    _ => Bound::Included(from_key.as_slice()),
                };
                let bounds = (start, Bound::Excluded(to_key.as_slice()));
                let iter = self.db.range(&rtxn, &bounds).map_err(txn_error)?;
                Self::read_rows(iter, prefix.len(), request)?
            }
            SortDirection::Descending => {
                let end = match (&after_key, request.after) {
                    (Some(after), Some(ts)) if ts < request.to => Bound::Excluded(after.as_slice()),
                    _ => Bound::Excluded(to_key.as_slice()),
                };
                let bounds = (Bound::Included(from_key.as_slice()), end);
                let iter = self.db.rev_range(&rtxn, &bounds).map_err(txn_error)?;
                Self::read_rows(iter, prefix.len(), request)?
            }
        };
        Ok(page)
    }
}

// ============================================================================
// RANGES
// ============================================================================

/// LMDB table of cached ranges. Values are empty; the key is the range.
pub struct LmdbRangeStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbRangeStore {
    /// Ranges of one key whose `from` is at most `upper_from`, in key order.
    fn scan(
        &self,
        prefix: &[u8],
        upper_from: Option<Timestamp>,
    ) -> Result<Vec<TemporalRange<Timestamp>>, LmdbStoreError> {
        let mut upper = prefix.to_vec();
        match upper_from {
            Some(ts) => {
                push_timestamp(&mut upper, ts);
                upper.extend_from_slice(&[0xFF; TIMESTAMP_LEN]);
            }
            None => upper.extend_from_slice(&[0xFF; 2 * TIMESTAMP_LEN]),
        }

        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let bounds = (Bound::Included(prefix), Bound::Included(upper.as_slice()));
        let iter = self.db.range(&rtxn, &bounds).map_err(txn_error)?;

        let mut ranges = Vec::new();
        for entry in iter {
            let (key, _) = entry.map_err(txn_error)?;
            ranges.push(decode_range_key(prefix.len(), key)?);
        }
        Ok(ranges)
    }
}

#[async_trait]
impl<K: SeriesKey> RangeStore<K> for LmdbRangeStore {
    async fn insert_range(&self, key: &K, range: TemporalRange<Timestamp>) -> TidemarkResult<bool> {
        let encoded = range_key(&series_prefix(key), &range);
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        if self.db.get(&wtxn, &encoded).map_err(txn_error)?.is_some() {
            return Ok(false);
        }
        self.db.put(&mut wtxn, &encoded, &[]).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(true)
    }

    async fn query_ranges(
        &self,
        key: &K,
        from: Timestamp,
        to: Timestamp,
    ) -> TidemarkResult<Vec<TemporalRange<Timestamp>>> {
        let prefix = series_prefix(key);
        let candidates = self.scan(&prefix, Some(to))?;
        Ok(candidates.into_iter().filter(|r| r.to() >= from).collect())
    }

    async fn remove_range(&self, key: &K, range: TemporalRange<Timestamp>) -> TidemarkResult<bool> {
        let encoded = range_key(&series_prefix(key), &range);
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self.db.delete(&mut wtxn, &encoded).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    async fn ranges_for_key(&self, key: &K) -> TidemarkResult<Vec<TemporalRange<Timestamp>>> {
        Ok(self.scan(&series_prefix(key), None)?)
    }
}
