//! Top-level database facade.
//!
//! A [`Database`] owns a fixed vector of shard [`Buffer`]s and routes every
//! insert and read to one of them by hashing the metric name. The shard
//! count bounds the number of open files regardless of how many metrics the
//! host writes; on-disk addressing is by metric name, so the shard count
//! may change between runs without invalidating stored data.

use crate::buffer::{Buffer, DEFAULT_BUFFER_MAX, MAX_KEY_LEN};
use crate::error::{Result, StoreError};
use crate::hash::shard_hash;
use crate::record::{Record, Timestamp, Value};
use crate::slab::{self, DEFAULT_SLAB_MAX};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Size thresholds for the two storage tiers.
///
/// The defaults match production use; tests shrink them to exercise
/// rotation and rollover without writing megabytes.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Buffer-file rotation threshold in bytes.
    pub buffer_max: u64,
    /// Per-metric slab rollover threshold in bytes.
    pub slab_max: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            buffer_max: DEFAULT_BUFFER_MAX,
            slab_max: DEFAULT_SLAB_MAX,
        }
    }
}

/// An embedded time-series store rooted at one local directory.
///
/// A database instance assumes exclusive ownership of the filesystem under
/// its root; running two instances over the same root is undefined
/// behavior. All operations take `&mut self`: hosts that want parallel
/// writers partition work at the shard boundary behind their own locks.
pub struct Database<V: Value> {
    root: PathBuf,
    buffers: Vec<Buffer<V>>,
}

impl<V: Value> Database<V> {
    /// Opens (or creates) a database with `num_files` shard buffers and
    /// default thresholds.
    pub fn open(root: impl AsRef<Path>, num_files: usize) -> Result<Self> {
        Self::open_with_config(root, num_files, StoreConfig::default())
    }

    /// Opens (or creates) a database with explicit thresholds.
    ///
    /// Creates the root directory if absent, then dumps any buffer files
    /// orphaned by a previous run before accepting writes, so their
    /// records are readable immediately.
    pub fn open_with_config(
        root: impl AsRef<Path>,
        num_files: usize,
        config: StoreConfig,
    ) -> Result<Self> {
        if num_files == 0 {
            return Err(StoreError::ZeroShards);
        }
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let recovered = Buffer::<V>::recover(&root, config.slab_max)?;
        if recovered > 0 {
            debug!("recovered {} buffer files under {}", recovered, root.display());
        }

        let mut buffers = Vec::with_capacity(num_files);
        for _ in 0..num_files {
            buffers.push(Buffer::create(&root, config.buffer_max, config.slab_max)?);
        }
        Ok(Self { root, buffers })
    }

    /// Returns the root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the number of shard buffers.
    pub fn num_shards(&self) -> usize {
        self.buffers.len()
    }

    /// Appends a data point for `name`.
    pub fn insert(&mut self, name: &str, time: Timestamp, value: V) -> Result<()> {
        validate_name(name)?;
        let shard = self.shard(name);
        self.buffers[shard].insert(name, time, value)
    }

    /// Reads every record for `name` with `start <= time <= end`, sorted
    /// ascending by time. Records sharing a timestamp keep their insertion
    /// order.
    pub fn get(&mut self, name: &str, start: Timestamp, end: Timestamp) -> Result<Vec<Record<V>>> {
        validate_name(name)?;
        let shard = self.shard(name);
        self.buffers[shard].get(name, start, end)
    }

    /// Completion-callback variant of [`Database::insert`].
    ///
    /// The operation runs synchronously on the calling context and hands
    /// its result to `callback`. The surface is reserved so a future
    /// implementation can move the work onto a worker pool.
    pub fn insert_with<F>(&mut self, name: &str, time: Timestamp, value: V, callback: F)
    where
        F: FnOnce(Result<()>),
    {
        callback(self.insert(name, time, value));
    }

    /// Completion-callback variant of [`Database::get`].
    ///
    /// See [`Database::insert_with`] for the execution model.
    pub fn get_with<F>(&mut self, name: &str, start: Timestamp, end: Timestamp, callback: F)
    where
        F: FnOnce(Result<Vec<Record<V>>>),
    {
        callback(self.get(name, start, end));
    }

    /// Lists every metric known to the store, sorted by name.
    ///
    /// Covers metrics whose records reached slab storage as well as those
    /// still resident only in live buffers.
    pub fn metrics(&mut self) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = slab::metrics(&self.root)?.into_iter().collect();
        for buffer in &mut self.buffers {
            names.extend(buffer.read()?.into_keys());
        }
        Ok(names.into_iter().collect())
    }

    /// Lists the metrics whose names start with `prefix`, sorted.
    pub fn metrics_matching(&mut self, prefix: &str) -> Result<Vec<String>> {
        let mut names = self.metrics()?;
        names.retain(|name| name.starts_with(prefix));
        Ok(names)
    }

    /// Removes the store's on-disk state, consuming the instance.
    pub fn destroy(self) -> Result<()> {
        fs::remove_dir_all(&self.root)?;
        Ok(())
    }

    fn shard(&self, name: &str) -> usize {
        shard_hash(name.as_bytes()) as usize % self.buffers.len()
    }
}

/// Rejects names that cannot be materialized as a metric directory.
fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= MAX_KEY_LEN
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\0');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidMetricName(name.to_string()))
    }
}
