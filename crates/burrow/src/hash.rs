//! Shard-routing hash.
//!
//! Metric names are assigned to shard buffers by `shard_hash(name) % N`.
//! The hash must stay fixed across releases: changing it would re-route
//! existing metrics to different shards and orphan their buffered records
//! on the next run. It plays no role in on-disk addressing, which is by
//! metric name.

use xxhash_rust::xxh32::xxh32;

const SHARD_SEED: u32 = 0;

/// Hashes a metric name for shard selection.
pub(crate) fn shard_hash(key: &[u8]) -> u32 {
    xxh32(key, SHARD_SEED)
}
