//! Error and Result types for store operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Metric name cannot be used as a storage directory name.
    #[error("invalid metric name: {0:?}")]
    InvalidMetricName(String),

    /// Key exceeds the maximum length supported by the buffer frame parser.
    #[error("key length {0} exceeds MAX_KEY_LEN")]
    KeyTooLong(usize),

    /// A database needs at least one shard buffer.
    #[error("shard count must be nonzero")]
    ZeroShards,

    /// Buffer has been dumped and no longer owns a file.
    #[error("buffer file is closed")]
    BufferClosed,

    /// Slab rollover would overwrite an existing sealed segment.
    #[error("segment {timestamp} already exists for metric {metric:?}")]
    SegmentCollision {
        /// Metric whose rollover collided.
        metric: String,
        /// Maximum timestamp of the batch, i.e. the sealed segment name.
        timestamp: u32,
    },

    /// Buffer parse encountered a frame that cannot be decoded.
    #[error("corrupt buffer frame at byte {offset}: {reason}")]
    CorruptFrame {
        /// Byte offset of the frame within the buffer file.
        offset: u64,
        /// What made the frame undecodable.
        reason: &'static str,
    },
}
