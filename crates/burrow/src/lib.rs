//! Burrow - Embedded Time-Series Storage Engine
//!
//! This crate stores `(metric-name, timestamp, value)` tuples in a single
//! local directory and serves inclusive time-range reads back over the same
//! metric. It is designed to be linked into a host process with one writer.
//!
//! # Components
//!
//! - [`Database`]: top-level facade; routes each metric to one of a fixed
//!   number of shard buffers by hashing its name
//! - [`Buffer`]: length-framed, multi-metric append file used as write
//!   intake; demultiplexed into slabs when it fills up
//! - [`Slab`]: per-metric append store split across an open `latest` file
//!   and sealed segment files named by their maximum timestamp
//! - [`Value`]: fixed-size plain-data value types the engine is generic over
//!
//! # Example
//!
//! ```rust,ignore
//! use burrow::Database;
//!
//! // Open (or create) a store with 128 shard buffers.
//! let mut db: Database<f64> = Database::open("/var/lib/metrics", 128)?;
//!
//! // Append data points.
//! db.insert("cpu.usage", 1_700_000_000, 0.75)?;
//! db.insert("cpu.usage", 1_700_000_010, 0.80)?;
//!
//! // Inclusive range read, sorted ascending by timestamp.
//! let records = db.get("cpu.usage", 1_700_000_000, 1_700_000_060)?;
//! assert_eq!(records.len(), 2);
//! ```
//!
//! On-disk layout under the store root:
//!
//! ```text
//! <root>/
//!   buffers/
//!     .buffer.XXXXXX        length-framed multi-metric appends
//!   metrics/
//!     <metric-name>/
//!       latest              open, unsorted record append target
//!       <max-timestamp>     sealed record segment
//! ```
//!
//! Files are written in native byte order and native word size; they are not
//! portable across machines.

#![deny(missing_docs)]

pub mod buffer;
pub mod db;
pub mod error;
mod hash;
pub mod record;
pub mod slab;

pub use buffer::{Buffer, DEFAULT_BUFFER_MAX, MAX_KEY_LEN};
pub use db::{Database, StoreConfig};
pub use error::{Result, StoreError};
pub use record::{Record, Timestamp, Value};
pub use slab::{Slab, DEFAULT_SLAB_MAX};
