//! Sharded append buffer.
//!
//! A buffer multiplexes writes from arbitrarily many metrics into one open
//! temp file under `<base>/buffers/`, so the engine holds a bounded number
//! of file handles no matter how many metrics exist. Each append is a
//! length-framed record:
//!
//! ```text
//! ┌────────────────────┬────────────────┬────────────────────────┐
//! │ len: usize, native │ key: len bytes │ record: DISK_SIZE bytes│
//! └────────────────────┴────────────────┴────────────────────────┘
//! ```
//!
//! When the file reaches the rotation threshold its contents are dumped,
//! demultiplexed into per-metric [`Slab`]s, and a fresh temp file takes
//! its place. Buffer files left behind by a previous run are recovered the
//! same way at startup.

use crate::error::{Result, StoreError};
use crate::record::{Record, Timestamp, Value};
use crate::slab::Slab;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default rotation threshold for a buffer file (5 MiB).
pub const DEFAULT_BUFFER_MAX: u64 = 5 * 1024 * 1024;

/// Maximum key length accepted on insert and during frame parsing.
///
/// A frame claiming a longer key is treated as corruption.
pub const MAX_KEY_LEN: usize = 1024;

/// Subdirectory of the store root holding the live buffer files.
const BUFFERS_DIR: &str = "buffers";

/// Prefix of every buffer temp file; recovery only considers these.
const TEMP_PREFIX: &str = ".buffer.";

const LEN_BYTES: usize = std::mem::size_of::<usize>();

/// Write intake for one shard: a length-framed multi-metric append file.
pub struct Buffer<V: Value> {
    base: PathBuf,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
    buffer_max: u64,
    slab_max: u64,
    _value: PhantomData<V>,
}

impl<V: Value> Buffer<V> {
    /// Creates a buffer over a fresh `.buffer.XXXXXX` temp file under
    /// `base/buffers/`, creating that directory if absent.
    pub fn create(base: &Path, buffer_max: u64, slab_max: u64) -> Result<Self> {
        let (writer, path) = Self::open_temp(base)?;
        Ok(Self {
            base: base.to_path_buf(),
            path,
            writer: Some(writer),
            written: 0,
            buffer_max,
            slab_max,
            _value: PhantomData,
        })
    }

    /// Reopens an existing buffer file, e.g. one orphaned by a prior run.
    fn open_existing(base: &Path, path: PathBuf, slab_max: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self {
            base: base.to_path_buf(),
            path,
            writer: Some(BufWriter::new(file)),
            written: 0,
            buffer_max: DEFAULT_BUFFER_MAX,
            slab_max,
            _value: PhantomData,
        })
    }

    fn open_temp(base: &Path) -> Result<(BufWriter<File>, PathBuf)> {
        let dir = base.join(BUFFERS_DIR);
        fs::create_dir_all(&dir)?;

        let (file, path) = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .rand_bytes(6)
            .tempfile_in(&dir)?
            .keep()
            .map_err(|err| err.error)?;
        Ok((BufWriter::new(file), path))
    }

    /// Returns the path of the live buffer file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns how many bytes have been appended since the last rotation.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Appends one framed record, rotating once the written-byte count
    /// reaches the buffer threshold.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KeyTooLong`] for keys above [`MAX_KEY_LEN`]
    /// and [`StoreError::BufferClosed`] after a dump without rotation.
    pub fn insert(&mut self, key: &str, time: Timestamp, value: V) -> Result<()> {
        if key.len() > MAX_KEY_LEN {
            return Err(StoreError::KeyTooLong(key.len()));
        }
        let writer = self.writer.as_mut().ok_or(StoreError::BufferClosed)?;

        let mut frame = Vec::with_capacity(LEN_BYTES + key.len() + Record::<V>::DISK_SIZE);
        frame.extend_from_slice(&key.len().to_ne_bytes());
        frame.extend_from_slice(key.as_bytes());
        Record::new(time, value).write_to(&mut frame);

        writer.write_all(&frame)?;
        self.written += frame.len() as u64;

        if self.written >= self.buffer_max {
            self.rotate()?;
        }
        Ok(())
    }

    /// Parses the whole buffer file into a per-metric record map.
    ///
    /// Insertion order is preserved within each key. Parsing stops with a
    /// warning at the first corrupt frame (oversized key length, non-UTF-8
    /// key, or short read); the records parsed up to that point are
    /// returned. A closed buffer reads as empty.
    pub fn read(&mut self) -> Result<HashMap<String, Vec<Record<V>>>> {
        let mut results: HashMap<String, Vec<Record<V>>> = HashMap::new();
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => return Ok(results),
        };
        writer.flush()?;

        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut offset = 0u64;
        loop {
            match Self::read_frame(&mut reader, offset) {
                Ok(Some((key, record, frame_len))) => {
                    results.entry(key).or_default().push(record);
                    offset += frame_len;
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("stopping parse of buffer {}: {}", self.path.display(), err);
                    break;
                }
            }
        }
        Ok(results)
    }

    /// Reads one frame, returning `Ok(None)` at a clean end of file.
    fn read_frame<R: Read>(
        reader: &mut R,
        offset: u64,
    ) -> Result<Option<(String, Record<V>, u64)>> {
        let mut len_buf = [0u8; LEN_BYTES];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        let len = usize::from_ne_bytes(len_buf);
        if len > MAX_KEY_LEN {
            return Err(StoreError::CorruptFrame {
                offset,
                reason: "key length exceeds MAX_KEY_LEN",
            });
        }

        let mut key_buf = vec![0u8; len];
        read_frame_part(reader, &mut key_buf, offset, "truncated key")?;
        let key = String::from_utf8(key_buf).map_err(|_| StoreError::CorruptFrame {
            offset,
            reason: "key is not valid UTF-8",
        })?;

        let mut record_buf = vec![0u8; Record::<V>::DISK_SIZE];
        read_frame_part(reader, &mut record_buf, offset, "truncated record")?;
        let record = Record::read_from(&record_buf);

        let frame_len = (LEN_BYTES + len + Record::<V>::DISK_SIZE) as u64;
        Ok(Some((key, record, frame_len)))
    }

    /// Demultiplexes the buffer's contents into per-metric slabs, then
    /// deletes the buffer file and closes the stream.
    ///
    /// A closed buffer dumps as a no-op. The file delete happens after the
    /// slab appends, so a crash in between can leave both copies; reads
    /// tolerate the resulting duplicates.
    pub fn dump(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }

        let contents = self.read()?;
        let mut total = 0;
        for (name, records) in &contents {
            let mut slab = Slab::open(&self.base, name, self.slab_max)?;
            slab.insert_range(records)?;
            total += records.len();
        }

        fs::remove_file(&self.path)?;
        self.writer = None;
        self.written = 0;

        debug!(
            "dumped {} records for {} metrics from {}",
            total,
            contents.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Dumps the buffer and replaces it with a fresh temp file.
    pub fn rotate(&mut self) -> Result<()> {
        self.dump()?;
        let (writer, path) = Self::open_temp(&self.base)?;
        self.writer = Some(writer);
        self.path = path;
        self.written = 0;
        Ok(())
    }

    /// Dumps every `.buffer.*` file under `base/buffers/` into slabs and
    /// removes it, returning how many files were recovered.
    ///
    /// Run at startup so records orphaned by a previous run become
    /// readable before new writes are accepted.
    pub fn recover(base: &Path, slab_max: u64) -> Result<usize> {
        let dir = base.join(BUFFERS_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut recovered = 0;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let name = match file_name.to_str() {
                Some(name) => name,
                None => continue,
            };
            if !name.starts_with(TEMP_PREFIX) {
                warn!("ignoring foreign file {} in buffer directory", path.display());
                continue;
            }

            Self::open_existing(base, path, slab_max)?.dump()?;
            recovered += 1;
        }

        if recovered > 0 {
            debug!("recovered {} orphaned buffer files under {}", recovered, dir.display());
        }
        Ok(recovered)
    }

    /// Reads every record for `name` with `start <= time <= end`, merging
    /// the live buffer with the metric's slab.
    ///
    /// The result is sorted ascending by time; records sharing a timestamp
    /// keep their insertion order.
    pub fn get(&mut self, name: &str, start: Timestamp, end: Timestamp) -> Result<Vec<Record<V>>> {
        let mut buffered = self.read()?.remove(name).unwrap_or_default();
        buffered.retain(|r| r.time >= start && r.time <= end);

        let mut results = Slab::read_range(&self.base, name, start, end)?;
        results.extend(buffered);
        results.sort_by_key(|r| r.time);
        Ok(results)
    }
}

impl<V: Value> Drop for Buffer<V> {
    fn drop(&mut self) {
        // Best effort; the file itself is recovered on next startup.
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.flush() {
                warn!("failed to flush buffer {} on drop: {}", self.path.display(), err);
            }
        }
    }
}

fn read_frame_part<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    offset: u64,
    reason: &'static str,
) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            Err(StoreError::CorruptFrame { offset, reason })
        }
        Err(err) => Err(err.into()),
    }
}
