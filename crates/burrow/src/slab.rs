//! Per-metric slab store.
//!
//! A slab owns the on-disk state of one metric under
//! `<base>/metrics/<name>/`: an open `latest` file receiving appends, and
//! zero or more sealed segment files named by the decimal maximum timestamp
//! they contain. Once `latest` reaches the rollover threshold it is renamed
//! to its batch's maximum timestamp and a fresh empty `latest` is opened.
//!
//! Records inside a segment are contiguous [`Record`] encodings with no
//! framing. Segments are sealed in arrival order, not timestamp order, so
//! range reads merge every file and sort at the end.

use crate::error::{Result, StoreError};
use crate::record::{Record, Timestamp, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default rollover threshold for a slab's `latest` file (1 MiB).
pub const DEFAULT_SLAB_MAX: u64 = 1024 * 1024;

/// Name of the open append target inside a metric directory.
const LATEST: &str = "latest";

/// Subdirectory of the store root holding one directory per metric.
pub(crate) const METRICS_DIR: &str = "metrics";

/// Append store for a single metric.
pub struct Slab<V: Value> {
    name: String,
    dir: PathBuf,
    writer: BufWriter<File>,
    written: u64,
    slab_max: u64,
    _value: PhantomData<V>,
}

impl<V: Value> Slab<V> {
    /// Opens the slab for `name` under `base`, creating the metric
    /// directory and `latest` if absent.
    ///
    /// The write position is the end of `latest`; the rollover counter
    /// resumes from its current length.
    pub fn open(base: &Path, name: &str, slab_max: u64) -> Result<Self> {
        let dir = base.join(METRICS_DIR).join(name);
        fs::create_dir_all(&dir)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LATEST))?;
        let written = file.metadata()?.len();

        Ok(Self {
            name: name.to_string(),
            dir,
            writer: BufWriter::new(file),
            written,
            slab_max,
            _value: PhantomData,
        })
    }

    /// Returns the metric directory this slab writes to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends one record to `latest`, rolling over when the threshold is
    /// reached.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SegmentCollision`] if rollover would seal a
    /// segment whose name already exists; the records stay in `latest`.
    pub fn insert(&mut self, record: &Record<V>) -> Result<()> {
        let mut frame = Vec::with_capacity(Record::<V>::DISK_SIZE);
        record.write_to(&mut frame);
        self.writer.write_all(&frame)?;
        self.written += frame.len() as u64;

        if self.written >= self.slab_max {
            self.rotate()?;
        }
        Ok(())
    }

    /// Appends one `(time, value)` data point.
    pub fn insert_at(&mut self, time: Timestamp, value: V) -> Result<()> {
        self.insert(&Record::new(time, value))
    }

    /// Appends every record in sequence, then flushes.
    pub fn insert_range<'a, I>(&mut self, records: I) -> Result<()>
    where
        V: 'a,
        I: IntoIterator<Item = &'a Record<V>>,
    {
        for record in records {
            self.insert(record)?;
        }
        self.flush()
    }

    /// Flushes buffered appends to `latest`.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Reads every record for this metric with `start <= time <= end`,
    /// sorted ascending by time.
    ///
    /// The merge covers `latest` plus every sealed segment; the final sort
    /// is required because segments are named by their maximum timestamp
    /// and never re-sorted across rollovers.
    pub fn get(&mut self, start: Timestamp, end: Timestamp) -> Result<Vec<Record<V>>> {
        self.writer.flush()?;
        collect_range(&self.dir, start, end)
    }

    /// Reads records for a metric without opening a slab for writing.
    ///
    /// Unlike [`Slab::open`] this creates nothing on disk: a metric that
    /// was never written yields an empty result, and querying it does not
    /// make it appear in [`metrics`].
    pub fn read_range(
        base: &Path,
        name: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Record<V>>> {
        let dir = base.join(METRICS_DIR).join(name);
        match fs::metadata(&dir) {
            Ok(_) => collect_range(&dir, start, end),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Seals `latest` under its batch's maximum timestamp and opens a
    /// fresh empty `latest`.
    fn rotate(&mut self) -> Result<()> {
        self.writer.flush()?;

        let latest = self.dir.join(LATEST);
        let records: Vec<Record<V>> = read_records(&latest)?;
        let max_time = match records.iter().map(|r| r.time).max() {
            Some(time) => time,
            None => {
                self.written = 0;
                return Ok(());
            }
        };

        let sealed = self.dir.join(max_time.to_string());
        if sealed.exists() {
            return Err(StoreError::SegmentCollision {
                metric: self.name.clone(),
                timestamp: max_time,
            });
        }
        fs::rename(&latest, &sealed)?;

        let file = OpenOptions::new().create(true).append(true).open(&latest)?;
        self.writer = BufWriter::new(file);
        self.written = 0;

        debug!(
            "sealed {} records into segment {} for metric {}",
            records.len(),
            max_time,
            self.name
        );
        Ok(())
    }
}

/// Lists the metrics stored under `base`, sorted by name.
///
/// A metric is listed once any buffer has dumped records for it; metrics
/// still resident only in live buffers are not visible at this layer.
pub fn metrics(base: &Path) -> Result<Vec<String>> {
    let dir = base.join(METRICS_DIR);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Reads, filters, and sorts every record file in a metric directory.
fn collect_range<V: Value>(
    dir: &Path,
    start: Timestamp,
    end: Timestamp,
) -> Result<Vec<Record<V>>> {
    let mut results: Vec<Record<V>> = read_records(&dir.join(LATEST))?;
    for time in segments(dir)? {
        results.extend(read_records::<V>(&dir.join(time.to_string()))?);
    }

    results.retain(|r| r.time >= start && r.time <= end);
    results.sort_by_key(|r| r.time);
    Ok(results)
}

/// Lists the sealed segment timestamps in a metric directory.
fn segments(dir: &Path) -> Result<Vec<Timestamp>> {
    let mut times = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.path().is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let name = match file_name.to_str() {
            Some(name) => name,
            None => continue,
        };
        if name == LATEST {
            continue;
        }
        match name.parse::<Timestamp>() {
            Ok(time) => times.push(time),
            Err(_) => warn!(
                "ignoring unrecognized file {:?} in slab directory {}",
                name,
                dir.display()
            ),
        }
    }
    Ok(times)
}

/// Reads the contiguous records in one segment or `latest` file.
///
/// A missing file reads as empty. A trailing partial record is dropped
/// with a warning rather than failing the read.
fn read_records<V: Value>(path: &Path) -> Result<Vec<Record<V>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let chunks = bytes.chunks_exact(Record::<V>::DISK_SIZE);
    if !chunks.remainder().is_empty() {
        warn!(
            "ignoring {} trailing bytes in {}",
            chunks.remainder().len(),
            path.display()
        );
    }

    Ok(chunks.map(Record::read_from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_slab(base: &Path, slab_max: u64) -> Slab<u64> {
        Slab::open(base, "testing", slab_max).unwrap()
    }

    #[test]
    fn test_open_creates_directory_and_latest() {
        let temp_dir = TempDir::new().unwrap();
        let slab = open_slab(temp_dir.path(), DEFAULT_SLAB_MAX);

        assert!(slab.dir().is_dir());
        assert!(slab.dir().join("latest").is_file());
    }

    #[test]
    fn test_insert_get_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let mut slab = open_slab(temp_dir.path(), DEFAULT_SLAB_MAX);

        for time in 0..10 {
            slab.insert_at(time, u64::from(time) * 100).unwrap();
        }

        let records = slab.get(0, 9).unwrap();
        assert_eq!(records.len(), 10);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.time, i as Timestamp);
            assert_eq!(record.value, i as u64 * 100);
        }
    }

    #[test]
    fn test_get_range_is_inclusive() {
        let temp_dir = TempDir::new().unwrap();
        let mut slab = open_slab(temp_dir.path(), DEFAULT_SLAB_MAX);

        for time in 0..10 {
            slab.insert_at(time, 1).unwrap();
        }

        let records = slab.get(3, 7).unwrap();
        let times: Vec<Timestamp> = records.iter().map(|r| r.time).collect();
        assert_eq!(times, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_rollover_seals_segment_named_by_max_time() {
        let temp_dir = TempDir::new().unwrap();
        // One u64 record is 12 bytes; 8 records cross a 96-byte threshold.
        let mut slab = open_slab(temp_dir.path(), 96);

        for time in 0..8 {
            slab.insert_at(time, 0).unwrap();
        }

        let sealed = slab.dir().join("7");
        assert!(sealed.is_file());
        assert_eq!(fs::metadata(slab.dir().join("latest")).unwrap().len(), 0);

        // Sealed records stay readable alongside new appends.
        slab.insert_at(8, 0).unwrap();
        let records = slab.get(0, 8).unwrap();
        assert_eq!(records.len(), 9);
    }

    #[test]
    fn test_rollover_collision_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        // Threshold of one record: every insert rolls over.
        let mut slab = open_slab(temp_dir.path(), 1);

        slab.insert_at(5, 0).unwrap();
        let err = slab.insert_at(5, 1).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SegmentCollision { timestamp: 5, .. }
        ));

        // The colliding batch stays in latest and remains readable.
        let records = slab.get(5, 5).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_merge_is_sorted_across_segments() {
        let temp_dir = TempDir::new().unwrap();
        let mut slab = open_slab(temp_dir.path(), 36);

        // Two out-of-order batches: segments sealed as "30" then "12".
        for time in [10, 20, 30] {
            slab.insert_at(time, 0).unwrap();
        }
        for time in [2, 7, 12] {
            slab.insert_at(time, 0).unwrap();
        }
        slab.insert_at(5, 0).unwrap();

        let times: Vec<Timestamp> = slab
            .get(0, 100)
            .unwrap()
            .iter()
            .map(|r| r.time)
            .collect();
        assert_eq!(times, vec![2, 5, 7, 10, 12, 20, 30]);
    }

    #[test]
    fn test_written_counter_resumes_on_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut slab = open_slab(temp_dir.path(), 96);
            for time in 0..4 {
                slab.insert_at(time, 0).unwrap();
            }
        }

        // 48 bytes already in latest; 4 more records must trigger rollover.
        let mut slab = open_slab(temp_dir.path(), 96);
        for time in 4..8 {
            slab.insert_at(time, 0).unwrap();
        }
        assert!(slab.dir().join("7").is_file());
    }

    #[test]
    fn test_read_range_does_not_create_directories() {
        let temp_dir = TempDir::new().unwrap();

        let records: Vec<Record<u64>> =
            Slab::read_range(temp_dir.path(), "never-written", 0, 100).unwrap();
        assert!(records.is_empty());
        assert!(!temp_dir.path().join("metrics").join("never-written").exists());
    }

    #[test]
    fn test_metrics_enumeration() {
        let temp_dir = TempDir::new().unwrap();
        assert!(metrics(temp_dir.path()).unwrap().is_empty());

        for name in ["beta", "alpha"] {
            let mut slab: Slab<u64> = Slab::open(temp_dir.path(), name, DEFAULT_SLAB_MAX).unwrap();
            slab.insert_at(1, 1).unwrap();
        }

        assert_eq!(metrics(temp_dir.path()).unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_trailing_partial_record_is_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let mut slab = open_slab(temp_dir.path(), DEFAULT_SLAB_MAX);

        slab.insert_at(1, 7).unwrap();
        slab.flush().unwrap();

        let latest = slab.dir().join("latest");
        let mut bytes = fs::read(&latest).unwrap();
        bytes.extend_from_slice(&[0xde, 0xad]);
        fs::write(&latest, &bytes).unwrap();

        let records = slab.get(0, 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 7);
    }
}
