//! Property tests for the round-trip and range-inclusivity guarantees.
//!
//! Uses proptest to push arbitrary insert sequences through small
//! thresholds so rotation, rollover, and the buffer/slab merge all get
//! exercised on every case.

use burrow::{Database, StoreConfig};
use proptest::prelude::*;
use tempfile::TempDir;

const NAMES: [&str; 3] = ["alpha", "beta", "gamma"];

fn tiny_config() -> StoreConfig {
    StoreConfig {
        buffer_max: 512,
        slab_max: 128,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever goes in comes back out, per metric, as a multiset.
    #[test]
    fn test_roundtrip_preserves_multiset(entries in prop::collection::vec((0usize..3, any::<u64>()), 0..200)) {
        let temp_dir = TempDir::new().unwrap();
        let mut db: Database<u64> =
            Database::open_with_config(temp_dir.path(), 16, tiny_config()).unwrap();

        for (i, &(which, value)) in entries.iter().enumerate() {
            db.insert(NAMES[which], i as u32, value).unwrap();
        }

        for (which, name) in NAMES.iter().enumerate() {
            let mut expected: Vec<(u32, u64)> = entries
                .iter()
                .enumerate()
                .filter(|(_, (w, _))| *w == which)
                .map(|(i, &(_, value))| (i as u32, value))
                .collect();
            expected.sort_unstable();

            let got: Vec<(u32, u64)> = db
                .get(name, 0, u32::MAX)
                .unwrap()
                .iter()
                .map(|r| (r.time, r.value))
                .collect();

            prop_assert_eq!(expected, got);
        }
    }

    /// `get(a, b)` returns exactly the records with `a <= time <= b`.
    #[test]
    fn test_range_is_inclusive_both_ends(count in 1u32..150, bounds in (0u32..200, 0u32..200)) {
        let temp_dir = TempDir::new().unwrap();
        let mut db: Database<u64> =
            Database::open_with_config(temp_dir.path(), 16, tiny_config()).unwrap();

        for time in 0..count {
            db.insert("series", time, u64::from(time)).unwrap();
        }

        let (start, end) = (bounds.0.min(bounds.1), bounds.0.max(bounds.1));
        let times: Vec<u32> = db
            .get("series", start, end)
            .unwrap()
            .iter()
            .map(|r| r.time)
            .collect();

        let expected: Vec<u32> = (0..count).filter(|t| *t >= start && *t <= end).collect();
        prop_assert_eq!(expected, times);
    }
}
