//! Discovery and round-robin sharding of benchmark definitions.

use crate::errors::{ConfigError, PerfError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Zero-based batch assignment of one worker: `index` out of `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchSpec {
    index: usize,
    total: usize,
}

impl Default for BatchSpec {
    fn default() -> Self {
        Self::single()
    }
}

impl BatchSpec {
    /// Validates and creates a batch spec.
    pub fn new(index: usize, total: usize) -> Result<Self, ConfigError> {
        if total == 0 {
            return Err(ConfigError::invalid_batch(
                format!("{index}/{total}"),
                "total must be at least 1",
            ));
        }
        if index >= total {
            return Err(ConfigError::invalid_batch(
                format!("{index}/{total}"),
                format!("index must be below {total}"),
            ));
        }
        Ok(Self { index, total })
    }

    /// The whole list as one batch.
    #[must_use]
    pub const fn single() -> Self {
        Self { index: 0, total: 1 }
    }

    /// Batch index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of batches.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }
}

impl fmt::Display for BatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.total)
    }
}

impl FromStr for BatchSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, total) = s
            .split_once('/')
            .ok_or_else(|| ConfigError::invalid_batch(s, "expected N/M"))?;
        let index = index
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid_batch(s, "batch index is not a number"))?;
        let total = total
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid_batch(s, "batch total is not a number"))?;
        Self::new(index, total).map_err(|_| ConfigError::invalid_batch(s, "index must be below total"))
    }
}

/// Lists `*.xml` definitions in `dir`, sorted by file name.
///
/// A non-empty `filter` keeps only files whose name contains it.
pub fn discover(dir: &Path, filter: &str) -> Result<Vec<PathBuf>, PerfError> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().map_or(true, |ext| ext != "xml") {
            continue;
        }
        let keep = filter.is_empty()
            || path
                .file_name()
                .map_or(false, |name| name.to_string_lossy().contains(filter));
        if keep {
            found.push(path);
        }
    }
    found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(found)
}

/// Returns the items at `index, index + total, ...`.
///
/// Over all indexes of one `total` the shards partition `items`.
pub fn shard<T: Clone>(items: &[T], spec: BatchSpec) -> Vec<T> {
    items
        .iter()
        .skip(spec.index)
        .step_by(spec.total)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_batch_spec() {
        assert_eq!("1/3".parse::<BatchSpec>().unwrap(), BatchSpec::new(1, 3).unwrap());
        assert_eq!("0/1".parse::<BatchSpec>().unwrap(), BatchSpec::single());
        assert_eq!(BatchSpec::new(2, 5).unwrap().to_string(), "2/5");
    }

    #[test]
    fn test_reject_bad_batch_specs() {
        for bad in ["3/3", "0/0", "x/2", "1", "1/y", "-1/2"] {
            assert!(bad.parse::<BatchSpec>().is_err(), "{bad} accepted");
        }
        assert!(matches!(
            BatchSpec::new(4, 2),
            Err(ConfigError::InvalidBatch { .. })
        ));
    }

    #[test]
    fn test_shard_round_robin() {
        let items: Vec<u32> = (0..6).collect();
        let shards: Vec<Vec<u32>> = (0..3)
            .map(|i| shard(&items, BatchSpec::new(i, 3).unwrap()))
            .collect();
        assert_eq!(shards, vec![vec![0, 3], vec![1, 4], vec![2, 5]]);
    }

    #[test]
    fn test_shards_partition_items() {
        let items: Vec<u32> = (0..17).collect();
        for total in 1..=6 {
            let mut union: Vec<u32> = (0..total)
                .flat_map(|i| shard(&items, BatchSpec::new(i, total).unwrap()))
                .collect();
            union.sort_unstable();
            assert_eq!(union, items, "total {total}");
        }
    }

    #[test]
    fn test_shard_beyond_items_is_empty() {
        let items = vec!["a"];
        assert!(shard(&items, BatchSpec::new(2, 4).unwrap()).is_empty());
    }

    #[test]
    fn test_discover_sorts_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b_sort.xml", "a_group.xml", "c_sort.xml", "notes.txt"] {
            std::fs::write(dir.path().join(name), "<test/>").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.xml")).unwrap();

        let names = |paths: Vec<PathBuf>| -> Vec<String> {
            paths
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        };

        let all = discover(dir.path(), "").unwrap();
        assert_eq!(names(all), vec!["a_group.xml", "b_sort.xml", "c_sort.xml"]);

        let sorted = discover(dir.path(), "sort").unwrap();
        assert_eq!(names(sorted), vec!["b_sort.xml", "c_sort.xml"]);

        assert!(discover(dir.path(), "missing").unwrap().is_empty());
    }

    #[test]
    fn test_discover_missing_dir() {
        assert!(matches!(
            discover(Path::new("/nonexistent/perf"), ""),
            Err(PerfError::Io(_))
        ));
    }
}
