//! The wall-clock summary shared by all benchmark runs.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// File name of the summary inside a results directory.
pub const SUMMARY_FILE: &str = "wall-clock-times.tsv";

/// Append-only summary with one line per benchmark run.
///
/// Writers are serialized by an async mutex, and each line reaches the file
/// with a single `write_all` on an append-mode handle, so lines never
/// interleave even with other appenders of the same file.
#[derive(Debug)]
pub struct WallClockSummary {
    path: PathBuf,
    file: Mutex<File>,
}

impl WallClockSummary {
    /// Opens (creating if needed) the summary at `path` in append mode.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Opens the summary inside `results_dir`.
    pub fn in_dir(results_dir: &Path) -> io::Result<Self> {
        Self::open(results_dir.join(SUMMARY_FILE))
    }

    /// Summary location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `line` followed by a newline.
    pub async fn append(&self, line: &str) -> io::Result<()> {
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line.trim_end_matches('\n'));
        record.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(record.as_bytes())?;
        file.flush()
    }
}
