//! Dead-letter store
//!
//! Permanently failed `(category, key)` pairs are appended to one CSV file per
//! calendar date (`YYYYMMDD.csv`, header `key,category,timestamp`). Appends are
//! idempotent per date file: pairs already present are skipped, and an append
//! that adds nothing performs no write. Files are only ever appended to.

use chrono::{DateTime, Local, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info};

mod lock;

/// CSV header line of every dead-letter file
pub const HEADER: [&str; 3] = ["key", "category", "timestamp"];

/// Dead-letter errors
#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    /// Malformed date or key input; nothing was read or written
    #[error("format error: {0}")]
    FormatError(String),

    /// Filesystem failure
    #[error("IO error during {operation} on {path}: {message}")]
    IoError {
        /// Operation that failed (append, read, lock, list)
        operation: &'static str,
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// Existing file content could not be parsed
    #[error("corrupt dead-letter file {path}: {message}")]
    Corrupt {
        /// File involved
        path: PathBuf,
        /// Parse failure
        message: String,
    },
}

/// Log an I/O failure with its operation and path, then wrap it.
pub(crate) fn io_error(
    operation: &'static str,
    path: &Path,
    err: impl std::fmt::Display,
) -> DeadLetterError {
    error!(
        operation = operation,
        path = %path.display(),
        error = %err,
        "Dead-letter I/O failure"
    );
    DeadLetterError::IoError {
        operation,
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Category of the failed item
    pub category: String,
    /// Key of the failed item (may be empty)
    pub key: String,
    /// When the failure was recorded
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Record {
    key: String,
    category: String,
    timestamp: String,
}

/// Today's date in the store's `YYYYMMDD` format (local time)
pub fn today() -> String {
    Local::now().format("%Y%m%d").to_string()
}

/// Check `date` is an 8-digit calendar date (`YYYYMMDD`).
pub fn validate_date(date: &str) -> Result<NaiveDate, DeadLetterError> {
    if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DeadLetterError::FormatError(format!(
            "date must be 8 digits (YYYYMMDD), got '{date}'"
        )));
    }
    NaiveDate::parse_from_str(date, "%Y%m%d")
        .map_err(|e| DeadLetterError::FormatError(format!("'{date}' is not a calendar date: {e}")))
}

/// Date-keyed, append-only store of permanently failed items
#[derive(Debug)]
pub struct DeadLetterStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DeadLetterStore {
    /// Create a store rooted at `dir`. The directory is created on first append.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding entries for `date`
    pub fn path_for(&self, date: &str) -> Result<PathBuf, DeadLetterError> {
        validate_date(date)?;
        Ok(self.dir.join(format!("{date}.csv")))
    }

    /// Append `keys` for `category` to the file for `date`.
    ///
    /// Returns how many pairs were new. Pairs already in the file (or repeated
    /// within `keys`) are skipped; if nothing is new, the file is not touched.
    ///
    /// # Errors
    /// [`DeadLetterError::FormatError`] for a malformed date or a category or
    /// key containing a line break, before any filesystem access. An empty
    /// category is stored as-is.
    /// [`DeadLetterError::IoError`] if the directory or file cannot be written.
    pub fn append<S: AsRef<str>>(
        &self,
        category: &str,
        keys: &[S],
        date: &str,
    ) -> Result<usize, DeadLetterError> {
        let path = self.path_for(date)?;
        if category.contains(['\n', '\r']) {
            return Err(DeadLetterError::FormatError(format!(
                "invalid category '{}'",
                category.escape_debug()
            )));
        }
        if let Some(bad) = keys.iter().find(|k| k.as_ref().contains(['\n', '\r'])) {
            return Err(DeadLetterError::FormatError(format!(
                "invalid key '{}'",
                bad.as_ref().escape_debug()
            )));
        }
        if keys.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        fs::create_dir_all(&self.dir).map_err(|e| io_error("append", &self.dir, e))?;

        lock::with_exclusive_lock(&path, || {
            let existing = self.load_pairs(&path)?;
            let mut seen: HashSet<(String, String)> = existing;
            let fresh: Vec<&str> = keys
                .iter()
                .map(AsRef::as_ref)
                .filter(|key| seen.insert((category.to_string(), key.to_string())))
                .collect();

            if fresh.is_empty() {
                debug!(category = %category, date = %date, "All dead-letter keys already recorded");
                return Ok(0);
            }

            self.write_records(&path, category, &fresh)?;
            info!(
                category = %category,
                date = %date,
                added = fresh.len(),
                path = %path.display(),
                "Recorded dead letters"
            );
            Ok(fresh.len())
        })
    }

    /// Record a single failure under today's date
    pub fn record(&self, category: &str, key: &str) -> Result<usize, DeadLetterError> {
        self.append(category, &[key], &today())
    }

    /// Keys recorded for `date`, grouped by category, in file order.
    ///
    /// A date with no file reads as empty.
    pub fn read(&self, date: &str) -> Result<BTreeMap<String, Vec<String>>, DeadLetterError> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in self.entries(date)? {
            let keys = grouped.entry(entry.category).or_default();
            if !keys.contains(&entry.key) {
                keys.push(entry.key);
            }
        }
        Ok(grouped)
    }

    /// Full entries (with timestamps) recorded for `date`
    pub fn entries(&self, date: &str) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let path = self.path_for(date)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        self.read_records(&path)?
            .into_iter()
            .map(|record| {
                let recorded_at = DateTime::parse_from_rfc3339(&record.timestamp)
                    .map_err(|e| DeadLetterError::Corrupt {
                        path: path.clone(),
                        message: format!("bad timestamp '{}': {e}", record.timestamp),
                    })?
                    .with_timezone(&Utc);
                Ok(DeadLetterEntry {
                    category: record.category,
                    key: record.key,
                    recorded_at,
                })
            })
            .collect()
    }

    /// Dates that have a dead-letter file, oldest first
    pub fn list_dates(&self) -> Result<Vec<String>, DeadLetterError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|e| io_error("list", &self.dir, e))?;

        let mut dates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error("list", &self.dir, e))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if validate_date(stem).is_ok() {
                        dates.push(stem.to_string());
                    }
                }
            }
        }
        dates.sort();
        Ok(dates)
    }

    fn load_pairs(&self, path: &Path) -> Result<HashSet<(String, String)>, DeadLetterError> {
        if !path.exists() {
            return Ok(HashSet::new());
        }
        Ok(self
            .read_records(path)?
            .into_iter()
            .map(|r| (r.category, r.key))
            .collect())
    }

    fn read_records(&self, path: &Path) -> Result<Vec<Record>, DeadLetterError> {
        let file = File::open(path).map_err(|e| io_error("read", path, e))?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

        let mut records = Vec::new();
        for result in reader.deserialize::<Record>() {
            let record = result.map_err(|e| match e.kind() {
                csv::ErrorKind::Io(_) => io_error("read", path, &e),
                _ => DeadLetterError::Corrupt {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                },
            })?;
            records.push(record);
        }
        Ok(records)
    }

    fn write_records(&self, path: &Path, category: &str, keys: &[&str]) -> Result<(), DeadLetterError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| io_error("append", path, e))?;
        let needs_header = file
            .metadata()
            .map_err(|e| io_error("append", path, e))?
            .len()
            == 0;

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));

        if needs_header {
            writer
                .write_record(HEADER)
                .map_err(|e| io_error("append", path, e))?;
        }
        for key in keys {
            writer
                .write_record([*key, category, timestamp.as_str()])
                .map_err(|e| io_error("append", path, e))?;
        }

        let mut inner = writer
            .into_inner()
            .map_err(|e| io_error("append", path, e))?;
        inner.flush().map_err(|e| io_error("append", path, e))?;
        Ok(())
    }
}
