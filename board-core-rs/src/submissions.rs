//! Bounded audit history of batch submissions
//!
//! Keeps the newest few records in memory and on disk. The log is write-only
//! as far as rate updates are concerned; nothing reads it back to decide
//! anything.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::state::{read_document, write_document};

/// Outcome of one entry of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryResult {
    pub entry: String,
    /// Display name of the target channel, when the entry named a known one
    pub channel: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl EntryResult {
    pub fn ok(entry: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            channel: Some(channel.into()),
            success: true,
            error: None,
        }
    }

    pub fn failed(entry: impl Into<String>, channel: Option<String>, error: impl ToString) -> Self {
        Self {
            entry: entry.into(),
            channel,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// One batch submission as entered by the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub timestamp: String,
    pub raw_input: String,
    pub entries: Vec<String>,
    pub results: Vec<EntryResult>,
    pub success_count: usize,
    pub total_count: usize,
}

impl SubmissionRecord {
    pub fn new(timestamp: String, raw_input: &str, entries: Vec<String>, results: Vec<EntryResult>) -> Self {
        let success_count = results.iter().filter(|r| r.success).count();
        let total_count = results.len();
        Self {
            timestamp,
            raw_input: raw_input.to_string(),
            entries,
            results,
            success_count,
            total_count,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.total_count > 0 && self.success_count == self.total_count
    }
}

/// FIFO-bounded list of submissions, oldest first
#[derive(Debug)]
pub struct SubmissionLog {
    path: PathBuf,
    limit: usize,
    records: Vec<SubmissionRecord>,
}

impl SubmissionLog {
    /// Load whatever valid records exist at `path`; never fails
    pub fn open(path: impl Into<PathBuf>, limit: usize) -> Self {
        let path = path.into();
        let limit = limit.max(1);

        let records = match read_document(&path) {
            Ok(Some(Value::Array(items))) => {
                let total = items.len();
                let records: Vec<SubmissionRecord> = items
                    .into_iter()
                    .filter_map(|item| serde_json::from_value(item).ok())
                    .collect();
                if records.len() < total {
                    warn!(
                        "Submissions: Skipped {} malformed record(s) in {:?}",
                        total - records.len(),
                        path
                    );
                }
                records
            }
            Ok(Some(_)) => {
                warn!("Submissions: {:?} is not a list, starting empty", path);
                Vec::new()
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Submissions: Could not load {:?}: {}", path, e);
                Vec::new()
            }
        };

        let mut log = Self {
            path,
            limit,
            records,
        };
        log.evict();
        debug!("Submissions: Loaded {} record(s)", log.records.len());
        log
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[SubmissionRecord] {
        &self.records
    }

    pub fn latest(&self) -> Option<&SubmissionRecord> {
        self.records.last()
    }

    /// Add a record, evict beyond the bound and write the file.
    ///
    /// The record is kept in memory even when the write fails.
    pub fn append(&mut self, record: SubmissionRecord) -> Result<(), PersistenceError> {
        info!(
            "Submissions: {} of {} entries succeeded for {:?}",
            record.success_count, record.total_count, record.raw_input
        );
        self.records.push(record);
        self.evict();

        let doc = match serde_json::to_value(&self.records) {
            Ok(doc) => doc,
            Err(e) => {
                let err = PersistenceError {
                    path: self.path.clone(),
                    source: e.into(),
                };
                warn!("Submissions: {}", err);
                return Err(err);
            }
        };
        write_document(&self.path, &doc).inspect_err(|e| warn!("Submissions: {}", e))
    }

    fn evict(&mut self) {
        if self.records.len() > self.limit {
            let excess = self.records.len() - self.limit;
            self.records.drain(..excess);
        }
    }
}
