//! Append-only evidence persistence.
//!
//! Every [`EvidenceRecord`] becomes exactly one line of canonical JSON.
//! Lines are never rewritten or removed; sessions accumulate until a caller
//! explicitly clears the log.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::model::EvidenceRecord;
use crate::stable_json::stable_to_string;
use crate::{HarnessError, Result};

const NO_NORMALIZATION: [&str; 0] = [];

/// Destination for evidence records.
///
/// A failed append is an infrastructure error and aborts the session.
pub trait EvidenceSink {
    /// # Errors
    ///
    /// Returns [`HarnessError::EvidenceWrite`] (or a serialization error)
    /// when the record could not be persisted.
    fn append(&mut self, record: &EvidenceRecord) -> Result<()>;

    /// Human-readable location for log lines.
    fn describe(&self) -> String;
}

/// Canonical single-line encoding of a record, newline included.
///
/// # Errors
///
/// Returns [`HarnessError::Serialization`] if the metrics cannot be encoded.
pub fn encode_line(record: &EvidenceRecord) -> Result<String> {
    let mut line = stable_to_string(record, &NO_NORMALIZATION)?;
    line.push('\n');
    Ok(line)
}

// ── JSONL file sink ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JsonlEvidenceSink {
    path: PathBuf,
    appended: usize,
}

impl JsonlEvidenceSink {
    /// The file and its parent directories are created on first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            appended: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle.
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Truncate the log. The only way lines are ever removed.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::EvidenceWrite`] if the file cannot be
    /// truncated.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_parent()?;
        fs::write(&self.path, b"").map_err(|source| HarnessError::EvidenceWrite {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "evidence log cleared");
        Ok(())
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| HarnessError::EvidenceWrite {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

impl EvidenceSink for JsonlEvidenceSink {
    fn append(&mut self, record: &EvidenceRecord) -> Result<()> {
        let line = encode_line(record)?;
        self.ensure_parent()?;
        let write_err = |source| HarnessError::EvidenceWrite {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(write_err)?;
        // Single write per line; O_APPEND keeps each line contiguous.
        file.write_all(line.as_bytes()).map_err(write_err)?;
        self.appended += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ── In-memory sink ─────────────────────────────────────────────────────

/// Keeps encoded lines in memory; used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryEvidenceSink {
    lines: Vec<String>,
}

impl MemoryEvidenceSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Concatenated log text, as it would appear on disk.
    pub fn text(&self) -> String {
        self.lines.concat()
    }
}

impl EvidenceSink for MemoryEvidenceSink {
    fn append(&mut self, record: &EvidenceRecord) -> Result<()> {
        self.lines.push(encode_line(record)?);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory ({} lines)", self.lines.len())
    }
}
