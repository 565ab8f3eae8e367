//! File-backed audit log: one JSON record per line.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{AuditError, AuditResult};
use crate::model::{AuditEntry, AuditRecord, AuditTable, QueryWindow};
use crate::AuditSink;

struct ChainHead {
    file: File,
    sequence: u64,
    last_hash: Option<String>,
}

/// Append-only JSON-lines audit log.
///
/// Reopening an existing file resumes the chain where it left off.
pub struct JsonlAuditLog {
    path: PathBuf,
    head: Mutex<ChainHead>,
}

impl JsonlAuditLog {
    /// Open or create the log at `path`.
    pub fn open(path: impl AsRef<Path>) -> AuditResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let existing = if path.exists() {
            read_records(&path)?
        } else {
            Vec::new()
        };
        let (sequence, last_hash) = existing
            .last()
            .map(|r| (r.sequence, Some(r.hash.clone())))
            .unwrap_or((0, None));

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), sequence, "opened audit log");

        Ok(Self {
            path,
            head: Mutex::new(ChainHead {
                file,
                sequence,
                last_hash,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_records(path: &Path) -> AuditResult<Vec<AuditRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: AuditRecord =
            serde_json::from_str(&line).map_err(|e| AuditError::Serialization(e.to_string()))?;
        records.push(record);
    }
    Ok(records)
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, entry: AuditEntry) -> AuditResult<AuditRecord> {
        let mut head = self
            .head
            .lock()
            .map_err(|_| AuditError::Backend("audit lock poisoned".to_string()))?;

        let record = AuditRecord::seal(entry, head.sequence + 1, head.last_hash.clone())?;
        let mut line =
            serde_json::to_string(&record).map_err(|e| AuditError::Serialization(e.to_string()))?;
        line.push('\n');
        head.file.write_all(line.as_bytes())?;
        head.file.flush()?;

        head.sequence = record.sequence;
        head.last_hash = Some(record.hash.clone());
        Ok(record)
    }

    fn list(&self, table: Option<AuditTable>, window: QueryWindow) -> AuditResult<Vec<AuditRecord>> {
        let mut records = self.all()?;
        records.reverse();
        records.retain(|r| table.map_or(true, |t| r.table == t));
        Ok(window.apply(records))
    }

    fn all(&self) -> AuditResult<Vec<AuditRecord>> {
        // Hold the head lock so a concurrent append cannot leave a torn line.
        let _head = self
            .head
            .lock()
            .map_err(|_| AuditError::Backend("audit lock poisoned".to_string()))?;
        read_records(&self.path)
    }

    fn len(&self) -> usize {
        self.head.lock().map(|h| h.sequence as usize).unwrap_or(0)
    }
}
