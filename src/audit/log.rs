//! Per-segment audit records.
//!
//! Every segment that finishes processing produces one record of when
//! processing started and ended. Audit writes happen after the window is
//! persisted and never roll it back.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Timing record for one processed segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub connection_id: String,
    pub user_id: String,
    /// Capture timestamp carried by the segment (ms since epoch)
    pub segment_timestamp_ms: i64,
    pub processing_start_ms: i64,
    pub processing_end_ms: i64,
}

impl AuditRecord {
    /// Time from capture to the start of processing.
    pub fn latency_ms(&self) -> i64 {
        self.processing_start_ms - self.segment_timestamp_ms
    }
}

/// Destination for audit records.
pub trait AuditSink: Send {
    fn record(&mut self, record: &AuditRecord) -> std::io::Result<()>;

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
pub struct JsonlAuditLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlAuditLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&mut self, record: &AuditRecord) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, record).map_err(std::io::Error::other)?;
        self.writer.write_all(b"\n")
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for JsonlAuditLog {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!(path = %self.path.display(), "failed to flush audit log: {e}");
        }
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: std::sync::Arc<std::sync::Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that observes the same records after the log is moved into a pipeline.
    pub fn handle(&self) -> MemoryAuditHandle {
        MemoryAuditHandle {
            records: self.records.clone(),
        }
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&mut self, record: &AuditRecord) -> std::io::Result<()> {
        self.records
            .lock()
            .map_err(|_| std::io::Error::other("audit records lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

/// Read side of a [`MemoryAuditLog`].
#[derive(Debug, Clone)]
pub struct MemoryAuditHandle {
    records: std::sync::Arc<std::sync::Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditHandle {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(connection_id: &str) -> AuditRecord {
        AuditRecord {
            connection_id: connection_id.to_string(),
            user_id: "u1".to_string(),
            segment_timestamp_ms: 1_000,
            processing_start_ms: 1_250,
            processing_end_ms: 1_300,
        }
    }

    #[test]
    fn test_latency() {
        assert_eq!(record("c1").latency_ms(), 250);
    }

    #[test]
    fn test_jsonl_appends_lines() {
        let path = std::env::temp_dir()
            .join("sensor-window-audit-test")
            .join(format!("{}.jsonl", uuid::Uuid::new_v4()));

        {
            let mut log = JsonlAuditLog::open(&path).unwrap();
            log.record(&record("c1")).unwrap();
            log.flush().unwrap();
        }
        {
            let mut log = JsonlAuditLog::open(&path).unwrap();
            log.record(&record("c2")).unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let records: Vec<AuditRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records, vec![record("c1"), record("c2")]);
    }

    #[test]
    fn test_memory_handle_sees_records() {
        let mut log = MemoryAuditLog::new();
        let handle = log.handle();
        log.record(&record("c1")).unwrap();
        assert_eq!(handle.records().len(), 1);
    }
}
