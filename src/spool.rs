//! Durable event spool: an append-only JSONL queue surviving restarts.
//!
//! Each line is a `{seq, entry}` record. Sequence numbers are assigned
//! monotonically on append and are not reset by `clear`, so an entry's seq
//! identifies it across the spool's whole lifetime. Entries leave the spool
//! only through [`EventSpool::clear`], which the agent calls after a
//! confirmed delivery.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent::QueueEntry;

/// Errors that can occur in spool operations.
#[derive(Debug)]
pub enum SpoolError {
    Io(String),
    Serialize(String),
}

impl std::fmt::Display for SpoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpoolError::Io(e) => write!(f, "Spool IO error: {e}"),
            SpoolError::Serialize(e) => write!(f, "Spool serialization error: {e}"),
        }
    }
}

impl std::error::Error for SpoolError {}

/// One persisted spool line.
#[derive(Debug, Serialize, Deserialize)]
struct SpoolRecord {
    seq: u64,
    entry: QueueEntry,
}

/// Append-only persistent queue of delivery-pending entries.
pub struct EventSpool {
    path: PathBuf,
    next_seq: u64,
    len: usize,
}

impl EventSpool {
    /// Open a spool file, recovering any entries persisted by a previous
    /// agent lifetime. A torn trailing line (e.g. from a crash mid-write)
    /// is skipped with a warning rather than failing recovery.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SpoolError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SpoolError::Io(e.to_string()))?;
        }

        let mut next_seq = 0;
        let mut len = 0;

        if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| SpoolError::Io(e.to_string()))?;
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SpoolRecord>(line) {
                    Ok(record) => {
                        next_seq = next_seq.max(record.seq + 1);
                        len += 1;
                    }
                    Err(e) => {
                        log::warn!("skipping unreadable spool line: {e}");
                    }
                }
            }
        }

        Ok(Self {
            path,
            next_seq,
            len,
        })
    }

    /// Append a batch of entries. The whole batch is serialized before any
    /// bytes hit the file, so a serialization failure leaves the spool
    /// untouched.
    pub fn append(&mut self, entries: &[QueueEntry]) -> Result<(), SpoolError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut buffer = String::new();
        for (i, entry) in entries.iter().enumerate() {
            let record = SpoolRecord {
                seq: self.next_seq + i as u64,
                entry: entry.clone(),
            };
            let line =
                serde_json::to_string(&record).map_err(|e| SpoolError::Serialize(e.to_string()))?;
            buffer.push_str(&line);
            buffer.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SpoolError::Io(e.to_string()))?;
        file.write_all(buffer.as_bytes())
            .map_err(|e| SpoolError::Io(e.to_string()))?;
        file.flush().map_err(|e| SpoolError::Io(e.to_string()))?;

        self.next_seq += entries.len() as u64;
        self.len += entries.len();
        Ok(())
    }

    /// Read every entry currently in the spool, in append order.
    pub fn read_all(&self) -> Result<Vec<QueueEntry>, SpoolError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content =
            std::fs::read_to_string(&self.path).map_err(|e| SpoolError::Io(e.to_string()))?;
        let mut entries = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SpoolRecord>(line) {
                Ok(record) => entries.push(record.entry),
                Err(e) => log::warn!("skipping unreadable spool line: {e}"),
            }
        }
        Ok(entries)
    }

    /// Remove all entries after a confirmed delivery.
    ///
    /// Entries appended between the caller's `read_all` and this truncation
    /// are clipped without having been delivered. The agent's run loop
    /// serializes flushes so this cannot happen in-process, but a second
    /// writer on the same file would hit the window.
    pub fn clear(&mut self) -> Result<(), SpoolError> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| SpoolError::Io(e.to_string()))?;
        self.len = 0;
        Ok(())
    }

    /// Number of entries currently spooled.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Next sequence number that will be assigned.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
