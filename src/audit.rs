//! Audit log
//!
//! Append-only in-memory record of every relayed message and its sender,
//! kept for diagnostics. Nothing consumes it besides an on-demand dump,
//! and it is never pruned.

use std::io::{self, Write};

use parking_lot::Mutex;
use serde::Serialize;

use crate::types::{ConnectionId, Message};

/// One relayed message
#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// Arrival order at the broadcaster, starting at 0
    pub sequence: u64,
    pub sender: ConnectionId,
    pub message: Message,
}

#[derive(Serialize)]
struct AuditRecord {
    sequence: u64,
    sender: String,
    message: String,
}

impl From<&AuditEntry> for AuditRecord {
    fn from(entry: &AuditEntry) -> Self {
        Self {
            sequence: entry.sequence,
            sender: entry.sender.to_string(),
            message: String::from_utf8_lossy(&entry.message).into_owned(),
        }
    }
}

#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one relayed message; sequence numbers follow append order
    pub fn append(&self, message: Message, sender: ConnectionId) {
        let mut entries = self.entries.lock();
        let sequence = entries.len() as u64;
        entries.push(AuditEntry {
            sequence,
            sender,
            message,
        });
    }

    /// Number of recorded messages
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all entries in arrival order
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Write a human-readable dump. The lock is released before any output.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let entries = self.entries();
        writeln!(out, "Message Queue Size: {}", entries.len())?;
        for entry in &entries {
            writeln!(out, "{}", String::from_utf8_lossy(&entry.message))?;
            writeln!(out, "Sender: {}", entry.sender)?;
        }
        Ok(())
    }

    /// Dump to standard output
    pub fn print(&self) -> io::Result<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.write_to(&mut out)?;
        out.flush()
    }

    /// Render as a JSON array of `{sequence, sender, message}` objects.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let records: Vec<AuditRecord> = self.entries().iter().map(AuditRecord::from).collect();
        serde_json::to_string_pretty(&records)
    }
}
