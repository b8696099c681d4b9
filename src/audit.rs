//! Append-only audit trail.
//!
//! Entries are never reordered or edited. Retention is unbounded unless a
//! cap is configured, in which case the oldest entries are dropped first.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub message: String,
}

struct AuditInner {
    entries: VecDeque<AuditEntry>,
    total_recorded: u64,
}

/// Shared, append-only audit log.
pub struct AuditLog {
    inner: Mutex<AuditInner>,
    max_entries: Option<usize>,
}

impl AuditLog {
    /// Unbounded log.
    pub fn new() -> Self {
        Self::with_retention(None)
    }

    /// Log that keeps at most `max_entries` entries when `Some`.
    pub fn with_retention(max_entries: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(AuditInner {
                entries: VecDeque::new(),
                total_recorded: 0,
            }),
            max_entries: max_entries.filter(|&n| n > 0),
        }
    }

    /// Append an entry and mirror it to the tracing stream.
    pub fn record(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "governance::audit", %message, "audit");
        let mut inner = self.inner.lock();
        inner.entries.push_back(AuditEntry {
            timestamp: Utc::now(),
            message,
        });
        inner.total_recorded += 1;
        if let Some(cap) = self.max_entries {
            while inner.entries.len() > cap {
                inner.entries.pop_front();
            }
        }
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Entries ever appended, including ones dropped by retention.
    pub fn total_recorded(&self) -> u64 {
        self.inner.lock().total_recorded
    }

    /// All retained entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        let inner = self.inner.lock();
        let skip = inner.entries.len().saturating_sub(n);
        inner.entries.iter().skip(skip).cloned().collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
