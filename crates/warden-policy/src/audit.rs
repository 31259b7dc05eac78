//! Bounded in-memory audit ring.
//!
//! Holds the most recent entries (1000 by default); older entries are
//! discarded as new ones arrive. Nothing is persisted — the trail is lost
//! on restart by design. One mutex guards the ring; each admission produces
//! at most one entry so contention stays negligible.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::debug;

use warden_types::audit::AuditEntry;

/// Default ring capacity.
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

/// Fixed-capacity ring of recent audit entries.
#[derive(Debug)]
pub struct AuditRing {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl Default for AuditRing {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditRing {
    /// A ring holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    /// Append one entry, evicting the oldest when full.
    pub fn record(&self, entry: AuditEntry) {
        let mut entries = self.entries.lock().expect("audit ring lock poisoned");
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        debug!(
            server = %entry.server,
            tool = %entry.tool,
            outcome = ?entry.outcome,
            "audit entry recorded"
        );
        entries.push_back(entry);
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock().expect("audit ring lock poisoned");
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("audit ring lock poisoned").len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all retained entries.
    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("audit ring lock poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;
    use warden_types::audit::AuditOutcome;

    fn entry(tool: &str) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            runtime_tag: "python".to_string(),
            server: "memory".to_string(),
            tool: tool.to_string(),
            params: json!({}),
            outcome: AuditOutcome::Success,
            reason: None,
            duration_ms: Some(1),
        }
    }

    #[test]
    fn ring_evicts_oldest_beyond_capacity() {
        let ring = AuditRing::new(3);
        for i in 0..5 {
            ring.record(entry(&format!("tool-{i}")));
        }
        assert_eq!(ring.len(), 3);
        let recent = ring.recent(10);
        let names: Vec<&str> = recent.iter().map(|e| e.tool.as_str()).collect();
        assert_eq!(names, vec!["tool-2", "tool-3", "tool-4"]);
    }

    #[test]
    fn recent_returns_newest_slice_oldest_first() {
        let ring = AuditRing::new(10);
        for i in 0..4 {
            ring.record(entry(&format!("tool-{i}")));
        }
        let last_two = ring.recent(2);
        assert_eq!(last_two[0].tool, "tool-2");
        assert_eq!(last_two[1].tool, "tool-3");
    }

    #[test]
    fn clear_empties_the_ring() {
        let ring = AuditRing::default();
        ring.record(entry("store_memory"));
        assert!(!ring.is_empty());
        ring.clear();
        assert!(ring.is_empty());
    }
}
