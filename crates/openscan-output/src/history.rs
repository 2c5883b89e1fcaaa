//! Bounded in-memory scan history.

use openscan_core::ScanRecord;
use std::collections::VecDeque;
use std::sync::Mutex;

/// The most recent delivered scans, oldest evicted first.
#[derive(Debug)]
pub struct ScanHistory {
    limit: usize,
    entries: Mutex<VecDeque<ScanRecord>>,
}

impl ScanHistory {
    /// Create a history keeping at most `limit` entries (at least one).
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            entries: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    /// Capacity.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Append a record, evicting the oldest beyond the cap.
    pub fn push(&self, record: ScanRecord) {
        let mut entries = self.entries.lock().expect("acquire history lock");
        entries.push_back(record);
        while entries.len() > self.limit {
            entries.pop_front();
        }
    }

    /// Up to `limit` records, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<ScanRecord> {
        let entries = self.entries.lock().expect("acquire history lock");
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("acquire history lock").len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ScanHistory {
    fn default() -> Self {
        Self::new(100)
    }
}
