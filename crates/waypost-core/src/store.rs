//! In-memory position table.
//!
//! One record per player name, last write wins by arrival order. All access
//! goes through a single mutex held only for the map operation itself.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};
use waypost_protocol::{PositionEntry, PositionReport};

/// Seconds since the Unix epoch, as a float.
#[must_use]
pub fn epoch_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Last known position of a player.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRecord {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Server time the report arrived.
    pub updated_at: SystemTime,
}

impl PositionRecord {
    /// Wire representation of this record.
    #[must_use]
    pub fn entry(&self) -> PositionEntry {
        PositionEntry {
            x: self.x,
            y: self.y,
            z: self.z,
            ts: epoch_secs(self.updated_at),
        }
    }
}

/// A point-in-time copy of the store, ordered by name.
pub type Snapshot = BTreeMap<String, PositionRecord>;

/// Concurrent name → position table.
#[derive(Debug, Default)]
pub struct PositionStore {
    records: Mutex<HashMap<String, PositionRecord>>,
}

impl PositionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked players.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no player is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Record a batch of reports, stamped with the current time.
    ///
    /// Returns the number of records written.
    pub fn upsert<I>(&self, reports: I) -> usize
    where
        I: IntoIterator<Item = PositionReport>,
    {
        self.upsert_at(reports, SystemTime::now())
    }

    /// Record a batch of reports with an explicit arrival time.
    ///
    /// Every report of the batch shares `now`; a later report for the same
    /// name, in this batch or a later one, overwrites the earlier one.
    pub fn upsert_at<I>(&self, reports: I, now: SystemTime) -> usize
    where
        I: IntoIterator<Item = PositionReport>,
    {
        let mut records = self.lock();
        let mut written = 0;

        for report in reports {
            trace!(player = %report.name, x = report.x, y = report.y, z = report.z, "Upsert");
            let record = PositionRecord {
                name: report.name.clone(),
                x: report.x,
                y: report.y,
                z: report.z,
                updated_at: now,
            };
            records.insert(report.name, record);
            written += 1;
        }

        written
    }

    /// Copy the current contents.
    ///
    /// The copy is taken under the lock, so it never contains a partially
    /// applied batch.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.lock()
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect()
    }

    /// Remove every record last updated strictly before `cutoff`.
    ///
    /// Returns the number of records removed.
    pub fn evict_older_than(&self, cutoff: SystemTime) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| record.updated_at >= cutoff);
        let removed = before - records.len();

        if removed > 0 {
            debug!(removed, remaining = records.len(), "Evicted stale players");
        }
        removed
    }

    /// Remove every record not updated within `max_age`.
    pub fn evict_stale(&self, max_age: Duration) -> usize {
        match SystemTime::now().checked_sub(max_age) {
            Some(cutoff) => self.evict_older_than(cutoff),
            None => 0,
        }
    }

    // A panic while holding the lock cannot leave a record half-written:
    // inserts and removals are single map operations.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PositionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
