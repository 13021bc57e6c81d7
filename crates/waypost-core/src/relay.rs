//! Ingest façade.
//!
//! The relay owns one position store and one subscriber hub: every accepted
//! batch is applied to the store and the resulting full snapshot is fanned
//! out to all subscribers.

use crate::hub::{BroadcastReport, SubscriberHub, Subscription};
use crate::message::Message;
use crate::store::{epoch_secs, PositionStore};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tracing::{debug, error};
use waypost_protocol::{codec, CollectBatch, PositionEntry, PositionsMessage, ProtocolError};

/// Result of applying one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Reports written to the store.
    pub applied: usize,
    /// Malformed entries skipped while decoding.
    pub skipped: usize,
    /// Fan-out of the snapshot that followed.
    pub broadcast: BroadcastReport,
}

/// Result of an inactivity sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    /// Players removed from the store.
    pub removed: usize,
    /// Fan-out of the snapshot that followed, if anything was removed.
    pub broadcast: Option<BroadcastReport>,
}

/// Shared position store plus subscriber hub.
#[derive(Default)]
pub struct Relay {
    store: PositionStore,
    hub: SubscriberHub,
    // Held from snapshot copy to hub broadcast so snapshots reach the hub
    // in the order they were taken.
    broadcast_order: Mutex<()>,
}

impl Relay {
    /// Create a relay with the default mailbox capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a relay whose subscribers get `mailbox_capacity` slots.
    #[must_use]
    pub fn with_mailbox_capacity(mailbox_capacity: usize) -> Self {
        Self {
            store: PositionStore::new(),
            hub: SubscriberHub::with_capacity(mailbox_capacity),
            broadcast_order: Mutex::new(()),
        }
    }

    /// The position store.
    #[must_use]
    pub fn store(&self) -> &PositionStore {
        &self.store
    }

    /// The subscriber hub.
    #[must_use]
    pub fn hub(&self) -> &SubscriberHub {
        &self.hub
    }

    /// Register a new stream subscriber.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// Apply a decoded batch, then broadcast the new snapshot.
    ///
    /// The broadcast happens even when the batch is empty. Broadcasting
    /// never waits on subscribers.
    pub fn ingest(&self, batch: CollectBatch) -> IngestOutcome {
        let skipped = batch.skipped;
        let applied = self.store.upsert(batch.reports);

        let broadcast = match self.broadcast_snapshot() {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Failed to encode snapshot");
                BroadcastReport::default()
            }
        };

        debug!(
            applied,
            skipped,
            delivered = broadcast.delivered,
            dropped = broadcast.dropped,
            "Ingested batch"
        );

        IngestOutcome {
            applied,
            skipped,
            broadcast,
        }
    }

    /// Current positions keyed by name.
    #[must_use]
    pub fn positions(&self) -> BTreeMap<String, PositionEntry> {
        self.store
            .snapshot()
            .into_iter()
            .map(|(name, record)| (name, record.entry()))
            .collect()
    }

    /// Current snapshot as a broadcast message.
    #[must_use]
    pub fn snapshot_message(&self) -> PositionsMessage {
        PositionsMessage::new(epoch_secs(SystemTime::now()), self.positions())
    }

    /// Current snapshot message, JSON encoded.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn snapshot_payload(&self) -> Result<Bytes, ProtocolError> {
        codec::encode_json(&self.snapshot_message())
    }

    /// Broadcast the current snapshot to every subscriber.
    ///
    /// Concurrent callers are serialized from snapshot copy to fan-out, so
    /// the last message every subscriber receives is the latest snapshot.
    /// Neither step waits on a subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be encoded; nothing is sent then.
    pub fn broadcast_snapshot(&self) -> Result<BroadcastReport, ProtocolError> {
        let _order = self
            .broadcast_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let payload = self.snapshot_payload()?;
        Ok(self.hub.broadcast(Message::new(payload)))
    }

    /// Drop players not updated within `max_age`.
    ///
    /// Subscribers get a fresh snapshot if anything was removed.
    pub fn evict_stale(&self, max_age: Duration) -> EvictionOutcome {
        let removed = self.store.evict_stale(max_age);
        if removed == 0 {
            return EvictionOutcome::default();
        }

        let broadcast = match self.broadcast_snapshot() {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Failed to encode snapshot");
                None
            }
        };

        EvictionOutcome { removed, broadcast }
    }
}
