//! Outbound messages and stream frames.
//!
//! Observers always receive a complete snapshot rather than a delta, so a
//! missed broadcast is superseded by the next one.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::report::PLAYERS_POS;

/// Last known position of one player, as exported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Arrival time of the last report, Unix epoch seconds.
    pub ts: f64,
}

/// Full snapshot broadcast to every stream subscriber.
///
/// Serialized as `{"type":"players_pos","t":<epoch secs>,"data":{name:{x,y,z,ts}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionsMessage {
    /// Message type tag, always `players_pos`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Time the snapshot was taken, Unix epoch seconds.
    pub t: f64,
    /// Positions keyed by player name, in name order.
    pub data: BTreeMap<String, PositionEntry>,
}

impl PositionsMessage {
    /// Create a snapshot message.
    #[must_use]
    pub fn new(t: f64, data: BTreeMap<String, PositionEntry>) -> Self {
        Self {
            kind: PLAYERS_POS.to_string(),
            t,
            data,
        }
    }
}

/// A Server-Sent Events frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Initial snapshot sent right after a stream opens.
    Snapshot(Bytes),
    /// Snapshot relayed from a broadcast.
    Positions(Bytes),
    /// Keep-alive comment.
    Ping,
}

impl StreamFrame {
    /// SSE event name, `None` for comment frames.
    #[must_use]
    pub fn event(&self) -> Option<&'static str> {
        match self {
            StreamFrame::Snapshot(_) => Some("snapshot"),
            StreamFrame::Positions(_) => Some("positions"),
            StreamFrame::Ping => None,
        }
    }

    /// JSON payload, `None` for comment frames.
    #[must_use]
    pub fn data(&self) -> Option<&Bytes> {
        match self {
            StreamFrame::Snapshot(data) | StreamFrame::Positions(data) => Some(data),
            StreamFrame::Ping => None,
        }
    }
}
