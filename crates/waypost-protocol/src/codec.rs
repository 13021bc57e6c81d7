//! Codec for waypost payloads.
//!
//! Inbound batches are JSON; outbound frames are Server-Sent Events text
//! wrapping JSON snapshots.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::frames::StreamFrame;
use crate::report::{CollectBatch, PositionReport, PLAYERS_POS};

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload is not valid JSON.
    #[error("Invalid JSON: {0}")]
    BadEncoding(#[source] serde_json::Error),

    /// Payload is JSON but not a `players_pos` object.
    #[error("Unexpected payload: {0}")]
    UnexpectedSchema(&'static str),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Decode a report batch.
///
/// A `data` field that is missing, `null` or not an array yields an empty
/// batch. Malformed entries are skipped and counted.
///
/// # Errors
///
/// Returns `BadEncoding` if the payload does not parse, `UnexpectedSchema`
/// if it is not an object tagged `"type": "players_pos"`.
pub fn decode_collect(data: &[u8]) -> Result<CollectBatch, ProtocolError> {
    let value: Value = serde_json::from_slice(data).map_err(ProtocolError::BadEncoding)?;

    let Value::Object(mut root) = value else {
        return Err(ProtocolError::UnexpectedSchema("payload is not an object"));
    };

    match root.get("type") {
        Some(Value::String(kind)) if kind == PLAYERS_POS => {}
        _ => return Err(ProtocolError::UnexpectedSchema("type is not players_pos")),
    }

    let entries = match root.remove("data") {
        Some(Value::Array(entries)) => entries,
        _ => Vec::new(),
    };

    let mut batch = CollectBatch::default();
    for entry in &entries {
        match PositionReport::from_value(entry) {
            Some(report) => batch.reports.push(report),
            None => batch.skipped += 1,
        }
    }

    Ok(batch)
}

/// Serialize a value to compact JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(ProtocolError::Encode)
}

/// Encode a frame as Server-Sent Events text.
///
/// Event frames become `event: <name>\ndata: <json>\n\n`, the keep-alive
/// becomes the comment `: ping\n\n`.
#[must_use]
pub fn encode_frame(frame: &StreamFrame) -> Bytes {
    let (Some(event), Some(data)) = (frame.event(), frame.data()) else {
        return Bytes::from_static(b": ping\n\n");
    };

    let mut buf = BytesMut::with_capacity(event.len() + data.len() + 16);
    buf.put_slice(b"event: ");
    buf.put_slice(event.as_bytes());
    buf.put_u8(b'\n');
    // One data line per payload line; compact JSON has none.
    for line in data.split(|b| *b == b'\n') {
        buf.put_slice(b"data: ");
        buf.put_slice(line);
        buf.put_u8(b'\n');
    }
    buf.put_u8(b'\n');

    buf.freeze()
}
