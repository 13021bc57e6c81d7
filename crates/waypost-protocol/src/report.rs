//! Inbound position reports.
//!
//! A reporter posts `{"type":"players_pos","data":[{name,x,y,z}, ...]}`.
//! Entries are decoded one by one so a single bad entry never sinks the
//! rest of its batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message type tag shared by inbound batches and outbound snapshots.
pub const PLAYERS_POS: &str = "players_pos";

/// A single well-formed position report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    /// Player name, the store key.
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PositionReport {
    /// Create a report.
    #[must_use]
    pub fn new(name: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            z,
        }
    }

    /// Decode one entry of a batch.
    ///
    /// `name` may be a string or a number; coordinates may be numbers or
    /// numeric strings. Extra fields are ignored. Returns `None` for any
    /// entry that is not an object or lacks a usable field.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let entry = value.as_object()?;

        let name = match entry.get("name")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };

        Some(Self {
            name,
            x: coordinate(entry.get("x")?)?,
            y: coordinate(entry.get("y")?)?,
            z: coordinate(entry.get("z")?)?,
        })
    }
}

/// Coordinates must be finite: JSON has no representation for NaN or infinity.
fn coordinate(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// A decoded batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectBatch {
    /// Well-formed reports, in payload order.
    pub reports: Vec<PositionReport>,
    /// Number of entries dropped as malformed.
    pub skipped: usize,
}

impl CollectBatch {
    /// Check if the batch carries no usable report.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

impl FromIterator<PositionReport> for CollectBatch {
    fn from_iter<I: IntoIterator<Item = PositionReport>>(iter: I) -> Self {
        Self {
            reports: iter.into_iter().collect(),
            skipped: 0,
        }
    }
}
