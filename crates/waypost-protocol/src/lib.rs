//! # waypost-protocol
//!
//! Wire formats for the waypost position relay.
//!
//! Reporters push JSON batches of player positions, observers receive
//! full snapshots as Server-Sent Events. This crate holds both directions
//! and nothing else: no state, no I/O.
//!
//! ## Inbound
//!
//! - `decode_collect` - validate and decode a `players_pos` report batch
//!
//! ## Outbound
//!
//! - `PositionsMessage` - the full snapshot broadcast to observers
//! - `StreamFrame` - an SSE frame (`snapshot`, `positions` or a ping comment)
//!
//! ## Example
//!
//! ```rust
//! use waypost_protocol::{codec, StreamFrame};
//!
//! let body = br#"{"type":"players_pos","data":[{"name":"Alice","x":1,"y":2,"z":3}]}"#;
//! let batch = codec::decode_collect(body).unwrap();
//! assert_eq!(batch.reports.len(), 1);
//!
//! let frame = codec::encode_frame(&StreamFrame::Ping);
//! assert_eq!(&frame[..], b": ping\n\n");
//! ```

pub mod codec;
pub mod frames;
pub mod report;

pub use codec::{decode_collect, encode_frame, encode_json, ProtocolError};
pub use frames::{PositionEntry, PositionsMessage, StreamFrame};
pub use report::{CollectBatch, PositionReport, PLAYERS_POS};
