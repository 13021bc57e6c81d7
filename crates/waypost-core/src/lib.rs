//! # waypost-core
//!
//! State and fan-out for the waypost position relay.
//!
//! - **PositionStore** - last known position per player, snapshot reads
//! - **SubscriberHub** - bounded per-subscriber mailboxes, drop-on-full broadcast
//! - **Relay** - ingest façade tying the store to the hub
//! - **StreamSession** - one observer's connect/stream/close lifecycle
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────────┐     ┌───────────────┐
//! │   Reporter  │────▶│     Relay     │────▶│ PositionStore │
//! └─────────────┘     └───────────────┘     └───────────────┘
//!                             │ snapshot
//!                             ▼
//!                     ┌───────────────┐     ┌───────────────┐
//!                     │ SubscriberHub │────▶│ StreamSession │ × N
//!                     └───────────────┘     └───────────────┘
//! ```

pub mod hub;
pub mod message;
pub mod relay;
pub mod session;
pub mod store;

pub use hub::{BroadcastReport, HubStats, SubscriberHub, SubscriberId, Subscription};
pub use message::Message;
pub use relay::{EvictionOutcome, IngestOutcome, Relay};
pub use session::{SessionState, StreamSession};
pub use store::{epoch_secs, PositionRecord, PositionStore, Snapshot};
