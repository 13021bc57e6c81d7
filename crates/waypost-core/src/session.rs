//! Per-observer stream session.
//!
//! A session moves `Connecting → Streaming → Closed`. While streaming it
//! relays hub messages in order and emits a keep-alive after each idle
//! period. Its subscription is released on every path into `Closed`,
//! including being dropped mid-wait.

use crate::hub::{SubscriberId, Subscription};
use crate::relay::Relay;
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use waypost_protocol::StreamFrame;

/// Default idle time before a keep-alive is sent.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(15);

/// Lifecycle state of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Closed,
}

enum Wake {
    Message(Bytes),
    Idle,
    Closed,
}

/// One observer's subscription to the relay.
pub struct StreamSession {
    state: SessionState,
    subscription: Option<Subscription>,
    greeting: Option<Bytes>,
    keepalive: Duration,
    shutdown: CancellationToken,
}

impl StreamSession {
    /// Subscribe to `relay` and enter `Streaming`.
    ///
    /// The subscription is registered before the greeting snapshot is taken,
    /// so no broadcast can fall between the two.
    #[must_use]
    pub fn connect(relay: &Relay, keepalive: Duration, shutdown: CancellationToken) -> Self {
        let mut session = Self {
            state: SessionState::Connecting,
            subscription: None,
            greeting: None,
            keepalive,
            shutdown,
        };

        let subscription = relay.subscribe();
        session.greeting = match relay.snapshot_payload() {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(error = %e, "Failed to encode greeting snapshot");
                None
            }
        };

        debug!(subscriber = subscription.id(), "Stream connected");
        session.subscription = Some(subscription);
        session.state = SessionState::Streaming;
        session
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Hub identifier while streaming.
    #[must_use]
    pub fn subscriber_id(&self) -> Option<SubscriberId> {
        self.subscription.as_ref().map(Subscription::id)
    }

    /// Wait for the next frame to send.
    ///
    /// Yields the greeting snapshot first, then one `Positions` frame per
    /// broadcast or a `Ping` after `keepalive` without one. Returns `None`
    /// once the session is closed by shutdown or by the hub.
    pub async fn next_frame(&mut self) -> Option<StreamFrame> {
        if self.state != SessionState::Streaming {
            return None;
        }
        if let Some(payload) = self.greeting.take() {
            return Some(StreamFrame::Snapshot(payload));
        }

        let Some(subscription) = self.subscription.as_mut() else {
            self.close();
            return None;
        };

        let wake = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Wake::Closed,
            received = tokio::time::timeout(self.keepalive, subscription.recv()) => match received {
                Ok(Some(message)) => Wake::Message(message.payload),
                Ok(None) => Wake::Closed,
                Err(_) => Wake::Idle,
            },
        };

        match wake {
            Wake::Message(payload) => Some(StreamFrame::Positions(payload)),
            Wake::Idle => Some(StreamFrame::Ping),
            Wake::Closed => {
                self.close();
                None
            }
        }
    }

    /// Release the subscription and enter `Closed`. Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.greeting = None;

        if let Some(subscription) = self.subscription.take() {
            debug!(subscriber = subscription.id(), "Stream closed");
            subscription.unsubscribe();
        }
    }

    /// Turn the session into a stream of frames ending at `Closed`.
    pub fn into_stream(self) -> impl Stream<Item = StreamFrame> + Send {
        stream::unfold(self, |mut session| async move {
            let frame = session.next_frame().await?;
            Some((frame, session))
        })
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}
