//! Integration tests for the waypost server.
//!
//! These tests start a real server on an ephemeral port and talk to it
//! over HTTP, including long-lived Server-Sent Events streams.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use waypost_protocol::{PositionReport, PositionsMessage};
use waypost_server::{serve, AppState, Config};

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    base: String,
    state: Arc<AppState>,
    client: reqwest::Client,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(tweak: impl FnOnce(&mut Config)) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut config = Config {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            endpoint: "/collect".to_string(),
            ..Config::default()
        };
        config.metrics.enabled = false;
        tweak(&mut config);

        let state = Arc::new(AppState::new(config));
        let task = tokio::spawn(serve(listener, Arc::clone(&state)));

        Self {
            base: format!("http://{addr}"),
            state,
            client: reqwest::Client::new(),
            task,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn collect(&self, body: impl Into<reqwest::Body>) -> (u16, String) {
        let response = self
            .client
            .post(self.url("/collect"))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.text().await.unwrap())
    }

    async fn positions(&self) -> Value {
        self.client
            .get(self.url("/api/positions"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn health(&self) -> Value {
        self.client
            .get(self.url("/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn open_stream(&self) -> SseReader {
        let response = self.client.get(self.url("/stream")).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let headers = response.headers();
        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");

        SseReader {
            response,
            buf: String::new(),
        }
    }
}

/// Splits a streaming response body into SSE frames.
struct SseReader {
    response: reqwest::Response,
    buf: String,
}

impl SseReader {
    /// Next raw frame, without its blank-line terminator. `None` at end of stream.
    async fn next_frame(&mut self) -> Option<String> {
        loop {
            if let Some(end) = self.buf.find("\n\n") {
                let frame = self.buf[..end].to_string();
                self.buf.drain(..end + 2);
                return Some(frame);
            }

            let chunk = tokio::time::timeout(FRAME_TIMEOUT, self.response.chunk())
                .await
                .expect("timed out waiting for a stream frame")
                .expect("stream read failed")?;
            self.buf.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }

    async fn expect_event(&mut self, event: &str) -> PositionsMessage {
        let frame = self.next_frame().await.expect("stream ended");
        let (head, data) = frame
            .split_once('\n')
            .unwrap_or_else(|| panic!("not an event frame: {frame:?}"));
        assert_eq!(head, format!("event: {event}"));
        let json = data.strip_prefix("data: ").unwrap();
        serde_json::from_str(json).unwrap()
    }
}

fn alice_body() -> &'static str {
    r#"{"type":"players_pos","data":[{"name":"Alice","x":1,"y":2,"z":3}]}"#
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_collect_then_snapshot() {
    let server = TestServer::start().await;

    assert_eq!(server.collect(alice_body()).await, (200, "ok".to_string()));

    let positions = server.positions().await;
    let alice = &positions["Alice"];
    assert_eq!(alice["x"], 1.0);
    assert_eq!(alice["y"], 2.0);
    assert_eq!(alice["z"], 3.0);

    let now = waypost_core::epoch_secs(SystemTime::now());
    let ts = alice["ts"].as_f64().unwrap();
    assert!(ts <= now && now - ts < 60.0, "stale ts {ts}");
}

#[tokio::test]
async fn test_wrong_type_is_rejected() {
    let server = TestServer::start().await;

    let (status, text) = server
        .collect(r#"{"type":"other","data":[{"name":"Alice","x":1,"y":2,"z":3}]}"#)
        .await;
    assert_eq!(status, 400);
    assert_eq!(text, "unexpected payload");
    assert_eq!(server.positions().await, json!({}));
}

#[tokio::test]
async fn test_invalid_json_is_rejected() {
    let server = TestServer::start().await;

    let (status, text) = server.collect("not json").await;
    assert_eq!(status, 400);
    assert_eq!(text, "invalid json");
    assert!(server.state.relay.store().is_empty());
}

#[tokio::test]
async fn test_partial_batch_is_accepted() {
    let server = TestServer::start().await;

    let body = json!({
        "type": "players_pos",
        "data": [
            {"name": "Alice", "x": 1, "y": 2, "z": 3},
            {"name": "Ghost", "x": "here", "y": 0, "z": 0},
            {"name": "Bob", "x": 4, "y": 5, "z": 6, "hp": 20},
        ],
    });
    let (status, _) = server.collect(body.to_string()).await;
    assert_eq!(status, 200);

    let positions = server.positions().await;
    let names: Vec<&String> = positions.as_object().unwrap().keys().collect();
    assert_eq!(names, ["Alice", "Bob"]);
}

#[tokio::test]
async fn test_non_array_data_is_a_noop() {
    let server = TestServer::start().await;

    let (status, text) = server.collect(r#"{"type":"players_pos","data":{"a":1}}"#).await;
    assert_eq!((status, text.as_str()), (200, "ok"));
    assert!(server.state.relay.store().is_empty());
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(server.url("/elsewhere"))
        .body(alice_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert!(server.state.relay.store().is_empty());
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let server = TestServer::start_with(|config| config.limits.max_body_bytes = 64).await;

    let (status, _) = server.collect(vec![b' '; 4096]).await;
    assert_eq!(status, 413);
}

#[tokio::test]
async fn test_custom_endpoint() {
    let server = TestServer::start_with(|config| config.endpoint = "/luanti".to_string()).await;

    let response = server
        .client
        .post(server.url("/luanti"))
        .body(alice_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let (status, _) = server.collect(alice_body()).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_stream_greets_with_snapshot() {
    let server = TestServer::start().await;
    server.collect(alice_body()).await;

    let mut stream = server.open_stream().await;
    let greeting = stream.expect_event("snapshot").await;
    assert_eq!(greeting.kind, "players_pos");
    assert_eq!(greeting.data["Alice"].z, 3.0);
}

#[tokio::test]
async fn test_two_subscribers_receive_identical_frames() {
    let server = TestServer::start().await;

    let mut first = server.open_stream().await;
    let mut second = server.open_stream().await;
    first.expect_event("snapshot").await;
    second.expect_event("snapshot").await;
    assert_eq!(server.state.relay.hub().subscriber_count(), 2);

    server.collect(alice_body()).await;

    let a = first.next_frame().await.unwrap();
    let b = second.next_frame().await.unwrap();
    assert!(a.starts_with("event: positions\ndata: "), "{a:?}");
    assert_eq!(a, b);

    let update: PositionsMessage = serde_json::from_str(&a["event: positions\ndata: ".len()..]).unwrap();
    assert_eq!(update.data["Alice"].x, 1.0);
}

#[tokio::test]
async fn test_keepalive_ping() {
    let server = TestServer::start_with(|config| config.stream.keepalive_secs = 1).await;

    let mut stream = server.open_stream().await;
    stream.expect_event("snapshot").await;
    assert_eq!(stream.next_frame().await.unwrap(), ": ping");

    server.collect(alice_body()).await;
    stream.expect_event("positions").await;
}

#[tokio::test]
async fn test_disconnect_unsubscribes() {
    let server = TestServer::start().await;

    let mut stream = server.open_stream().await;
    stream.expect_event("snapshot").await;
    assert_eq!(server.state.relay.hub().subscriber_count(), 1);
    drop(stream);

    // Broadcasts force writes, so the server notices the closed socket.
    let mut gone = false;
    for _ in 0..50 {
        server.collect(alice_body()).await;
        if server.state.relay.hub().subscriber_count() == 0 {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(gone, "subscriber leaked after disconnect");
}

#[tokio::test]
async fn test_shutdown_ends_streams() {
    let server = TestServer::start().await;

    let mut stream = server.open_stream().await;
    stream.expect_event("snapshot").await;

    server.state.shutdown.cancel();
    assert_eq!(stream.next_frame().await, None);

    let state = Arc::clone(&server.state);
    assert!(wait_until(|| state.relay.hub().subscriber_count() == 0).await);

    tokio::time::timeout(FRAME_TIMEOUT, server.task)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_evict_inactive_players() {
    let server = TestServer::start().await;
    server.collect(alice_body()).await;
    server.state.relay.store().upsert_at(
        vec![PositionReport::new("Idle", 0.0, 0.0, 0.0)],
        SystemTime::now() - Duration::from_secs(600),
    );

    let mut stream = server.open_stream().await;
    stream.expect_event("snapshot").await;

    let removed: Value = server
        .client
        .delete(server.url("/api/positions?older_than=60"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(removed, json!({"removed": 1}));

    let update = stream.expect_event("positions").await;
    assert!(update.data.contains_key("Alice"));
    assert!(!update.data.contains_key("Idle"));

    let response = server
        .client
        .delete(server.url("/api/positions?older_than=-5"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start_with(|config| config.stream.mailbox_capacity = 7).await;
    server.collect(alice_body()).await;

    let health = server.health().await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["players"], 1);
    assert_eq!(health["subscribers"], 0);
    assert_eq!(health["mailbox_capacity"], 7);
    assert_eq!(health["broadcasts"], 1);
}

#[tokio::test]
async fn test_health_reports_closed_hub() {
    let server = TestServer::start().await;
    server.state.relay.hub().close_all();

    let health = server.health().await;
    assert_eq!(health["status"], "shutting_down");
}
