mod helpers;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use helpers::{test_config, FakeCamera, RecordingNotifier, RecordingSpeaker};
use memlens::config::MemlensConfig;
use memlens::runtime::{ScanHandle, ScanRuntime};
use memlens::scanner::detection::ScanPhase;
use memlens::scanner::{AppState, ConnectionState, ScanSnapshot};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct ServerReport {
    uri: String,
    images: usize,
    pings: usize,
    close: Option<(u16, String)>,
}

async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut uri = String::new();
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            uri = req.uri().to_string();
            Ok(resp)
        },
    )
    .await
    .unwrap();
    (ws, uri)
}

/// Serve one connection until the client closes. The n-th image is answered
/// with `replies[n]`; once they run out the last reply repeats.
async fn serve(
    mut ws: WebSocketStream<TcpStream>,
    uri: String,
    replies: Vec<serde_json::Value>,
) -> ServerReport {
    let mut report = ServerReport {
        uri,
        ..ServerReport::default()
    };
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                match value["type"].as_str() {
                    Some("image") => {
                        let image = value["image"].as_str().unwrap_or_default();
                        assert!(image.starts_with("data:image/jpeg;base64,"));
                        let reply = &replies[report.images.min(replies.len() - 1)];
                        report.images += 1;
                        let _ = ws.send(Message::Text(reply.to_string())).await;
                    }
                    Some("ping") => {
                        report.pings += 1;
                        let pong = json!({ "type": "pong", "timestamp": value["timestamp"] });
                        let _ = ws.send(Message::Text(pong.to_string())).await;
                    }
                    _ => {}
                }
            }
            Ok(Message::Close(frame)) => {
                report.close = frame.map(|f| (u16::from(f.code), f.reason.to_string()));
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    report
}

async fn spawn_server(reply: serde_json::Value) -> (String, JoinHandle<ServerReport>) {
    spawn_server_with(vec![reply]).await
}

async fn spawn_server_with(replies: Vec<serde_json::Value>) -> (String, JoinHandle<ServerReport>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws/face-recognition/", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let (mut ws, uri) = accept(&listener).await;
        let hello = json!({ "type": "connection_established", "message": "Connected" });
        ws.send(Message::Text(hello.to_string())).await.unwrap();
        serve(ws, uri, replies).await
    });
    (url, server)
}

fn identified(name: &str) -> serde_json::Value {
    json!({
        "type": "face_detection_result",
        "identified_people": [{ "person_name": name, "confidence": "93.10%" }],
        "message": "Face identification completed",
    })
}

fn alice() -> serde_json::Value {
    identified("Alice")
}

struct Client {
    handle: ScanHandle,
    task: JoinHandle<anyhow::Result<()>>,
    speaker: Arc<RecordingSpeaker>,
    notifier: Arc<RecordingNotifier>,
}

fn start(config: MemlensConfig, camera: FakeCamera) -> Client {
    let speaker = Arc::new(RecordingSpeaker::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let (runtime, handle) = ScanRuntime::new(
        Arc::new(config),
        Arc::new(camera),
        speaker.clone(),
        notifier.clone(),
    );
    Client {
        handle,
        task: tokio::spawn(runtime.run()),
        speaker,
        notifier,
    }
}

impl Client {
    async fn wait_until(&self, what: &str, predicate: impl FnMut(&ScanSnapshot) -> bool) {
        let mut snapshots = self.handle.subscribe();
        tokio::time::timeout(WAIT, snapshots.wait_for(predicate))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
            .expect("runtime stopped");
    }

    async fn stop(self) {
        self.handle.shutdown().await.unwrap();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("runtime did not stop")
            .unwrap()
            .unwrap();
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn detection_pauses_scanning_and_announces_once() {
    let (url, server) = spawn_server(alice()).await;
    let mut config = test_config(&url);
    config.scan.throttle_ms = 400;
    let client = start(config, FakeCamera::vga());

    client
        .wait_until("connected with camera", |s| {
            s.connection == ConnectionState::Connected && s.camera_ready
        })
        .await;
    assert_eq!(client.handle.snapshot().status_line, "Ready");

    client.handle.toggle_scan().await.unwrap();
    client
        .wait_until("Alice", |s| s.detected_name.as_deref() == Some("Alice"))
        .await;
    let snapshot = client.handle.snapshot();
    assert!(!snapshot.scanning);
    assert_eq!(snapshot.phase, ScanPhase::Detected);
    assert_eq!(snapshot.status_line, "Alice");

    let speaker = client.speaker.clone();
    eventually("announcement", || !speaker.spoken().is_empty()).await;
    assert_eq!(speaker.spoken(), ["Alice"]);
    assert!(client.notifier.titles().is_empty());

    client.stop().await;
    let report = server.await.unwrap();
    assert!(report.uri.contains("token=uid-test"));
    assert!(report.images >= 1);
    assert_eq!(report.close, Some((1000, "App closing".to_string())));
}

#[tokio::test]
async fn continue_resumes_scanning() {
    let (url, server) = spawn_server(alice()).await;
    let mut config = test_config(&url);
    config.scan.throttle_ms = 1000;
    let client = start(config, FakeCamera::vga());

    client
        .wait_until("connected with camera", |s| {
            s.connection == ConnectionState::Connected && s.camera_ready
        })
        .await;
    client.handle.toggle_scan().await.unwrap();
    client
        .wait_until("detection", |s| s.phase == ScanPhase::Detected)
        .await;

    client.handle.resume().await.unwrap();
    client
        .wait_until("scanning again", |s| s.scanning && s.detected_name.is_none())
        .await;

    // background stops scanning without dropping the channel
    client
        .handle
        .set_app_state(AppState::Background)
        .await
        .unwrap();
    client
        .wait_until("background stop", |s| !s.scanning)
        .await;
    assert_eq!(
        client.handle.snapshot().connection,
        ConnectionState::Connected
    );

    client.stop().await;
    let report = server.await.unwrap();
    assert!(report.images >= 1);
}

#[tokio::test]
async fn new_person_after_continue_interrupts_speech() {
    let (url, server) = spawn_server_with(vec![alice(), identified("Bob")]).await;
    let client = start(test_config(&url), FakeCamera::vga());

    client
        .wait_until("connected with camera", |s| {
            s.connection == ConnectionState::Connected && s.camera_ready
        })
        .await;
    client.handle.toggle_scan().await.unwrap();
    client
        .wait_until("Alice", |s| s.detected_name.as_deref() == Some("Alice"))
        .await;
    let speaker = client.speaker.clone();
    eventually("Alice announced", || speaker.spoken().len() == 1).await;
    let stops_before_bob = speaker.stops();

    client.handle.resume().await.unwrap();
    client
        .wait_until("Bob", |s| s.detected_name.as_deref() == Some("Bob"))
        .await;
    eventually("Bob announced", || speaker.spoken().len() == 2).await;

    assert_eq!(speaker.spoken(), ["Alice", "Bob"]);
    assert!(speaker.stops() > stops_before_bob);
    // speech in progress is cancelled before the next name is spoken
    let calls = speaker.calls();
    let alice_at = calls.iter().position(|c| c == "speak:Alice").unwrap();
    let bob_at = calls.iter().position(|c| c == "speak:Bob").unwrap();
    assert_eq!(calls[bob_at - 1], "stop");
    assert!(bob_at - 1 > alice_at);

    client.stop().await;
    let report = server.await.unwrap();
    assert!(report.images >= 2);
}

#[tokio::test]
async fn critical_server_error_stops_scanning() {
    let reply = json!({ "type": "error", "message": "Recognition model unavailable", "critical": true });
    let (url, server) = spawn_server(reply).await;
    let client = start(test_config(&url), FakeCamera::vga());

    client
        .wait_until("connected with camera", |s| {
            s.connection == ConnectionState::Connected && s.camera_ready
        })
        .await;
    client.handle.toggle_scan().await.unwrap();
    client.wait_until("scanning", |s| s.scanning).await;
    client.wait_until("stopped", |s| !s.scanning).await;

    let notifier = client.notifier.clone();
    eventually("alert", || !notifier.titles().is_empty()).await;
    assert_eq!(notifier.titles(), ["Server Error"]);
    assert!(client.speaker.spoken().is_empty());

    client.stop().await;
    server.await.unwrap();
}

#[tokio::test]
async fn reconnects_after_server_drops_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws/face-recognition/", listener.local_addr().unwrap());
    let (second_tx, second_rx) = tokio::sync::oneshot::channel();
    let server = tokio::spawn(async move {
        let (first, _) = accept(&listener).await;
        // vanish without a close handshake
        drop(first);
        let (second, uri) = accept(&listener).await;
        let _ = second_tx.send(());
        serve(second, uri, vec![alice()]).await
    });

    let client = start(test_config(&url), FakeCamera::vga());
    tokio::time::timeout(WAIT, second_rx)
        .await
        .expect("no reconnect")
        .unwrap();
    client
        .wait_until("reconnected", |s| {
            s.connection == ConnectionState::Connected && s.retry_attempts == 0 && s.camera_ready
        })
        .await;

    // the second connection is the live one
    client.handle.toggle_scan().await.unwrap();
    client
        .wait_until("Alice", |s| s.detected_name.as_deref() == Some("Alice"))
        .await;

    client.stop().await;
    let report = server.await.unwrap();
    assert_eq!(report.close, Some((1000, "App closing".to_string())));
}

#[tokio::test]
async fn unreachable_service_alerts_once_and_keeps_retrying() {
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let mut config = test_config(&format!("ws://127.0.0.1:{port}/ws/face-recognition/"));
    config.reconnect.base_delay_ms = 20;
    config.reconnect.max_delay_ms = 40;
    let client = start(config, FakeCamera::vga());

    client
        .wait_until("retries", |s| s.retry_attempts >= 3)
        .await;
    assert_eq!(client.notifier.titles(), ["Connection Error"]);

    // scanning cannot start while disconnected
    client.handle.toggle_scan().await.unwrap();
    let notifier = client.notifier.clone();
    eventually("guidance", || notifier.titles().len() >= 2).await;
    assert_eq!(notifier.titles()[1], "Not Connected");
    assert!(!client.handle.snapshot().scanning);

    client.stop().await;
}

#[tokio::test]
async fn denied_camera_blocks_scanning() {
    let (url, server) = spawn_server(alice()).await;
    let client = start(test_config(&url), FakeCamera::denied());

    client
        .wait_until("connected", |s| s.connection == ConnectionState::Connected)
        .await;
    let notifier = client.notifier.clone();
    eventually("permission alert", || !notifier.titles().is_empty()).await;
    assert_eq!(notifier.titles()[0], "Camera Permission");

    client.handle.toggle_scan().await.unwrap();
    eventually("guidance", || notifier.titles().len() >= 2).await;
    assert_eq!(notifier.titles()[1], "Camera Not Ready");
    let snapshot = client.handle.snapshot();
    assert!(!snapshot.scanning);
    assert_eq!(snapshot.status_line, "Initializing camera…");

    client.stop().await;
    let report = server.await.unwrap();
    assert_eq!(report.images, 0);
}

#[tokio::test]
async fn disconnect_closes_normally_without_reconnecting() {
    let (url, server) = spawn_server(alice()).await;
    let client = start(test_config(&url), FakeCamera::vga());
    client
        .wait_until("connected", |s| s.connection == ConnectionState::Connected)
        .await;

    client.handle.disconnect().await.unwrap();
    client
        .wait_until("disconnected", |s| s.connection == ConnectionState::Disconnected)
        .await;
    let report = tokio::time::timeout(WAIT, server)
        .await
        .expect("server never saw the close")
        .unwrap();
    assert_eq!(report.close, Some((1000, "Disconnect requested".to_string())));

    // well past the 50 ms base backoff: still down, no retry counted
    tokio::time::sleep(Duration::from_millis(300)).await;
    let snapshot = client.handle.snapshot();
    assert_eq!(snapshot.connection, ConnectionState::Disconnected);
    assert_eq!(snapshot.retry_attempts, 0);
    assert!(client.notifier.titles().is_empty());

    client.stop().await;
}

#[tokio::test]
async fn keepalive_pings_reach_the_service() {
    let (url, server) = spawn_server(alice()).await;
    let mut config = test_config(&url);
    config.scan.keepalive_secs = 1;
    let client = start(config, FakeCamera::vga());

    client
        .wait_until("connected", |s| s.connection == ConnectionState::Connected)
        .await;
    tokio::time::sleep(Duration::from_millis(1500)).await;

    client.stop().await;
    let report = server.await.unwrap();
    assert!(report.pings >= 1);
}
