//! Broadcast server tests over real loopback sockets.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use keystats_core::{KeyInfo, KeyLayout};
use keystats_overlay::application::layout_slot::LayoutSlot;
use keystats_overlay::application::stats_handle::StatsHandle;
use keystats_overlay::infrastructure::http::{BroadcastServer, ServerSettings};

const WAIT: Duration = Duration::from_secs(5);

async fn start_server() -> (BroadcastServer, StatsHandle, SocketAddr) {
    let stats = StatsHandle::default();
    let layout = LayoutSlot::new(
        KeyLayout::new(
            "test",
            vec![KeyInfo::new(65, "A", 0.0, 0.0), KeyInfo::new(66, "B", 0.0, 1.0)],
        )
        .unwrap(),
    );
    let settings = ServerSettings {
        push_interval: Duration::from_millis(5),
        ..ServerSettings::default()
    };
    let server = BroadcastServer::new(stats.clone(), layout, settings);
    let addr = server.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
    (server, stats, addr)
}

/// Sends `request` and reads until the server closes.
async fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut response))
        .await
        .expect("server must close the connection")
        .unwrap();
    response
}

fn get(path: &str) -> Vec<u8> {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").into_bytes()
}

fn split_response(raw: &[u8]) -> (String, String) {
    let text = String::from_utf8(raw.to_vec()).unwrap();
    let (head, body) = text.split_once("\r\n\r\n").expect("header terminator");
    (head.to_string(), body.to_string())
}

/// Opens an event stream and consumes its response head.
async fn subscribe(addr: SocketAddr) -> BufReader<TcpStream> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&get("/events")).await.unwrap();
    let mut reader = BufReader::new(stream);
    let mut head = String::new();
    loop {
        let mut line = String::new();
        timeout(WAIT, reader.read_line(&mut line)).await.unwrap().unwrap();
        if line == "\r\n" {
            break;
        }
        head.push_str(&line);
    }
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Type: text/event-stream\r\n"));
    assert!(head.contains("Cache-Control: no-cache\r\n"));
    reader
}

/// Reads the next `data:` payload.
async fn next_frame(reader: &mut BufReader<TcpStream>) -> String {
    loop {
        let mut line = String::new();
        let n = timeout(WAIT, reader.read_line(&mut line)).await.unwrap().unwrap();
        assert!(n > 0, "stream closed unexpectedly");
        if let Some(json) = line.strip_prefix("data: ") {
            return json.trim_end().to_string();
        }
    }
}

/// Reads frames until one contains `needle`.
async fn frame_containing(reader: &mut BufReader<TcpStream>, needle: &str) -> String {
    loop {
        let frame = next_frame(reader).await;
        if frame.contains(needle) {
            return frame;
        }
    }
}

async fn wait_for_subscribers(server: &BroadcastServer, count: usize) {
    timeout(WAIT, async {
        while server.subscriber_count() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count never reached");
}

#[tokio::test]
async fn test_query_before_input_returns_zeroed_json() {
    // Arrange
    let (server, _stats, addr) = start_server().await;

    // Act
    let raw = exchange(addr, &get("/query")).await;

    // Assert
    let (head, body) = split_response(&raw);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Type: application/json\r\n"));
    assert!(head.contains("Access-Control-Allow-Origin: *\r\n"));
    assert!(head.contains("Connection: close"));
    assert_eq!(body, r#"{"totalKeyPresses":0,"kps":0,"keyCounts":{}}"#);
    server.stop();
}

#[tokio::test]
async fn test_api_stats_alias_reflects_presses() {
    let (server, stats, addr) = start_server().await;
    stats.record_press(65);
    stats.record_release(65);

    let (_, body) = split_response(&exchange(addr, &get("/api/stats")).await);

    assert_eq!(body, r#"{"totalKeyPresses":1,"kps":0,"keyCounts":{"65":1}}"#);
    server.stop();
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let (server, _stats, addr) = start_server().await;

    let raw = exchange(addr, &get("/favicon.ico")).await;

    let (head, body) = split_response(&raw);
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(body, "Not Found");
    server.stop();
}

#[tokio::test]
async fn test_page_embeds_active_layout() {
    let (server, _stats, addr) = start_server().await;

    let (head, body) = split_response(&exchange(addr, &get("/index.html")).await);

    assert!(head.contains("Content-Type: text/html"));
    assert!(body.contains(r#""l":"A","vk":65"#));
    assert!(body.contains("new EventSource('/events')"));
    server.stop();
}

#[tokio::test]
async fn test_short_request_line_gets_zero_bytes() {
    // Arrange
    let (server, _stats, addr) = start_server().await;

    // Act
    let raw = exchange(addr, b"GET\r\n\r\n").await;

    // Assert
    assert!(raw.is_empty());
    server.stop();
}

#[tokio::test]
async fn test_two_subscribers_see_identical_frames() {
    // Arrange
    let (server, stats, addr) = start_server().await;
    let mut a = subscribe(addr).await;
    let mut b = subscribe(addr).await;
    wait_for_subscribers(&server, 2).await;

    // Act
    stats.record_press(65);

    // Assert: the state is static after the press, so every later frame matches
    let frame_a = frame_containing(&mut a, r#""totalKeyPresses":1"#).await;
    let frame_b = frame_containing(&mut b, r#""totalKeyPresses":1"#).await;
    assert_eq!(frame_a, frame_b);
    assert_eq!(
        frame_a,
        r#"{"totalKeyPresses":1,"kps":0,"keyCounts":{"65":1},"pressed":[65]}"#
    );
    server.stop();
}

#[tokio::test]
async fn test_disconnecting_one_subscriber_leaves_the_other() {
    // Arrange
    let (server, stats, addr) = start_server().await;
    let a = subscribe(addr).await;
    let mut b = subscribe(addr).await;
    wait_for_subscribers(&server, 2).await;

    // Act
    drop(a);
    wait_for_subscribers(&server, 1).await;
    stats.record_press(66);

    // Assert
    let frame = frame_containing(&mut b, r#""66":1"#).await;
    assert!(frame.contains(r#""pressed":[66]"#));
    server.stop();
}

#[tokio::test]
async fn test_stop_closes_streams_and_is_idempotent() {
    // Arrange
    let (server, _stats, addr) = start_server().await;
    let mut stream = subscribe(addr).await;
    wait_for_subscribers(&server, 1).await;

    // Act
    server.stop();
    server.stop();

    // Assert: the stream drains to EOF
    let mut rest = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut rest))
        .await
        .expect("stream must close after stop")
        .unwrap();
    assert!(!server.is_running());
    assert_eq!(server.subscriber_count(), 0);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let (server, _stats, addr) = start_server().await;

    let again = server.start("127.0.0.1:0".parse().unwrap()).await.unwrap();

    assert_eq!(again, addr);
    server.stop();
}

#[tokio::test]
async fn test_second_server_on_same_port_reports_addr_in_use() {
    // Arrange
    let (server, _stats, addr) = start_server().await;
    let other = BroadcastServer::new(
        StatsHandle::default(),
        LayoutSlot::default(),
        ServerSettings::default(),
    );

    // Act
    let err = other.start(addr).await.unwrap_err();

    // Assert
    assert!(err.is_addr_in_use());
    server.stop();
}
