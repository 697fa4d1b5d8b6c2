//! End-to-end tests against a fake engine listening on a Unix socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dockwire_client::{
    ClientError, EngineClient, LogDemuxer, StreamType, UnixTransport, WireRequest,
};
use dockwire_core::encode_frame;
use futures::StreamExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;

struct FakeEngine {
    _dir: TempDir,
    path: PathBuf,
    listener: UnixListener,
}

impl FakeEngine {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&path).unwrap();
        Self {
            _dir: dir,
            path,
            listener,
        }
    }

    fn host(&self) -> String {
        format!("unix://{}", self.path.display())
    }

    /// Accept one connection and return it with the request head it sent.
    async fn accept(&self) -> (UnixStream, String) {
        let (mut conn, _) = self.listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if conn.read(&mut byte).await.unwrap() == 0 {
                break;
            }
            head.push(byte[0]);
        }
        (conn, String::from_utf8(head).unwrap())
    }
}

/// Serve one canned response, then close. Returns the request head.
fn respond_once(engine: FakeEngine, response: Vec<u8>) -> tokio::task::JoinHandle<String> {
    tokio::spawn(async move {
        let (mut conn, head) = engine.accept().await;
        let _ = conn.write_all(&response).await;
        let _ = conn.shutdown().await;
        head
    })
}

fn client_for(host: &str) -> EngineClient {
    EngineClient::builder()
        .host(host)
        .api_version("1.43")
        .read_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

fn chunked(pieces: &[&[u8]]) -> Vec<u8> {
    let mut body = Vec::new();
    for piece in pieces {
        body.extend(format!("{:x}\r\n", piece.len()).into_bytes());
        body.extend_from_slice(piece);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(b"0\r\n\r\n");
    body
}

#[tokio::test]
async fn unreachable_socket_is_a_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing: &Path = &dir.path().join("nobody-home.sock");

    let transport = UnixTransport::new(missing);
    let err = transport.request(WireRequest::get("/_ping")).await.unwrap_err();
    assert!(err.is_connection(), "{err:?}");

    let client = client_for(&format!("unix://{}", missing.display()));
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, ClientError::Connection(_)), "{err:?}");
}

#[tokio::test]
async fn buffered_call_through_client() {
    let engine = FakeEngine::new();
    let host = engine.host();
    let body = br#"{"Version":"24.0.7","ApiVersion":"1.43"}"#;
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    let server = respond_once(engine, response);

    let version: Value = client_for(&host)
        .call_json(WireRequest::get("/version"), 200)
        .await
        .unwrap();
    assert_eq!(version["Version"], "24.0.7");

    let head = server.await.unwrap();
    assert!(head.starts_with("GET /v1.43/version HTTP/1.1\r\n"), "{head}");
    assert!(head.contains("Host: localhost\r\n") || head.contains("host: localhost\r\n"));
    assert!(head.to_ascii_lowercase().contains("user-agent: dockwire/"));
}

#[tokio::test]
async fn buffered_chunked_body_is_dechunked() {
    let engine = FakeEngine::new();
    let host = engine.host();
    let mut response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    response.extend(chunked(&[b"[{\"Id\":", b"\"abc\"}]"]));
    let server = respond_once(engine, response);

    let containers: Value = client_for(&host)
        .call_json(WireRequest::get("/containers/json"), 200)
        .await
        .unwrap();
    assert_eq!(containers[0]["Id"], "abc");
    server.await.unwrap();
}

#[tokio::test]
async fn unexpected_status_carries_engine_message() {
    let engine = FakeEngine::new();
    let host = engine.host();
    let body = b"{\"message\":\"No such container: web\"}\r\n";
    let mut response = format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    let server = respond_once(engine, response);

    let err = client_for(&host)
        .call(WireRequest::post("/containers/web/start"), 204)
        .await
        .unwrap_err();
    match &err {
        ClientError::UnexpectedStatus {
            endpoint,
            actual,
            expected,
            body,
        } => {
            assert_eq!(endpoint, "/containers/web/start");
            assert_eq!(*actual, 404);
            assert_eq!(*expected, 204);
            assert_eq!(body, "{\"message\":\"No such container: web\"}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn chunked_events_stream() {
    let engine = FakeEngine::new();
    let host = engine.host();
    let mut response = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    response.extend(chunked(&[
        b"{\"Type\":\"container\",\"Action\":\"create\"}\n{\"Type\":\"cont",
        b"ainer\",\"Action\":\"start\"}\n",
        b"{\"Type\":\"network\",\"Action\":\"connect\"}\n",
    ]));
    let server = respond_once(engine, response);

    let events: Vec<Value> = client_for(&host)
        .events()
        .await
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;

    let actions: Vec<&str> = events.iter().map(|e| e["Action"].as_str().unwrap()).collect();
    assert_eq!(actions, ["create", "start", "connect"]);
    server.await.unwrap();
}

#[tokio::test]
async fn follow_logs_demultiplexes_frames() {
    let engine = FakeEngine::new();
    let host = engine.host();
    let mut response = b"HTTP/1.1 200 OK\r\nContent-Type: application/vnd.docker.multiplexed-stream\r\n\r\n".to_vec();
    response.extend(encode_frame(StreamType::Stdout, b"starting\n"));
    response.extend(encode_frame(StreamType::Stdin, b"ignored"));
    response.extend(encode_frame(StreamType::Stderr, b"warning: low disk\n"));
    response.extend(encode_frame(StreamType::Stdout, b"ready\n"));
    let server = respond_once(engine, response);

    let text: Vec<String> = client_for(&host)
        .follow_logs("/containers/web/logs?follow=1&stdout=1&stderr=1")
        .await
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(text.concat(), "starting\nwarning: low disk\nready\n");

    let head = server.await.unwrap();
    assert!(head.starts_with("GET /v1.43/containers/web/logs?follow=1&stdout=1&stderr=1 HTTP/1.1"));
}

#[tokio::test]
async fn batch_logs_keep_trailing_newlines() {
    let engine = FakeEngine::new();
    let host = engine.host();
    let mut response = b"HTTP/1.1 200 OK\r\nContent-Type: application/vnd.docker.multiplexed-stream\r\n\r\n".to_vec();
    response.extend(encode_frame(StreamType::Stdout, b"line one\n"));
    response.extend(encode_frame(StreamType::Stderr, b"line two\r\n"));
    let server = respond_once(engine, response);

    let text = client_for(&host)
        .logs("/containers/web/logs?stdout=1&stderr=1")
        .await
        .unwrap();
    assert_eq!(text, "line one\nline two\r\n");
    server.await.unwrap();
}

#[tokio::test]
async fn batch_logs_keep_frame_with_newline_length_byte() {
    let engine = FakeEngine::new();
    let host = engine.host();
    let mut response = b"HTTP/1.1 200 OK\r\nContent-Type: application/vnd.docker.multiplexed-stream\r\n\r\n".to_vec();
    response.extend(encode_frame(StreamType::Stdout, b"abc"));
    response.extend(encode_frame(StreamType::Stdout, &[b'\n'; 10]));
    let server = respond_once(engine, response);

    let text = client_for(&host).logs("/containers/web/logs?stdout=1").await.unwrap();
    assert_eq!(text, format!("abc{}", "\n".repeat(10)));
    server.await.unwrap();
}

#[tokio::test]
async fn buffered_log_response_is_not_trimmed() {
    let engine = FakeEngine::new();
    let path = engine.path.clone();
    let frames = encode_frame(StreamType::Stdout, b"done\n");
    let mut response = b"HTTP/1.1 200 OK\r\nContent-Type: application/vnd.docker.multiplexed-stream\r\n\r\n".to_vec();
    response.extend_from_slice(&frames);
    let server = respond_once(engine, response);

    let response = UnixTransport::new(path)
        .request(WireRequest::get("/containers/web/logs"))
        .await
        .unwrap();
    assert_eq!(response.bytes().await.unwrap().as_ref(), frames.as_slice());
    server.await.unwrap();
}

#[tokio::test]
async fn demuxer_keeps_streams_apart_over_socket() {
    let engine = FakeEngine::new();
    let path = engine.path.clone();
    let mut response = b"HTTP/1.1 200 OK\r\nContent-Type: application/vnd.docker.multiplexed-stream\r\n\r\n".to_vec();
    response.extend(encode_frame(StreamType::Stderr, b"err"));
    response.extend(encode_frame(StreamType::Stdout, b"out"));
    let server = respond_once(engine, response);

    let response = UnixTransport::new(path)
        .request(WireRequest::get("/containers/web/logs").streaming())
        .await
        .unwrap();
    let chunks: Vec<_> = LogDemuxer::from_response(response)
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].stream, StreamType::Stderr);
    assert_eq!(&chunks[0].data[..], b"err");
    assert_eq!(chunks[1].stream, StreamType::Stdout);
    assert_eq!(&chunks[1].data[..], b"out");
    server.await.unwrap();
}

#[tokio::test]
async fn cancelling_a_feed_closes_the_connection() {
    let engine = FakeEngine::new();
    let host = engine.host();
    let (closed_tx, closed_rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let (mut conn, _) = engine.accept().await;
        conn.write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"Action\":\"start\"}\n")
            .await
            .unwrap();
        // The feed stays open until the client goes away.
        let mut buf = [0u8; 64];
        let eof = matches!(conn.read(&mut buf).await, Ok(0) | Err(_));
        let _ = closed_tx.send(eof);
    });

    let mut events = client_for(&host).events().await.unwrap();
    let first = events.next().await.unwrap().unwrap();
    assert_eq!(first["Action"], "start");

    let cancel = events.cancel_handle();
    let waiter = tokio::spawn(async move { events.next().await.is_none() });
    cancel.cancel();

    assert!(waiter.await.unwrap());
    let eof = tokio::time::timeout(Duration::from_secs(5), closed_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(eof);
    server.await.unwrap();
}
