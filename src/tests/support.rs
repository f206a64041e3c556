//! Shared plumbing for the end-to-end tests: a server harness that runs an
//! [`App`] on an OS-assigned port, plus a bare-bones HTTP/1.1 and WebSocket
//! client speaking over raw TCP.

use crate::app::{App, ShutdownHandle};
use crate::error::HttpError;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub(crate) struct TestServer {
    pub(crate) addr: SocketAddr,
    handle: ShutdownHandle,
    task: tokio::task::JoinHandle<(App, Result<(), HttpError>)>,
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

impl TestServer {
    /// Boots the app on 127.0.0.1:0 and waits for the bound address.
    pub(crate) async fn start(mut app: App) -> Self {
        init_tracing();
        let handle = app.shutdown_handle();
        let (addr_tx, addr_rx) = tokio::sync::oneshot::channel();
        let task = tokio::spawn(async move {
            let result = app
                .listen(move |addr| {
                    let _ = addr_tx.send(addr);
                })
                .await;
            (app, result)
        });
        let addr = addr_rx.await.expect("server failed to start");
        Self { addr, handle, task }
    }

    /// Shuts the server down and returns the app for post-mortem assertions.
    pub(crate) async fn stop(self) -> (App, Result<(), HttpError>) {
        self.handle.shutdown().await;
        self.task.await.expect("server task panicked")
    }
}

pub(crate) struct TestResponse {
    pub(crate) status: u16,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) body: String,
}

impl TestResponse {
    pub(crate) fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("response body is not JSON")
    }

    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Sends one request on a fresh connection with `Connection: close` and
/// parses the response.
pub(crate) async fn request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> TestResponse {
    let mut stream = TcpStream::connect(addr).await.expect("connect failed");

    let mut raw = format!("{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n", method, path);
    for (name, value) in headers {
        raw.push_str(&format!("{}: {}\r\n", name, value));
    }
    if !body.is_empty() && !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("content-length")) {
        raw.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes()).await.expect("write failed");
    stream.write_all(body).await.expect("body write failed");

    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).await.expect("read failed");
    parse_response(&bytes)
}

pub(crate) async fn get(addr: SocketAddr, path: &str) -> TestResponse {
    request(addr, "GET", path, &[], b"").await
}

fn parse_response(bytes: &[u8]) -> TestResponse {
    let text = String::from_utf8_lossy(bytes);
    let (head, body) = text
        .split_once("\r\n\r\n")
        .expect("malformed response: no header terminator");

    let mut lines = head.lines();
    let status_line = lines.next().expect("missing status line");
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("malformed status line");

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    TestResponse {
        status,
        headers,
        body: body.to_string(),
    }
}

// Minimal WebSocket client over raw TCP.

pub(crate) struct WsClient {
    stream: TcpStream,
}

impl WsClient {
    /// Performs the opening handshake and asserts the 101 response.
    pub(crate) async fn connect(addr: SocketAddr, path: &str) -> Self {
        let mut stream = TcpStream::connect(addr).await.expect("connect failed");
        let raw = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            path
        );
        stream.write_all(raw.as_bytes()).await.expect("handshake write failed");

        let head = read_until_blank_line(&mut stream).await;
        assert!(
            head.starts_with("HTTP/1.1 101"),
            "expected 101, got: {}",
            head.lines().next().unwrap_or("")
        );
        assert!(
            head.to_ascii_lowercase()
                .contains("sec-websocket-accept: s3pplmbitxaq9kygzzhzrbk+xoo="),
            "missing accept token in: {}",
            head
        );
        Self { stream }
    }

    /// Attempts the handshake and returns the HTTP status on rejection.
    pub(crate) async fn connect_expect_failure(addr: SocketAddr, path: &str) -> u16 {
        let mut stream = TcpStream::connect(addr).await.expect("connect failed");
        let raw = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            path
        );
        stream.write_all(raw.as_bytes()).await.expect("handshake write failed");
        let head = read_until_blank_line(&mut stream).await;
        head.split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .expect("malformed status line")
    }

    /// Sends a masked text frame, as a browser client would.
    pub(crate) async fn send_text(&mut self, text: &str) {
        let payload = text.as_bytes();
        let mask = [0x37, 0xFA, 0x21, 0x3D];
        let mut frame = vec![0x81u8];
        assert!(payload.len() <= 125, "test client only sends small frames");
        frame.push(0x80 | payload.len() as u8);
        frame.extend_from_slice(&mask);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        self.stream.write_all(&frame).await.expect("frame write failed");
    }

    /// Sends a masked pong, keeping the heartbeat happy.
    pub(crate) async fn send_pong(&mut self) {
        let mask = [1u8, 2, 3, 4];
        let frame = [0x8A, 0x80, mask[0], mask[1], mask[2], mask[3]];
        self.stream.write_all(&frame).await.expect("pong write failed");
    }

    /// Reads one server frame, returning `(opcode, payload)`.
    pub(crate) async fn read_frame(&mut self) -> (u8, Vec<u8>) {
        let mut head = [0u8; 2];
        self.stream.read_exact(&mut head).await.expect("frame head read failed");
        let opcode = head[0] & 0x0F;
        let len = match head[1] & 0x7F {
            126 => {
                let mut ext = [0u8; 2];
                self.stream.read_exact(&mut ext).await.expect("length read failed");
                u16::from_be_bytes(ext) as usize
            }
            127 => {
                let mut ext = [0u8; 8];
                self.stream.read_exact(&mut ext).await.expect("length read failed");
                u64::from_be_bytes(ext) as usize
            }
            n => n as usize,
        };
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.expect("payload read failed");
        (opcode, payload)
    }

    /// Reads server frames until a text frame arrives, answering pings.
    pub(crate) async fn read_text(&mut self) -> String {
        loop {
            let (opcode, payload) = self.read_frame().await;
            match opcode {
                0x1 => return String::from_utf8(payload).expect("text frame is not UTF-8"),
                0x9 => self.send_pong().await,
                0x8 => panic!("connection closed while waiting for text"),
                _ => {}
            }
        }
    }

    /// Reads server frames until a close frame arrives, returning its code.
    /// Does not answer pings.
    pub(crate) async fn read_close_code(&mut self) -> u16 {
        loop {
            let (opcode, payload) = self.read_frame().await;
            if opcode == 0x8 {
                assert!(payload.len() >= 2, "close frame without a code");
                return u16::from_be_bytes([payload[0], payload[1]]);
            }
        }
    }
}

async fn read_until_blank_line(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.expect("header read failed");
        head.push(byte[0]);
    }
    String::from_utf8_lossy(&head).into_owned()
}
