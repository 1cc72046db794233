//! In-crate test fixtures
//!
//! A minimal MJPEG "camera" speaking just enough HTTP/1.1 for the chunker:
//! EOF-delimited bodies with `Connection: close`, one task per accepted
//! connection, and a counter so tests can assert how many upstream
//! connections were actually opened.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub(crate) const FIXTURE_BOUNDARY: &str = "fixtureboundary";

/// A tiny but valid-looking JPEG payload
pub(crate) const FIXTURE_JPEG: &[u8] = b"\xFF\xD8\xFF\xE0fixture-frame\xFF\xD9";

#[derive(Debug, Clone, Copy)]
pub(crate) enum FixtureBehavior {
    /// 200 + multipart frames every 10ms until the peer goes away
    Stream,
    /// 200 + a single frame, then the connection closes
    StreamThenClose,
    /// 404 on every request
    NotFound,
    /// 200 with a non-multipart content type
    Html,
    /// 401 Digest challenge until an Authorization header shows up
    DigestChallenge,
    /// 401 Digest challenge no matter what
    AlwaysUnauthorized,
}

pub(crate) struct Fixture {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl Fixture {
    /// Upstream connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

pub(crate) fn fixture_response() -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: multipart/x-mixed-replace; boundary={}\r\n\
         Cache-Control: no-cache\r\n\
         Connection: close\r\n\r\n",
        FIXTURE_BOUNDARY
    )
}

pub(crate) async fn spawn_fixture(behavior: FixtureBehavior) -> Fixture {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fixture listener");
    let addr = listener.local_addr().expect("fixture local addr");
    let connections = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&connections);
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(handle_connection(socket, behavior));
        }
    });

    Fixture { addr, connections }
}

async fn handle_connection(mut socket: TcpStream, behavior: FixtureBehavior) {
    let Some(request) = read_request_head(&mut socket).await else {
        return;
    };

    match behavior {
        FixtureBehavior::NotFound => {
            let _ = socket
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        }
        FixtureBehavior::Html => {
            let _ = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                )
                .await;
        }
        FixtureBehavior::AlwaysUnauthorized => {
            write_challenge(&mut socket).await;
        }
        FixtureBehavior::DigestChallenge
            if !request.to_ascii_lowercase().contains("authorization: digest") =>
        {
            write_challenge(&mut socket).await;
        }
        FixtureBehavior::StreamThenClose => {
            if socket.write_all(fixture_response().as_bytes()).await.is_ok() {
                let _ = socket.write_all(&frame_part()).await;
            }
        }
        FixtureBehavior::DigestChallenge | FixtureBehavior::Stream => {
            stream_frames(&mut socket).await;
        }
    }
}

async fn read_request_head(socket: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => {
                head.extend_from_slice(&buf[..n]);
                if head.windows(4).any(|w| w == b"\r\n\r\n") {
                    return Some(String::from_utf8_lossy(&head).into_owned());
                }
            }
        }
    }
}

async fn write_challenge(socket: &mut TcpStream) {
    let _ = socket
        .write_all(
            b"HTTP/1.1 401 Unauthorized\r\n\
              WWW-Authenticate: Digest realm=\"fixture\", nonce=\"deadbeef\", qop=\"auth\"\r\n\
              Content-Length: 0\r\n\
              Connection: close\r\n\r\n",
        )
        .await;
}

fn frame_part() -> Vec<u8> {
    let mut part = Vec::new();
    part.extend_from_slice(format!("--{}\r\n", FIXTURE_BOUNDARY).as_bytes());
    part.extend_from_slice(b"Content-Type: image/jpeg\r\n");
    part.extend_from_slice(format!("Content-Length: {}\r\n\r\n", FIXTURE_JPEG.len()).as_bytes());
    part.extend_from_slice(FIXTURE_JPEG);
    part.extend_from_slice(b"\r\n");
    part
}

async fn stream_frames(socket: &mut TcpStream) {
    if socket.write_all(fixture_response().as_bytes()).await.is_err() {
        return;
    }

    let part = frame_part();
    loop {
        if socket.write_all(&part).await.is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
