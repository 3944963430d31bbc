//! In-process scripted server for connection-layer tests.

use crate::config::ConnectionConfig;
use crate::resp::parser::parse;
use crate::resp::types::RespValue;

use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// What the server does with one request.
pub(crate) enum Action {
    Reply(Vec<u8>),
    /// Read the request, never answer.
    Silent,
    /// Drop the socket without answering.
    Close,
}

pub(crate) struct MockServer {
    pub addr: String,
    pub port: u16,
    accepted: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockServer {
    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Every request received, as text tokens, in arrival order.
    pub fn seen(&self) -> Vec<Vec<String>> {
        self.seen.lock().clone()
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".into(),
            port: self.port,
            connect_timeout_ms: 1000,
            read_timeout_ms: 2000,
            reconnect_wait_ms: 10,
            ..ConnectionConfig::default()
        }
    }
}

/// Start a server; `handler(connection_index, request)` decides each reply.
pub(crate) async fn serve<F>(handler: F) -> MockServer
where
    F: Fn(usize, &[String]) -> Action + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let counter = Arc::clone(&accepted);
    let log = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let handler = Arc::clone(&handler);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut buf = BytesMut::with_capacity(4096);
                loop {
                    match socket.read_buf(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                    loop {
                        let snapshot = buf.clone().freeze();
                        let Ok((value, used)) = parse(&snapshot) else { break };
                        let _ = buf.split_to(used);
                        let request = tokens(value);
                        log.lock().push(request.clone());
                        match handler(index, &request) {
                            Action::Reply(bytes) => {
                                if socket.write_all(&bytes).await.is_err() {
                                    return;
                                }
                            }
                            Action::Silent => {}
                            Action::Close => return,
                        }
                    }
                }
            });
        }
    });

    MockServer {
        addr: local.to_string(),
        port: local.port(),
        accepted,
        seen,
    }
}

/// Server that answers every request the way a tiny in-memory store would
/// for the handful of commands the tests use.
pub(crate) async fn serve_basic() -> MockServer {
    serve(|_, req| Action::Reply(basic_reply(req))).await
}

pub(crate) fn basic_reply(req: &[String]) -> Vec<u8> {
    match req.first().map(|s| s.to_ascii_uppercase()).as_deref() {
        Some("PING") => b"+PONG\r\n".to_vec(),
        Some("ECHO") if req.len() == 2 => bulk(&req[1]),
        Some("AUTH") | Some("SELECT") | Some("SET") => b"+OK\r\n".to_vec(),
        Some("GET") => b"$-1\r\n".to_vec(),
        Some("EXISTS") => b":1\r\n".to_vec(),
        _ => b"-ERR unknown command\r\n".to_vec(),
    }
}

pub(crate) fn bulk(s: &str) -> Vec<u8> {
    format!("${}\r\n{}\r\n", s.len(), s).into_bytes()
}

fn tokens(value: RespValue) -> Vec<String> {
    value
        .into_array()
        .unwrap_or_default()
        .iter()
        .map(|v| v.as_str().unwrap_or_default().to_string())
        .collect()
}
