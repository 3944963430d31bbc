//! Shared helpers for integration tests.
//!
//! Starts an in-process server that speaks enough RESP to act as a small
//! key/value store. Each connection is served by one task, so replies leave
//! in request order just like a real server.

#![allow(dead_code)]

use redpipe::resp::{parse, RespValue};
use redpipe::{Client, ConnectionConfig};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Global counter for generating unique key prefixes per test.
static TEST_ID: AtomicUsize = AtomicUsize::new(0);

/// Return a unique prefix for test keys.
pub fn test_prefix() -> String {
    let id = TEST_ID.fetch_add(1, Ordering::Relaxed);
    format!("redpipe_test_{}_{}:", std::process::id(), id)
}

/// Route `RUST_LOG`-filtered tracing output to the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Store {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
    ttls: HashMap<String, i64>,
}

impl Store {
    fn contains(&self, key: &str) -> bool {
        self.strings.contains_key(key) || self.hashes.contains_key(key) || self.lists.contains_key(key)
    }

    fn remove(&mut self, key: &str) -> bool {
        self.ttls.remove(key);
        let a = self.strings.remove(key).is_some();
        let b = self.hashes.remove(key).is_some();
        let c = self.lists.remove(key).is_some();
        a || b || c
    }
}

/// Handle to a running test server.
pub struct TestServer {
    pub port: u16,
    accepted: Arc<AtomicUsize>,
    generation: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let generation = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(Mutex::new(Store::default()));

        let (acc, gen, reqs) = (accepted.clone(), generation.clone(), requests.clone());
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                acc.fetch_add(1, Ordering::SeqCst);
                let born = gen.load(Ordering::SeqCst);
                tokio::spawn(serve_connection(
                    socket,
                    store.clone(),
                    gen.clone(),
                    born,
                    reqs.clone(),
                ));
            }
        });

        Self {
            port,
            accepted,
            generation,
            requests,
        }
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Every connection open now drops its socket on its next request.
    pub fn kill_connections(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".into(),
            port: self.port,
            connect_timeout_ms: 1000,
            read_timeout_ms: 5000,
            reconnect_wait_ms: 10,
            ..ConnectionConfig::default()
        }
    }

    pub fn client(&self) -> Client {
        Client::new(self.config()).unwrap()
    }
}

async fn serve_connection(
    mut socket: tokio::net::TcpStream,
    store: Arc<Mutex<Store>>,
    generation: Arc<AtomicUsize>,
    born: usize,
    requests: Arc<AtomicUsize>,
) {
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
            if generation.load(Ordering::SeqCst) != born {
                return;
            }
            requests.fetch_add(1, Ordering::SeqCst);
            let args = request_args(value);
            let reply = match blocking_delay(&args) {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    b"*-1\r\n".to_vec()
                }
                None => {
                    let mut store = store.lock();
                    execute(&mut store, &args)
                }
            };
            if socket.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

fn request_args(value: RespValue) -> Vec<Bytes> {
    value
        .into_array()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| match v {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        })
        .collect()
}

/// `BLPOP` never finds data here; it holds the connection for its timeout.
fn blocking_delay(args: &[Bytes]) -> Option<Duration> {
    let name = args.first()?;
    if !name.eq_ignore_ascii_case(b"BLPOP") {
        return None;
    }
    let secs: f64 = std::str::from_utf8(args.last()?).ok()?.parse().ok()?;
    Some(Duration::from_secs_f64(secs))
}

fn text(b: &Bytes) -> String {
    String::from_utf8_lossy(b).into_owned()
}

fn bulk(b: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", b.len()).into_bytes();
    out.extend_from_slice(b);
    out.extend_from_slice(b"\r\n");
    out
}

fn array<I: IntoIterator<Item = Vec<u8>>>(items: I) -> Vec<u8> {
    let items: Vec<Vec<u8>> = items.into_iter().collect();
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend_from_slice(&item);
    }
    out
}

fn int(n: i64) -> Vec<u8> {
    format!(":{n}\r\n").into_bytes()
}

fn err(msg: &str) -> Vec<u8> {
    format!("-{msg}\r\n").into_bytes()
}

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

fn execute(store: &mut Store, args: &[Bytes]) -> Vec<u8> {
    let Some(name) = args.first() else {
        return err("ERR empty command");
    };
    let name = text(name).to_ascii_uppercase();
    let a: Vec<String> = args[1..].iter().map(text).collect();

    match (name.as_str(), a.len()) {
        ("PING", 0) => b"+PONG\r\n".to_vec(),
        ("ECHO", 1) => bulk(&args[1]),
        ("SELECT", 1) | ("AUTH", 1) | ("AUTH", 2) => b"+OK\r\n".to_vec(),
        ("FLUSHDB", 0) => {
            *store = Store::default();
            b"+OK\r\n".to_vec()
        }
        ("GET", 1) => {
            if store.hashes.contains_key(&a[0]) || store.lists.contains_key(&a[0]) {
                return err(WRONGTYPE);
            }
            match store.strings.get(&a[0]) {
                Some(v) => bulk(v.as_bytes()),
                None => b"$-1\r\n".to_vec(),
            }
        }
        ("SET", 2) => {
            store.remove(&a[0]);
            store.strings.insert(a[0].clone(), a[1].clone());
            b"+OK\r\n".to_vec()
        }
        ("SET", 3) if a[2].eq_ignore_ascii_case("NX") => {
            if store.contains(&a[0]) {
                return b"$-1\r\n".to_vec();
            }
            store.strings.insert(a[0].clone(), a[1].clone());
            b"+OK\r\n".to_vec()
        }
        ("INCR", 1) | ("INCRBY", 2) => {
            let delta = match a.get(1).map(|d| d.parse::<i64>()) {
                None => 1,
                Some(Ok(d)) => d,
                Some(Err(_)) => return err("ERR value is not an integer or out of range"),
            };
            let current = store.strings.get(&a[0]).map(|v| v.parse::<i64>());
            let next = match current {
                None => delta,
                Some(Ok(n)) => n + delta,
                Some(Err(_)) => return err("ERR value is not an integer or out of range"),
            };
            store.strings.insert(a[0].clone(), next.to_string());
            int(next)
        }
        ("MGET", n) if n > 0 => array(a.iter().map(|k| match store.strings.get(k) {
            Some(v) => bulk(v.as_bytes()),
            None => b"$-1\r\n".to_vec(),
        })),
        ("DEL", n) if n > 0 => int(a.iter().filter(|k| store.remove(k)).count() as i64),
        ("EXISTS", 1) => int(store.contains(&a[0]) as i64),
        ("EXPIRE", 2) => {
            if !store.contains(&a[0]) {
                return int(0);
            }
            match a[1].parse() {
                Ok(secs) => {
                    store.ttls.insert(a[0].clone(), secs);
                    int(1)
                }
                Err(_) => err("ERR value is not an integer or out of range"),
            }
        }
        ("TTL", 1) => match (store.contains(&a[0]), store.ttls.get(&a[0])) {
            (false, _) => int(-2),
            (true, None) => int(-1),
            (true, Some(secs)) => int(*secs),
        },
        ("HSET", 3) => {
            if store.strings.contains_key(&a[0]) {
                return err(WRONGTYPE);
            }
            let hash = store.hashes.entry(a[0].clone()).or_default();
            int(hash.insert(a[1].clone(), a[2].clone()).is_none() as i64)
        }
        ("HGET", 2) => match store.hashes.get(&a[0]).and_then(|h| h.get(&a[1])) {
            Some(v) => bulk(v.as_bytes()),
            None => b"$-1\r\n".to_vec(),
        },
        ("HDEL", n) if n > 1 => {
            let Some(hash) = store.hashes.get_mut(&a[0]) else {
                return int(0);
            };
            let removed = a[1..].iter().filter(|f| hash.remove(*f).is_some()).count();
            if hash.is_empty() {
                store.hashes.remove(&a[0]);
            }
            int(removed as i64)
        }
        ("HGETALL", 1) => {
            let pairs: Vec<Vec<u8>> = store
                .hashes
                .get(&a[0])
                .into_iter()
                .flatten()
                .flat_map(|(f, v)| [bulk(f.as_bytes()), bulk(v.as_bytes())])
                .collect();
            array(pairs)
        }
        ("LPUSH", n) if n > 1 => {
            let list = store.lists.entry(a[0].clone()).or_default();
            for v in &a[1..] {
                list.push_front(v.clone());
            }
            int(list.len() as i64)
        }
        ("LRANGE", 3) => {
            let list = store.lists.get(&a[0]).cloned().unwrap_or_default();
            let len = list.len() as i64;
            let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i };
            let (Ok(start), Ok(stop)) = (a[1].parse::<i64>(), a[2].parse::<i64>()) else {
                return err("ERR value is not an integer or out of range");
            };
            let (start, stop) = (norm(start), norm(stop).min(len - 1));
            let items: Vec<Vec<u8>> = (start..=stop)
                .filter_map(|i| list.get(i as usize))
                .map(|v| bulk(v.as_bytes()))
                .collect();
            array(items)
        }
        ("SCAN", _) => {
            let pattern = a
                .iter()
                .position(|t| t.eq_ignore_ascii_case("MATCH"))
                .and_then(|i| a.get(i + 1));
            let mut keys: Vec<&String> = store
                .strings
                .keys()
                .chain(store.hashes.keys())
                .chain(store.lists.keys())
                .filter(|k| match pattern.and_then(|p| p.strip_suffix('*')) {
                    Some(prefix) => k.starts_with(prefix),
                    None => pattern.map_or(true, |p| *k == p),
                })
                .collect();
            keys.sort();
            array([bulk(b"0"), array(keys.into_iter().map(|k| bulk(k.as_bytes())))])
        }
        _ => err(&format!("ERR unknown command '{}'", name.to_ascii_lowercase())),
    }
}
