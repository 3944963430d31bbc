//! Integration tests: connection pool behavior.

mod common;

use common::*;
use redpipe::{commands, Client, Error};
use std::time::Duration;

async fn wait_for_requests(server: &TestServer, n: usize) {
    for _ in 0..200 {
        if server.requests() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("server saw {} requests, expected {n}", server.requests());
}

#[tokio::test]
async fn idle_connection_is_reused() {
    let server = TestServer::start().await;
    let client = server.client();

    for _ in 0..10 {
        assert_eq!(client.ping().await.unwrap(), "PONG");
    }
    assert_eq!(client.pool().created(), 1);
    assert_eq!(client.pool().idle_count(), 1);
    assert_eq!(client.pool().available(), client.pool().max_size());
}

#[tokio::test]
async fn pool_never_exceeds_its_bound() {
    init_tracing();
    let server = TestServer::start().await;
    let mut config = server.config();
    config.pool_size = 2;
    config.pool_timeout_ms = 200;
    let client = Client::new(config).unwrap();

    // Two blocking pops hold both connections for a second.
    let mut holders = vec![];
    for i in 0..2 {
        let client = client.clone();
        holders.push(tokio::spawn(async move {
            let cmd = commands::blpop([format!("q{i}")], 1).unwrap();
            client.call_async(&cmd).await
        }));
    }
    wait_for_requests(&server, 2).await;
    assert_eq!(client.pool().available(), 0);

    // A third caller times out waiting for admission.
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));

    for h in holders {
        assert_eq!(h.await.unwrap().unwrap(), None);
    }
    assert_eq!(client.ping().await.unwrap(), "PONG");
    assert_eq!(client.pool().created(), 2);
    assert_eq!(server.accepted(), 2);
}

#[tokio::test]
async fn concurrent_callers_share_a_bounded_pool() {
    let server = TestServer::start().await;
    let mut config = server.config();
    config.pool_size = 4;
    let client = Client::new(config).unwrap();

    let mut handles = vec![];
    for i in 0..40 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let key = format!("c{i}");
            client.set(&key, i).await.unwrap();
            assert_eq!(client.get(&key).await.unwrap(), Some(i.to_string()));
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    assert!(client.pool().created() <= 4);
    assert!(server.accepted() <= 4);
}

#[tokio::test]
async fn broken_connection_is_evicted() {
    let server = TestServer::start().await;
    let client = server.client();
    assert_eq!(client.ping().await.unwrap(), "PONG");

    server.kill_connections();
    let err = client.ping().await.unwrap_err();
    assert!(err.is_connectivity(), "unexpected error: {err}");
    assert_eq!(client.pool().idle_count(), 0);

    // The next call gets a fresh connection.
    assert_eq!(client.ping().await.unwrap(), "PONG");
    assert_eq!(client.pool().created(), 2);
    assert_eq!(server.accepted(), 2);
}

#[tokio::test]
async fn unreachable_server_reports_connection_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = Client::new(redpipe::ConnectionConfig {
        port,
        connect_timeout_ms: 500,
        ..redpipe::ConnectionConfig::default()
    })
    .unwrap();
    let err = client.ping().await.unwrap_err();
    assert!(err.is_connectivity());
    // The admission permit went back.
    assert_eq!(client.pool().available(), client.pool().max_size());
}

#[tokio::test]
async fn dispose_rejects_new_calls() {
    let server = TestServer::start().await;
    let client = server.client();
    client.ping().await.unwrap();

    client.dispose();
    assert!(matches!(client.ping().await, Err(Error::Disposed)));
    assert_eq!(client.pool().idle_count(), 0);
}

#[tokio::test]
async fn extra_caller_waits_for_a_returned_connection() {
    let server = TestServer::start().await;
    let mut config = server.config();
    config.pool_size = 1;
    let client = Client::new(config).unwrap();

    let holder = {
        let client = client.clone();
        tokio::spawn(async move {
            let cmd = commands::blpop(["q"], 1).unwrap();
            client.call_async(&cmd).await
        })
    };
    wait_for_requests(&server, 1).await;

    // Admission waits for the pop to hand its connection back.
    assert_eq!(client.ping().await.unwrap(), "PONG");
    assert!(holder.is_finished());
    assert_eq!(holder.await.unwrap().unwrap(), None);
    assert_eq!(server.accepted(), 1);
}
