//! Pipelined connector.
//!
//! One socket serves any number of concurrent callers. Each live socket
//! (a [`Link`]) runs two tasks:
//!
//! ```text
//!   submit ──► write queue (mpsc) ──► writer task ──► socket
//!                                        │ moves the call to
//!                                        ▼
//!   Reply<T> ◄── reader task ◄──── in-flight queue (FIFO)
//! ```
//!
//! A call enters the in-flight queue immediately before its bytes are
//! written, so the order of replies is fixed when the write is issued.
//! The reader pops the head for each complete frame and runs that call's
//! parser. Decode and server errors stay with their call; transport
//! failures fail every call on the link.

use crate::command::{run_parser, Command, Parser};
use crate::commands;
use crate::config::ConnectionConfig;
use crate::connection::buffer::{TransferBuffer, TransferBuffers};
use crate::connection::framed::{self, FrameReader};
use crate::error::{Error, Result};

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Observable state of a connector or connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Only reported by `RedisConnection::reconnect`.
    Reconnecting,
    Disposed,
}

// ── Pending calls ──────────────────────────────────────────────────

/// A submitted call waiting for its reply, with its result type erased.
pub(crate) trait Pending: Send {
    fn complete(self: Box<Self>, frame: Bytes);
    fn fail(self: Box<Self>, err: Error);
}

struct PendingCall<T> {
    parse: Parser<T>,
    tx: oneshot::Sender<Result<T>>,
}

impl<T: Send + 'static> Pending for PendingCall<T> {
    fn complete(self: Box<Self>, frame: Bytes) {
        // The caller may have stopped waiting; the frame is still consumed.
        let _ = self.tx.send(run_parser(&self.parse, &frame));
    }

    fn fail(self: Box<Self>, err: Error) {
        let _ = self.tx.send(Err(err));
    }
}

/// Future resolving to the typed result of one submitted command.
pub struct Reply<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Reply<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::connection(
                io::ErrorKind::BrokenPipe,
                "call dropped by connection",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ── Link ───────────────────────────────────────────────────────────

struct Outgoing {
    payload: TransferBuffer,
    pending: Box<dyn Pending>,
}

struct InFlight {
    queue: VecDeque<Box<dyn Pending>>,
    /// Set once; a failed link never accepts another call.
    failure: Option<Error>,
}

struct LinkShared {
    addr: String,
    in_flight: Mutex<InFlight>,
    shutdown: watch::Sender<bool>,
}

impl LinkShared {
    /// Mark the link broken and fail every in-flight call with `err`.
    /// Only the first failure counts.
    fn fail(&self, err: Error) {
        let drained: Vec<Box<dyn Pending>> = {
            let mut state = self.in_flight.lock();
            if state.failure.is_some() {
                return;
            }
            state.failure = Some(err.clone());
            state.queue.drain(..).collect()
        };
        if matches!(err, Error::Disposed) {
            debug!(addr = %self.addr, failed = drained.len(), "link closed");
        } else {
            warn!(addr = %self.addr, error = %err, failed = drained.len(), "link failed");
        }
        for pending in drained {
            pending.fail(err.clone());
        }
        self.shutdown.send_replace(true);
    }

    fn failure(&self) -> Option<Error> {
        self.in_flight.lock().failure.clone()
    }

    /// Move a call onto the in-flight queue, unless the link is broken.
    fn track(&self, pending: Box<dyn Pending>) -> Result<()> {
        let mut state = self.in_flight.lock();
        let failure = state.failure.clone();
        match failure {
            Some(err) => {
                drop(state);
                pending.fail(err.clone());
                Err(err)
            }
            None => {
                state.queue.push_back(pending);
                Ok(())
            }
        }
    }
}

/// One live socket with its writer and reader tasks.
pub(crate) struct Link {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    shared: Arc<LinkShared>,
}

impl Link {
    fn spawn(stream: TcpStream, addr: &str, config: &ConnectionConfig) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(LinkShared {
            addr: addr.to_string(),
            in_flight: Mutex::new(InFlight {
                queue: VecDeque::new(),
                failure: None,
            }),
            shutdown,
        });

        tokio::spawn(write_loop(
            rx,
            write_half,
            Arc::clone(&shared),
            config.write_timeout(),
        ));
        tokio::spawn(read_loop(
            FrameReader::new(read_half, config.max_buffer_size),
            Arc::clone(&shared),
        ));

        Self {
            outgoing: tx,
            shared,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.shared.in_flight.lock().failure.is_none()
    }

    /// Calls written and still waiting for their reply.
    pub(crate) fn in_flight(&self) -> usize {
        self.shared.in_flight.lock().queue.len()
    }

    pub(crate) fn fail(&self, err: Error) {
        self.shared.fail(err);
    }

    fn send(&self, item: Outgoing) -> Result<()> {
        self.outgoing
            .send(item)
            .map_err(|_| self.shared.failure().unwrap_or(Error::Disposed))
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.shared.fail(Error::Disposed);
    }
}

async fn write_loop(
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    write_half: OwnedWriteHalf,
    shared: Arc<LinkShared>,
    write_timeout: Option<Duration>,
) {
    let mut writer = BufWriter::new(write_half);
    let result = tokio::select! {
        r = pump(&mut rx, &mut writer, &shared, write_timeout) => r,
        _ = closed(shared.shutdown.subscribe()) => Ok(()),
    };
    if let Err(e) = result {
        shared.fail(e);
    }

    // Anything still queued was never written.
    rx.close();
    let err = shared.failure().unwrap_or(Error::Disposed);
    while let Ok(item) = rx.try_recv() {
        item.pending.fail(err.clone());
    }
}

async fn pump(
    rx: &mut mpsc::UnboundedReceiver<Outgoing>,
    writer: &mut BufWriter<OwnedWriteHalf>,
    shared: &LinkShared,
    write_timeout: Option<Duration>,
) -> Result<()> {
    let mut batch: Vec<TransferBuffer> = Vec::new();
    while let Some(first) = rx.recv().await {
        shared.track(first.pending)?;
        batch.push(first.payload);
        while let Ok(item) = rx.try_recv() {
            shared.track(item.pending)?;
            batch.push(item.payload);
        }

        let io = async {
            for payload in &batch {
                writer.write_all(payload).await?;
            }
            writer.flush().await
        };
        match write_timeout {
            Some(limit) => tokio::time::timeout(limit, io).await.map_err(|_| {
                Error::Timeout(format!("write to {} timed out after {limit:?}", shared.addr))
            })??,
            None => io.await?,
        }
        batch.clear();
    }
    Ok(())
}

async fn read_loop(mut frames: FrameReader<OwnedReadHalf>, shared: Arc<LinkShared>) {
    let result = tokio::select! {
        r = dispatch(&mut frames, &shared) => r,
        _ = closed(shared.shutdown.subscribe()) => Ok(()),
    };
    if let Err(e) = result {
        shared.fail(e);
    }
}

/// Resolves once the link has been failed.
async fn closed(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn dispatch(frames: &mut FrameReader<OwnedReadHalf>, shared: &LinkShared) -> Result<()> {
    loop {
        let frame = frames.read_frame().await?;
        let pending = shared
            .in_flight
            .lock()
            .queue
            .pop_front()
            .ok_or_else(|| Error::Protocol("reply received with no call waiting".into()))?;
        pending.complete(frame);
    }
}

// ── Connector ──────────────────────────────────────────────────────

type ConnectOutcome = Option<Result<()>>;

enum LinkState {
    Disconnected,
    /// Shared outcome of the single connect attempt in progress.
    Connecting(watch::Receiver<ConnectOutcome>),
    Connected(Arc<Link>),
    Disposed,
}

enum Step {
    Ready(Arc<Link>),
    Wait(watch::Receiver<ConnectOutcome>),
    Lead(watch::Sender<ConnectOutcome>),
}

/// Owns at most one live link and (re)creates it on demand.
pub struct Connector {
    config: Arc<ConnectionConfig>,
    addr: String,
    buffers: TransferBuffers,
    state: Mutex<LinkState>,
}

impl Connector {
    pub fn new(config: Arc<ConnectionConfig>) -> Self {
        let addr = config.primary_addr();
        let buffers = TransferBuffers::new(config.transfer_buffers, config.max_buffer_size);
        Self {
            config,
            addr,
            buffers,
            state: Mutex::new(LinkState::Disconnected),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        match &*self.state.lock() {
            LinkState::Disconnected => ConnectionState::Disconnected,
            LinkState::Connecting(_) => ConnectionState::Connecting,
            LinkState::Connected(link) if link.is_alive() => ConnectionState::Connected,
            LinkState::Connected(_) => ConnectionState::Disconnected,
            LinkState::Disposed => ConnectionState::Disposed,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Calls written on the current link and still awaiting replies.
    pub fn in_flight(&self) -> usize {
        match &*self.state.lock() {
            LinkState::Connected(link) => link.in_flight(),
            _ => 0,
        }
    }

    /// Return the live link, connecting if needed.
    ///
    /// Concurrent callers share one attempt. If the caller driving the
    /// attempt is cancelled, the next caller starts a fresh one.
    pub(crate) async fn connect(&self) -> Result<Arc<Link>> {
        loop {
            let step = {
                let mut state = self.state.lock();
                let step = match &*state {
                    LinkState::Connected(link) if link.is_alive() => {
                        Some(Step::Ready(Arc::clone(link)))
                    }
                    LinkState::Disposed => return Err(Error::Disposed),
                    LinkState::Connecting(rx) => Some(Step::Wait(rx.clone())),
                    LinkState::Connected(_) | LinkState::Disconnected => None,
                };
                match step {
                    Some(step) => step,
                    None => {
                        let (tx, rx) = watch::channel(None);
                        *state = LinkState::Connecting(rx);
                        Step::Lead(tx)
                    }
                }
            };

            match step {
                Step::Ready(link) => return Ok(link),
                Step::Lead(tx) => return self.lead_connect(tx).await,
                Step::Wait(mut rx) => {
                    let outcome = rx.wait_for(|o| o.is_some()).await.map(|o| o.clone());
                    match outcome {
                        Ok(Some(Err(e))) => return Err(e),
                        Ok(_) => continue,
                        Err(_) => self.reset_abandoned(&rx),
                    }
                }
            }
        }
    }

    async fn lead_connect(&self, tx: watch::Sender<ConnectOutcome>) -> Result<Arc<Link>> {
        let result = self.establish().await;
        let outcome = {
            let mut state = self.state.lock();
            let disposed = matches!(*state, LinkState::Disposed);
            match result {
                Ok(_) if disposed => Err(Error::Disposed),
                Ok(link) => {
                    *state = LinkState::Connected(Arc::clone(&link));
                    Ok(link)
                }
                Err(e) => {
                    if !disposed {
                        *state = LinkState::Disconnected;
                    }
                    Err(e)
                }
            }
        };
        tx.send_replace(Some(outcome.as_ref().map(|_| ()).map_err(Clone::clone)));
        outcome
    }

    /// The connecting caller went away without publishing an outcome.
    fn reset_abandoned(&self, rx: &watch::Receiver<ConnectOutcome>) {
        let mut state = self.state.lock();
        let abandoned = matches!(&*state, LinkState::Connecting(cur) if cur.same_channel(rx));
        if abandoned {
            *state = LinkState::Disconnected;
        }
    }

    async fn establish(&self) -> Result<Arc<Link>> {
        let stream = match framed::open(&self.addr, self.config.connect_timeout()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "connect failed");
                return Err(e);
            }
        };
        let link = Arc::new(Link::spawn(stream, &self.addr, &self.config));
        if let Err(e) = self.handshake(&link).await {
            warn!(addr = %self.addr, error = %e, "handshake failed");
            link.fail(e.clone());
            return Err(e);
        }
        info!(addr = %self.addr, db = self.config.db, "connected");
        Ok(link)
    }

    /// AUTH and SELECT run through the link before it is published.
    async fn handshake(&self, link: &Link) -> Result<()> {
        if let Some(password) = &self.config.password {
            let auth = commands::auth(self.config.username.as_deref(), password);
            self.call_on(link, &auth).await?;
            debug!(addr = %self.addr, "authenticated");
        }
        if self.config.db != 0 {
            self.call_on(link, &commands::select(self.config.db)).await?;
            debug!(addr = %self.addr, db = self.config.db, "database selected");
        }
        Ok(())
    }

    /// Queue `cmd` and return the future of its reply.
    pub async fn submit<T: Send + 'static>(&self, cmd: &Command<T>) -> Result<Reply<T>> {
        let link = self.connect().await?;
        self.enqueue(&link, cmd).await
    }

    /// Queue `cmd` and wait for its reply, bounded by the reply timeout
    /// plus however long the command may block on the server.
    pub async fn call<T: Send + 'static>(&self, cmd: &Command<T>) -> Result<T> {
        let link = self.connect().await?;
        self.call_on(&link, cmd).await
    }

    async fn call_on<T: Send + 'static>(&self, link: &Link, cmd: &Command<T>) -> Result<T> {
        let reply = self.enqueue(link, cmd).await?;
        match cmd.blocking_mode().reply_limit(self.config.read_timeout()) {
            None => reply.await,
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(result) => result,
                Err(_) => {
                    // A late reply would be matched to the next caller.
                    let err = Error::Timeout(format!(
                        "{} got no reply from {} within {limit:?}",
                        cmd.name(),
                        self.addr
                    ));
                    link.fail(err.clone());
                    Err(err)
                }
            },
        }
    }

    async fn enqueue<T: Send + 'static>(&self, link: &Link, cmd: &Command<T>) -> Result<Reply<T>> {
        let mut payload = self.buffers.acquire(cmd.encoded_len()).await?;
        cmd.encode_into(&mut payload);
        let (tx, rx) = oneshot::channel();
        link.send(Outgoing {
            payload,
            pending: Box::new(PendingCall {
                parse: cmd.parser(),
                tx,
            }),
        })?;
        Ok(Reply { rx })
    }

    /// Drop the current link so the next call connects afresh.
    pub fn disconnect(&self) {
        let old = {
            let mut state = self.state.lock();
            match &*state {
                LinkState::Connected(_) => std::mem::replace(&mut *state, LinkState::Disconnected),
                _ => return,
            }
        };
        if let LinkState::Connected(link) = old {
            link.fail(Error::connection(
                io::ErrorKind::ConnectionAborted,
                "connection closed by client",
            ));
        }
    }

    /// Fail every pending call with `Disposed` and refuse further use.
    pub fn dispose(&self) {
        let old = std::mem::replace(&mut *self.state.lock(), LinkState::Disposed);
        self.buffers.close();
        if let LinkState::Connected(link) = old {
            link.fail(Error::Disposed);
        }
        debug!(addr = %self.addr, "connector disposed");
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        if let LinkState::Connected(link) = &*self.state.lock() {
            link.fail(Error::Disposed);
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
