//! Connection actor: one socket, one send loop, one receive loop.
//!
//! ```text
//!   callers ──send()──▶ [command queue] ──▶ send loop ──▶ socket
//!      ▲                                       │ registers ref_no
//!      │                                       ▼ before writing
//!      └──── oneshot ◀── pending map ◀── receive loop ◀── socket
//!                                              │
//!                                              └──▶ AsyncDispatcher
//! ```
//!
//! The two loops share nothing but the command queue, the pending map and
//! the cancellation token. Any receive failure is connection-fatal: every
//! pending request is failed with `ConnectionClosed` and the state becomes
//! `Dead`.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use protocol_a::{CodecError, Frame, KomCodec, OutgoingRequest, RefNo, Request, Token};

use crate::dispatch::AsyncDispatcher;
use crate::error::{KomError, KomResult};

const COMMAND_QUEUE_DEPTH: usize = 64;

/// Body of a successful reply, or the error the server (or connection) gave.
pub type Reply = KomResult<Vec<Token>>;

type PendingMap = Arc<Mutex<HashMap<RefNo, oneshot::Sender<Reply>>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// Closed on request.
    Closed,
    /// Failed on its own; the reason is for logs.
    Dead(String),
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

struct SendCommand {
    request: Request,
    reply_to: oneshot::Sender<Reply>,
    written: oneshot::Sender<KomResult<RefNo>>,
}

/// A request that has been written to the socket and awaits its reply.
#[derive(Debug)]
pub struct PendingReply {
    pub ref_no: RefNo,
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    pub async fn wait(self) -> Reply {
        self.rx.await.map_err(|_| KomError::ConnectionClosed)?
    }
}

pub struct Connection {
    host: String,
    port: u16,
    commands: mpsc::Sender<SendCommand>,
    pending: PendingMap,
    state: watch::Receiver<ConnectionState>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl Connection {
    /// Connect, perform the greeting, and start both loops.
    pub async fn open(
        host: &str,
        port: u16,
        user: &str,
        dispatcher: Arc<AsyncDispatcher>,
        connect_timeout: Duration,
    ) -> KomResult<Self> {
        let connect_err = |reason: String| KomError::Connect {
            host: host.to_string(),
            port,
            reason,
        };

        let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| connect_err("timed out".into()))?
            .map_err(|e| connect_err(e.to_string()))?;
        stream.set_nodelay(true).ok();

        tokio::time::timeout(
            connect_timeout,
            protocol_a::client_handshake(&mut stream, user),
        )
        .await
        .map_err(|_| connect_err("handshake timed out".into()))?
        .map_err(|e| connect_err(e.to_string()))?;

        info!(host, port, "connected to LysKOM server");
        Ok(Self::start(stream, host, port, dispatcher))
    }

    /// Start the loops over an already greeted stream.
    pub fn start<S>(stream: S, host: &str, port: u16, dispatcher: Arc<AsyncDispatcher>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (state_tx, state) = watch::channel(ConnectionState::Open);
        let state_tx = Arc::new(state_tx);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let send_task = tokio::spawn(send_loop(
            FramedWrite::new(write_half, KomCodec::new()),
            command_rx,
            pending.clone(),
            cancel.clone(),
            state_tx.clone(),
        ));
        let read_task = tokio::spawn(read_loop(
            FramedRead::new(read_half, KomCodec::new()),
            pending.clone(),
            dispatcher,
            cancel.clone(),
            state_tx.clone(),
        ));

        Self {
            host: host.to_string(),
            port,
            commands,
            pending,
            state,
            state_tx,
            cancel,
            tasks: tokio::sync::Mutex::new(Some((send_task, read_task))),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().is_open()
    }

    /// Watch for state transitions (for example to notice the socket dying).
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Number of requests written but not yet answered.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Queue `request` and wait until it has been written to the socket.
    ///
    /// The reply slot is registered before the bytes leave, so a reply can
    /// never overtake its own registration.
    pub async fn send(&self, request: Request) -> KomResult<PendingReply> {
        if !self.is_open() {
            return Err(KomError::ConnectionClosed);
        }
        let (reply_to, rx) = oneshot::channel();
        let (written, written_rx) = oneshot::channel();
        self.commands
            .send(SendCommand {
                request,
                reply_to,
                written,
            })
            .await
            .map_err(|_| KomError::ConnectionClosed)?;
        let ref_no = written_rx.await.map_err(|_| KomError::ConnectionClosed)??;
        Ok(PendingReply { ref_no, rx })
    }

    /// Stop both loops and fail everything pending. Safe to call repeatedly.
    pub async fn close(&self) {
        self.cancel.cancel();
        let tasks = self.tasks.lock().await.take();
        if let Some((send_task, read_task)) = tasks {
            let _ = send_task.await;
            let _ = read_task.await;
            self.state_tx.send_if_modified(|state| {
                if state.is_open() {
                    *state = ConnectionState::Closed;
                    true
                } else {
                    false
                }
            });
            fail_all(&self.pending);
            debug!(host = %self.host, port = self.port, "connection closed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn fail_all(pending: &PendingMap) {
    let drained: Vec<_> = pending.lock().drain().collect();
    if !drained.is_empty() {
        debug!(count = drained.len(), "failing pending requests");
    }
    for (_, tx) in drained {
        let _ = tx.send(Err(KomError::ConnectionClosed));
    }
}

fn mark_dead(state_tx: &watch::Sender<ConnectionState>, reason: String) {
    state_tx.send_if_modified(|state| {
        if state.is_open() {
            *state = ConnectionState::Dead(reason);
            true
        } else {
            false
        }
    });
}

/// Errors after which the socket cannot carry another request.
fn is_fatal_write_error(e: &CodecError) -> bool {
    match e {
        CodecError::Io(io) => matches!(
            io.kind(),
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::UnexpectedEof
                | io::ErrorKind::WriteZero
        ),
        _ => false,
    }
}

async fn send_loop<W>(
    mut sink: FramedWrite<W, KomCodec>,
    mut commands: mpsc::Receiver<SendCommand>,
    pending: PendingMap,
    cancel: CancellationToken,
    state_tx: Arc<watch::Sender<ConnectionState>>,
) where
    W: AsyncWrite + Unpin,
{
    let mut next_ref: RefNo = 1;

    loop {
        let cmd = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            cmd = commands.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };

        // Checked under the lock: fail_all runs after cancel, so a slot
        // inserted here is either drained by it or never inserted.
        let ref_no = {
            let mut map = pending.lock();
            if cancel.is_cancelled() {
                drop(map);
                let _ = cmd.written.send(Err(KomError::ConnectionClosed));
                break;
            }
            while map.contains_key(&next_ref) {
                next_ref = next_ref.wrapping_add(1).max(1);
            }
            let ref_no = next_ref;
            next_ref = next_ref.wrapping_add(1).max(1);
            map.insert(ref_no, cmd.reply_to);
            ref_no
        };

        debug!(ref_no, request = cmd.request.name(), "sending request");
        let outgoing = OutgoingRequest {
            ref_no,
            request: cmd.request,
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                pending.lock().remove(&ref_no);
                let _ = cmd.written.send(Err(KomError::ConnectionClosed));
                break;
            }
            result = sink.send(outgoing) => result,
        };

        match result {
            Ok(()) => {
                let _ = cmd.written.send(Ok(ref_no));
            }
            Err(e) => {
                pending.lock().remove(&ref_no);
                if is_fatal_write_error(&e) {
                    warn!(ref_no, error = %e, "write failed, connection is dead");
                    let _ = cmd.written.send(Err(KomError::ConnectionClosed));
                    mark_dead(&state_tx, format!("write failed: {e}"));
                    cancel.cancel();
                    break;
                }
                warn!(ref_no, error = %e, "write failed");
                let _ = cmd.written.send(Err(KomError::Send(e.to_string())));
            }
        }
    }

    commands.close();
    while let Ok(cmd) = commands.try_recv() {
        let _ = cmd.written.send(Err(KomError::ConnectionClosed));
    }
    fail_all(&pending);
}

async fn read_loop<R>(
    mut frames: FramedRead<R, KomCodec>,
    pending: PendingMap,
    dispatcher: Arc<AsyncDispatcher>,
    cancel: CancellationToken,
    state_tx: Arc<watch::Sender<ConnectionState>>,
) where
    R: AsyncRead + Unpin,
{
    let failure = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break None,
            next = frames.next() => next,
        };
        match next {
            None => break Some("connection closed by server".to_string()),
            Some(Err(e)) => break Some(e.to_string()),
            Some(Ok(Frame::Async { msg_no, body })) => dispatcher.dispatch_frame(msg_no, body),
            Some(Ok(Frame::Reply { ref_no, body })) => {
                if !resolve(&pending, ref_no, Ok(body)) {
                    break Some(format!("reply for unknown reference number {ref_no}"));
                }
            }
            Some(Ok(Frame::Error { ref_no, error })) => {
                if !resolve(&pending, ref_no, Err(KomError::Server(error))) {
                    break Some(format!("error for unknown reference number {ref_no}"));
                }
            }
        }
    };

    if let Some(reason) = failure {
        warn!(%reason, "connection lost");
        mark_dead(&state_tx, reason);
        cancel.cancel();
    }
    fail_all(&pending);
    dispatcher.close();
}

/// Hand `reply` to the waiter for `ref_no`. False if nobody was waiting,
/// which means the server and the client disagree about what is in flight.
fn resolve(pending: &PendingMap, ref_no: RefNo, reply: Reply) -> bool {
    let Some(tx) = pending.lock().remove(&ref_no) else {
        error!(ref_no, "reply does not match any pending request");
        return false;
    };
    if tx.send(reply).is_err() {
        debug!(ref_no, "discarding reply for abandoned request");
    }
    true
}
