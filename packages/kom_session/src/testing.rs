//! A small scriptable LysKOM server for tests.
//!
//! Speaks enough of Protocol A for the calls sessions make: greeting,
//! client version, async acceptance, who-am-i, login/logout, name lookup,
//! conference status, messages and disconnect. Tests can inject async
//! messages, silence the server, or kill every connection.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Encoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use protocol_a::{Frame, IncomingRequest, ServerCodec, ServerError, Token};

enum Outgoing {
    Frame(Frame),
    Close,
}

#[derive(Default)]
struct Client {
    person_no: Option<u32>,
}

#[derive(Default)]
struct FakeState {
    /// person_no -> (name, password)
    persons: HashMap<u32, (String, String)>,
    conferences: HashMap<u32, String>,
    clients: Mutex<HashMap<u32, (mpsc::UnboundedSender<Outgoing>, Client)>>,
    requests: Mutex<Vec<IncomingRequest>>,
    next_session: AtomicU32,
    silent: AtomicBool,
    /// Calls answered with a body that does not decode.
    garbled: Mutex<HashSet<u32>>,
}

#[derive(Default)]
pub struct FakeServerBuilder {
    persons: HashMap<u32, (String, String)>,
    conferences: HashMap<u32, String>,
}

impl FakeServerBuilder {
    pub fn person(mut self, person_no: u32, name: &str, password: &str) -> Self {
        self.persons
            .insert(person_no, (name.to_string(), password.to_string()));
        self
    }

    pub fn conference(mut self, conf_no: u32, name: &str) -> Self {
        self.conferences.insert(conf_no, name.to_string());
        self
    }

    pub async fn start(self) -> std::io::Result<FakeServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(FakeState {
            persons: self.persons,
            conferences: self.conferences,
            next_session: AtomicU32::new(1),
            ..Default::default()
        });
        let cancel = CancellationToken::new();

        let accept_state = state.clone();
        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    res = listener.accept() => match res {
                        Ok((stream, _)) => stream,
                        Err(_) => break,
                    },
                };
                tokio::spawn(serve_client(stream, accept_state.clone(), accept_cancel.clone()));
            }
        });

        Ok(FakeServer {
            addr,
            state,
            cancel,
        })
    }
}

pub struct FakeServer {
    addr: SocketAddr,
    state: Arc<FakeState>,
    cancel: CancellationToken,
}

impl FakeServer {
    pub fn builder() -> FakeServerBuilder {
        FakeServerBuilder::default()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop answering requests (they are still recorded).
    pub fn set_silent(&self, silent: bool) {
        self.state.silent.store(silent, Ordering::SeqCst);
    }

    /// Answer `call_no` with a well-framed reply whose body is the wrong shape.
    pub fn garble_replies(&self, call_no: u32, garbled: bool) {
        let mut calls = self.state.garbled.lock();
        if garbled {
            calls.insert(call_no);
        } else {
            calls.remove(&call_no);
        }
    }

    /// Send an async message to every connected client.
    pub fn broadcast_async(&self, msg_no: u32, body: Vec<Token>) {
        for (tx, _) in self.state.clients.lock().values() {
            let _ = tx.send(Outgoing::Frame(Frame::Async {
                msg_no,
                body: body.clone(),
            }));
        }
    }

    /// Drop every client socket.
    pub fn kill_connections(&self) {
        for (tx, _) in self.state.clients.lock().values() {
            let _ = tx.send(Outgoing::Close);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.state.clients.lock().len()
    }

    /// Call numbers received so far, in arrival order.
    pub fn received_calls(&self) -> Vec<u32> {
        self.state
            .requests
            .lock()
            .iter()
            .map(|r| r.call_no)
            .collect()
    }

    pub fn received(&self) -> Vec<IncomingRequest> {
        self.state.requests.lock().clone()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub fn num(n: impl ToString) -> Token {
    Token::Number(n.to_string())
}

pub fn string(s: &str) -> Token {
    Token::Str(Bytes::from(protocol_a::string_to_latin1(s)))
}

async fn serve_client(mut stream: TcpStream, state: Arc<FakeState>, cancel: CancellationToken) {
    if let Err(e) = protocol_a::server_handshake(&mut stream).await {
        debug!(error = %e, "fake server: bad greeting");
        return;
    }
    let session_no = state.next_session.fetch_add(1, Ordering::SeqCst);
    let (tx, mut rx) = mpsc::unbounded_channel();
    state
        .clients
        .lock()
        .insert(session_no, (tx.clone(), Client::default()));

    let (read_half, mut write_half) = stream.into_split();
    let writer = tokio::spawn(async move {
        let mut codec = ServerCodec;
        while let Some(out) = rx.recv().await {
            let frame = match out {
                Outgoing::Frame(frame) => frame,
                Outgoing::Close => break,
            };
            let mut buf = BytesMut::new();
            if codec.encode(frame, &mut buf).is_err() || write_half.write_all(&buf).await.is_err()
            {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut requests = FramedRead::new(read_half, ServerCodec);
    loop {
        let req = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tx.closed() => break,
            req = requests.next() => match req {
                Some(Ok(req)) => req,
                _ => break,
            },
        };
        state.requests.lock().push(req.clone());
        if state.silent.load(Ordering::SeqCst) {
            continue;
        }
        respond(&state, session_no, &tx, req);
    }

    state.clients.lock().remove(&session_no);
    writer.abort();
}

fn respond(
    state: &FakeState,
    session_no: u32,
    tx: &mpsc::UnboundedSender<Outgoing>,
    req: IncomingRequest,
) {
    let ref_no = req.ref_no;
    let ok = |body: Vec<Token>| Outgoing::Frame(Frame::Reply { ref_no, body });
    let fail = |code: u32, status: u32| {
        Outgoing::Frame(Frame::Error {
            ref_no,
            error: ServerError::new(code, status),
        })
    };
    let logged_in = || {
        state
            .clients
            .lock()
            .get(&session_no)
            .and_then(|(_, c)| c.person_no)
    };
    if state.garbled.lock().contains(&req.call_no) {
        let _ = tx.send(ok(vec![string("hello")]));
        return;
    }
    let mut args = req.reader();

    let reply = match req.call_no {
        // set-client-version, accept-async, user-active
        69 | 80 | 82 => ok(vec![]),
        56 => ok(vec![num(session_no)]),
        62 => {
            let person_no = args.int().unwrap_or_default();
            let password = args.string().unwrap_or_default();
            match state.persons.get(&person_no) {
                Some((_, expected)) if *expected == password => {
                    if let Some((_, client)) = state.clients.lock().get_mut(&session_no) {
                        client.person_no = Some(person_no);
                    }
                    ok(vec![])
                }
                Some(_) => fail(ServerError::INVALID_PASSWORD, 0),
                None => fail(ServerError::UNDEFINED_PERSON, person_no),
            }
        }
        1 => {
            if let Some((_, client)) = state.clients.lock().get_mut(&session_no) {
                client.person_no = None;
            }
            ok(vec![])
        }
        2 => match logged_in() {
            None => fail(ServerError::LOGIN_FIRST, 0),
            Some(_) => {
                let conf_no = args.int().unwrap_or_default();
                if state.conferences.contains_key(&conf_no) || state.persons.contains_key(&conf_no)
                {
                    ok(vec![])
                } else {
                    fail(ServerError::UNDEFINED_CONFERENCE, conf_no)
                }
            }
        },
        76 => {
            let name = args.string().unwrap_or_default().to_lowercase();
            let want_persons = args.bool().unwrap_or(true);
            let want_confs = args.bool().unwrap_or(true);
            let mut hits: Vec<(u32, String, &str)> = Vec::new();
            if want_persons {
                for (no, (n, _)) in &state.persons {
                    hits.push((*no, n.clone(), "1001"));
                }
            }
            if want_confs {
                for (no, n) in &state.conferences {
                    hits.push((*no, n.clone(), "0000"));
                }
            }
            hits.retain(|(_, n, _)| n.to_lowercase().starts_with(&name));
            hits.sort_by_key(|(no, _, _)| *no);
            let mut body = vec![num(hits.len()), Token::ArrayStart];
            for (no, n, bits) in hits {
                body.extend([string(&n), num(bits), num(no)]);
            }
            body.push(Token::ArrayEnd);
            ok(body)
        }
        78 => {
            let conf_no = args.int().unwrap_or_default();
            let name = state
                .conferences
                .get(&conf_no)
                .cloned()
                .or_else(|| state.persons.get(&conf_no).map(|(n, _)| n.clone()));
            match name {
                Some(name) => ok(vec![string(&name), num("00000000"), num(0), num(77)]),
                None => fail(ServerError::UNDEFINED_CONFERENCE, conf_no),
            }
        }
        53 => match logged_in() {
            None => fail(ServerError::LOGIN_FIRST, 0),
            Some(sender) => {
                let recipient = args.int().unwrap_or_default();
                let message = args.string().unwrap_or_default();
                let body = vec![num(recipient), num(sender), string(&message)];
                for (tx, client) in state.clients.lock().values() {
                    if recipient == 0 || client.person_no == Some(recipient) {
                        let _ = tx.send(Outgoing::Frame(Frame::Async {
                            msg_no: 12,
                            body: body.clone(),
                        }));
                    }
                }
                ok(vec![])
            }
        },
        55 => {
            let target = args.int().unwrap_or_default();
            if target == 0 || target == session_no {
                let _ = tx.send(ok(vec![]));
                let _ = tx.send(Outgoing::Close);
                return;
            }
            match state.clients.lock().get(&target) {
                Some((other, _)) => {
                    let _ = other.send(Outgoing::Close);
                    ok(vec![])
                }
                None => fail(ServerError::UNDEFINED_SESSION, target),
            }
        }
        _ => fail(ServerError::NOT_IMPLEMENTED, 0),
    };
    let _ = tx.send(reply);
}
