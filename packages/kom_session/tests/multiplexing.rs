//! Request multiplexing over a real socket with a hand-driven server.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;

use kom_session::{AsyncDispatcher, Broker, Connection, ConnectionState, KomError};
use protocol_a::{AsyncMessage, IncomingRequest, Request, ServerCodec};

async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn accept(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let user = protocol_a::server_handshake(&mut stream).await.unwrap();
    assert_eq!(user, "tester");
    stream
}

async fn read_requests(
    reader: &mut FramedRead<tokio::net::tcp::ReadHalf<'_>, ServerCodec>,
    n: usize,
) -> Vec<IncomingRequest> {
    let mut out = Vec::new();
    for _ in 0..n {
        out.push(reader.next().await.unwrap().unwrap());
    }
    out
}

async fn open(port: u16, dispatcher: Arc<AsyncDispatcher>) -> Broker {
    let conn = Connection::open(
        "127.0.0.1",
        port,
        "tester",
        dispatcher,
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    Broker::new(Arc::new(conn), Some(Duration::from_secs(2)))
}

#[tokio::test]
async fn overlapping_requests_resolve_out_of_order() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept(&listener).await;
        let (read, mut write) = stream.split();
        let mut reader = FramedRead::new(read, ServerCodec);
        let reqs = read_requests(&mut reader, 3).await;
        // Answer the third first, each with its own conf number.
        for idx in [2, 0, 1] {
            let req = &reqs[idx];
            let conf_no = req.reader().int().unwrap();
            let line = format!("={} 8Hconf-{:03} 00000000 {} 0\n", req.ref_no, conf_no, conf_no);
            write.write_all(line.as_bytes()).await.unwrap();
        }
        // Keep the socket open until the client is done.
        let _ = reader.next().await;
    });

    let broker = open(port, Arc::new(AsyncDispatcher::new())).await;
    let name = |conf_no: u32| {
        let broker = broker.clone();
        async move {
            broker
                .call::<protocol_a::types::UConference>(Request::GetUconfStat { conf_no })
                .await
                .map(|u| (u.name, u.highest_local_no))
        }
    };
    let (a, b, c) = tokio::time::timeout(
        Duration::from_secs(2),
        async { tokio::join!(name(101), name(102), name(103)) },
    )
    .await
    .unwrap();
    assert_eq!(a.unwrap(), ("conf-101".to_string(), 101));
    assert_eq!(b.unwrap(), ("conf-102".to_string(), 102));
    assert_eq!(c.unwrap(), ("conf-103".to_string(), 103));
    assert_eq!(broker.connection().pending_count(), 0);

    broker.connection().close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn killed_socket_fails_every_pending_request() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept(&listener).await;
        let (read, _write) = stream.split();
        let mut reader = FramedRead::new(read, ServerCodec);
        read_requests(&mut reader, 5).await;
        // Dropping the stream resets the connection with all five unanswered.
    });

    let broker = open(port, Arc::new(AsyncDispatcher::new())).await;
    let mut state = broker.connection().subscribe_state();
    let calls: Vec<_> = (0..5)
        .map(|_| {
            let broker = broker.clone();
            tokio::spawn(async move { broker.call_unit(Request::UserActive).await })
        })
        .collect();

    let results = tokio::time::timeout(Duration::from_secs(2), async {
        let mut out = Vec::new();
        for call in calls {
            out.push(call.await.unwrap());
        }
        out
    })
    .await
    .unwrap();
    server.await.unwrap();

    assert_eq!(results.len(), 5);
    for result in results {
        assert_eq!(result, Err(KomError::ConnectionClosed));
    }
    state
        .wait_for(|s| matches!(s, ConnectionState::Dead(_)))
        .await
        .unwrap();
    assert_eq!(broker.connection().pending_count(), 0);
    assert_eq!(
        broker.call_unit(Request::UserActive).await,
        Err(KomError::ConnectionClosed)
    );
}

#[tokio::test]
async fn async_messages_interleave_with_pending_requests() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept(&listener).await;
        let (read, mut write) = stream.split();
        let mut reader = FramedRead::new(read, ServerCodec);
        let reqs = read_requests(&mut reader, 2).await;
        let who = reqs.iter().find(|r| r.call_no == 56).unwrap().ref_no;
        let active = reqs.iter().find(|r| r.call_no == 82).unwrap().ref_no;
        let script = format!(":2 9 6 1\n={who} 4711\n:1 4 7\n={active}\n");
        write.write_all(script.as_bytes()).await.unwrap();
        let _ = reader.next().await;
    });

    let dispatcher = Arc::new(AsyncDispatcher::new());
    let broker = open(port, dispatcher.clone()).await;
    let (who, active) = tokio::join!(
        broker.call::<u32>(Request::WhoAmI),
        broker.call_unit(Request::UserActive)
    );
    assert_eq!(who.unwrap(), 4711);
    active.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), dispatcher.next_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        first,
        AsyncMessage::Login {
            person_no: 6,
            session_no: 1
        }
    );
    let second = dispatcher.next_message().await.unwrap();
    assert_eq!(second, AsyncMessage::LeaveConf { conf_no: 7 });

    broker.connection().close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn closing_unblocks_waiters() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept(&listener).await;
        let (read, _write) = stream.split();
        let mut reader = FramedRead::new(read, ServerCodec);
        read_requests(&mut reader, 1).await;
        let _ = reader.next().await;
    });

    let dispatcher = Arc::new(AsyncDispatcher::new());
    let broker = open(port, dispatcher.clone()).await;
    let pending = broker.connection().send(Request::WhoAmI).await.unwrap();
    let waiter = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.next_message().await }
    });

    broker.connection().close().await;
    assert_eq!(pending.wait().await, Err(KomError::ConnectionClosed));
    assert_eq!(broker.connection().state(), ConnectionState::Closed);
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap(),
        Err(KomError::ConnectionClosed)
    );
    server.await.unwrap();
}
