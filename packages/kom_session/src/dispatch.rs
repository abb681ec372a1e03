//! Routing of asynchronous server messages to subscribers.
//!
//! Handlers are registered per message kind and run detached, one task per
//! handler per message, so a slow or failing handler never stalls the
//! connection's receive loop. Messages nobody subscribed to land in a bounded
//! fallback queue that polling consumers drain.

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use protocol_a::{AsyncKind, AsyncMessage, Token};

use crate::error::{KomError, KomResult};

pub type AsyncHandler =
    Arc<dyn Fn(AsyncMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Oldest messages are dropped beyond this many unconsumed ones.
pub const FALLBACK_QUEUE_CAPACITY: usize = 1000;

pub struct AsyncDispatcher {
    handlers: RwLock<HashMap<AsyncKind, Vec<AsyncHandler>>>,
    fallback: Mutex<VecDeque<AsyncMessage>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Default for AsyncDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            fallback: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe `handler` to messages with Protocol A number `msg_no`.
    pub fn register_handler(&self, msg_no: u32, handler: AsyncHandler) -> KomResult<()> {
        let kind = AsyncKind::from_msg_no(msg_no).ok_or(KomError::UnimplementedAsyncKind(msg_no))?;
        self.handlers.write().entry(kind).or_default().push(handler);
        debug!(?kind, "registered async handler");
        Ok(())
    }

    /// Closure-friendly form of [`register_handler`](Self::register_handler).
    pub fn on<F, Fut>(&self, kind: AsyncKind, f: F)
    where
        F: Fn(AsyncMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: AsyncHandler = Arc::new(move |msg| f(msg).boxed());
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    pub fn has_handlers(&self, kind: AsyncKind) -> bool {
        self.handlers
            .read()
            .get(&kind)
            .is_some_and(|hs| !hs.is_empty())
    }

    /// Hand a decoded message to every handler for its kind, or queue it.
    pub fn dispatch(&self, msg: AsyncMessage) {
        let kind = msg.kind();
        let handlers = self.handlers.read().get(&kind).cloned().unwrap_or_default();

        if handlers.is_empty() {
            self.enqueue(msg);
            return;
        }

        for handler in handlers {
            let msg = msg.clone();
            tokio::spawn(async move {
                let run = AssertUnwindSafe(async move { handler(msg).await }).catch_unwind();
                match run.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(?kind, error = %e, "async handler failed"),
                    Err(_) => error!(?kind, "async handler panicked"),
                }
            });
        }
    }

    /// Entry point for the receive loop: decode and dispatch an async frame.
    pub(crate) fn dispatch_frame(&self, msg_no: u32, body: Vec<Token>) {
        match AsyncMessage::decode(msg_no, body) {
            Ok(Some(msg)) => self.dispatch(msg),
            Ok(None) => warn!(msg_no, "skipping unimplemented async message"),
            Err(e) => warn!(msg_no, error = %e, "dropping undecodable async message"),
        }
    }

    fn enqueue(&self, msg: AsyncMessage) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut queue = self.fallback.lock();
            if queue.len() >= FALLBACK_QUEUE_CAPACITY {
                queue.pop_front();
                warn!("async fallback queue full, dropping oldest message");
            }
            queue.push_back(msg);
        }
        self.notify.notify_waiters();
    }

    /// Wait for the next unhandled message.
    ///
    /// Buffered messages are still returned after the connection ends; once
    /// they are gone this fails with `ConnectionClosed`.
    pub async fn next_message(&self) -> KomResult<AsyncMessage> {
        loop {
            let notified = self.notify.notified();
            if let Some(msg) = self.fallback.lock().pop_front() {
                return Ok(msg);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(KomError::ConnectionClosed);
            }
            notified.await;
        }
    }

    /// Take up to `limit` buffered messages without waiting.
    pub fn drain(&self, limit: usize) -> Vec<AsyncMessage> {
        let mut queue = self.fallback.lock();
        let n = limit.min(queue.len());
        queue.drain(..n).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.fallback.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// No more messages will arrive. Wakes every waiter.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn login(person_no: u32) -> AsyncMessage {
        AsyncMessage::Login {
            person_no,
            session_no: 1,
        }
    }

    #[test]
    fn registering_unknown_kind_fails() {
        let d = AsyncDispatcher::new();
        let handler: AsyncHandler =
            Arc::new(|_msg: AsyncMessage| -> BoxFuture<'static, anyhow::Result<()>> {
                async { anyhow::Ok(()) }.boxed()
            });
        assert_eq!(
            d.register_handler(3, handler.clone()),
            Err(KomError::UnimplementedAsyncKind(3))
        );
        assert!(d.register_handler(9, handler).is_ok());
        assert!(d.has_handlers(AsyncKind::Login));
    }

    #[tokio::test]
    async fn every_handler_for_a_kind_runs() {
        let d = AsyncDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for id in 0..3 {
            let tx = tx.clone();
            d.on(AsyncKind::Login, move |msg| {
                let tx = tx.clone();
                async move {
                    tx.send((id, msg))?;
                    anyhow::Ok(())
                }
            });
        }

        d.dispatch(login(6));
        let mut seen = Vec::new();
        for _ in 0..3 {
            let (id, msg) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(msg, login(6));
            seen.push(id);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(d.pending_len(), 0);
    }

    #[tokio::test]
    async fn failing_and_panicking_handlers_are_contained() {
        let d = AsyncDispatcher::new();
        let ran = Arc::new(AtomicUsize::new(0));
        d.on(AsyncKind::Login, |_| async {
            Err::<(), _>(anyhow::anyhow!("nope"))
        });
        d.on(AsyncKind::Login, |msg| async move {
            if matches!(msg, AsyncMessage::Login { .. }) {
                panic!("handler bug");
            }
            anyhow::Ok(())
        });
        let counter = ran.clone();
        d.on(AsyncKind::Login, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });

        d.dispatch(login(1));
        d.dispatch(login(2));
        tokio::time::timeout(Duration::from_secs(1), async {
            while ran.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unhandled_kinds_go_to_fallback_queue() {
        let d = AsyncDispatcher::new();
        d.on(AsyncKind::Logout, |_| async { anyhow::Ok(()) });

        d.dispatch(login(1));
        d.dispatch(AsyncMessage::SyncDb);
        d.dispatch(AsyncMessage::Logout {
            person_no: 1,
            session_no: 1,
        });

        assert_eq!(d.pending_len(), 2);
        assert_eq!(d.next_message().await.unwrap(), login(1));
        assert_eq!(d.drain(10), vec![AsyncMessage::SyncDb]);
        assert!(d.drain(10).is_empty());
    }

    #[tokio::test]
    async fn next_message_waits_for_dispatch() {
        let d = Arc::new(AsyncDispatcher::new());
        let waiter = {
            let d = d.clone();
            tokio::spawn(async move { d.next_message().await })
        };
        tokio::task::yield_now().await;
        d.dispatch(login(7));
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.unwrap(), login(7));
    }

    #[tokio::test]
    async fn close_drains_buffer_then_reports_closed() {
        let d = Arc::new(AsyncDispatcher::new());
        d.dispatch(login(1));
        d.close();
        assert_eq!(d.next_message().await.unwrap(), login(1));
        assert_eq!(d.next_message().await, Err(KomError::ConnectionClosed));

        // Messages after close are discarded.
        d.dispatch(login(2));
        assert_eq!(d.pending_len(), 0);
    }

    #[tokio::test]
    async fn close_wakes_blocked_waiter() {
        let d = Arc::new(AsyncDispatcher::new());
        let waiter = {
            let d = d.clone();
            tokio::spawn(async move { d.next_message().await })
        };
        tokio::task::yield_now().await;
        d.close();
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Err(KomError::ConnectionClosed));
    }

    #[test]
    fn fallback_queue_is_bounded() {
        let d = AsyncDispatcher::new();
        for i in 0..(FALLBACK_QUEUE_CAPACITY as u32 + 5) {
            d.enqueue(login(i));
        }
        assert_eq!(d.pending_len(), FALLBACK_QUEUE_CAPACITY);
        assert_eq!(d.drain(1), vec![login(5)]);
    }
}
