//! Serves a [`SessionRegistry`] to [`RpcClient`](super::RpcClient)s.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::method::{CallArgs, Method};
use super::{Envelope, PROTOCOL_VERSION, RpcReply, RpcRequest, StreamItem, read_frame, write_frame};
use crate::error::{KomError, KomResult};
use crate::registry::SessionRegistry;
use crate::session::{KomSession, SessionState};

#[derive(Clone)]
pub struct RpcServer {
    registry: Arc<SessionRegistry>,
}

impl RpcServer {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Accept connections until `shutdown` fires, then close every session.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> KomResult<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("session server listening on {}", addr);
        }
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "rpc client connected");
                        let server = self.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = server.serve_connection(stream, shutdown).await {
                                debug!(%peer, error = %e, "rpc connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }
        self.registry.close_all().await;
        info!("session server stopped");
        Ok(())
    }

    async fn serve_connection(&self, mut stream: TcpStream, shutdown: CancellationToken) -> KomResult<()> {
        stream.set_nodelay(true).ok();
        while let Some(envelope) = read_frame::<_, Envelope>(&mut stream).await? {
            if envelope.version != PROTOCOL_VERSION {
                let e = KomError::Rpc(format!(
                    "protocol version {} not supported (expected {PROTOCOL_VERSION})",
                    envelope.version
                ));
                write_frame(&mut stream, &RpcReply::err(&e)).await?;
                continue;
            }
            match envelope.request {
                RpcRequest::StreamAsync { session_id } => {
                    return self.stream_async(stream, &session_id, shutdown).await;
                }
                request => {
                    let reply = self.handle(request).await;
                    write_frame(&mut stream, &reply).await?;
                }
            }
        }
        Ok(())
    }

    /// Answer one non-streaming request.
    pub async fn handle(&self, request: RpcRequest) -> RpcReply {
        let result = match request {
            RpcRequest::CreateSession { host, port, client } => self
                .registry
                .create(&host, port, client)
                .await
                .map(Value::String),
            RpcRequest::DeleteSession { session_id } => {
                Ok(Value::Bool(self.registry.remove(&session_id).await))
            }
            RpcRequest::HasSession { session_id } => Ok(Value::Bool(self.registry.has(&session_id))),
            RpcRequest::CallSession {
                session_id,
                method,
                args,
                kwargs,
            } => self.call(&session_id, &method, &args, &kwargs).await,
            RpcRequest::StreamAsync { .. } => Err(KomError::InvalidArguments(
                "stream_async needs its own connection".into(),
            )),
        };
        match result {
            Ok(value) => RpcReply::ok(value),
            Err(e) => {
                debug!(error = %e, "rpc call failed");
                RpcReply::err(&e)
            }
        }
    }

    async fn call(
        &self,
        session_id: &str,
        method: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> KomResult<Value> {
        let method: Method = method.parse()?;
        let session = self.registry.get(session_id)?;
        let call = CallArgs::new(method, args, kwargs)?;
        let result = invoke(&session, method, &call).await;
        // Closing or disconnecting itself ends the session; it must not
        // linger in the registry as an unusable entry.
        if matches!(method, Method::Close | Method::Disconnect)
            && session.state() == SessionState::Closed
            && self.registry.remove(session_id).await
        {
            debug!(session_id, "session closed by rpc call, unregistered");
        }
        result
    }

    async fn stream_async(
        &self,
        mut stream: TcpStream,
        session_id: &str,
        shutdown: CancellationToken,
    ) -> KomResult<()> {
        let session = match self.registry.get(session_id) {
            Ok(s) => s,
            Err(e) => {
                let end = StreamItem::End {
                    reason: e.to_string(),
                };
                return write_frame(&mut stream, &end).await;
            }
        };
        let (mut read_half, mut write_half) = stream.split();
        let mut scratch = [0u8; 1];

        let reason = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break "server shutting down".to_string(),
                // The client never writes on a stream; any read result means it left.
                _ = tokio::io::AsyncReadExt::read(&mut read_half, &mut scratch) => {
                    debug!(session_id, "async stream client went away");
                    return Ok(());
                }
                next = session.next_async_message() => match next {
                    Ok(message) => {
                        write_frame(&mut write_half, &StreamItem::Message { message }).await?;
                    }
                    Err(e) => break e.to_string(),
                },
            }
        };
        write_frame(&mut write_half, &StreamItem::End { reason }).await?;
        write_half.shutdown().await.ok();
        Ok(())
    }
}

fn to_value<T: Serialize>(value: T) -> KomResult<Value> {
    serde_json::to_value(value).map_err(|e| KomError::Rpc(e.to_string()))
}

async fn invoke(session: &KomSession, method: Method, call: &CallArgs<'_>) -> KomResult<Value> {
    match method {
        Method::Login => {
            session
                .login(call.required("pers_no")?, &call.required::<String>("passwd")?)
                .await?;
            Ok(Value::Null)
        }
        Method::Logout => session.logout().await.map(|()| Value::Null),
        Method::WhoAmI => to_value(session.who_am_i().await?),
        Method::UserIsActive => session.user_is_active().await.map(|()| Value::Null),
        Method::ChangeConference => session
            .change_conference(call.required("conf_no")?)
            .await
            .map(|()| Value::Null),
        Method::LookupName => to_value(
            session
                .lookup_name(
                    &call.required::<String>("name")?,
                    call.or("want_pers", true)?,
                    call.or("want_confs", true)?,
                )
                .await?,
        ),
        Method::LookupNameExact => to_value(
            session
                .lookup_name_exact(
                    &call.required::<String>("name")?,
                    call.or("want_pers", true)?,
                    call.or("want_confs", true)?,
                )
                .await?,
        ),
        Method::GetConfName => to_value(session.get_conf_name(call.required("conf_no")?).await?),
        Method::SendMessage => session
            .send_message(
                call.required("recipient")?,
                &call.required::<String>("message")?,
            )
            .await
            .map(|()| Value::Null),
        Method::Disconnect => session
            .disconnect(call.required("session_no")?)
            .await
            .map(|()| Value::Null),
        Method::IsLoggedIn => to_value(session.is_logged_in()),
        Method::CurrentPersonNo => to_value(session.current_person_no()),
        Method::SessionNo => to_value(session.session_no()),
        Method::GetAsyncMessages => to_value(session.get_async_messages(call.or("limit", 100usize)?)?),
        Method::Info => to_value(session.info()),
        Method::Close => {
            session.close().await;
            Ok(Value::Null)
        }
    }
}
