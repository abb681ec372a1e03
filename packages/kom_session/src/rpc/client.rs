//! Proxy side: the registry and its sessions, seen from another process.

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use protocol_a::AsyncMessage;
use protocol_a::types::ConfZInfo;

use super::method::Method;
use super::{Envelope, PROTOCOL_VERSION, RpcReply, RpcRequest, StreamItem, read_frame, write_frame};
use crate::error::{KomError, KomResult};
use crate::session::{ClientInfo, SessionInfo};

/// Handle to a session server. Each call uses its own TCP connection.
#[derive(Debug, Clone)]
pub struct RpcClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn connect(&self) -> KomResult<TcpStream> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| KomError::Rpc(format!("connect to {} timed out", self.addr)))?
            .map_err(|e| KomError::Rpc(format!("connect to {}: {e}", self.addr)))?;
        stream.set_nodelay(true).ok();
        Ok(stream)
    }

    async fn roundtrip(&self, request: RpcRequest) -> KomResult<Value> {
        let exchange = async {
            let mut stream = self.connect().await?;
            write_frame(
                &mut stream,
                &Envelope {
                    version: PROTOCOL_VERSION,
                    request,
                },
            )
            .await?;
            read_frame::<_, RpcReply>(&mut stream)
                .await?
                .ok_or_else(|| KomError::Rpc("session server closed the connection".into()))
        };
        let reply = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| KomError::Timeout)??;
        reply.into_result()
    }

    pub async fn create_session(&self, host: &str, port: u16, client: ClientInfo) -> KomResult<String> {
        let value = self
            .roundtrip(RpcRequest::CreateSession {
                host: host.to_string(),
                port,
                client,
            })
            .await?;
        decode(value)
    }

    pub async fn delete_session(&self, session_id: &str) -> KomResult<bool> {
        let value = self
            .roundtrip(RpcRequest::DeleteSession {
                session_id: session_id.to_string(),
            })
            .await?;
        decode(value)
    }

    pub async fn has_session(&self, session_id: &str) -> KomResult<bool> {
        let value = self
            .roundtrip(RpcRequest::HasSession {
                session_id: session_id.to_string(),
            })
            .await?;
        decode(value)
    }

    /// Invoke an exposed session method by name. Names outside [`Method`]
    /// fail here without any network traffic.
    pub async fn call_method(
        &self,
        session_id: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> KomResult<Value> {
        let method: Method = method.parse()?;
        debug!(session_id, %method, "rpc call");
        self.roundtrip(RpcRequest::CallSession {
            session_id: session_id.to_string(),
            method: method.as_str().to_string(),
            args,
            kwargs,
        })
        .await
    }

    /// Async messages for `session_id` until the session or its connection ends.
    pub async fn stream_async(
        &self,
        session_id: &str,
    ) -> KomResult<impl Stream<Item = KomResult<AsyncMessage>> + Send + 'static> {
        let mut stream = self.connect().await?;
        write_frame(
            &mut stream,
            &Envelope {
                version: PROTOCOL_VERSION,
                request: RpcRequest::StreamAsync {
                    session_id: session_id.to_string(),
                },
            },
        )
        .await?;

        Ok(futures::stream::unfold(Some(stream), |state| async move {
            let mut stream = state?;
            match read_frame::<_, StreamItem>(&mut stream).await {
                Ok(Some(StreamItem::Message { message })) => Some((Ok(message), Some(stream))),
                Ok(Some(StreamItem::End { reason })) => {
                    debug!(%reason, "async stream ended");
                    None
                }
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        }))
    }

    pub fn session(&self, session_id: impl Into<String>) -> RemoteSession {
        RemoteSession {
            client: self.clone(),
            id: session_id.into(),
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> KomResult<T> {
    serde_json::from_value(value).map_err(|e| KomError::Rpc(format!("unexpected result: {e}")))
}

/// Typed methods over [`RpcClient::call_method`] for one session.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    client: RpcClient,
    id: String,
}

impl RemoteSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, kwargs: Value) -> KomResult<T> {
        let kwargs = match kwargs {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let value = self
            .client
            .call_method(&self.id, method.as_str(), Vec::new(), kwargs)
            .await?;
        decode(value)
    }

    pub async fn login(&self, pers_no: u32, passwd: &str) -> KomResult<()> {
        self.call(Method::Login, json!({ "pers_no": pers_no, "passwd": passwd }))
            .await
    }

    pub async fn logout(&self) -> KomResult<()> {
        self.call(Method::Logout, Value::Null).await
    }

    pub async fn who_am_i(&self) -> KomResult<u32> {
        self.call(Method::WhoAmI, Value::Null).await
    }

    pub async fn user_is_active(&self) -> KomResult<()> {
        self.call(Method::UserIsActive, Value::Null).await
    }

    pub async fn change_conference(&self, conf_no: u32) -> KomResult<()> {
        self.call(Method::ChangeConference, json!({ "conf_no": conf_no }))
            .await
    }

    pub async fn lookup_name(
        &self,
        name: &str,
        want_pers: bool,
        want_confs: bool,
    ) -> KomResult<Vec<ConfZInfo>> {
        self.call(
            Method::LookupName,
            json!({ "name": name, "want_pers": want_pers, "want_confs": want_confs }),
        )
        .await
    }

    pub async fn lookup_name_exact(
        &self,
        name: &str,
        want_pers: bool,
        want_confs: bool,
    ) -> KomResult<u32> {
        self.call(
            Method::LookupNameExact,
            json!({ "name": name, "want_pers": want_pers, "want_confs": want_confs }),
        )
        .await
    }

    pub async fn get_conf_name(&self, conf_no: u32) -> KomResult<String> {
        self.call(Method::GetConfName, json!({ "conf_no": conf_no }))
            .await
    }

    pub async fn send_message(&self, recipient: u32, message: &str) -> KomResult<()> {
        self.call(
            Method::SendMessage,
            json!({ "recipient": recipient, "message": message }),
        )
        .await
    }

    pub async fn disconnect(&self, session_no: u32) -> KomResult<()> {
        self.call(Method::Disconnect, json!({ "session_no": session_no }))
            .await
    }

    pub async fn is_logged_in(&self) -> KomResult<bool> {
        self.call(Method::IsLoggedIn, Value::Null).await
    }

    pub async fn current_person_no(&self) -> KomResult<Option<u32>> {
        self.call(Method::CurrentPersonNo, Value::Null).await
    }

    pub async fn session_no(&self) -> KomResult<Option<u32>> {
        self.call(Method::SessionNo, Value::Null).await
    }

    pub async fn get_async_messages(&self, limit: usize) -> KomResult<Vec<AsyncMessage>> {
        self.call(Method::GetAsyncMessages, json!({ "limit": limit }))
            .await
    }

    pub async fn info(&self) -> KomResult<SessionInfo> {
        self.call(Method::Info, Value::Null).await
    }

    pub async fn close(&self) -> KomResult<()> {
        self.call(Method::Close, Value::Null).await
    }
}
