//! Out-of-process session hosting.
//!
//! A [`server::RpcServer`] owns a [`SessionRegistry`](crate::SessionRegistry)
//! and serves it over TCP; [`client::RpcClient`] and
//! [`client::RemoteSession`] are the proxy side. Frames are JSON documents
//! prefixed by a 4-byte big-endian length.

pub mod client;
pub mod method;
pub mod server;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use protocol_a::AsyncMessage;

use crate::error::KomError;
use crate::session::ClientInfo;

pub use client::{RemoteSession, RpcClient};
pub use method::Method;
pub use server::RpcServer;

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub request: RpcRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RpcRequest {
    CreateSession {
        host: String,
        port: u16,
        client: ClientInfo,
    },
    DeleteSession {
        session_id: String,
    },
    HasSession {
        session_id: String,
    },
    CallSession {
        session_id: String,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
    },
    /// Switch the connection to a stream of [`StreamItem`]s.
    StreamAsync {
        session_id: String,
    },
}

/// An error as it crosses the process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: String,
    pub class_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    /// The full error, when the receiving side can reconstruct it.
    #[serde(default)]
    pub detail: Option<KomError>,
}

impl From<&KomError> for RemoteError {
    fn from(e: &KomError) -> Self {
        let args = match e.server_error() {
            Some(se) => vec![Value::from(se.code), Value::from(se.status)],
            None => vec![Value::String(e.to_string())],
        };
        Self {
            kind: e.error_code().to_string(),
            class_name: e.class_name().to_string(),
            args,
            detail: Some(e.clone()),
        }
    }
}

impl From<RemoteError> for KomError {
    fn from(e: RemoteError) -> Self {
        match e.detail {
            Some(detail) => detail,
            None => KomError::Rpc(format!("{}: {:?}", e.class_name, e.args)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcReply {
    pub result: Option<Value>,
    pub error: Option<RemoteError>,
}

impl RpcReply {
    pub fn ok(value: Value) -> Self {
        Self {
            result: Some(value),
            error: None,
        }
    }

    pub fn err(e: &KomError) -> Self {
        Self {
            result: None,
            error: Some(e.into()),
        }
    }

    pub fn into_result(self) -> Result<Value, KomError> {
        match self.error {
            Some(e) => Err(e.into()),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "item", rename_all = "snake_case")]
pub enum StreamItem {
    Message { message: AsyncMessage },
    End { reason: String },
}

pub async fn write_frame<W, T>(w: &mut W, value: &T) -> Result<(), KomError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value).map_err(|e| KomError::Rpc(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(KomError::Rpc(format!("frame of {} bytes too large", body.len())));
    }
    w.write_u32(body.len() as u32).await.map_err(io_err)?;
    w.write_all(&body).await.map_err(io_err)?;
    w.flush().await.map_err(io_err)
}

/// Read one frame. `Ok(None)` on a clean EOF between frames.
pub async fn read_frame<R, T>(r: &mut R) -> Result<Option<T>, KomError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match r.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(io_err(e)),
    };
    if len > MAX_FRAME_LEN {
        return Err(KomError::Rpc(format!("frame of {len} bytes too large")));
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await.map_err(io_err)?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| KomError::Rpc(format!("bad frame: {e}")))
}

fn io_err(e: std::io::Error) -> KomError {
    KomError::Rpc(e.to_string())
}
