//! Request/response facade over a [`Connection`].

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use protocol_a::frame::Decode;
use protocol_a::{Request, TokenReader};

use crate::connection::Connection;
use crate::error::{KomError, KomResult};

/// Sends a request and waits for the reply carrying the same reference number.
///
/// A request abandoned by timeout keeps its slot registered on the
/// connection; the late reply is consumed there and discarded.
#[derive(Clone)]
pub struct Broker {
    conn: Arc<Connection>,
    default_timeout: Option<Duration>,
}

impl Broker {
    pub fn new(conn: Arc<Connection>, default_timeout: Option<Duration>) -> Self {
        Self {
            conn,
            default_timeout,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Send `request` using the broker's default timeout, if any.
    pub async fn request(&self, request: Request) -> KomResult<TokenReader> {
        match self.default_timeout {
            Some(timeout) => self.request_with_timeout(request, timeout).await,
            None => self.roundtrip(request).await,
        }
    }

    pub async fn request_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> KomResult<TokenReader> {
        let name = request.name();
        tokio::time::timeout(timeout, self.roundtrip(request))
            .await
            .map_err(|_| {
                debug!(request = name, ?timeout, "request timed out");
                KomError::Timeout
            })?
    }

    async fn roundtrip(&self, request: Request) -> KomResult<TokenReader> {
        let pending = self.conn.send(request).await?;
        let body = pending.wait().await?;
        Ok(TokenReader::new(body))
    }

    /// Send and decode the reply as `T`.
    pub async fn call<T: Decode>(&self, request: Request) -> KomResult<T> {
        let mut body = self.request(request).await?;
        Ok(T::decode(&mut body)?)
    }

    /// Send a request whose reply carries no data.
    pub async fn call_unit(&self, request: Request) -> KomResult<()> {
        self.request(request).await.map(|_| ())
    }
}
