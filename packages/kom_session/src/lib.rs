//! LysKOM sessions over Protocol A.
//!
//! Layers, bottom up: [`connection`] owns one socket and multiplexes
//! requests over it, [`broker`] turns that into request/reply calls,
//! [`dispatch`] routes unsolicited server messages, [`session`] adds login
//! state and the domain operations, [`registry`] keeps sessions by id, and
//! [`rpc`] serves a registry to other processes.

pub mod broker;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod rpc;
pub mod session;

#[cfg(feature = "testing")]
pub mod testing;

pub use broker::Broker;
pub use connection::{Connection, ConnectionState};
pub use dispatch::{AsyncDispatcher, AsyncHandler};
pub use error::{KomError, KomResult};
pub use registry::SessionRegistry;
pub use rpc::{Method, RemoteSession, RpcClient, RpcServer};
pub use session::{ClientInfo, KomSession, SessionInfo, SessionOptions, SessionState};
