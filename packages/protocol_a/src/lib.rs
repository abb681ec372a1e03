//! LysKOM Protocol A wire codec.
//!
//! The codec is deliberately request-agnostic: incoming bytes are split into
//! [`Frame`]s (reply, error, or asynchronous message) using only the lexical
//! rules of the protocol. Interpreting a reply body requires knowing which
//! request it answers, which is the caller's business; [`TokenReader`] gives
//! typed access to the body once that is known.

pub mod async_msg;
pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod request;
pub mod server;
pub mod token;
pub mod types;

pub use async_msg::{AsyncKind, AsyncMessage};
pub use codec::{KomCodec, OutgoingRequest};
pub use error::{CodecError, ServerError};
pub use frame::{Decode, Frame, TokenReader};
pub use handshake::{client_handshake, server_handshake};
pub use request::Request;
pub use server::{IncomingRequest, ServerCodec};
pub use token::Token;

/// Reference number attached to every request on one connection.
pub type RefNo = u32;

/// Decode a Hollerith payload. Protocol A strings are ISO-8859-1 on the wire.
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode a string for the wire. Characters outside ISO-8859-1 become `?`.
pub fn string_to_latin1(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
        .collect()
}
