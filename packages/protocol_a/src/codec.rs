//! `tokio_util` codec: server frames in, requests out.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::RefNo;
use crate::error::CodecError;
use crate::frame::Frame;
use crate::latin1_to_string;
use crate::request::Request;
use crate::token::{is_blank, scan_line};

/// Largest single server message accepted before the connection is dropped.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A request paired with the reference number the send loop allocated for it.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub ref_no: RefNo,
    pub request: Request,
}

#[derive(Debug, Clone)]
pub struct KomCodec {
    max_frame_len: usize,
}

impl KomCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for KomCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for KomCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        let skip = src
            .iter()
            .take_while(|&&b| b == b'\n' || is_blank(b))
            .count();
        src.advance(skip);

        let Some(&leader) = src.first() else {
            return Ok(None);
        };
        if !matches!(leader, b'=' | b'%' | b':') {
            return Err(CodecError::UnexpectedByte {
                byte: leader,
                offset: 0,
            });
        }

        // "%%" is the server complaining about something we sent.
        if leader == b'%' && src.get(1) == Some(&b'%') {
            return match src.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    let line = src.split_to(end + 1);
                    let text = latin1_to_string(&line[2..end]);
                    Err(CodecError::ServerProtocolError(text.trim().to_string()))
                }
                None => self.need_more(src),
            };
        }

        match scan_line(&src[1..], 1, self.max_frame_len)? {
            Some((tokens, used)) => {
                src.advance(1 + used);
                let frame = Frame::from_tokens(leader, tokens)?;
                trace!(?frame, "decoded frame");
                Ok(Some(frame))
            }
            None => self.need_more(src),
        }
    }
}

impl KomCodec {
    fn need_more(&self, src: &BytesMut) -> Result<Option<Frame>, CodecError> {
        if src.len() > self.max_frame_len {
            Err(CodecError::FrameTooLarge {
                limit: self.max_frame_len,
            })
        } else {
            Ok(None)
        }
    }
}

impl Encoder<OutgoingRequest> for KomCodec {
    type Error = CodecError;

    fn encode(&mut self, item: OutgoingRequest, dst: &mut BytesMut) -> Result<(), CodecError> {
        item.request.encode(item.ref_no, dst);
        Ok(())
    }
}
