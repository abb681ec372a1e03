//! The other side of the wire: request lines in, server frames out.
//!
//! Used by in-process fake servers in tests; the lexing rules are the same
//! as for server frames.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::RefNo;
use crate::codec::DEFAULT_MAX_FRAME_LEN;
use crate::error::CodecError;
use crate::frame::{Frame, TokenReader};
use crate::token::{Token, is_blank, scan_line};

/// A request line as the server sees it, arguments still untyped.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    pub ref_no: RefNo,
    pub call_no: u32,
    pub args: Vec<Token>,
}

impl IncomingRequest {
    pub fn reader(&self) -> TokenReader {
        TokenReader::new(self.args.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerCodec;

impl Decoder for ServerCodec {
    type Item = IncomingRequest;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<IncomingRequest>, CodecError> {
        let skip = src
            .iter()
            .take_while(|&&b| b == b'\n' || is_blank(b))
            .count();
        let _ = src.split_to(skip);
        if src.is_empty() {
            return Ok(None);
        }

        let Some((tokens, used)) = scan_line(src, 0, DEFAULT_MAX_FRAME_LEN)? else {
            return Ok(None);
        };
        let _ = src.split_to(used);
        let mut r = TokenReader::new(tokens);
        let ref_no = r.int()?;
        let call_no = r.int()?;
        Ok(Some(IncomingRequest {
            ref_no,
            call_no,
            args: r.into_remaining(),
        }))
    }
}

impl Encoder<Frame> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        match frame {
            Frame::Reply { ref_no, body } => {
                dst.put_slice(format!("={ref_no}").as_bytes());
                put_tokens(&body, dst);
            }
            Frame::Error { ref_no, error } => {
                dst.put_slice(format!("%{ref_no} {} {}", error.code, error.status).as_bytes());
            }
            Frame::Async { msg_no, body } => {
                dst.put_slice(format!(":{} {msg_no}", body.len()).as_bytes());
                put_tokens(&body, dst);
            }
        }
        dst.put_u8(b'\n');
        Ok(())
    }
}

fn put_tokens(tokens: &[Token], dst: &mut BytesMut) {
    for token in tokens {
        dst.put_u8(b' ');
        match token {
            Token::Number(n) => dst.put_slice(n.as_bytes()),
            Token::Str(s) => {
                dst.put_slice(format!("{}H", s.len()).as_bytes());
                dst.put_slice(s);
            }
            Token::ArrayStart => dst.put_u8(b'{'),
            Token::ArrayEnd => dst.put_u8(b'}'),
            Token::Star => dst.put_u8(b'*'),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use crate::request::Request;
    use bytes::Bytes;

    #[test]
    fn decodes_encoded_request() {
        let mut buf = BytesMut::new();
        Request::Login {
            person_no: 6,
            password: "hemligt\nord".into(),
            invisible: true,
        }
        .encode(3, &mut buf);

        let req = ServerCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(req.ref_no, 3);
        assert_eq!(req.call_no, 62);
        let mut r = req.reader();
        assert_eq!(r.int().unwrap(), 6);
        assert_eq!(r.string().unwrap(), "hemligt\nord");
        assert!(r.bool().unwrap());
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_complete_line() {
        let mut buf = BytesMut::from(&b"1 56"[..]);
        assert!(ServerCodec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\n");
        assert_eq!(ServerCodec.decode(&mut buf).unwrap().unwrap().call_no, 56);
    }

    #[test]
    fn encodes_frames() {
        let mut buf = BytesMut::new();
        ServerCodec
            .encode(
                Frame::Reply {
                    ref_no: 2,
                    body: vec![
                        Token::Number("1".into()),
                        Token::ArrayStart,
                        Token::Str(Bytes::from_static(b"hej")),
                        Token::ArrayEnd,
                    ],
                },
                &mut buf,
            )
            .unwrap();
        ServerCodec
            .encode(
                Frame::Error {
                    ref_no: 3,
                    error: ServerError::new(4, 0),
                },
                &mut buf,
            )
            .unwrap();
        ServerCodec
            .encode(
                Frame::Async {
                    msg_no: 13,
                    body: vec![Token::Number("6".into()), Token::Number("1".into())],
                },
                &mut buf,
            )
            .unwrap();
        assert_eq!(&buf[..], b"=2 1 { 3Hhej }\n%3 4 0\n:2 13 6 1\n");
    }
}
