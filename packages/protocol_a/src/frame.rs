//! Server frames and typed access to their bodies.

use bytes::Bytes;
use std::collections::VecDeque;
use std::str::FromStr;

use crate::RefNo;
use crate::error::{CodecError, ServerError};
use crate::latin1_to_string;
use crate::token::Token;

/// One complete message from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `=<ref> ...`: successful reply to a request.
    Reply { ref_no: RefNo, body: Vec<Token> },
    /// `%<ref> <code> <status>`: the request failed.
    Error { ref_no: RefNo, error: ServerError },
    /// `:<nargs> <msg-no> ...`: unsolicited message, not tied to any request.
    Async { msg_no: u32, body: Vec<Token> },
}

impl Frame {
    pub(crate) fn from_tokens(leader: u8, tokens: Vec<Token>) -> Result<Self, CodecError> {
        let mut r = TokenReader::new(tokens);
        match leader {
            b'=' => {
                let ref_no = r.int()?;
                Ok(Frame::Reply {
                    ref_no,
                    body: r.into_remaining(),
                })
            }
            b'%' => {
                let ref_no = r.int()?;
                let code = r.int()?;
                let status = r.int()?;
                if !r.is_empty() {
                    return Err(CodecError::malformed("error reply"));
                }
                Ok(Frame::Error {
                    ref_no,
                    error: ServerError::new(code, status),
                })
            }
            b':' => {
                let _nargs = r.int()?;
                let msg_no = r.int()?;
                Ok(Frame::Async {
                    msg_no,
                    body: r.into_remaining(),
                })
            }
            other => Err(CodecError::UnexpectedByte {
                byte: other,
                offset: 0,
            }),
        }
    }

    /// The reference number, for frames that answer a request.
    pub fn ref_no(&self) -> Option<RefNo> {
        match self {
            Frame::Reply { ref_no, .. } | Frame::Error { ref_no, .. } => Some(*ref_no),
            Frame::Async { .. } => None,
        }
    }
}

/// Cursor over a frame body with Protocol A typed readers.
#[derive(Debug, Clone, Default)]
pub struct TokenReader {
    tokens: VecDeque<Token>,
}

impl TokenReader {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn into_remaining(self) -> Vec<Token> {
        self.tokens.into()
    }

    pub fn next_token(&mut self) -> Result<Token, CodecError> {
        self.tokens.pop_front().ok_or(CodecError::UnexpectedEnd)
    }

    fn number_text(&mut self) -> Result<String, CodecError> {
        match self.next_token()? {
            Token::Number(s) => Ok(s),
            _ => Err(CodecError::malformed("number")),
        }
    }

    pub fn number<T: FromStr>(&mut self) -> Result<T, CodecError> {
        self.number_text()?
            .parse()
            .map_err(|_| CodecError::malformed("number"))
    }

    pub fn int(&mut self) -> Result<u32, CodecError> {
        self.number()
    }

    pub fn float(&mut self) -> Result<f64, CodecError> {
        self.number()
    }

    pub fn bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.int()? != 0)
    }

    pub fn bytes(&mut self) -> Result<Bytes, CodecError> {
        match self.next_token()? {
            Token::Str(b) => Ok(b),
            _ => Err(CodecError::malformed("string")),
        }
    }

    pub fn string(&mut self) -> Result<String, CodecError> {
        Ok(latin1_to_string(&self.bytes()?))
    }

    /// A bit string of exactly `len` bits.
    pub fn bits(&mut self, len: usize) -> Result<Vec<bool>, CodecError> {
        let text = self.number_text()?;
        if text.len() != len {
            return Err(CodecError::malformed("bit string"));
        }
        text.bytes()
            .map(|b| match b {
                b'0' => Ok(false),
                b'1' => Ok(true),
                _ => Err(CodecError::malformed("bit string")),
            })
            .collect()
    }

    /// `<n> { item* }`, `<n> *` or `0 *`.
    ///
    /// A star in place of contents means the server omitted them; that reads
    /// as an empty array.
    pub fn array<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, CodecError>,
    ) -> Result<Vec<T>, CodecError> {
        let len: usize = self.number()?;
        match self.next_token()? {
            Token::Star => Ok(Vec::new()),
            Token::ArrayStart => {
                let mut out = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    out.push(item(self)?);
                }
                match self.next_token()? {
                    Token::ArrayEnd => Ok(out),
                    _ => Err(CodecError::malformed("array")),
                }
            }
            _ => Err(CodecError::malformed("array")),
        }
    }

    pub fn int_array(&mut self) -> Result<Vec<u32>, CodecError> {
        self.array(Self::int)
    }

    pub fn decode<T: Decode>(&mut self) -> Result<T, CodecError> {
        T::decode(self)
    }
}

/// A Protocol A data structure that can be read from a frame body.
pub trait Decode: Sized {
    fn decode(r: &mut TokenReader) -> Result<Self, CodecError>;
}

impl Decode for u32 {
    fn decode(r: &mut TokenReader) -> Result<Self, CodecError> {
        r.int()
    }
}

impl Decode for String {
    fn decode(r: &mut TokenReader) -> Result<Self, CodecError> {
        r.string()
    }
}
