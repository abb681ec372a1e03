//! Lexical layer: splits one server line into tokens.
//!
//! A server message ends at the first newline that is not inside a Hollerith
//! string, so the lexer has to understand Hollerith lengths to find the end of
//! a frame at all.

use bytes::Bytes;

use crate::error::CodecError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Integer, float or bit string. Kept textual until the reader knows which.
    Number(String),
    /// Hollerith string payload, `<len>H<bytes>` on the wire.
    Str(Bytes),
    ArrayStart,
    ArrayEnd,
    /// Stands in for array contents the server chose not to send.
    Star,
}

impl Token {
    pub fn describe(&self) -> &'static str {
        match self {
            Token::Number(_) => "number",
            Token::Str(_) => "string",
            Token::ArrayStart => "'{'",
            Token::ArrayEnd => "'}'",
            Token::Star => "'*'",
        }
    }
}

pub(crate) fn is_blank(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r')
}

fn is_float_char(b: u8) -> bool {
    b.is_ascii_digit() || matches!(b, b'e' | b'E' | b'.' | b'-' | b'+')
}

/// Lex tokens up to and including the terminating newline.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete line, otherwise
/// the tokens and the number of bytes consumed. `offset_base` is only used to
/// report positions in errors.
pub(crate) fn scan_line(
    buf: &[u8],
    offset_base: usize,
    max_len: usize,
) -> Result<Option<(Vec<Token>, usize)>, CodecError> {
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < buf.len() {
        let b = buf[i];
        match b {
            b'\n' => return Ok(Some((tokens, i + 1))),
            _ if is_blank(b) => i += 1,
            b'{' => {
                tokens.push(Token::ArrayStart);
                i += 1;
            }
            b'}' => {
                tokens.push(Token::ArrayEnd);
                i += 1;
            }
            b'*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            b'0'..=b'9' => {
                let digits_end = i + buf[i..].iter().take_while(|c| c.is_ascii_digit()).count();
                let Some(&next) = buf.get(digits_end) else {
                    return Ok(None);
                };
                if next == b'H' {
                    let len = parse_len(&buf[i..digits_end])?;
                    if len > max_len {
                        return Err(CodecError::FrameTooLarge { limit: max_len });
                    }
                    let start = digits_end + 1;
                    let end = start + len;
                    if end > buf.len() {
                        return Ok(None);
                    }
                    tokens.push(Token::Str(Bytes::copy_from_slice(&buf[start..end])));
                    i = end;
                } else {
                    match push_number(buf, i, &mut tokens)? {
                        Some(end) => i = end,
                        None => return Ok(None),
                    }
                }
            }
            b'-' | b'.' => match push_number(buf, i, &mut tokens)? {
                Some(end) => i = end,
                None => return Ok(None),
            },
            other => {
                return Err(CodecError::UnexpectedByte {
                    byte: other,
                    offset: offset_base + i,
                });
            }
        }
    }

    Ok(None)
}

/// Push a number token starting at `start`; `None` if it runs to the end of `buf`.
fn push_number(
    buf: &[u8],
    start: usize,
    tokens: &mut Vec<Token>,
) -> Result<Option<usize>, CodecError> {
    let end = start + buf[start..].iter().take_while(|&&c| is_float_char(c)).count();
    if end == buf.len() {
        return Ok(None);
    }
    let text =
        std::str::from_utf8(&buf[start..end]).map_err(|_| CodecError::malformed("number"))?;
    tokens.push(Token::Number(text.to_string()));
    Ok(Some(end))
}

fn parse_len(digits: &[u8]) -> Result<usize, CodecError> {
    digits.iter().try_fold(0usize, |acc, &d| {
        acc.checked_mul(10)
            .and_then(|v| v.checked_add((d - b'0') as usize))
            .ok_or(CodecError::malformed("string length"))
    })
}
