//! Protocol A data structures carried in replies and asynchronous messages.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::frame::{Decode, TokenReader};

/// Misc-info types whose payload is a `Time` instead of a number.
const MI_REC_TIME: u32 = 7;
const MI_SENT_AT: u32 = 9;

/// Broken-down server time, as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Time {
    pub seconds: u32,
    pub minutes: u32,
    pub hours: u32,
    pub day: u32,
    /// 0..=11
    pub month: u32,
    /// Years since 1900.
    pub year: u32,
    /// 0 is Sunday.
    pub day_of_week: u32,
    pub day_of_year: u32,
    pub is_dst: bool,
}

impl Decode for Time {
    fn decode(r: &mut TokenReader) -> Result<Self, CodecError> {
        Ok(Self {
            seconds: r.int()?,
            minutes: r.int()?,
            hours: r.int()?,
            day: r.int()?,
            month: r.int()?,
            year: r.int()?,
            day_of_week: r.int()?,
            day_of_year: r.int()?,
            is_dst: r.bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MiscValue {
    Number(u32),
    Time(Time),
}

/// One raw misc-info entry (recipient, comment link, timestamps, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiscInfo {
    #[serde(rename = "type")]
    pub kind: u32,
    pub value: MiscValue,
}

impl Decode for MiscInfo {
    fn decode(r: &mut TokenReader) -> Result<Self, CodecError> {
        let kind = r.int()?;
        let value = if kind == MI_REC_TIME || kind == MI_SENT_AT {
            MiscValue::Time(r.decode()?)
        } else {
            MiscValue::Number(r.int()?)
        };
        Ok(Self { kind, value })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxItemFlags {
    pub deleted: bool,
    pub inherit: bool,
    pub secret: bool,
    pub hide_creator: bool,
    pub dont_garb: bool,
}

impl Decode for AuxItemFlags {
    fn decode(r: &mut TokenReader) -> Result<Self, CodecError> {
        let bits = r.bits(8)?;
        Ok(Self {
            deleted: bits[0],
            inherit: bits[1],
            secret: bits[2],
            hide_creator: bits[3],
            dont_garb: bits[4],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxItem {
    pub aux_no: u32,
    pub tag: u32,
    pub creator: u32,
    pub created_at: Time,
    pub flags: AuxItemFlags,
    pub inherit_limit: u32,
    pub data: String,
}

impl Decode for AuxItem {
    fn decode(r: &mut TokenReader) -> Result<Self, CodecError> {
        Ok(Self {
            aux_no: r.int()?,
            tag: r.int()?,
            creator: r.int()?,
            created_at: r.decode()?,
            flags: r.decode()?,
            inherit_limit: r.int()?,
            data: r.string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStat {
    pub creation_time: Time,
    pub author: u32,
    pub no_of_lines: u32,
    pub no_of_chars: u32,
    pub no_of_marks: u32,
    pub misc_info: Vec<MiscInfo>,
    pub aux_items: Vec<AuxItem>,
}

impl TextStat {
    /// The pre-aux-item layout used by async-new-text-old.
    pub fn decode_old(r: &mut TokenReader) -> Result<Self, CodecError> {
        Self::decode_inner(r, false)
    }

    fn decode_inner(r: &mut TokenReader, with_aux: bool) -> Result<Self, CodecError> {
        Ok(Self {
            creation_time: r.decode()?,
            author: r.int()?,
            no_of_lines: r.int()?,
            no_of_chars: r.int()?,
            no_of_marks: r.int()?,
            misc_info: r.array(MiscInfo::decode)?,
            aux_items: if with_aux {
                r.array(AuxItem::decode)?
            } else {
                Vec::new()
            },
        })
    }
}

impl Decode for TextStat {
    fn decode(r: &mut TokenReader) -> Result<Self, CodecError> {
        Self::decode_inner(r, true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoInfo {
    pub person: u32,
    pub working_conference: u32,
    pub session: u32,
    pub what_am_i_doing: String,
    pub username: String,
}

impl Decode for WhoInfo {
    fn decode(r: &mut TokenReader) -> Result<Self, CodecError> {
        Ok(Self {
            person: r.int()?,
            working_conference: r.int()?,
            session: r.int()?,
            what_am_i_doing: r.string()?,
            username: r.string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfType {
    pub rd_prot: bool,
    pub original: bool,
    pub secret: bool,
    pub letterbox: bool,
    pub allow_anonymous: bool,
    pub forbid_secret: bool,
}

impl ConfType {
    /// Four-bit form used inside `ConfZInfo`.
    pub fn decode_old(r: &mut TokenReader) -> Result<Self, CodecError> {
        let bits = r.bits(4)?;
        Ok(Self {
            rd_prot: bits[0],
            original: bits[1],
            secret: bits[2],
            letterbox: bits[3],
            ..Default::default()
        })
    }
}

impl Decode for ConfType {
    fn decode(r: &mut TokenReader) -> Result<Self, CodecError> {
        let bits = r.bits(8)?;
        Ok(Self {
            rd_prot: bits[0],
            original: bits[1],
            secret: bits[2],
            letterbox: bits[3],
            allow_anonymous: bits[4],
            forbid_secret: bits[5],
        })
    }
}

/// A lookup-z-name match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfZInfo {
    pub name: String,
    pub conf_type: ConfType,
    pub conf_no: u32,
}

impl Decode for ConfZInfo {
    fn decode(r: &mut TokenReader) -> Result<Self, CodecError> {
        Ok(Self {
            name: r.string()?,
            conf_type: ConfType::decode_old(r)?,
            conf_no: r.int()?,
        })
    }
}

/// The small conference status returned by get-uconf-stat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UConference {
    pub name: String,
    pub conf_type: ConfType,
    pub highest_local_no: u32,
    pub nice: u32,
}

impl Decode for UConference {
    fn decode(r: &mut TokenReader) -> Result<Self, CodecError> {
        Ok(Self {
            name: r.string()?,
            conf_type: r.decode()?,
            highest_local_no: r.int()?,
            nice: r.int()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;
    use bytes::Bytes;

    fn body(line: &str) -> TokenReader {
        let (tokens, _) = crate::token::scan_line(line.as_bytes(), 0, 1 << 20)
            .unwrap()
            .unwrap();
        TokenReader::new(tokens)
    }

    const TIME: &str = "13 37 12 17 9 126 6 289 1";

    #[test]
    fn decodes_text_stat_with_timestamps_in_misc_info() {
        let line = format!(
            "{TIME} 14506 3 120 0 3 {{ 0 6 6 1211 9 {TIME} }} 1 {{ 5 1 14506 {TIME} 00000000 0 10Htext/plain }}\n"
        );
        let ts: TextStat = body(&line).decode().unwrap();
        assert_eq!(ts.author, 14506);
        assert_eq!(ts.creation_time.year, 126);
        assert!(ts.creation_time.is_dst);
        assert_eq!(ts.misc_info.len(), 3);
        assert_eq!(ts.misc_info[1].value, MiscValue::Number(1211));
        assert!(matches!(ts.misc_info[2].value, MiscValue::Time(_)));
        assert_eq!(ts.aux_items.len(), 1);
        assert_eq!(ts.aux_items[0].data, "text/plain");
    }

    #[test]
    fn old_text_stat_has_no_aux_items() {
        let line = format!("{TIME} 6 1 10 0 0 *\n");
        let ts = TextStat::decode_old(&mut body(&line)).unwrap();
        assert!(ts.misc_info.is_empty());
        assert!(ts.aux_items.is_empty());
    }

    #[test]
    fn conf_z_info_uses_four_bit_type() {
        let mut r = TokenReader::new(vec![
            Token::Str(Bytes::from_static(b"Inl\xe4gg (och) kommentarer")),
            Token::Number("0001".into()),
            Token::Number("4".into()),
        ]);
        let info: ConfZInfo = r.decode().unwrap();
        assert_eq!(info.name, "Inlägg (och) kommentarer");
        assert!(info.conf_type.letterbox);
        assert!(!info.conf_type.secret);
        assert_eq!(info.conf_no, 4);
    }

    #[test]
    fn uconference() {
        let u: UConference = body("11HOskar Skoog 00010000 1045 77\n").decode().unwrap();
        assert_eq!(u.name, "Oskar Skoog");
        assert!(u.conf_type.letterbox);
        assert_eq!(u.highest_local_no, 1045);
        assert_eq!(u.nice, 77);
    }
}
