//! Asynchronous (unsolicited) server messages.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::frame::TokenReader;
use crate::token::Token;
use crate::types::{AuxItem, TextStat, WhoInfo};

/// The asynchronous message kinds this codec can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AsyncKind {
    NewTextOld,
    NewName,
    IAmOn,
    SyncDb,
    LeaveConf,
    Login,
    RejectedConnection,
    SendMessage,
    Logout,
    DeletedText,
    NewText,
    NewRecipient,
    SubRecipient,
    NewMembership,
    NewUserArea,
    NewPresentation,
    NewMotd,
    TextAuxChanged,
}

impl AsyncKind {
    pub const ALL: [AsyncKind; 18] = [
        AsyncKind::NewTextOld,
        AsyncKind::NewName,
        AsyncKind::IAmOn,
        AsyncKind::SyncDb,
        AsyncKind::LeaveConf,
        AsyncKind::Login,
        AsyncKind::RejectedConnection,
        AsyncKind::SendMessage,
        AsyncKind::Logout,
        AsyncKind::DeletedText,
        AsyncKind::NewText,
        AsyncKind::NewRecipient,
        AsyncKind::SubRecipient,
        AsyncKind::NewMembership,
        AsyncKind::NewUserArea,
        AsyncKind::NewPresentation,
        AsyncKind::NewMotd,
        AsyncKind::TextAuxChanged,
    ];

    pub fn msg_no(self) -> u32 {
        match self {
            AsyncKind::NewTextOld => 0,
            AsyncKind::NewName => 5,
            AsyncKind::IAmOn => 6,
            AsyncKind::SyncDb => 7,
            AsyncKind::LeaveConf => 8,
            AsyncKind::Login => 9,
            AsyncKind::RejectedConnection => 11,
            AsyncKind::SendMessage => 12,
            AsyncKind::Logout => 13,
            AsyncKind::DeletedText => 14,
            AsyncKind::NewText => 15,
            AsyncKind::NewRecipient => 16,
            AsyncKind::SubRecipient => 17,
            AsyncKind::NewMembership => 18,
            AsyncKind::NewUserArea => 19,
            AsyncKind::NewPresentation => 20,
            AsyncKind::NewMotd => 21,
            AsyncKind::TextAuxChanged => 22,
        }
    }

    /// `None` for message numbers that are obsolete or unknown to this codec.
    pub fn from_msg_no(msg_no: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.msg_no() == msg_no)
    }

    pub fn msg_nos() -> Vec<u32> {
        Self::ALL.iter().map(|k| k.msg_no()).collect()
    }
}

/// A decoded asynchronous message.
///
/// Serializes as `{"type": "<kind>", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum AsyncMessage {
    NewTextOld {
        text_no: u32,
        text_stat: TextStat,
    },
    NewName {
        conf_no: u32,
        old_name: String,
        new_name: String,
    },
    IAmOn {
        info: WhoInfo,
    },
    SyncDb,
    LeaveConf {
        conf_no: u32,
    },
    Login {
        person_no: u32,
        session_no: u32,
    },
    RejectedConnection,
    SendMessage {
        recipient: u32,
        sender: u32,
        message: String,
    },
    Logout {
        person_no: u32,
        session_no: u32,
    },
    DeletedText {
        text_no: u32,
        text_stat: TextStat,
    },
    NewText {
        text_no: u32,
        text_stat: TextStat,
    },
    NewRecipient {
        text_no: u32,
        conf_no: u32,
        recipient_type: u32,
    },
    SubRecipient {
        text_no: u32,
        conf_no: u32,
        recipient_type: u32,
    },
    NewMembership {
        person_no: u32,
        conf_no: u32,
    },
    NewUserArea {
        person_no: u32,
        old_user_area: u32,
        new_user_area: u32,
    },
    NewPresentation {
        conf_no: u32,
        old_presentation: u32,
        new_presentation: u32,
    },
    NewMotd {
        conf_no: u32,
        old_motd: u32,
        new_motd: u32,
    },
    TextAuxChanged {
        text_no: u32,
        deleted: Vec<AuxItem>,
        added: Vec<AuxItem>,
    },
}

impl AsyncMessage {
    pub fn kind(&self) -> AsyncKind {
        match self {
            AsyncMessage::NewTextOld { .. } => AsyncKind::NewTextOld,
            AsyncMessage::NewName { .. } => AsyncKind::NewName,
            AsyncMessage::IAmOn { .. } => AsyncKind::IAmOn,
            AsyncMessage::SyncDb => AsyncKind::SyncDb,
            AsyncMessage::LeaveConf { .. } => AsyncKind::LeaveConf,
            AsyncMessage::Login { .. } => AsyncKind::Login,
            AsyncMessage::RejectedConnection => AsyncKind::RejectedConnection,
            AsyncMessage::SendMessage { .. } => AsyncKind::SendMessage,
            AsyncMessage::Logout { .. } => AsyncKind::Logout,
            AsyncMessage::DeletedText { .. } => AsyncKind::DeletedText,
            AsyncMessage::NewText { .. } => AsyncKind::NewText,
            AsyncMessage::NewRecipient { .. } => AsyncKind::NewRecipient,
            AsyncMessage::SubRecipient { .. } => AsyncKind::SubRecipient,
            AsyncMessage::NewMembership { .. } => AsyncKind::NewMembership,
            AsyncMessage::NewUserArea { .. } => AsyncKind::NewUserArea,
            AsyncMessage::NewPresentation { .. } => AsyncKind::NewPresentation,
            AsyncMessage::NewMotd { .. } => AsyncKind::NewMotd,
            AsyncMessage::TextAuxChanged { .. } => AsyncKind::TextAuxChanged,
        }
    }

    /// Decode the body of an async frame. `Ok(None)` for kinds this codec
    /// does not know; the frame itself was still well formed.
    pub fn decode(msg_no: u32, body: Vec<Token>) -> Result<Option<Self>, CodecError> {
        let Some(kind) = AsyncKind::from_msg_no(msg_no) else {
            return Ok(None);
        };
        let mut r = TokenReader::new(body);
        let msg = match kind {
            AsyncKind::NewTextOld => AsyncMessage::NewTextOld {
                text_no: r.int()?,
                text_stat: TextStat::decode_old(&mut r)?,
            },
            AsyncKind::NewName => AsyncMessage::NewName {
                conf_no: r.int()?,
                old_name: r.string()?,
                new_name: r.string()?,
            },
            AsyncKind::IAmOn => AsyncMessage::IAmOn { info: r.decode()? },
            AsyncKind::SyncDb => AsyncMessage::SyncDb,
            AsyncKind::LeaveConf => AsyncMessage::LeaveConf { conf_no: r.int()? },
            AsyncKind::Login => AsyncMessage::Login {
                person_no: r.int()?,
                session_no: r.int()?,
            },
            AsyncKind::RejectedConnection => AsyncMessage::RejectedConnection,
            AsyncKind::SendMessage => AsyncMessage::SendMessage {
                recipient: r.int()?,
                sender: r.int()?,
                message: r.string()?,
            },
            AsyncKind::Logout => AsyncMessage::Logout {
                person_no: r.int()?,
                session_no: r.int()?,
            },
            AsyncKind::DeletedText => AsyncMessage::DeletedText {
                text_no: r.int()?,
                text_stat: r.decode()?,
            },
            AsyncKind::NewText => AsyncMessage::NewText {
                text_no: r.int()?,
                text_stat: r.decode()?,
            },
            AsyncKind::NewRecipient => AsyncMessage::NewRecipient {
                text_no: r.int()?,
                conf_no: r.int()?,
                recipient_type: r.int()?,
            },
            AsyncKind::SubRecipient => AsyncMessage::SubRecipient {
                text_no: r.int()?,
                conf_no: r.int()?,
                recipient_type: r.int()?,
            },
            AsyncKind::NewMembership => AsyncMessage::NewMembership {
                person_no: r.int()?,
                conf_no: r.int()?,
            },
            AsyncKind::NewUserArea => AsyncMessage::NewUserArea {
                person_no: r.int()?,
                old_user_area: r.int()?,
                new_user_area: r.int()?,
            },
            AsyncKind::NewPresentation => AsyncMessage::NewPresentation {
                conf_no: r.int()?,
                old_presentation: r.int()?,
                new_presentation: r.int()?,
            },
            AsyncKind::NewMotd => AsyncMessage::NewMotd {
                conf_no: r.int()?,
                old_motd: r.int()?,
                new_motd: r.int()?,
            },
            AsyncKind::TextAuxChanged => AsyncMessage::TextAuxChanged {
                text_no: r.int()?,
                deleted: r.array(|r| r.decode())?,
                added: r.array(|r| r.decode())?,
            },
        };
        Ok(Some(msg))
    }
}
