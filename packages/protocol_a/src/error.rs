//! Codec errors and the Protocol A server error table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure while turning bytes into frames (or frames into values).
///
/// Every variant except `Io` means the byte stream can no longer be trusted;
/// the connection owning the decoder must be torn down.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected byte {byte:#04x} at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },

    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("server reported a protocol error: {0}")]
    ServerProtocolError(String),

    #[error("bad initial response from server: {0:?}")]
    BadInitialResponse(String),

    #[error("malformed {what}")]
    Malformed { what: &'static str },

    #[error("unexpected end of frame")]
    UnexpectedEnd,
}

impl CodecError {
    pub fn malformed(what: &'static str) -> Self {
        Self::Malformed { what }
    }
}

/// A `%<ref> <error-no> <error-status>` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub code: u32,
    pub status: u32,
}

impl ServerError {
    pub const NOT_IMPLEMENTED: u32 = 2;
    pub const INVALID_PASSWORD: u32 = 4;
    pub const LOGIN_FIRST: u32 = 6;
    pub const LOGIN_DISALLOWED: u32 = 7;
    pub const CONFERENCE_ZERO: u32 = 8;
    pub const UNDEFINED_CONFERENCE: u32 = 9;
    pub const UNDEFINED_PERSON: u32 = 10;
    pub const UNDEFINED_SESSION: u32 = 42;
    pub const UNKNOWN_ASYNC: u32 = 50;

    pub fn new(code: u32, status: u32) -> Self {
        Self { code, status }
    }

    /// Symbolic name of the error code, `"Unknown"` for codes outside the table.
    pub fn name(&self) -> &'static str {
        error_name(self.code)
    }

    /// Whether the error means the supplied credentials were refused.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.code,
            Self::INVALID_PASSWORD
                | Self::LOGIN_DISALLOWED
                | Self::CONFERENCE_ZERO
                | Self::UNDEFINED_PERSON
        )
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}), status {}", self.name(), self.code, self.status)
    }
}

impl std::error::Error for ServerError {}

const ERROR_NAMES: [&str; 62] = [
    "NoError",
    "Unknown",
    "NotImplemented",
    "ObsoleteCall",
    "InvalidPassword",
    "StringTooLong",
    "LoginFirst",
    "LoginDisallowed",
    "ConferenceZero",
    "UndefinedConference",
    "UndefinedPerson",
    "AccessDenied",
    "PermissionDenied",
    "NotMember",
    "NoSuchText",
    "TextZero",
    "NoSuchLocalText",
    "LocalTextZero",
    "BadName",
    "IndexOutOfRange",
    "ConferenceExists",
    "PersonExists",
    "SecretPublic",
    "Letterbox",
    "LdbError",
    "IllegalMisc",
    "IllegalInfoType",
    "AlreadyRecipient",
    "AlreadyComment",
    "AlreadyFootnote",
    "NotRecipient",
    "NotComment",
    "NotFootnote",
    "RecipientLimit",
    "CommentLimit",
    "FootnoteLimit",
    "MarkLimit",
    "NotAuthor",
    "NoConnect",
    "OutOfmemory",
    "ServerIsCrazy",
    "ClientIsCrazy",
    "UndefinedSession",
    "RegexpError",
    "NotMarked",
    "TemporaryFailure",
    "LongArray",
    "AnonymousRejected",
    "IllegalAuxItem",
    "AuxItemPermission",
    "UnknownAsync",
    "InternalError",
    "FeatureDisabled",
    "MessageNotSent",
    "InvalidMembershipType",
    "InvalidRange",
    "InvalidRangeList",
    "UndefinedMeasurement",
    "PriorityDenied",
    "WeightDenied",
    "WeightZero",
    "BadBool",
];

/// Name for a Protocol A error number.
pub fn error_name(code: u32) -> &'static str {
    match code {
        2..=61 => ERROR_NAMES[code as usize],
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_names() {
        assert_eq!(error_name(2), "NotImplemented");
        assert_eq!(error_name(4), "InvalidPassword");
        assert_eq!(error_name(42), "UndefinedSession");
        assert_eq!(error_name(61), "BadBool");
    }

    #[test]
    fn codes_outside_table_are_unknown() {
        assert_eq!(error_name(0), "Unknown");
        assert_eq!(error_name(1), "Unknown");
        assert_eq!(error_name(62), "Unknown");
        assert_eq!(error_name(u32::MAX), "Unknown");
    }

    #[test]
    fn auth_failures() {
        for code in [4, 7, 8, 10] {
            assert!(ServerError::new(code, 0).is_auth_failure(), "code {code}");
        }
        assert!(!ServerError::new(ServerError::LOGIN_FIRST, 0).is_auth_failure());
    }

    #[test]
    fn display_includes_name_and_status() {
        let e = ServerError::new(9, 1234);
        assert_eq!(e.to_string(), "UndefinedConference (9), status 1234");
    }
}
