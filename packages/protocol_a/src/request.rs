//! Outgoing requests.

use bytes::{BufMut, BytesMut};
use std::fmt;

use crate::RefNo;
use crate::string_to_latin1;

/// The requests the gateway issues. Each maps to one Protocol A call number.
#[derive(Clone, PartialEq, Eq)]
pub enum Request {
    Logout,
    ChangeConference {
        conf_no: u32,
    },
    SendMessage {
        recipient: u32,
        message: String,
    },
    Disconnect {
        session_no: u32,
    },
    WhoAmI,
    Login {
        person_no: u32,
        password: String,
        invisible: bool,
    },
    SetClientVersion {
        name: String,
        version: String,
    },
    LookupZName {
        name: String,
        want_persons: bool,
        want_confs: bool,
    },
    GetUconfStat {
        conf_no: u32,
    },
    AcceptAsync {
        msg_nos: Vec<u32>,
    },
    QueryAsync,
    UserActive,
}

impl Request {
    pub fn call_no(&self) -> u32 {
        match self {
            Request::Logout => 1,
            Request::ChangeConference { .. } => 2,
            Request::SendMessage { .. } => 53,
            Request::Disconnect { .. } => 55,
            Request::WhoAmI => 56,
            Request::Login { .. } => 62,
            Request::SetClientVersion { .. } => 69,
            Request::LookupZName { .. } => 76,
            Request::GetUconfStat { .. } => 78,
            Request::AcceptAsync { .. } => 80,
            Request::QueryAsync => 81,
            Request::UserActive => 82,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::Logout => "logout",
            Request::ChangeConference { .. } => "change-conference",
            Request::SendMessage { .. } => "send-message",
            Request::Disconnect { .. } => "disconnect",
            Request::WhoAmI => "who-am-i",
            Request::Login { .. } => "login",
            Request::SetClientVersion { .. } => "set-client-version",
            Request::LookupZName { .. } => "lookup-z-name",
            Request::GetUconfStat { .. } => "get-uconf-stat",
            Request::AcceptAsync { .. } => "accept-async",
            Request::QueryAsync => "query-async",
            Request::UserActive => "user-active",
        }
    }

    /// Write `<ref> <call-no> <args>\n` into `dst`.
    pub fn encode(&self, ref_no: RefNo, dst: &mut BytesMut) {
        dst.put_slice(format!("{} {}", ref_no, self.call_no()).as_bytes());
        match self {
            Request::Logout | Request::WhoAmI | Request::QueryAsync | Request::UserActive => {}
            Request::ChangeConference { conf_no } | Request::GetUconfStat { conf_no } => {
                put_int(dst, *conf_no);
            }
            Request::SendMessage { recipient, message } => {
                put_int(dst, *recipient);
                put_string(dst, message);
            }
            Request::Disconnect { session_no } => put_int(dst, *session_no),
            Request::Login {
                person_no,
                password,
                invisible,
            } => {
                put_int(dst, *person_no);
                put_string(dst, password);
                put_int(dst, u32::from(*invisible));
            }
            Request::SetClientVersion { name, version } => {
                put_string(dst, name);
                put_string(dst, version);
            }
            Request::LookupZName {
                name,
                want_persons,
                want_confs,
            } => {
                put_string(dst, name);
                put_int(dst, u32::from(*want_persons));
                put_int(dst, u32::from(*want_confs));
            }
            Request::AcceptAsync { msg_nos } => {
                put_int(dst, msg_nos.len() as u32);
                dst.put_slice(b" {");
                for n in msg_nos {
                    put_int(dst, *n);
                }
                dst.put_slice(b" }");
            }
        }
        dst.put_u8(b'\n');
    }
}

impl fmt::Debug for Request {
    // Passwords must not end up in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Login {
                person_no,
                invisible,
                ..
            } => f
                .debug_struct("Login")
                .field("person_no", person_no)
                .field("password", &"<redacted>")
                .field("invisible", invisible)
                .finish(),
            Request::SendMessage { recipient, message } => f
                .debug_struct("SendMessage")
                .field("recipient", recipient)
                .field("message", message)
                .finish(),
            Request::SetClientVersion { name, version } => f
                .debug_struct("SetClientVersion")
                .field("name", name)
                .field("version", version)
                .finish(),
            Request::LookupZName {
                name,
                want_persons,
                want_confs,
            } => f
                .debug_struct("LookupZName")
                .field("name", name)
                .field("want_persons", want_persons)
                .field("want_confs", want_confs)
                .finish(),
            Request::AcceptAsync { msg_nos } => f
                .debug_struct("AcceptAsync")
                .field("msg_nos", msg_nos)
                .finish(),
            Request::ChangeConference { conf_no } | Request::GetUconfStat { conf_no } => {
                write!(f, "{}({})", self.name(), conf_no)
            }
            Request::Disconnect { session_no } => write!(f, "disconnect({session_no})"),
            Request::Logout | Request::WhoAmI | Request::QueryAsync | Request::UserActive => {
                f.write_str(self.name())
            }
        }
    }
}

fn put_int(dst: &mut BytesMut, n: u32) {
    dst.put_slice(format!(" {n}").as_bytes());
}

fn put_string(dst: &mut BytesMut, s: &str) {
    let bytes = string_to_latin1(s);
    dst.put_slice(format!(" {}H", bytes.len()).as_bytes());
    dst.put_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(req: Request, ref_no: RefNo) -> String {
        let mut buf = BytesMut::new();
        req.encode(ref_no, &mut buf);
        crate::latin1_to_string(&buf)
    }

    #[test]
    fn encodes_argumentless_requests() {
        assert_eq!(encoded(Request::WhoAmI, 7), "7 56\n");
        assert_eq!(encoded(Request::Logout, 1), "1 1\n");
        assert_eq!(encoded(Request::UserActive, 12), "12 82\n");
    }

    #[test]
    fn encodes_login_with_hollerith_password() {
        let req = Request::Login {
            person_no: 14506,
            password: "hemligt ord".into(),
            invisible: true,
        };
        assert_eq!(encoded(req, 3), "3 62 14506 11Hhemligt ord 1\n");
    }

    #[test]
    fn hollerith_length_counts_latin1_bytes() {
        let req = Request::SendMessage {
            recipient: 0,
            message: "åäö".into(),
        };
        assert_eq!(encoded(req, 9), "9 53 0 3Håäö\n");
    }

    #[test]
    fn encodes_accept_async_array() {
        let req = Request::AcceptAsync {
            msg_nos: vec![0, 9, 13],
        };
        assert_eq!(encoded(req, 2), "2 80 3 { 0 9 13 }\n");
        let empty = Request::AcceptAsync { msg_nos: vec![] };
        assert_eq!(encoded(empty, 2), "2 80 0 { }\n");
    }

    #[test]
    fn encodes_lookup_z_name() {
        let req = Request::LookupZName {
            name: "Oskar".into(),
            want_persons: true,
            want_confs: false,
        };
        assert_eq!(encoded(req, 4), "4 76 5HOskar 1 0\n");
    }

    #[test]
    fn debug_hides_password() {
        let req = Request::Login {
            person_no: 1,
            password: "secret".into(),
            invisible: false,
        };
        let s = format!("{req:?}");
        assert!(!s.contains("secret"));
        assert!(s.contains("redacted"));
    }
}
