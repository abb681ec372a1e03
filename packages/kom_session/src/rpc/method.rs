//! The session methods reachable over RPC.
//!
//! Client and server share this enum; a name that does not parse into a
//! [`Method`] is never sent and never dispatched.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{KomError, KomResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Login,
    Logout,
    WhoAmI,
    UserIsActive,
    ChangeConference,
    LookupName,
    LookupNameExact,
    GetConfName,
    SendMessage,
    Disconnect,
    IsLoggedIn,
    CurrentPersonNo,
    SessionNo,
    GetAsyncMessages,
    Info,
    Close,
}

impl Method {
    pub const ALL: [Method; 16] = [
        Method::Login,
        Method::Logout,
        Method::WhoAmI,
        Method::UserIsActive,
        Method::ChangeConference,
        Method::LookupName,
        Method::LookupNameExact,
        Method::GetConfName,
        Method::SendMessage,
        Method::Disconnect,
        Method::IsLoggedIn,
        Method::CurrentPersonNo,
        Method::SessionNo,
        Method::GetAsyncMessages,
        Method::Info,
        Method::Close,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Login => "login",
            Method::Logout => "logout",
            Method::WhoAmI => "who_am_i",
            Method::UserIsActive => "user_is_active",
            Method::ChangeConference => "change_conference",
            Method::LookupName => "lookup_name",
            Method::LookupNameExact => "lookup_name_exact",
            Method::GetConfName => "get_conf_name",
            Method::SendMessage => "send_message",
            Method::Disconnect => "disconnect",
            Method::IsLoggedIn => "is_logged_in",
            Method::CurrentPersonNo => "current_person_no",
            Method::SessionNo => "session_no",
            Method::GetAsyncMessages => "get_async_messages",
            Method::Info => "info",
            Method::Close => "close",
        }
    }

    /// Parameter names, in positional order. Keyword arguments use these.
    pub fn params(self) -> &'static [&'static str] {
        match self {
            Method::Login => &["pers_no", "passwd"],
            Method::ChangeConference | Method::GetConfName => &["conf_no"],
            Method::LookupName | Method::LookupNameExact => &["name", "want_pers", "want_confs"],
            Method::SendMessage => &["recipient", "message"],
            Method::Disconnect => &["session_no"],
            Method::GetAsyncMessages => &["limit"],
            Method::Logout
            | Method::WhoAmI
            | Method::UserIsActive
            | Method::IsLoggedIn
            | Method::CurrentPersonNo
            | Method::SessionNo
            | Method::Info
            | Method::Close => &[],
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = KomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| KomError::MethodNotExposed(s.to_string()))
    }
}

/// Positional and keyword arguments of one call, resolved against
/// [`Method::params`].
pub struct CallArgs<'a> {
    method: Method,
    args: &'a [Value],
    kwargs: &'a Map<String, Value>,
}

impl<'a> CallArgs<'a> {
    pub fn new(method: Method, args: &'a [Value], kwargs: &'a Map<String, Value>) -> KomResult<Self> {
        let params = method.params();
        if args.len() > params.len() {
            return Err(KomError::InvalidArguments(format!(
                "{method} takes {} arguments, got {}",
                params.len(),
                args.len()
            )));
        }
        if let Some(unknown) = kwargs.keys().find(|k| !params.contains(&k.as_str())) {
            return Err(KomError::InvalidArguments(format!(
                "{method} has no parameter {unknown}"
            )));
        }
        Ok(Self {
            method,
            args,
            kwargs,
        })
    }

    fn raw(&self, name: &str) -> Option<&Value> {
        let idx = self.method.params().iter().position(|p| *p == name)?;
        self.args.get(idx).or_else(|| self.kwargs.get(name))
    }

    pub fn optional<T: DeserializeOwned>(&self, name: &str) -> KomResult<Option<T>> {
        match self.raw(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone()).map(Some).map_err(|e| {
                KomError::InvalidArguments(format!("{}: bad {name}: {e}", self.method))
            }),
        }
    }

    pub fn required<T: DeserializeOwned>(&self, name: &str) -> KomResult<T> {
        self.optional(name)?.ok_or_else(|| {
            KomError::InvalidArguments(format!("{}: missing {name}", self.method))
        })
    }

    pub fn or<T: DeserializeOwned>(&self, name: &str, default: T) -> KomResult<T> {
        Ok(self.optional(name)?.unwrap_or(default))
    }
}
