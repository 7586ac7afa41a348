//! Credentials used for the gateway handshake and REST requests.

use std::collections::HashMap;
use std::fmt;

use crate::protocol::Payload;
use crate::types::Error;

pub(crate) const BOT_TOKEN_HEADER: &str = "x-bot-token";
pub(crate) const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// Authentication data for either a bot account or a user session.
///
/// Exactly one mode is held; construction through [`Credentials::new`]
/// rejects both "both set" and "neither set".
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Bot token, sent as `x-bot-token`.
    Bot(String),
    /// User session token, sent as `x-session-token`.
    Session(String),
}

impl Credentials {
    pub fn new(token: Option<String>, session_token: Option<String>) -> Result<Self, Error> {
        match (token, session_token) {
            (Some(token), None) => Ok(Self::Bot(token)),
            (None, Some(session_token)) => Ok(Self::Session(session_token)),
            (Some(_), Some(_)) => Err(Error::Config(
                "pass either `token` (bot session) or `session_token` (user session), not both"
                    .to_string(),
            )),
            (None, None) => Err(Error::Config(
                "either `token` (bot session) or `session_token` (user session) is required"
                    .to_string(),
            )),
        }
    }

    fn secret(&self) -> &str {
        match self {
            Self::Bot(token) | Self::Session(token) => token,
        }
    }

    pub fn is_bot(&self) -> bool {
        matches!(self, Self::Bot(_))
    }

    /// Fields merged into the `Authenticate` handshake message.
    pub fn to_handshake_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("token".to_string(), self.secret().into());
        payload
    }

    /// The single header that authenticates REST requests.
    pub fn auth_header(&self) -> (&'static str, &str) {
        match self {
            Self::Bot(token) => (BOT_TOKEN_HEADER, token),
            Self::Session(token) => (SESSION_TOKEN_HEADER, token),
        }
    }

    pub fn to_auth_headers(&self) -> HashMap<&'static str, String> {
        let (name, value) = self.auth_header();
        HashMap::from([(name, value.to_string())])
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.is_bot() { "Bot" } else { "Session" };
        f.debug_tuple(mode).field(&"<redacted>").finish()
    }
}
