//! Public configuration and error types for the mutiny-gateway crate.

use std::fmt;
use std::time::Duration;

use tokio_tungstenite::tungstenite;

use crate::backoff::BackoffConfig;
use crate::protocol::GatewayFormat;

/// A boxed error type for listener and predicate callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub const DEFAULT_API_URL: &str = "https://api.revolt.chat";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timing knobs for the gateway connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayTiming {
    /// Limit for the REST configuration fetch and the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Interval between WebSocket control pings (`None` disables the heartbeat).
    pub heartbeat_interval: Option<Duration>,
    /// Treat the connection as dropped when no frame arrives for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for GatewayTiming {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

/// Configuration for [`Client::new`](crate::Client::new).
///
/// Exactly one of `token` / `session_token` must be set. `Debug` redacts both.
#[derive(Clone)]
pub struct ClientConfig {
    /// Bot token, for bot accounts.
    pub token: Option<String>,
    /// Session token, for user accounts.
    pub session_token: Option<String>,
    /// REST API root. Its configuration document points at the gateway.
    pub api_url: String,
    pub gateway_format: GatewayFormat,
    pub timing: GatewayTiming,
    pub backoff: BackoffConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token: None,
            session_token: None,
            api_url: DEFAULT_API_URL.to_string(),
            gateway_format: GatewayFormat::default(),
            timing: GatewayTiming::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |token: &Option<String>| token.as_ref().map(|_| "<redacted>");
        f.debug_struct("ClientConfig")
            .field("token", &redact(&self.token))
            .field("session_token", &redact(&self.session_token))
            .field("api_url", &self.api_url)
            .field("gateway_format", &self.gateway_format)
            .field("timing", &self.timing)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl ClientConfig {
    pub fn bot(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn user(session_token: impl Into<String>) -> Self {
        Self {
            session_token: Some(session_token.into()),
            ..Default::default()
        }
    }
}

/// Reasons the gateway rejected the `Authenticate` handshake.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthenticationError {
    #[error("authentication failed: invalid credentials")]
    InvalidCredentials,

    #[error("authentication failed: account onboarding is not finished")]
    OnboardingNotFinished,

    #[error("authentication failed: {0}")]
    Rejected(String),
}

impl AuthenticationError {
    /// Map the `error` field of a gateway `Error` event.
    pub fn from_code(code: &str) -> Self {
        match code {
            "InvalidSession" => Self::InvalidCredentials,
            "OnboardingNotFinished" => Self::OnboardingNotFinished,
            other => Self::Rejected(other.to_string()),
        }
    }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("frame decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error("gateway connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("gave up reconnecting after {attempts} attempts")]
    BackoffExhausted { attempts: u32 },

    #[error("gateway is not connected")]
    NotConnected,

    #[error("gateway connection loop is already running")]
    AlreadyRunning,

    #[error("timed out waiting for event")]
    WaitTimeout,

    #[error("wait check failed: {0}")]
    Check(BoxError),

    #[error("event handler dropped the waiter")]
    WaiterDropped,
}

impl Error {
    /// Transport-level failures the reconnect loop recovers from.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::WebSocket(_) | Error::Http(_) | Error::Url(_) | Error::Timeout(_)
        )
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_error_codes() {
        assert_eq!(
            AuthenticationError::from_code("InvalidSession"),
            AuthenticationError::InvalidCredentials
        );
        assert_eq!(
            AuthenticationError::from_code("OnboardingNotFinished"),
            AuthenticationError::OnboardingNotFinished
        );
        assert_eq!(
            AuthenticationError::from_code("AlreadyAuthenticated"),
            AuthenticationError::Rejected("AlreadyAuthenticated".to_string())
        );
    }

    #[test]
    fn transient_classification() {
        assert!(Error::Timeout(Duration::from_secs(1)).is_transient());
        assert!(Error::from(tungstenite::Error::ConnectionClosed).is_transient());
        let bad_url = url::Url::parse("not a url").unwrap_err();
        assert!(Error::from(bad_url).is_transient());
        assert!(!Error::Authentication(AuthenticationError::InvalidCredentials).is_transient());
        assert!(!Error::Decode("bad".into()).is_transient());
        assert!(!Error::Config("bad".into()).is_transient());
    }

    #[test]
    fn config_constructors() {
        let bot = ClientConfig::bot("t");
        assert_eq!(bot.token.as_deref(), Some("t"));
        assert!(bot.session_token.is_none());
        assert_eq!(bot.api_url, DEFAULT_API_URL);
        assert_eq!(bot.gateway_format, GatewayFormat::Msgpack);

        let user = ClientConfig::user("s");
        assert!(user.token.is_none());
        assert_eq!(user.session_token.as_deref(), Some("s"));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let bot = format!("{:?}", ClientConfig::bot("bot-secret"));
        assert!(!bot.contains("bot-secret"), "{bot}");
        assert!(bot.contains("token: Some(\"<redacted>\")"), "{bot}");
        assert!(bot.contains("session_token: None"), "{bot}");
        assert!(bot.contains(DEFAULT_API_URL), "{bot}");

        let user = format!("{:#?}", ClientConfig::user("session-secret"));
        assert!(!user.contains("session-secret"), "{user}");
    }

    #[test]
    fn timing_defaults() {
        let timing = GatewayTiming::default();
        assert_eq!(timing.connect_timeout, Duration::from_secs(30));
        assert_eq!(timing.heartbeat_interval, Some(Duration::from_secs(10)));
        assert_eq!(timing.idle_timeout, Some(Duration::from_secs(30)));
    }
}
