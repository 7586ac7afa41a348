//! REST collaborator: fetches the API configuration that points at the gateway.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::auth::Credentials;
use crate::types::Error;

/// The subset of the API root document the gateway needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfiguration {
    /// WebSocket gateway URL.
    pub ws: String,
    #[serde(default)]
    pub features: serde_json::Value,
}

impl ApiConfiguration {
    /// File server (`features.autumn.url`), if the instance advertises one.
    pub fn cdn_url(&self) -> Option<&str> {
        self.features.get("autumn")?.get("url")?.as_str()
    }
}

/// HTTP session bound to one API root and one set of credentials.
///
/// The configuration document is fetched once and cached until
/// [`clear`](Self::clear).
pub struct RestClient {
    client: Client,
    api_url: String,
    credentials: Credentials,
    configuration: Mutex<Option<ApiConfiguration>>,
}

impl RestClient {
    pub fn new(
        api_url: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;
        let api_url = api_url.into();

        tracing::debug!(api_url = %api_url, bot = credentials.is_bot(), "REST client initialized");

        Ok(Self {
            client,
            api_url,
            credentials,
            configuration: Mutex::new(None),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Fetch the API configuration unless it is already cached.
    pub async fn prepare(&self) -> Result<ApiConfiguration, Error> {
        let mut cached = self.configuration.lock().await;
        if let Some(configuration) = cached.as_ref() {
            return Ok(configuration.clone());
        }

        let (header, token) = self.credentials.auth_header();
        let configuration = self
            .client
            .get(&self.api_url)
            .header(header, token)
            .send()
            .await?
            .error_for_status()?
            .json::<ApiConfiguration>()
            .await?;

        tracing::info!(
            gateway = %configuration.ws,
            cdn = configuration.cdn_url().unwrap_or("<none>"),
            "Fetched API configuration"
        );
        *cached = Some(configuration.clone());
        Ok(configuration)
    }

    /// The cached configuration, if [`prepare`](Self::prepare) has succeeded.
    pub async fn configuration(&self) -> Option<ApiConfiguration> {
        self.configuration.lock().await.clone()
    }

    /// Drop the cached configuration so the next `prepare` refetches it.
    pub async fn clear(&self) {
        *self.configuration.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn root_document() -> serde_json::Value {
        json!({
            "revolt": "0.5.3",
            "ws": "wss://ws.example.test",
            "features": {
                "autumn": {"enabled": true, "url": "https://autumn.example.test"},
                "january": {"enabled": true, "url": "https://jan.example.test"},
            },
        })
    }

    fn rest(server: &MockServer, credentials: Credentials) -> RestClient {
        RestClient::new(server.base_url(), credentials, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn prepare_fetches_once_and_caches() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/").header("x-bot-token", "bot-secret");
            then.status(200).json_body(root_document());
        });

        let rest = rest(&server, Credentials::Bot("bot-secret".into()));
        assert!(rest.configuration().await.is_none());

        let configuration = rest.prepare().await.unwrap();
        assert_eq!(configuration.ws, "wss://ws.example.test");
        assert_eq!(configuration.cdn_url(), Some("https://autumn.example.test"));

        rest.prepare().await.unwrap();
        mock.assert_hits(1);

        rest.clear().await;
        assert!(rest.configuration().await.is_none());
        rest.prepare().await.unwrap();
        mock.assert_hits(2);
    }

    #[tokio::test]
    async fn session_token_uses_session_header() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/").header("x-session-token", "user-session");
            then.status(200).json_body(json!({"ws": "wss://ws.example.test"}));
        });

        let rest = rest(&server, Credentials::Session("user-session".into()));
        let configuration = rest.prepare().await.unwrap();
        mock.assert();
        assert_eq!(configuration.cdn_url(), None);
    }

    #[tokio::test]
    async fn error_status_is_http_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/");
            then.status(502);
        });

        let rest = rest(&server, Credentials::Bot("bot-secret".into()));
        let err = rest.prepare().await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
        assert!(err.is_transient());
        assert!(rest.configuration().await.is_none());
    }
}
