//! Public entry point: [`Client`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::Credentials;
use crate::dispatch::{Check, EventHandler};
use crate::event::{Event, EventType};
use crate::gateway::GatewayClient;
use crate::rest::RestClient;
use crate::types::{BoxError, ClientConfig, Error};

/// Handle to a gateway session and its event handler.
///
/// Clone is a cheap Arc refcount bump, so listeners can capture a client and
/// send through it.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    handler: Arc<EventHandler>,
    rest: Arc<RestClient>,
    gateway: GatewayClient,
}

impl Client {
    /// Validate `config` and build the client. No network I/O happens here.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let credentials = Credentials::new(config.token, config.session_token)?;
        let rest = Arc::new(RestClient::new(
            config.api_url,
            credentials.clone(),
            config.timing.connect_timeout,
        )?);
        let handler = Arc::new(EventHandler::new());
        let gateway = GatewayClient::new(
            credentials,
            Arc::clone(&handler),
            Arc::clone(&rest),
            config.gateway_format,
            config.timing,
            config.backoff,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                handler,
                rest,
                gateway,
            }),
        })
    }

    pub fn event_handler(&self) -> &Arc<EventHandler> {
        &self.inner.handler
    }

    /// Register a persistent listener for `event_type` and all of its subtypes.
    pub fn add_listener<F, Fut>(&self, event_type: EventType, listener: F)
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.inner.handler.add_listener(event_type, listener);
    }

    /// Wait for the next `event_type` event accepted by `check`.
    ///
    /// The waiter is registered immediately, before the returned future is
    /// first polled. When `timeout` elapses the wait fails with
    /// [`Error::WaitTimeout`] and the waiter is discarded.
    pub fn wait_for(
        &self,
        event_type: EventType,
        check: Option<Check>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Arc<Event>, Error>> + Send + use<> {
        let waiter = self.inner.handler.add_waiter(event_type, check);
        async move {
            match timeout {
                Some(timeout) => match tokio::time::timeout(timeout, waiter).await {
                    Ok(result) => result,
                    Err(_elapsed) => Err(Error::WaitTimeout),
                },
                None => waiter.await,
            }
        }
    }

    /// Fetch the API configuration without opening the gateway.
    pub async fn login(&self) -> Result<(), Error> {
        self.inner.rest.prepare().await?;
        Ok(())
    }

    /// Connect and keep the gateway session alive until [`close`](Self::close).
    pub async fn start(&self) -> Result<(), Error> {
        self.inner.gateway.start().await
    }

    pub async fn close(&self) {
        self.inner.gateway.close().await;
    }

    /// Reset the session so it can be started again. Listeners are kept.
    pub async fn clear(&self) -> Result<(), Error> {
        self.inner.gateway.clear().await
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.gateway.is_authenticated()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.gateway.is_closed()
    }

    pub async fn begin_typing(&self, channel_id: &str) -> Result<(), Error> {
        self.inner.gateway.begin_typing(channel_id).await
    }

    pub async fn end_typing(&self, channel_id: &str) -> Result<(), Error> {
        self.inner.gateway.end_typing(channel_id).await
    }

    pub async fn ping(&self, time: Option<i64>) -> Result<(), Error> {
        self.inner.gateway.ping(time).await
    }

    /// CDN URL from the fetched API configuration.
    pub async fn cdn_url(&self) -> Option<String> {
        let configuration = self.inner.rest.configuration().await?;
        configuration.cdn_url().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(value: serde_json::Value) -> Event {
        Event::from_payload(value.as_object().cloned().unwrap()).unwrap()
    }

    #[test]
    fn credentials_are_validated() {
        let err = Client::new(ClientConfig::default()).err().unwrap();
        assert!(matches!(err, Error::Config(_)));

        let both = ClientConfig {
            token: Some("bot".into()),
            session_token: Some("user".into()),
            ..Default::default()
        };
        assert!(matches!(Client::new(both), Err(Error::Config(_))));

        assert!(Client::new(ClientConfig::bot("bot")).is_ok());
        assert!(Client::new(ClientConfig::user("user")).is_ok());
    }

    #[tokio::test]
    async fn wait_for_registers_eagerly() {
        let client = Client::new(ClientConfig::bot("bot")).unwrap();
        let waiter = client.wait_for(EventType::Pong, None, None);
        assert_eq!(client.event_handler().waiter_count(EventType::Pong), 1);

        client
            .event_handler()
            .dispatch(event(json!({"type": "Pong", "data": 5})));
        let pong = waiter.await.unwrap();
        assert_eq!(pong.kind(), EventType::Pong);
        assert_eq!(client.event_handler().waiter_count(EventType::Pong), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_times_out_and_is_pruned() {
        let client = Client::new(ClientConfig::bot("bot")).unwrap();
        let result = client
            .wait_for(EventType::Message, None, Some(Duration::from_secs(5)))
            .await;
        assert!(matches!(result, Err(Error::WaitTimeout)));

        client
            .event_handler()
            .dispatch(event(json!({"type": "Message", "channel": "c"})));
        assert_eq!(client.event_handler().waiter_count(EventType::Message), 0);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let client = Client::new(ClientConfig::bot("bot")).unwrap();
        let other = client.clone();
        other.add_listener(EventType::Event, |_event| async { Ok(()) });
        assert_eq!(client.event_handler().listener_count(EventType::Event), 1);

        other.close().await;
        assert!(client.is_closed());
        assert!(client.cdn_url().await.is_none());
    }
}
