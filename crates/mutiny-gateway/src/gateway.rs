//! Gateway connection: handshake, poll loop, heartbeat, and reconnection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::Credentials;
use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::dispatch::EventHandler;
use crate::event::{Event, EventType};
use crate::protocol::{self, GatewayFormat, Payload, render_frame};
use crate::rest::RestClient;
use crate::types::{AuthenticationError, Error, GatewayTiming};

// ---------------------------------------------------------------------------
// Type aliases for WebSocket split halves
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub(crate) type WsRead = futures_util::stream::SplitStream<WsStream>;
pub(crate) type WsWrite = futures_util::stream::SplitSink<WsStream, Message>;

/// Why a poll loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    /// Close frame or end of stream, with the close code when one was sent.
    Remote(Option<u16>),
    IdleTimeout,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_ms() -> i64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    i64::try_from(millis).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// URL construction
// ---------------------------------------------------------------------------

/// Append `format=<json|msgpack>` to the gateway URL, replacing any existing
/// `format` pair and keeping the rest of the query.
pub(crate) fn build_gateway_url(gateway: &str, format: GatewayFormat) -> Result<Url, Error> {
    let mut url = Url::parse(gateway)?;
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "format")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair("format", format.as_str());
    Ok(url)
}

// ---------------------------------------------------------------------------
// Gateway client
// ---------------------------------------------------------------------------

/// One logical gateway connection with automatic reconnection.
///
/// At most one transport is live at a time. The read half is owned by the
/// running loop; the write half is shared so outbound helpers can be called
/// from listener tasks.
pub struct GatewayClient {
    credentials: Credentials,
    handler: Arc<EventHandler>,
    rest: Arc<RestClient>,
    format: GatewayFormat,
    timing: GatewayTiming,
    backoff: BackoffConfig,
    writer: tokio::sync::Mutex<Option<WsWrite>>,
    authenticated: AtomicBool,
    shutdown: Mutex<CancellationToken>,
    running: tokio::sync::Mutex<()>,
}

impl GatewayClient {
    pub fn new(
        credentials: Credentials,
        handler: Arc<EventHandler>,
        rest: Arc<RestClient>,
        format: GatewayFormat,
        timing: GatewayTiming,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            credentials,
            handler,
            rest,
            format,
            timing,
            backoff,
            writer: tokio::sync::Mutex::new(None),
            authenticated: AtomicBool::new(false),
            shutdown: Mutex::new(CancellationToken::new()),
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn format(&self) -> GatewayFormat {
        self.format
    }

    /// Whether the current connection has received `Authenticated`.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shutdown).is_cancelled()
    }

    fn shutdown_token(&self) -> CancellationToken {
        lock(&self.shutdown).clone()
    }

    /// Run the connect/reconnect loop until [`close`](Self::close) is called.
    ///
    /// Returns `Ok(())` on a local close. Authentication failures and backoff
    /// exhaustion end the loop with an error; transport failures and remote
    /// closes are retried.
    pub async fn start(&self) -> Result<(), Error> {
        let Ok(_running) = self.running.try_lock() else {
            return Err(Error::AlreadyRunning);
        };
        let shutdown = self.shutdown_token();
        let mut backoff = ExponentialBackoff::new(self.backoff.clone());

        loop {
            if self.is_authenticated() {
                // A session that got as far as authenticating starts a fresh
                // retry sequence.
                backoff.reset();
            }

            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                outcome = self.attempt(&mut backoff) => Some(outcome),
            };

            match outcome {
                None => {
                    self.release_transport().await;
                    tracing::info!("Gateway connection closed by the client");
                    return Ok(());
                }
                Some(Ok(Disconnect::Remote(Some(code)))) => {
                    tracing::info!(code, "Gateway connection closed, attempting a reconnect");
                }
                Some(Ok(Disconnect::Remote(None))) => {
                    tracing::info!("Gateway connection ended, attempting a reconnect");
                }
                Some(Ok(Disconnect::IdleTimeout)) => {
                    tracing::warn!("No frames from the gateway within the idle timeout, reconnecting");
                }
                Some(Err(e)) if e.is_transient() => {
                    tracing::warn!(error = %e, "Failed to connect to the gateway, attempting a reconnect");
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Gateway connection loop stopped");
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&self, backoff: &mut ExponentialBackoff) -> Result<Disconnect, Error> {
        backoff.delay().await?;
        self.connect().await
    }

    /// Open one transport, authenticate, and poll it until it drops.
    ///
    /// The transport is always released before returning.
    async fn connect(&self) -> Result<Disconnect, Error> {
        self.authenticated.store(false, Ordering::SeqCst);
        let configuration = self.rest.prepare().await?;
        let url = build_gateway_url(&configuration.ws, self.format)?;

        tracing::info!(url = %url, "Connecting to the gateway");
        let connect_timeout = self.timing.connect_timeout;
        let (ws, _resp) =
            tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| Error::Timeout(connect_timeout))??;
        let (ws_write, ws_read) = ws.split();
        *self.writer.lock().await = Some(ws_write);

        let result = match self.authenticate().await {
            Ok(()) => self.poll_loop(ws_read).await,
            Err(e) => Err(e),
        };
        self.release_transport().await;
        result
    }

    async fn poll_loop(&self, mut ws_read: WsRead) -> Result<Disconnect, Error> {
        let mut heartbeat = self
            .timing
            .heartbeat_interval
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));
        let mut idle_deadline = self.timing.idle_timeout.map(|idle| Instant::now() + idle);

        loop {
            tokio::select! {
                frame = ws_read.next() => {
                    let Some(frame) = frame else {
                        return Ok(Disconnect::Remote(None));
                    };
                    let frame = frame?;
                    if let Some(idle) = self.timing.idle_timeout {
                        idle_deadline = Some(Instant::now() + idle);
                    }
                    match &frame {
                        Message::Close(close) => {
                            let code = close.as_ref().map(|c| u16::from(c.code));
                            return Ok(Disconnect::Remote(code));
                        }
                        Message::Text(_) | Message::Binary(_) => self.process_frame(&frame)?,
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                            tracing::trace!("Ignoring control frame");
                        }
                    }
                }

                _ = next_tick(&mut heartbeat) => {
                    tracing::trace!("Sending heartbeat ping");
                    let ping = Message::Ping(now_ms().to_be_bytes().to_vec().into());
                    let limit = self.timing.connect_timeout;
                    tokio::time::timeout(limit, self.send_frame(ping))
                        .await
                        .map_err(|_| Error::Timeout(limit))??;
                }

                _ = expired(idle_deadline) => {
                    return Ok(Disconnect::IdleTimeout);
                }
            }
        }
    }

    /// Decode and dispatch one data frame. Only authentication failures
    /// escape; everything else is logged and the frame is skipped.
    fn process_frame(&self, frame: &Message) -> Result<(), Error> {
        match self.decode_event(frame) {
            Ok(event) => {
                self.handler.dispatch(event);
                Ok(())
            }
            Err(Error::Authentication(e)) => Err(Error::Authentication(e)),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    payload = %render_frame(frame),
                    "Couldn't process a gateway event, skipping it"
                );
                Ok(())
            }
        }
    }

    fn decode_event(&self, frame: &Message) -> Result<Event, Error> {
        let payload = protocol::decode(self.format, frame)?;
        let event = Event::from_payload(payload)?;
        self.gateway_handle(&event)?;
        Ok(event)
    }

    fn gateway_handle(&self, event: &Event) -> Result<(), Error> {
        match event.kind() {
            EventType::Authenticated => {
                self.authenticated.store(true, Ordering::SeqCst);
                tracing::info!("Authenticated with the gateway");
                Ok(())
            }
            EventType::Error => {
                let code = event.str_field("error").unwrap_or_default();
                Err(AuthenticationError::from_code(code).into())
            }
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Encode `payload` in the session's format and send it.
    pub async fn send(&self, payload: &Payload) -> Result<(), Error> {
        let frame = protocol::encode(self.format, payload)?;
        self.send_frame(frame).await
    }

    async fn send_frame(&self, frame: Message) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::NotConnected)?;
        writer.send(frame).await?;
        Ok(())
    }

    pub async fn authenticate(&self) -> Result<(), Error> {
        self.send(&protocol::authenticate(&self.credentials)).await
    }

    pub async fn begin_typing(&self, channel_id: &str) -> Result<(), Error> {
        self.send(&protocol::begin_typing(channel_id)).await
    }

    pub async fn end_typing(&self, channel_id: &str) -> Result<(), Error> {
        self.send(&protocol::end_typing(channel_id)).await
    }

    pub async fn ping(&self, time: Option<i64>) -> Result<(), Error> {
        self.send(&protocol::ping(time)).await
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    async fn release_transport(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.close().await
        {
            tracing::debug!(error = %e, "Error while closing the gateway transport");
        }
    }

    /// Stop the loop and close the transport. Safe to call repeatedly.
    pub async fn close(&self) {
        let shutdown = self.shutdown_token();
        if !shutdown.is_cancelled() {
            tracing::info!("Closing the gateway connection");
            shutdown.cancel();
        }
        self.release_transport().await;
        self.authenticated.store(false, Ordering::SeqCst);
    }

    /// Reset connection state so [`start`](Self::start) can run again.
    ///
    /// Refused with [`Error::AlreadyRunning`] while the loop is active.
    pub async fn clear(&self) -> Result<(), Error> {
        let Ok(_running) = self.running.try_lock() else {
            return Err(Error::AlreadyRunning);
        };
        *lock(&self.shutdown) = CancellationToken::new();
        self.rest.clear().await;
        self.release_transport().await;
        self.authenticated.store(false, Ordering::SeqCst);
        Ok(())
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
