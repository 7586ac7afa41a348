//! Revolt-style chat gateway client.
//!
//! Keeps one authenticated WebSocket session to the gateway alive and fans
//! the events it receives out to typed listeners and one-shot waiters.
//!
//! # Features
//! - Bot token or user session token authentication
//! - JSON (text frames) or MessagePack (binary frames) wire format
//! - Automatic reconnection with capped exponential backoff
//! - Heartbeat pings and idle-timeout detection
//! - Hierarchical subscriptions: a listener on a category receives every
//!   event below it
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), mutiny_gateway::Error> {
//! use mutiny_gateway::{Client, ClientConfig, EventType};
//!
//! let client = Client::new(ClientConfig::bot("my-bot-token"))?;
//!
//! client.add_listener(EventType::Message, |event| async move {
//!     println!("{:?}", event.str_field("content"));
//!     Ok(())
//! });
//!
//! let ready = client.wait_for(EventType::Ready, None, None);
//! let runner = client.clone();
//! tokio::spawn(async move { runner.start().await });
//!
//! ready.await?;
//! println!("gateway ready");
//! # Ok(())
//! # }
//! ```

mod auth;
mod backoff;
mod client;
mod dispatch;
mod event;
mod gateway;
pub mod protocol;
mod rest;
mod types;

pub use auth::Credentials;
pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use client::Client;
pub use dispatch::{Check, EventHandler, Listener, WaitFor};
pub use event::{Event, EventType};
pub use gateway::GatewayClient;
pub use protocol::{GatewayFormat, Payload};
pub use rest::{ApiConfiguration, RestClient};
pub use types::{
    AuthenticationError, BoxError, ClientConfig, DEFAULT_API_URL, Error, GatewayTiming,
};
