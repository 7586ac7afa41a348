//! Connect to the gateway and print incoming messages.
//!
//! ```sh
//! MUTINY_BOT_TOKEN=<token> cargo run -p mutiny-gateway --example listen
//! ```
//!
//! Use `MUTINY_SESSION_TOKEN` instead for a user account. `MUTINY_API_URL`
//! overrides the API root and `MUTINY_GATEWAY_FORMAT` selects `json` or
//! `msgpack`. Message payloads are printed to stdout as JSON (pipe to `jq`).

use mutiny_gateway::{Client, ClientConfig, DEFAULT_API_URL, EventType, GatewayFormat};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let gateway_format = match std::env::var("MUTINY_GATEWAY_FORMAT") {
        Ok(format) => format.parse::<GatewayFormat>()?,
        Err(_) => GatewayFormat::default(),
    };
    let config = ClientConfig {
        token: std::env::var("MUTINY_BOT_TOKEN").ok(),
        session_token: std::env::var("MUTINY_SESSION_TOKEN").ok(),
        api_url: std::env::var("MUTINY_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
        gateway_format,
        ..Default::default()
    };

    eprintln!("connecting to {} ({gateway_format}) ...", config.api_url);
    let client = Client::new(config)?;

    client.add_listener(EventType::Ready, |_event| async {
        eprintln!("[ready]");
        Ok(())
    });
    client.add_listener(EventType::Message, |event| async move {
        eprintln!(
            "[message] channel={} author={}",
            event.str_field("channel").unwrap_or("-"),
            event.str_field("author").unwrap_or("-"),
        );
        println!("{}", serde_json::Value::Object(event.payload().clone()));
        Ok(())
    });

    client.start().await?;
    Ok(())
}
