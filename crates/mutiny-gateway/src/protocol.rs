//! Gateway wire formats, control messages, and frame encode/decode.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::auth::Credentials;
use crate::types::Error;

/// A structured gateway message: a string-keyed map with a `type` field.
pub type Payload = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Outbound message types
// ---------------------------------------------------------------------------

pub mod message_type {
    pub const AUTHENTICATE: &str = "Authenticate";
    pub const BEGIN_TYPING: &str = "BeginTyping";
    pub const END_TYPING: &str = "EndTyping";
    pub const PING: &str = "Ping";
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Frame encoding negotiated through the `format` query parameter.
///
/// msgpack is the default; JSON is mostly useful for debugging with plain
/// WebSocket tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayFormat {
    /// UTF-8 JSON in text frames.
    Json,
    /// MessagePack in binary frames.
    #[default]
    Msgpack,
}

impl GatewayFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Msgpack => "msgpack",
        }
    }

    fn frame_kind(self) -> &'static str {
        match self {
            Self::Json => "text",
            Self::Msgpack => "binary",
        }
    }
}

impl fmt::Display for GatewayFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "msgpack" => Ok(Self::Msgpack),
            other => Err(Error::Config(format!(
                "unknown gateway format {other:?} (expected \"json\" or \"msgpack\")"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

pub fn encode(format: GatewayFormat, payload: &Payload) -> Result<Message, Error> {
    match format {
        GatewayFormat::Json => Ok(Message::Text(serde_json::to_string(payload)?.into())),
        GatewayFormat::Msgpack => Ok(Message::Binary(rmp_serde::to_vec_named(payload)?.into())),
    }
}

/// Decode a data frame. A frame of the wrong physical type for `format` is
/// an error for that frame only.
pub fn decode(format: GatewayFormat, frame: &Message) -> Result<Payload, Error> {
    match (format, frame) {
        (GatewayFormat::Json, Message::Text(text)) => decode_json(text.as_str()),
        (GatewayFormat::Msgpack, Message::Binary(data)) => decode_msgpack(data),
        (format, other) => Err(Error::Decode(format!(
            "got a {} frame, but the {format} gateway format only accepts {} frames",
            describe_kind(other),
            format.frame_kind(),
        ))),
    }
}

fn decode_json(text: &str) -> Result<Payload, Error> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::Decode(format!("json decode error: {e}")))?;
    into_payload(value)
}

fn decode_msgpack(data: &[u8]) -> Result<Payload, Error> {
    // msgpack → rmpv::Value → serde_json::Value, so both formats share one
    // dynamic representation and msgpack binary values survive as base64.
    let mut cursor = std::io::Cursor::new(data);
    let value = rmpv::decode::read_value(&mut cursor)
        .map_err(|e| Error::Decode(format!("msgpack decode error: {e}")))?;
    into_payload(rmpv_to_json(value))
}

fn into_payload(value: Value) -> Result<Payload, Error> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::Decode(format!(
            "expected a map at the top level, got {}",
            json_kind(&other)
        ))),
    }
}

/// Convert an rmpv::Value to serde_json::Value, encoding binary data as base64 strings.
fn rmpv_to_json(value: rmpv::Value) -> Value {
    match value {
        rmpv::Value::Nil => Value::Null,
        rmpv::Value::Boolean(b) => Value::Bool(b),
        rmpv::Value::Integer(i) => {
            if let Some(n) = i.as_i64() {
                Value::Number(n.into())
            } else if let Some(n) = i.as_u64() {
                Value::Number(n.into())
            } else {
                Value::Null
            }
        }
        rmpv::Value::F32(f) => {
            serde_json::Number::from_f64(f64::from(f)).map_or(Value::Null, Value::Number)
        }
        rmpv::Value::F64(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        rmpv::Value::String(s) => match s.into_str() {
            Some(s) => Value::String(s),
            None => {
                tracing::warn!("msgpack string contains invalid UTF-8, substituting empty string");
                Value::String(String::new())
            }
        },
        rmpv::Value::Binary(bytes) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(&bytes))
        }
        rmpv::Value::Array(arr) => Value::Array(arr.into_iter().map(rmpv_to_json).collect()),
        rmpv::Value::Map(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (map_key(k), rmpv_to_json(v)))
                .collect(),
        ),
        rmpv::Value::Ext(_, bytes) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(&bytes))
        }
    }
}

fn map_key(key: rmpv::Value) -> String {
    match key {
        rmpv::Value::String(s) => s.into_str().unwrap_or_else(|| {
            tracing::warn!("msgpack map key contains invalid UTF-8, substituting empty string");
            String::new()
        }),
        other => other.to_string(),
    }
}

fn describe_kind(frame: &Message) -> &'static str {
    match frame {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "raw",
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a map",
    }
}

/// Printable form of a data frame for diagnostics: text as-is, binary as base64.
pub(crate) fn render_frame(frame: &Message) -> String {
    match frame {
        Message::Text(text) => text.as_str().to_string(),
        Message::Binary(data) => base64::engine::general_purpose::STANDARD.encode(data),
        other => format!("<{} frame>", describe_kind(other)),
    }
}

// ---------------------------------------------------------------------------
// Message builders
// ---------------------------------------------------------------------------

fn typed(message_type: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("type".to_string(), message_type.into());
    payload
}

/// The handshake sent as the first frame of every connection.
pub fn authenticate(credentials: &Credentials) -> Payload {
    let mut payload = typed(message_type::AUTHENTICATE);
    payload.extend(credentials.to_handshake_payload());
    payload
}

pub fn begin_typing(channel_id: &str) -> Payload {
    let mut payload = typed(message_type::BEGIN_TYPING);
    payload.insert("channel".to_string(), channel_id.into());
    payload
}

pub fn end_typing(channel_id: &str) -> Payload {
    let mut payload = typed(message_type::END_TYPING);
    payload.insert("channel".to_string(), channel_id.into());
    payload
}

/// `time` is echoed back by the server in `Pong`; zero is treated as absent.
pub fn ping(time: Option<i64>) -> Payload {
    let mut payload = typed(message_type::PING);
    if let Some(time) = time.filter(|t| *t != 0) {
        payload.insert("time".to_string(), time.into());
    }
    payload
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn message_payload() -> Payload {
        json!({"type": "Message", "channel": "abc", "content": "hi", "nonce": 7})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn json_encodes_to_text_frame() {
        let frame = encode(GatewayFormat::Json, &message_payload()).unwrap();
        assert!(frame.is_text());
        let decoded = decode(GatewayFormat::Json, &frame).unwrap();
        assert_eq!(decoded, message_payload());
    }

    #[test]
    fn msgpack_encodes_to_binary_frame() {
        let frame = encode(GatewayFormat::Msgpack, &message_payload()).unwrap();
        assert!(frame.is_binary());
        let decoded = decode(GatewayFormat::Msgpack, &frame).unwrap();
        assert_eq!(decoded.get("type"), Some(&json!("Message")));
        assert_eq!(decoded.get("nonce"), Some(&json!(7)));
    }

    #[test]
    fn binary_frame_rejected_in_json_mode() {
        let frame = encode(GatewayFormat::Msgpack, &message_payload()).unwrap();
        let err = decode(GatewayFormat::Json, &frame).unwrap_err();
        assert!(matches!(err, Error::Decode(ref msg) if msg.contains("binary frame")));
    }

    #[test]
    fn text_frame_rejected_in_msgpack_mode() {
        let frame = encode(GatewayFormat::Json, &message_payload()).unwrap();
        let err = decode(GatewayFormat::Msgpack, &frame).unwrap_err();
        assert!(matches!(err, Error::Decode(ref msg) if msg.contains("text frame")));
    }

    #[test]
    fn control_frames_are_not_data() {
        let err = decode(GatewayFormat::Json, &Message::Ping(Vec::new().into())).unwrap_err();
        assert!(matches!(err, Error::Decode(ref msg) if msg.contains("ping")));
    }

    #[test]
    fn malformed_json_is_decode_error() {
        let err = decode(GatewayFormat::Json, &Message::Text("{not json".into())).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn non_map_top_level_is_decode_error() {
        let err = decode(GatewayFormat::Json, &Message::Text("[1, 2]".into())).unwrap_err();
        assert!(matches!(err, Error::Decode(ref msg) if msg.contains("an array")));

        let data = rmp_serde::to_vec(&"just a string").unwrap();
        let err = decode(GatewayFormat::Msgpack, &Message::Binary(data.into())).unwrap_err();
        assert!(matches!(err, Error::Decode(ref msg) if msg.contains("a string")));
    }

    #[test]
    fn truncated_msgpack_is_decode_error() {
        let mut data = rmp_serde::to_vec_named(&message_payload()).unwrap();
        data.truncate(data.len() / 2);
        let err = decode(GatewayFormat::Msgpack, &Message::Binary(data.into())).unwrap_err();
        assert!(matches!(err, Error::Decode(ref msg) if msg.starts_with("msgpack")));
    }

    #[test]
    fn msgpack_binary_values_become_base64() {
        let value = rmpv::Value::Map(vec![
            (rmpv::Value::from("type"), rmpv::Value::from("Message")),
            (rmpv::Value::from("blob"), rmpv::Value::Binary(b"hello".to_vec())),
            (rmpv::Value::from(5), rmpv::Value::Nil),
        ]);
        let mut data = Vec::new();
        rmpv::encode::write_value(&mut data, &value).unwrap();
        let decoded = decode(GatewayFormat::Msgpack, &Message::Binary(data.into())).unwrap();
        assert_eq!(decoded.get("blob"), Some(&json!("aGVsbG8=")));
        assert_eq!(decoded.get("5"), Some(&Value::Null));
    }

    #[test]
    fn authenticate_message_carries_token() {
        let creds = Credentials::new(None, Some("session".into())).unwrap();
        let payload = authenticate(&creds);
        assert_eq!(
            Value::Object(payload),
            json!({"type": "Authenticate", "token": "session"})
        );
    }

    #[test]
    fn typing_messages() {
        assert_eq!(
            Value::Object(begin_typing("chan-1")),
            json!({"type": "BeginTyping", "channel": "chan-1"})
        );
        assert_eq!(
            Value::Object(end_typing("chan-1")),
            json!({"type": "EndTyping", "channel": "chan-1"})
        );
    }

    #[test]
    fn ping_omits_zero_or_missing_time() {
        assert_eq!(Value::Object(ping(None)), json!({"type": "Ping"}));
        assert_eq!(Value::Object(ping(Some(0))), json!({"type": "Ping"}));
        assert_eq!(
            Value::Object(ping(Some(1_700_000_000_000))),
            json!({"type": "Ping", "time": 1_700_000_000_000_i64})
        );
    }

    #[test]
    fn format_parse_and_display() {
        assert_eq!("json".parse::<GatewayFormat>().unwrap(), GatewayFormat::Json);
        assert_eq!(" MsgPack ".parse::<GatewayFormat>().unwrap(), GatewayFormat::Msgpack);
        assert!("xml".parse::<GatewayFormat>().is_err());
        assert_eq!(GatewayFormat::Json.to_string(), "json");
        assert_eq!(GatewayFormat::default(), GatewayFormat::Msgpack);
    }

    #[test]
    fn render_frame_for_logs() {
        assert_eq!(render_frame(&Message::Text("{\"a\":1}".into())), "{\"a\":1}");
        assert_eq!(render_frame(&Message::Binary(b"hi".to_vec().into())), "aGk=");
    }
}
