//! Gateway events and the event type hierarchy.
//!
//! Every event type descends from [`EventType::Event`] through a single chain
//! of categories. Subscribing to a category receives every event below it.

use std::fmt;

use serde_json::Value;

use crate::protocol::Payload;
use crate::types::Error;

/// Subscription key: a concrete event or one of its ancestor categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Root category; every event.
    Event,

    SessionEvent,
    Authenticated,
    Ready,
    Pong,
    Error,

    MessageEvent,
    Message,
    MessageUpdate,
    MessageDelete,

    ChannelEvent,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    ChannelGroupJoin,
    ChannelGroupLeave,
    ChannelStartTyping,
    ChannelStopTyping,
    ChannelAck,

    ServerEvent,
    ServerUpdate,
    ServerDelete,
    ServerRoleUpdate,
    ServerRoleDelete,
    ServerMemberEvent,
    ServerMemberJoin,
    ServerMemberLeave,
    ServerMemberUpdate,

    UserEvent,
    UserUpdate,
    UserRelationship,
}

impl EventType {
    /// Types a dispatch visits for this event, root category first and
    /// `self` last.
    pub const fn lineage(self) -> &'static [EventType] {
        match self {
            Self::Event => &[Self::Event],

            Self::SessionEvent => &[Self::Event, Self::SessionEvent],
            Self::Authenticated => &[Self::Event, Self::SessionEvent, Self::Authenticated],
            Self::Ready => &[Self::Event, Self::SessionEvent, Self::Ready],
            Self::Pong => &[Self::Event, Self::SessionEvent, Self::Pong],
            Self::Error => &[Self::Event, Self::SessionEvent, Self::Error],

            Self::MessageEvent => &[Self::Event, Self::MessageEvent],
            Self::Message => &[Self::Event, Self::MessageEvent, Self::Message],
            Self::MessageUpdate => &[Self::Event, Self::MessageEvent, Self::MessageUpdate],
            Self::MessageDelete => &[Self::Event, Self::MessageEvent, Self::MessageDelete],

            Self::ChannelEvent => &[Self::Event, Self::ChannelEvent],
            Self::ChannelCreate => &[Self::Event, Self::ChannelEvent, Self::ChannelCreate],
            Self::ChannelUpdate => &[Self::Event, Self::ChannelEvent, Self::ChannelUpdate],
            Self::ChannelDelete => &[Self::Event, Self::ChannelEvent, Self::ChannelDelete],
            Self::ChannelGroupJoin => &[Self::Event, Self::ChannelEvent, Self::ChannelGroupJoin],
            Self::ChannelGroupLeave => &[Self::Event, Self::ChannelEvent, Self::ChannelGroupLeave],
            Self::ChannelStartTyping => {
                &[Self::Event, Self::ChannelEvent, Self::ChannelStartTyping]
            }
            Self::ChannelStopTyping => &[Self::Event, Self::ChannelEvent, Self::ChannelStopTyping],
            Self::ChannelAck => &[Self::Event, Self::ChannelEvent, Self::ChannelAck],

            Self::ServerEvent => &[Self::Event, Self::ServerEvent],
            Self::ServerUpdate => &[Self::Event, Self::ServerEvent, Self::ServerUpdate],
            Self::ServerDelete => &[Self::Event, Self::ServerEvent, Self::ServerDelete],
            Self::ServerRoleUpdate => &[Self::Event, Self::ServerEvent, Self::ServerRoleUpdate],
            Self::ServerRoleDelete => &[Self::Event, Self::ServerEvent, Self::ServerRoleDelete],
            Self::ServerMemberEvent => &[Self::Event, Self::ServerEvent, Self::ServerMemberEvent],
            Self::ServerMemberJoin => &[
                Self::Event,
                Self::ServerEvent,
                Self::ServerMemberEvent,
                Self::ServerMemberJoin,
            ],
            Self::ServerMemberLeave => &[
                Self::Event,
                Self::ServerEvent,
                Self::ServerMemberEvent,
                Self::ServerMemberLeave,
            ],
            Self::ServerMemberUpdate => &[
                Self::Event,
                Self::ServerEvent,
                Self::ServerMemberEvent,
                Self::ServerMemberUpdate,
            ],

            Self::UserEvent => &[Self::Event, Self::UserEvent],
            Self::UserUpdate => &[Self::Event, Self::UserEvent, Self::UserUpdate],
            Self::UserRelationship => &[Self::Event, Self::UserEvent, Self::UserRelationship],
        }
    }

    /// Direct ancestor, `None` for the root.
    pub fn parent(self) -> Option<EventType> {
        match self.lineage() {
            [.., parent, _] => Some(*parent),
            _ => None,
        }
    }

    pub fn is_subtype_of(self, ancestor: EventType) -> bool {
        self.lineage().contains(&ancestor)
    }

    /// Value of the `type` field for concrete events; `None` for categories.
    pub const fn wire_tag(self) -> Option<&'static str> {
        match self {
            Self::Event
            | Self::SessionEvent
            | Self::MessageEvent
            | Self::ChannelEvent
            | Self::ServerEvent
            | Self::ServerMemberEvent
            | Self::UserEvent => None,
            Self::Authenticated => Some("Authenticated"),
            Self::Ready => Some("Ready"),
            Self::Pong => Some("Pong"),
            Self::Error => Some("Error"),
            Self::Message => Some("Message"),
            Self::MessageUpdate => Some("MessageUpdate"),
            Self::MessageDelete => Some("MessageDelete"),
            Self::ChannelCreate => Some("ChannelCreate"),
            Self::ChannelUpdate => Some("ChannelUpdate"),
            Self::ChannelDelete => Some("ChannelDelete"),
            Self::ChannelGroupJoin => Some("ChannelGroupJoin"),
            Self::ChannelGroupLeave => Some("ChannelGroupLeave"),
            Self::ChannelStartTyping => Some("ChannelStartTyping"),
            Self::ChannelStopTyping => Some("ChannelStopTyping"),
            Self::ChannelAck => Some("ChannelAck"),
            Self::ServerUpdate => Some("ServerUpdate"),
            Self::ServerDelete => Some("ServerDelete"),
            Self::ServerRoleUpdate => Some("ServerRoleUpdate"),
            Self::ServerRoleDelete => Some("ServerRoleDelete"),
            Self::ServerMemberJoin => Some("ServerMemberJoin"),
            Self::ServerMemberLeave => Some("ServerMemberLeave"),
            Self::ServerMemberUpdate => Some("ServerMemberUpdate"),
            Self::UserUpdate => Some("UserUpdate"),
            Self::UserRelationship => Some("UserRelationship"),
        }
    }

    pub fn from_wire_tag(tag: &str) -> Option<EventType> {
        Some(match tag {
            "Authenticated" => Self::Authenticated,
            "Ready" => Self::Ready,
            "Pong" => Self::Pong,
            "Error" => Self::Error,
            "Message" => Self::Message,
            "MessageUpdate" => Self::MessageUpdate,
            "MessageDelete" => Self::MessageDelete,
            "ChannelCreate" => Self::ChannelCreate,
            "ChannelUpdate" => Self::ChannelUpdate,
            "ChannelDelete" => Self::ChannelDelete,
            "ChannelGroupJoin" => Self::ChannelGroupJoin,
            "ChannelGroupLeave" => Self::ChannelGroupLeave,
            "ChannelStartTyping" => Self::ChannelStartTyping,
            "ChannelStopTyping" => Self::ChannelStopTyping,
            "ChannelAck" => Self::ChannelAck,
            "ServerUpdate" => Self::ServerUpdate,
            "ServerDelete" => Self::ServerDelete,
            "ServerRoleUpdate" => Self::ServerRoleUpdate,
            "ServerRoleDelete" => Self::ServerRoleDelete,
            "ServerMemberJoin" => Self::ServerMemberJoin,
            "ServerMemberLeave" => Self::ServerMemberLeave,
            "ServerMemberUpdate" => Self::ServerMemberUpdate,
            "UserUpdate" => Self::UserUpdate,
            "UserRelationship" => Self::UserRelationship,
            _ => return None,
        })
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One decoded gateway event: its concrete type and the raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventType,
    payload: Payload,
}

impl Event {
    /// Decode a gateway message by its `type` discriminator.
    pub fn from_payload(payload: Payload) -> Result<Self, Error> {
        let tag = match payload.get("type") {
            Some(Value::String(tag)) => tag,
            Some(other) => {
                return Err(Error::Decode(format!("event `type` is not a string: {other}")));
            }
            None => return Err(Error::Decode("event has no `type` field".to_string())),
        };
        let kind = EventType::from_wire_tag(tag)
            .ok_or_else(|| Error::Decode(format!("unknown event type {tag:?}")))?;
        Ok(Self { kind, payload })
    }

    pub fn kind(&self) -> EventType {
        self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}
