use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Maximum size of a single outbound event envelope (64 KiB). Inbound size is
/// left to the transport's own message limit.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Author shown for chat events whose sender never announced a name.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Event names used on the wire.
pub mod events {
    pub const SET_USERNAME: &str = "set_username";
    pub const MESSAGE: &str = "message";
    pub const TYPING: &str = "typing";
    pub const STOPPED_TYPING: &str = "stopped_typing";

    pub const RESPONSE: &str = "response";
    pub const USERS_COUNT: &str = "users_count";
    pub const USER_JOINED: &str = "user_joined";
    pub const USER_LEFT: &str = "user_left";
    pub const USER_TYPING: &str = "user_typing";
    pub const USER_STOPPED_TYPING: &str = "user_stopped_typing";
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),

    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    FrameTooLarge,

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("{event}: message body is not text")]
    NonTextualBody { event: String },

    #[error("{event}: count is not a non-negative integer")]
    InvalidCount { event: String },

    #[error("{event}: missing username")]
    MissingUsername { event: String },

    #[error("{event}: expected a string payload")]
    ExpectedString { event: String },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One event on the wire: `{"event": <name>, "data": <payload>}`.
///
/// `data` is kept as raw JSON so malformed payloads can be rejected per event
/// instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let text = serde_json::to_string(self)?;
        if text.len() > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge);
        }
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// One-way events the client emits. None of them expect a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Announce this connection's display name.
    SetUsername(String),
    /// Send a chat message (already trimmed).
    Message(String),
    Typing,
    StoppedTyping,
}

impl ClientEvent {
    pub fn to_frame(&self) -> Frame {
        match self {
            ClientEvent::SetUsername(name) => Frame::new(events::SET_USERNAME, json!(name)),
            ClientEvent::Message(body) => Frame::new(events::MESSAGE, json!(body)),
            ClientEvent::Typing => Frame::new(events::TYPING, Value::Null),
            ClientEvent::StoppedTyping => Frame::new(events::STOPPED_TYPING, Value::Null),
        }
    }

    /// Parse a frame sent by a client. Used by server-side test doubles.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let text = || {
            frame
                .data
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ProtocolError::ExpectedString {
                    event: frame.event.clone(),
                })
        };
        match frame.event.as_str() {
            events::SET_USERNAME => Ok(ClientEvent::SetUsername(text()?)),
            events::MESSAGE => Ok(ClientEvent::Message(text()?)),
            events::TYPING => Ok(ClientEvent::Typing),
            events::STOPPED_TYPING => Ok(ClientEvent::StoppedTyping),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// A chat message as broadcast by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPayload {
    pub username: String,
    pub message: String,
}

/// Events pushed by the server, validated for shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// `response`: a chat message (including echoes of our own sends).
    Chat(ChatPayload),
    /// `users_count`: number of connected participants.
    UsersCount(u64),
    UserJoined(String),
    UserLeft(String),
    UserTyping(String),
    /// `user_stopped_typing`: the server may omit who stopped.
    UserStoppedTyping(Option<String>),
}

impl ServerEvent {
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let event = frame.event.as_str();
        let username = || {
            frame
                .data
                .get("username")
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let required_username = || {
            username().ok_or_else(|| ProtocolError::MissingUsername {
                event: event.to_string(),
            })
        };

        match event {
            events::RESPONSE => {
                let message = frame
                    .data
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProtocolError::NonTextualBody {
                        event: event.to_string(),
                    })?;
                Ok(ServerEvent::Chat(ChatPayload {
                    username: username().unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
                    message: message.to_string(),
                }))
            }
            events::USERS_COUNT => frame
                .data
                .get("count")
                .and_then(Value::as_u64)
                .map(ServerEvent::UsersCount)
                .ok_or_else(|| ProtocolError::InvalidCount {
                    event: event.to_string(),
                }),
            events::USER_JOINED => Ok(ServerEvent::UserJoined(required_username()?)),
            events::USER_LEFT => Ok(ServerEvent::UserLeft(required_username()?)),
            events::USER_TYPING => Ok(ServerEvent::UserTyping(required_username()?)),
            events::USER_STOPPED_TYPING => Ok(ServerEvent::UserStoppedTyping(username())),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }

    /// Encode as the server would. Used by server-side test doubles.
    pub fn to_frame(&self) -> Frame {
        match self {
            ServerEvent::Chat(payload) => Frame::new(
                events::RESPONSE,
                json!({ "username": payload.username, "message": payload.message }),
            ),
            ServerEvent::UsersCount(count) => Frame::new(events::USERS_COUNT, json!({ "count": count })),
            ServerEvent::UserJoined(name) => Frame::new(events::USER_JOINED, json!({ "username": name })),
            ServerEvent::UserLeft(name) => Frame::new(events::USER_LEFT, json!({ "username": name })),
            ServerEvent::UserTyping(name) => Frame::new(events::USER_TYPING, json!({ "username": name })),
            ServerEvent::UserStoppedTyping(Some(name)) => {
                Frame::new(events::USER_STOPPED_TYPING, json!({ "username": name }))
            }
            ServerEvent::UserStoppedTyping(None) => Frame::new(events::USER_STOPPED_TYPING, Value::Null),
        }
    }
}
