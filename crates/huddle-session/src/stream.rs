use crate::error::SubmitError;
use crate::lifecycle::ConnectionState;
use chrono::{DateTime, Utc};
use huddle::protocol::ClientEvent;

/// One received chat message. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub author: String,
    pub body: String,
    /// Client arrival time. Display only; log order is arrival order.
    pub received_at: DateTime<Utc>,
}

/// Append-only message log plus the outbound side: the pending input
/// buffer and the typing indicator.
///
/// Sending never touches the log. A sender sees its own message once the
/// server echoes it back.
#[derive(Debug, Default)]
pub struct MessageStream {
    log: Vec<ChatMessage>,
    input: String,
    typing_sent: bool,
}

impl MessageStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// The only way a message enters the log.
    pub fn append(&mut self, author: String, body: String) -> &ChatMessage {
        self.log.push(ChatMessage {
            author,
            body,
            received_at: Utc::now(),
        });
        &self.log[self.log.len() - 1]
    }

    pub fn log(&self) -> &[ChatMessage] {
        &self.log
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Validate `raw` for sending. `announced` is whether this connection's
    /// display name is already on the wire. On success the pending input is
    /// cleared and the event to put on the wire is returned.
    pub fn submit(
        &mut self,
        raw: &str,
        state: ConnectionState,
        announced: bool,
    ) -> Result<ClientEvent, SubmitError> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(SubmitError::Empty);
        }
        if !state.is_connected() {
            return Err(SubmitError::NotConnected(state));
        }
        if !announced {
            return Err(SubmitError::Negotiating);
        }
        let event = ClientEvent::Message(text.to_string());
        if event.to_frame().encode().is_err() {
            return Err(SubmitError::TooLarge);
        }
        self.input.clear();
        Ok(event)
    }

    /// Typing indicator edge to send, if `typing` differs from what the
    /// server last heard.
    pub fn typing_edge(&mut self, typing: bool, state: ConnectionState) -> Option<ClientEvent> {
        if !state.is_connected() || typing == self.typing_sent {
            return None;
        }
        self.typing_sent = typing;
        Some(if typing {
            ClientEvent::Typing
        } else {
            ClientEvent::StoppedTyping
        })
    }

    /// A new connection starts with no typing indicator on the server.
    pub fn reset_typing(&mut self) {
        self.typing_sent = false;
    }
}
