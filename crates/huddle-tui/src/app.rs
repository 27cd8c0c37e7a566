use huddle_session::{ChatMessage, ConnectionState, SessionEvent, SessionSnapshot};
use tokio::sync::oneshot;

/// Number of lines scrolled per PageUp/PageDown.
pub const SCROLL_STEP: usize = 5;

/// One line of the chat pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Chat(ChatMessage),
    /// Joins, leaves and connection changes.
    Notice(String),
}

/// An open display-name prompt, answered through `reply`.
pub struct NamePrompt {
    pub buffer: String,
    reply: oneshot::Sender<Option<String>>,
}

/// The TUI application state.
pub struct App {
    pub server_url: String,
    pub state: ConnectionState,
    pub identity: Option<String>,
    pub transport: Option<&'static str>,
    pub presence: u64,
    pub typing: Vec<String>,
    pub timeline: Vec<Entry>,
    /// Chat input, mirrored into the session's pending buffer.
    pub input: String,
    pub prompt: Option<NamePrompt>,
    /// Last name we connected as, offered again on reconnect.
    pub last_name: Option<String>,
    pub status_msg: String,
    /// Scroll offset (0 = pinned to the newest line).
    pub scroll: usize,
    pub should_quit: bool,
}

impl App {
    pub fn new(server_url: String, snapshot: &SessionSnapshot) -> Self {
        Self {
            server_url,
            state: snapshot.state,
            identity: snapshot.identity.clone(),
            transport: snapshot.transport,
            presence: snapshot.presence,
            typing: snapshot.typing.clone(),
            timeline: snapshot.messages.iter().cloned().map(Entry::Chat).collect(),
            input: snapshot.input.clone(),
            prompt: None,
            last_name: None,
            status_msg: String::new(),
            scroll: 0,
            should_quit: false,
        }
    }

    pub fn add_notice(&mut self, text: String) {
        self.timeline.push(Entry::Notice(text));
    }

    /// Handle an event pushed from the session.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged(state) => {
                self.state = state;
                match state {
                    ConnectionState::Connected => {
                        self.status_msg.clear();
                        self.add_notice("Connected.".to_string());
                    }
                    ConnectionState::Reconnecting(0) => {
                        self.cancel_prompt();
                        self.identity = None;
                        self.transport = None;
                        self.add_notice("Connection lost, reconnecting...".to_string());
                    }
                    ConnectionState::Failed => {
                        self.cancel_prompt();
                        self.add_notice(
                            "Could not reach the server. Press Ctrl+R to try again.".to_string(),
                        );
                    }
                    ConnectionState::Idle => {
                        self.cancel_prompt();
                        self.identity = None;
                        self.transport = None;
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {}
                }
            }
            SessionEvent::IdentityAssigned(name) => {
                self.add_notice(format!("You are {name}."));
                self.last_name = Some(name.clone());
                self.identity = Some(name);
            }
            SessionEvent::PresenceChanged(count) => self.presence = count,
            SessionEvent::MessageAppended(message) => {
                self.timeline.push(Entry::Chat(message));
                // Stay pinned to the newest message unless scrolled back.
                if self.scroll > 0 {
                    self.scroll += 1;
                }
            }
            SessionEvent::ParticipantJoined(name) => self.add_notice(format!("{name} joined.")),
            SessionEvent::ParticipantLeft(name) => self.add_notice(format!("{name} left.")),
            SessionEvent::TypingChanged(names) => self.typing = names,
        }
    }

    pub fn begin_prompt(&mut self, reply: oneshot::Sender<Option<String>>) {
        self.prompt = Some(NamePrompt {
            buffer: self.last_name.clone().unwrap_or_default(),
            reply,
        });
    }

    /// Answer the open prompt. `None` declines, leaving the name to chance.
    pub fn answer_prompt(&mut self, answer: Option<String>) {
        if let Some(prompt) = self.prompt.take() {
            let _ = prompt.reply.send(answer);
        }
    }

    pub fn cancel_prompt(&mut self) {
        self.answer_prompt(None);
    }

    pub fn is_own(&self, message: &ChatMessage) -> bool {
        self.identity.as_deref() == Some(message.author.as_str())
    }

    pub fn scroll_up(&mut self) {
        let max = self.timeline.len().saturating_sub(1);
        self.scroll = (self.scroll + SCROLL_STEP).min(max);
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(SCROLL_STEP);
    }

    /// "bob is typing..." / "bob, carol are typing...".
    pub fn typing_line(&self) -> Option<String> {
        let others: Vec<&str> = self
            .typing
            .iter()
            .map(String::as_str)
            .filter(|name| Some(*name) != self.identity.as_deref())
            .collect();
        match others.as_slice() {
            [] => None,
            [one] => Some(format!("{one} is typing...")),
            many => Some(format!("{} are typing...", many.join(", "))),
        }
    }
}
