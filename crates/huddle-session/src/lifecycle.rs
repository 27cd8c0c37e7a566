use crate::error::SessionError;
use huddle::config::ClientConfig;
use std::fmt;
use std::time::Duration;

/// Where a session is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    /// Waiting to retry. The payload is the number of failed reconnection
    /// attempts so far; 0 right after a disconnect.
    Reconnecting(u32),
    /// Retries exhausted. Only an explicit start leaves this state.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether a driver task is (or should be) running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting(_)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => f.write_str("idle"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Reconnecting(0) => f.write_str("reconnecting"),
            ConnectionState::Reconnecting(n) => write!(f, "reconnecting (attempt {n})"),
            ConnectionState::Failed => f.write_str("failed"),
        }
    }
}

/// Bounded retry settings, owned by the session rather than the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(1_000),
            connect_timeout: Duration::from_millis(10_000),
        }
    }
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.reconnection_attempts,
            delay: config.reconnection_delay(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// What the driver does after a failed connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    After(Duration),
    GiveUp,
}

/// Connection state machine.
///
/// Pure bookkeeping: every method returns the state it moved to, and the
/// caller publishes it. No method ever skips a state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    policy: RetryPolicy,
    state: ConnectionState,
    attempt: u32,
}

impl Lifecycle {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Idle,
            attempt: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Failed reconnection attempts since the last successful connect.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// A session may start from Idle, or from Failed to retry manually.
    pub fn can_begin(&self) -> bool {
        !self.state.is_active()
    }

    /// `start()`: Idle | Failed -> Connecting.
    pub fn begin(&mut self) -> Result<ConnectionState, SessionError> {
        if !self.can_begin() {
            return Err(SessionError::AlreadyActive(self.state));
        }
        self.attempt = 0;
        Ok(self.enter(ConnectionState::Connecting))
    }

    /// Transport reported connected. Resets the attempt counter.
    pub fn connected(&mut self) -> ConnectionState {
        self.attempt = 0;
        self.enter(ConnectionState::Connected)
    }

    /// Transport reported a connect error (or the connect timed out).
    pub fn connect_failed(&mut self) -> (ConnectionState, Retry) {
        if self.attempt < self.policy.max_attempts {
            self.attempt += 1;
            let state = self.enter(ConnectionState::Reconnecting(self.attempt));
            (state, Retry::After(self.policy.delay))
        } else {
            (self.enter(ConnectionState::Failed), Retry::GiveUp)
        }
    }

    /// An established connection dropped.
    pub fn disconnected(&mut self) -> ConnectionState {
        self.attempt = 0;
        self.enter(ConnectionState::Reconnecting(0))
    }

    pub fn stopped(&mut self) -> ConnectionState {
        self.attempt = 0;
        self.enter(ConnectionState::Idle)
    }

    fn enter(&mut self, state: ConnectionState) -> ConnectionState {
        tracing::debug!(from = %self.state, to = %state, "connection state");
        self.state = state;
        state
    }
}
