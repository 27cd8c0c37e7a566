//! Realtime chat session core.
//!
//! A [`ChatSession`] owns one connection to the chat server at a time. Its
//! driver task walks the [`Lifecycle`] state machine, negotiates a display
//! name on every connect, and folds inbound events into the
//! [`PresenceTracker`] and the append-only [`MessageStream`]. Observers get an
//! ordered [`SessionEvent`] feed plus [`SessionSnapshot`]s for rendering.

mod error;
pub mod identity;
pub mod lifecycle;
pub mod presence;
mod session;
pub mod stream;

pub use error::{SessionError, SubmitError};
pub use identity::{FixedName, IdentityNegotiator, IdentityProvider};
pub use lifecycle::{ConnectionState, Lifecycle, Retry, RetryPolicy};
pub use presence::PresenceTracker;
pub use session::{ChatSession, ConnectorFactory, SessionEvent, SessionSnapshot};
pub use stream::{ChatMessage, MessageStream};
