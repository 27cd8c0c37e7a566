use crate::lifecycle::ConnectionState;
use huddle::protocol::MAX_FRAME_BYTES;
use huddle_transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session already active ({0})")]
    AlreadyActive(ConnectionState),

    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// Why a submission was not sent. Either way nothing reached the wire.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("nothing to send")]
    Empty,

    #[error("not connected ({0})")]
    NotConnected(ConnectionState),

    /// Connected, but the display name has not been announced yet.
    #[error("display name not announced yet")]
    Negotiating,

    #[error("message exceeds {MAX_FRAME_BYTES} bytes on the wire")]
    TooLarge,
}
