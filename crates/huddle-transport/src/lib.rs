//! Wire transports for the huddle chat client.
//!
//! Every transport produces a [`Link`]: a sink of outbound [`Frame`]s and a
//! stream of inbound ones. The end of the stream (or an error item) is a
//! disconnect. [`WireConnector`] tries the configured transports in order and
//! returns the first link that opens.

mod connector;
mod error;
pub mod memory;
pub mod polling;
pub mod ws;

pub use connector::WireConnector;
pub use error::TransportError;

use futures_util::future::BoxFuture;
use futures_util::{Sink, Stream};
use huddle::protocol::Frame;
use std::pin::Pin;

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An open bidirectional event channel. Dropping it closes the transport.
pub struct Link {
    /// Transport name, for diagnostics.
    pub transport: &'static str,
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens links to the chat server. One connect attempt per call.
pub trait Connector: Send + Sync + 'static {
    fn open(&self) -> BoxFuture<'_, Result<Link, TransportError>>;
}

/// Join `path` onto the server URL, replacing any path it already has.
pub(crate) fn endpoint(server_url: &str, path: &str) -> Result<reqwest::Url, TransportError> {
    let mut url = reqwest::Url::parse(server_url).map_err(|e| TransportError::InvalidUrl {
        url: server_url.to_string(),
        reason: e.to_string(),
    })?;
    url.set_path(path);
    url.set_query(None);
    Ok(url)
}
