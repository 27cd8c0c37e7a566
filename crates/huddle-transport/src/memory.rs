//! In-process transport: a [`Link`] wired to a [`MemoryServer`] over channels.
//!
//! Used by the session test suites to script a server without sockets.

use crate::{Connector, Link, TransportError};
use futures_util::future::BoxFuture;
use futures_util::sink;
use huddle::protocol::{ClientEvent, Frame, ServerEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Server end of an in-memory link. Dropping it disconnects the client.
pub struct MemoryServer {
    received: mpsc::UnboundedReceiver<Frame>,
    push: mpsc::UnboundedSender<Result<Frame, TransportError>>,
}

impl MemoryServer {
    /// Push an event to the client. Returns false once the client is gone.
    pub fn send(&self, event: &ServerEvent) -> bool {
        self.send_frame(event.to_frame())
    }

    pub fn send_frame(&self, frame: Frame) -> bool {
        self.push.send(Ok(frame)).is_ok()
    }

    /// Fail the link with a transport error, as a network drop would.
    pub fn fail(&self) -> bool {
        self.push.send(Err(TransportError::Closed)).is_ok()
    }

    /// Next frame the client sent, or `None` once the client dropped the link.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        self.received.recv().await
    }

    /// Next client event. Frames that are not client events are skipped.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        loop {
            let frame = self.received.recv().await?;
            if let Ok(event) = ClientEvent::from_frame(&frame) {
                return Some(event);
            }
        }
    }

    /// A frame already sent by the client, without waiting.
    pub fn try_recv_frame(&mut self) -> Option<Frame> {
        self.received.try_recv().ok()
    }
}

/// Create a connected link / server pair.
pub fn pair() -> (Link, MemoryServer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Frame>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<Frame, TransportError>>();

    let sink = sink::unfold(out_tx, |tx, frame: Frame| async move {
        tx.send(frame).map_err(|_| TransportError::Closed)?;
        Ok::<_, TransportError>(tx)
    });

    let link = Link {
        transport: "memory",
        sink: Box::pin(sink),
        stream: Box::pin(UnboundedReceiverStream::new(in_rx)),
    };
    let server = MemoryServer {
        received: out_rx,
        push: in_tx,
    };
    (link, server)
}

/// Connector that hands out pre-scripted outcomes in order.
///
/// When the script runs dry every further attempt is refused.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    script: Arc<Mutex<VecDeque<Result<Link, TransportError>>>>,
    opens: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful connect; returns the server end of that link.
    pub fn accept(&self) -> MemoryServer {
        let (link, server) = pair();
        self.queue(Ok(link));
        server
    }

    /// Queue `count` refused connects.
    pub fn refuse(&self, count: usize) {
        for _ in 0..count {
            self.queue(Err(TransportError::Exhausted("connection refused".to_string())));
        }
    }

    /// Number of connect attempts made so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn queue(&self, outcome: Result<Link, TransportError>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }
}

impl Connector for MemoryConnector {
    fn open(&self) -> BoxFuture<'_, Result<Link, TransportError>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        Box::pin(async move {
            next.unwrap_or_else(|| Err(TransportError::Exhausted("connection refused".to_string())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (mut link, mut server) = pair();

        link.sink
            .send(ClientEvent::Message("hi".to_string()).to_frame())
            .await
            .unwrap();
        assert_eq!(server.recv().await, Some(ClientEvent::Message("hi".to_string())));

        assert!(server.send(&ServerEvent::UsersCount(2)));
        let frame = link.stream.next().await.unwrap().unwrap();
        assert_eq!(ServerEvent::from_frame(&frame).unwrap(), ServerEvent::UsersCount(2));
    }

    #[tokio::test]
    async fn dropping_server_ends_stream() {
        let (mut link, server) = pair();
        drop(server);
        assert!(link.stream.next().await.is_none());
        assert!(link.sink.send(ClientEvent::Typing.to_frame()).await.is_err());
    }

    #[tokio::test]
    async fn connector_follows_script_then_refuses() {
        let connector = MemoryConnector::new();
        connector.refuse(1);
        let _server = connector.accept();

        assert!(connector.open().await.is_err());
        assert!(connector.open().await.is_ok());
        assert!(connector.open().await.is_err());
        assert_eq!(connector.opens(), 3);
    }
}
