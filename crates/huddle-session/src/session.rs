use crate::error::{SessionError, SubmitError};
use crate::identity::IdentityNegotiator;
use crate::lifecycle::{ConnectionState, Lifecycle, Retry, RetryPolicy};
use crate::presence::PresenceTracker;
use crate::stream::{ChatMessage, MessageStream};
use futures_util::{SinkExt, StreamExt};
use huddle::config::ClientConfig;
use huddle::protocol::{ChatPayload, ClientEvent, Frame, ProtocolError, ServerEvent};
use huddle_transport::{Connector, Link, TransportError, WireConnector};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long `stop()` waits for the driver to close the transport before
/// aborting it.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Builds a fresh connector for each `start()`, so no transport state
/// survives from one session run to the next.
pub type ConnectorFactory =
    Box<dyn Fn() -> Result<Box<dyn Connector>, TransportError> + Send + Sync>;

/// Notifications for the view, delivered in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// The display name announced on the current connection.
    IdentityAssigned(String),
    PresenceChanged(u64),
    MessageAppended(ChatMessage),
    ParticipantJoined(String),
    ParticipantLeft(String),
    /// Everyone typing right now, sorted by name.
    TypingChanged(Vec<String>),
}

/// Read-only copy of session state for rendering.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub transport: Option<&'static str>,
    pub identity: Option<String>,
    pub presence: u64,
    pub typing: Vec<String>,
    pub messages: Vec<ChatMessage>,
    pub input: String,
}

/// State shared between the handle and the driver task.
///
/// Every mutation and the event it produces happen under one lock, so
/// observers see events in mutation order. The lock is never held across an
/// await.
struct SessionCore {
    lifecycle: Lifecycle,
    transport: Option<&'static str>,
    identity: Option<String>,
    presence: PresenceTracker,
    stream: MessageStream,
    /// Queue to the driver. Set while a driver runs.
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionCore {
    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine; the snapshot still reflects the change.
        let _ = self.events.send(event);
    }

    fn transition(&mut self, state: ConnectionState) {
        self.emit(SessionEvent::StateChanged(state));
    }

    fn enqueue(&self, event: ClientEvent) {
        match &self.outbound {
            Some(tx) if tx.send(event).is_ok() => {}
            _ => tracing::debug!("no driver running, event discarded"),
        }
    }

    fn submit(&mut self, raw: &str) -> Result<(), SubmitError> {
        let state = self.lifecycle.state();
        let announced = self.identity.is_some();
        let event = self.stream.submit(raw, state, announced)?;
        self.enqueue(event);
        Ok(())
    }

    fn emit_typing(&self) {
        self.emit(SessionEvent::TypingChanged(self.presence.typing()));
    }

    /// Connection-scoped state does not outlive the connection.
    fn reset_connection(&mut self) {
        self.transport = None;
        self.identity = None;
        self.stream.reset_typing();
        if self.presence.clear_typing() {
            self.emit_typing();
        }
    }

    fn apply(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Chat(ChatPayload { username, message }) => {
                let appended = self.stream.append(username, message).clone();
                self.emit(SessionEvent::MessageAppended(appended));
            }
            ServerEvent::UsersCount(count) => {
                self.presence.set_count(count);
                self.emit(SessionEvent::PresenceChanged(count));
            }
            ServerEvent::UserJoined(name) => self.emit(SessionEvent::ParticipantJoined(name)),
            ServerEvent::UserLeft(name) => {
                let was_typing = self.presence.stop_typing(Some(&name));
                self.emit(SessionEvent::ParticipantLeft(name));
                if was_typing {
                    self.emit_typing();
                }
            }
            ServerEvent::UserTyping(name) => {
                if self.presence.start_typing(&name) {
                    self.emit_typing();
                }
            }
            ServerEvent::UserStoppedTyping(name) => {
                if self.presence.stop_typing(name.as_deref()) {
                    self.emit_typing();
                }
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.lifecycle.state(),
            transport: self.transport,
            identity: self.identity.clone(),
            presence: self.presence.count(),
            typing: self.presence.typing(),
            messages: self.stream.log().to_vec(),
            input: self.stream.input().to_string(),
        }
    }
}

fn lock(core: &Mutex<SessionCore>) -> MutexGuard<'_, SessionCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Driver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Handle to one chat session.
///
/// The transport lives inside a driver task spawned by [`start`]. [`stop`]
/// and dropping the handle both shut it down, closing the transport and
/// cancelling any pending retry.
///
/// [`start`]: ChatSession::start
/// [`stop`]: ChatSession::stop
pub struct ChatSession {
    core: Arc<Mutex<SessionCore>>,
    factory: ConnectorFactory,
    negotiator: Arc<tokio::sync::Mutex<IdentityNegotiator>>,
    driver: Mutex<Option<Driver>>,
}

impl ChatSession {
    pub fn new(
        policy: RetryPolicy,
        factory: ConnectorFactory,
        negotiator: IdentityNegotiator,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let core = SessionCore {
            lifecycle: Lifecycle::new(policy),
            transport: None,
            identity: None,
            presence: PresenceTracker::new(),
            stream: MessageStream::new(),
            outbound: None,
            events,
        };
        let session = Self {
            core: Arc::new(Mutex::new(core)),
            factory,
            negotiator: Arc::new(tokio::sync::Mutex::new(negotiator)),
            driver: Mutex::new(None),
        };
        (session, events_rx)
    }

    /// Session over the real transports described by `config`.
    pub fn from_config(
        config: &ClientConfig,
        negotiator: IdentityNegotiator,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let policy = RetryPolicy::from(config);
        let config = config.clone();
        let factory: ConnectorFactory =
            Box::new(move || -> Result<Box<dyn Connector>, TransportError> {
                Ok(Box::new(WireConnector::new(config.clone())?))
            });
        Self::new(policy, factory, negotiator)
    }

    /// Begin connecting. Allowed from `Idle` and from `Failed`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<(), SessionError> {
        let mut core = lock(&self.core);
        if !core.lifecycle.can_begin() {
            return Err(SessionError::AlreadyActive(core.lifecycle.state()));
        }
        let connector = (self.factory)()?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        core.outbound = Some(outbound);
        let state = core.lifecycle.begin()?;
        core.transition(state);
        drop(core);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drive(
            self.core.clone(),
            connector,
            self.negotiator.clone(),
            outbound_rx,
            cancel.clone(),
        ));
        *self.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(Driver { cancel, handle });
        tracing::info!("session started");
        Ok(())
    }

    /// Close the transport and return to `Idle`. The message log is kept.
    pub async fn stop(&self) {
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Driver { cancel, mut handle }) = driver {
            cancel.cancel();
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                tracing::warn!("session driver did not stop in time, aborting");
                handle.abort();
            }
        }

        let mut core = lock(&self.core);
        core.outbound = None;
        core.reset_connection();
        if core.lifecycle.state() != ConnectionState::Idle {
            let state = core.lifecycle.stopped();
            core.transition(state);
            tracing::info!("session stopped");
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.core).lifecycle.state()
    }

    /// Name announced on the current connection, once negotiated.
    pub fn identity(&self) -> Option<String> {
        lock(&self.core).identity.clone()
    }

    pub fn presence(&self) -> u64 {
        lock(&self.core).presence.count()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.core).snapshot()
    }

    /// Send `raw` (trimmed) as a chat message and clear the pending input.
    ///
    /// Blank text is a no-op, and so is sending before this connection's
    /// display name has been announced. An oversized message is refused and
    /// the input kept.
    pub fn submit(&self, raw: &str) -> Result<(), SubmitError> {
        lock(&self.core).submit(raw)
    }

    /// [`submit`](Self::submit) the pending input buffer.
    pub fn submit_pending(&self) -> Result<(), SubmitError> {
        let mut core = lock(&self.core);
        let raw = core.stream.input().to_string();
        core.submit(&raw)
    }

    pub fn set_input(&self, text: impl Into<String>) {
        lock(&self.core).stream.set_input(text);
    }

    pub fn input(&self) -> String {
        lock(&self.core).stream.input().to_string()
    }

    /// Tell the server whether we are typing. Only changes are sent, and
    /// only while connected.
    pub fn notify_typing(&self, typing: bool) {
        let mut core = lock(&self.core);
        let state = core.lifecycle.state();
        if let Some(event) = core.stream.typing_edge(typing, state) {
            core.enqueue(event);
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        let driver = self
            .driver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            driver.cancel.cancel();
            driver.handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

enum LinkEnd {
    Cancelled,
    Dropped,
}

/// Owns the transport for one `start()`: connect, serve, reconnect, until
/// cancelled or out of retries.
async fn drive(
    shared: Arc<Mutex<SessionCore>>,
    connector: Box<dyn Connector>,
    negotiator: Arc<tokio::sync::Mutex<IdentityNegotiator>>,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    cancel: CancellationToken,
) {
    let policy = *lock(&shared).lifecycle.policy();

    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio::time::timeout(policy.connect_timeout, connector.open()) => {
                result.unwrap_or_else(|_| Err(TransportError::Timeout(policy.connect_timeout)))
            }
        };

        let link = match opened {
            Ok(link) => link,
            Err(e) => {
                let retry = {
                    let mut core = lock(&shared);
                    let (state, retry) = core.lifecycle.connect_failed();
                    if retry == Retry::GiveUp {
                        core.outbound = None;
                    }
                    core.transition(state);
                    retry
                };
                match retry {
                    Retry::After(delay) => {
                        tracing::warn!(err = %e, retry_in = ?delay, "connect failed");
                        if !sleep_or_cancel(delay, &cancel).await {
                            return;
                        }
                        continue;
                    }
                    Retry::GiveUp => {
                        tracing::error!(err = %e, "connect failed, retries exhausted");
                        return;
                    }
                }
            }
        };

        if let LinkEnd::Cancelled = serve(&shared, link, &negotiator, &mut outbound, &cancel).await {
            return;
        }

        {
            let mut core = lock(&shared);
            let state = core.lifecycle.disconnected();
            core.transition(state);
            core.reset_connection();
        }
        // Nothing is retried on the next connection.
        let mut discarded = 0usize;
        while outbound.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "dropped events queued for the lost connection");
        }

        if !sleep_or_cancel(policy.delay, &cancel).await {
            return;
        }
    }
}

/// One connected link: negotiate identity, then pump events both ways.
async fn serve(
    shared: &Mutex<SessionCore>,
    link: Link,
    negotiator: &tokio::sync::Mutex<IdentityNegotiator>,
    outbound: &mut mpsc::UnboundedReceiver<ClientEvent>,
    cancel: &CancellationToken,
) -> LinkEnd {
    let Link {
        transport,
        mut sink,
        mut stream,
    } = link;

    {
        let mut core = lock(shared);
        let state = core.lifecycle.connected();
        core.transport = Some(transport);
        core.transition(state);
    }
    tracing::info!(transport, "connected");

    // Inbound events keep flowing while the name is chosen, and a drop
    // abandons the negotiation.
    let negotiation = async { negotiator.lock().await.negotiate().await };
    tokio::pin!(negotiation);
    let name = loop {
        tokio::select! {
            _ = cancel.cancelled() => return LinkEnd::Cancelled,
            name = &mut negotiation => break name,
            inbound = stream.next() => {
                if let Some(end) = receive(shared, inbound) {
                    return end;
                }
            }
        }
    };
    if let Err(e) = sink.send(ClientEvent::SetUsername(name.clone()).to_frame()).await {
        tracing::warn!(err = %e, "failed to announce username");
        return LinkEnd::Dropped;
    }
    tracing::info!(username = %name, "username announced");
    {
        let mut core = lock(shared);
        core.identity = Some(name.clone());
        core.emit(SessionEvent::IdentityAssigned(name));
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = sink.close().await {
                    tracing::debug!(err = %e, "error closing transport");
                }
                return LinkEnd::Cancelled;
            }
            inbound = stream.next() => {
                if let Some(end) = receive(shared, inbound) {
                    return end;
                }
            }
            queued = outbound.recv() => {
                let Some(event) = queued else {
                    return LinkEnd::Cancelled;
                };
                if let Err(e) = sink.send(event.to_frame()).await {
                    tracing::warn!(err = %e, "send failed");
                    return LinkEnd::Dropped;
                }
            }
        }
    }
}

/// Handle one item from the inbound stream. Returns how the link ended, if
/// it did.
fn receive(
    shared: &Mutex<SessionCore>,
    inbound: Option<Result<Frame, TransportError>>,
) -> Option<LinkEnd> {
    match inbound {
        Some(Ok(frame)) => {
            dispatch(shared, &frame);
            None
        }
        Some(Err(e)) => {
            tracing::warn!(err = %e, "connection lost");
            Some(LinkEnd::Dropped)
        }
        None => {
            tracing::info!("server closed the connection");
            Some(LinkEnd::Dropped)
        }
    }
}

fn dispatch(shared: &Mutex<SessionCore>, frame: &Frame) {
    let event = match ServerEvent::from_frame(frame) {
        Ok(event) => event,
        Err(e @ ProtocolError::NonTextualBody { .. }) => {
            tracing::warn!(err = %e, "dropping chat message");
            return;
        }
        Err(e) => {
            tracing::debug!(event = %frame.event, err = %e, "ignoring inbound event");
            return;
        }
    };
    lock(shared).apply(event);
}

/// Sleep for `delay`. Returns false if cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
