use futures_util::future::BoxFuture;
use huddle::protocol::{ChatPayload, ClientEvent, Frame, ServerEvent};
use huddle_session::{
    ChatSession, ConnectionState, FixedName, IdentityNegotiator, IdentityProvider, RetryPolicy,
    SessionError, SessionEvent, SubmitError,
};
use huddle_transport::memory::MemoryConnector;
use huddle_transport::{Connector, Link, TransportError};
use rand::rngs::mock::StepRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout};

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("huddle_session=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

type Events = mpsc::UnboundedReceiver<SessionEvent>;

fn session_over<C: Connector + Clone>(
    connector: &C,
    provider: impl IdentityProvider + 'static,
) -> (ChatSession, Events) {
    init_tracing();
    let connector = connector.clone();
    ChatSession::new(
        RetryPolicy::default(),
        Box::new(move || -> Result<Box<dyn Connector>, TransportError> {
            Ok(Box::new(connector.clone()))
        }),
        IdentityNegotiator::new(Box::new(provider), Box::new(StepRng::new(0, 0))),
    )
}

fn alice_session(connector: &MemoryConnector) -> (ChatSession, Events) {
    session_over(connector, FixedName::new("alice"))
}

async fn next_event(events: &mut Events) -> SessionEvent {
    timeout(Duration::from_secs(300), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

/// The next `count` state transitions, skipping other events.
async fn states(events: &mut Events, count: usize) -> Vec<ConnectionState> {
    let mut seen = Vec::new();
    while seen.len() < count {
        if let SessionEvent::StateChanged(state) = next_event(events).await {
            seen.push(state);
        }
    }
    seen
}

async fn until_identity(events: &mut Events) -> String {
    loop {
        if let SessionEvent::IdentityAssigned(name) = next_event(events).await {
            return name;
        }
    }
}

async fn until_presence(events: &mut Events, count: u64) {
    while next_event(events).await != SessionEvent::PresenceChanged(count) {}
}

fn chat(author: &str, body: &str) -> ServerEvent {
    ServerEvent::Chat(ChatPayload {
        username: author.to_string(),
        message: body.to_string(),
    })
}

/// Holds the name back until the test releases it.
struct GatedName {
    gate: Option<oneshot::Receiver<String>>,
}

impl IdentityProvider for GatedName {
    fn request_name(&mut self) -> BoxFuture<'_, Option<String>> {
        let gate = self.gate.take();
        Box::pin(async move {
            match gate {
                Some(rx) => rx.await.ok(),
                None => None,
            }
        })
    }
}

/// Counts how often a name was requested.
struct CountingName {
    asked: Arc<AtomicUsize>,
}

impl IdentityProvider for CountingName {
    fn request_name(&mut self) -> BoxFuture<'_, Option<String>> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Some("dave".to_string()) })
    }
}

/// A connector whose connects never complete.
#[derive(Clone, Default)]
struct HangingConnector {
    opens: Arc<AtomicUsize>,
}

impl Connector for HangingConnector {
    fn open(&self) -> BoxFuture<'_, Result<Link, TransportError>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Box::pin(std::future::pending())
    }
}

#[tokio::test(start_paused = true)]
async fn submit_sends_once_and_waits_for_echo() {
    let connector = MemoryConnector::new();
    let mut server = connector.accept();
    let (session, mut events) = alice_session(&connector);

    session.start().unwrap();
    assert_eq!(until_identity(&mut events).await, "alice");
    assert_eq!(server.recv().await, Some(ClientEvent::SetUsername("alice".to_string())));

    session.set_input("hello");
    session.submit_pending().unwrap();
    assert_eq!(server.recv().await, Some(ClientEvent::Message("hello".to_string())));
    assert_eq!(session.input(), "");
    assert!(session.snapshot().messages.is_empty());

    server.send(&chat("alice", "hello"));
    match next_event(&mut events).await {
        SessionEvent::MessageAppended(msg) => {
            assert_eq!(msg.author, "alice");
            assert_eq!(msg.body, "hello");
        }
        other => panic!("expected MessageAppended, got {other:?}"),
    }
    assert_eq!(session.snapshot().messages.len(), 1);
    assert!(server.try_recv_frame().is_none());
}

#[tokio::test(start_paused = true)]
async fn blank_and_offline_submits_never_reach_wire() {
    let connector = MemoryConnector::new();
    let mut server = connector.accept();
    let (session, mut events) = alice_session(&connector);

    assert_eq!(
        session.submit("hello"),
        Err(SubmitError::NotConnected(ConnectionState::Idle))
    );

    session.start().unwrap();
    assert_eq!(
        session.submit("too soon"),
        Err(SubmitError::NotConnected(ConnectionState::Connecting))
    );
    until_identity(&mut events).await;

    assert_eq!(session.submit(""), Err(SubmitError::Empty));
    assert_eq!(session.submit("   "), Err(SubmitError::Empty));
    session.submit("  real  ").unwrap();

    assert_eq!(server.recv().await, Some(ClientEvent::SetUsername("alice".to_string())));
    assert_eq!(server.recv().await, Some(ClientEvent::Message("real".to_string())));
    assert!(session.snapshot().messages.is_empty());
}

#[tokio::test(start_paused = true)]
async fn submissions_wait_for_announced_name() {
    let connector = MemoryConnector::new();
    let mut server = connector.accept();
    let (gate, gate_rx) = oneshot::channel();
    let (session, mut events) = session_over(&connector, GatedName { gate: Some(gate_rx) });

    session.start().unwrap();
    assert_eq!(
        states(&mut events, 2).await,
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );

    session.set_input("early");
    assert_eq!(session.submit_pending(), Err(SubmitError::Negotiating));
    assert_eq!(session.input(), "early");
    tokio::task::yield_now().await;
    assert!(server.try_recv_frame().is_none());

    gate.send("  carol ".to_string()).unwrap();
    assert_eq!(until_identity(&mut events).await, "carol");
    session.submit_pending().unwrap();
    assert_eq!(server.recv().await, Some(ClientEvent::SetUsername("carol".to_string())));
    assert_eq!(server.recv().await, Some(ClientEvent::Message("early".to_string())));
}

#[tokio::test(start_paused = true)]
async fn link_watched_while_name_is_pending() {
    let connector = MemoryConnector::new();
    let first = connector.accept();
    let mut second = connector.accept();
    // Never answered: the first negotiation has to be abandoned.
    let (_gate, gate_rx) = oneshot::channel::<String>();
    let (session, mut events) = session_over(&connector, GatedName { gate: Some(gate_rx) });

    session.start().unwrap();
    assert_eq!(
        states(&mut events, 2).await,
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );

    first.send(&ServerEvent::UsersCount(4));
    first.send(&chat("Bob", "anyone here?"));
    assert_eq!(next_event(&mut events).await, SessionEvent::PresenceChanged(4));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::MessageAppended(_)
    ));

    first.fail();
    drop(first);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::StateChanged(ConnectionState::Reconnecting(0))
    );
    assert_eq!(session.presence(), 4);
    assert_eq!(session.snapshot().messages.len(), 1);

    // The provider has nothing more to offer, so the retry falls back.
    assert_eq!(until_identity(&mut events).await, "User0");
    assert_eq!(second.recv().await, Some(ClientEvent::SetUsername("User0".to_string())));
    assert_eq!(connector.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn oversized_payloads_leave_link_up() {
    let connector = MemoryConnector::new();
    let mut server = connector.accept();
    let (session, mut events) = alice_session(&connector);

    session.start().unwrap();
    until_identity(&mut events).await;
    assert_eq!(server.recv().await, Some(ClientEvent::SetUsername("alice".to_string())));

    let huge = "x".repeat(70_000);
    session.set_input(huge.as_str());
    assert_eq!(session.submit_pending(), Err(SubmitError::TooLarge));
    assert_eq!(session.input(), huge);

    session.submit("small").unwrap();
    assert_eq!(server.recv().await, Some(ClientEvent::Message("small".to_string())));

    server.send(&chat("Bob", &huge));
    match next_event(&mut events).await {
        SessionEvent::MessageAppended(msg) => assert_eq!(msg.body.len(), 70_000),
        other => panic!("expected MessageAppended, got {other:?}"),
    }

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(connector.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn declined_name_falls_back_to_generated() {
    let connector = MemoryConnector::new();
    let mut server = connector.accept();
    let (session, mut events) = session_over(&connector, FixedName::anonymous());

    session.start().unwrap();
    assert_eq!(until_identity(&mut events).await, "User0");
    assert_eq!(server.recv().await, Some(ClientEvent::SetUsername("User0".to_string())));
}

#[tokio::test(start_paused = true)]
async fn identity_renegotiated_on_every_reconnect() {
    let connector = MemoryConnector::new();
    let mut first = connector.accept();
    let mut second = connector.accept();
    let asked = Arc::new(AtomicUsize::new(0));
    let (session, mut events) = session_over(
        &connector,
        CountingName {
            asked: asked.clone(),
        },
    );

    session.start().unwrap();
    assert_eq!(first.recv().await, Some(ClientEvent::SetUsername("dave".to_string())));
    until_identity(&mut events).await;
    drop(first);

    let mut seen = Vec::new();
    loop {
        let event = next_event(&mut events).await;
        let done = matches!(event, SessionEvent::IdentityAssigned(_));
        seen.push(event);
        if done {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![
            SessionEvent::StateChanged(ConnectionState::Reconnecting(0)),
            SessionEvent::StateChanged(ConnectionState::Connected),
            SessionEvent::IdentityAssigned("dave".to_string()),
        ]
    );
    assert_eq!(second.recv().await, Some(ClientEvent::SetUsername("dave".to_string())));
    assert_eq!(asked.load(Ordering::SeqCst), 2);
    assert_eq!(connector.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn reconnects_within_cap_without_intervention() {
    let connector = MemoryConnector::new();
    let first = connector.accept();
    connector.refuse(3);
    let mut second = connector.accept();
    let (session, mut events) = alice_session(&connector);

    session.start().unwrap();
    assert_eq!(
        states(&mut events, 2).await,
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );

    first.fail();
    assert_eq!(
        states(&mut events, 5).await,
        vec![
            ConnectionState::Reconnecting(0),
            ConnectionState::Reconnecting(1),
            ConnectionState::Reconnecting(2),
            ConnectionState::Reconnecting(3),
            ConnectionState::Connected,
        ]
    );
    assert_eq!(second.recv().await, Some(ClientEvent::SetUsername("alice".to_string())));
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(connector.opens(), 5);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_until_restarted() {
    let connector = MemoryConnector::new();
    connector.refuse(6);
    let (session, mut events) = alice_session(&connector);

    let started = Instant::now();
    session.start().unwrap();
    assert_eq!(
        states(&mut events, 7).await,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Reconnecting(1),
            ConnectionState::Reconnecting(2),
            ConnectionState::Reconnecting(3),
            ConnectionState::Reconnecting(4),
            ConnectionState::Reconnecting(5),
            ConnectionState::Failed,
        ]
    );
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(connector.opens(), 6);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(session.state(), ConnectionState::Failed);
    assert_eq!(connector.opens(), 6);
    assert_eq!(
        session.submit("anyone?"),
        Err(SubmitError::NotConnected(ConnectionState::Failed))
    );

    let mut server = connector.accept();
    session.start().unwrap();
    assert_eq!(
        states(&mut events, 2).await,
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
    assert_eq!(server.recv().await, Some(ClientEvent::SetUsername("alice".to_string())));
}

#[tokio::test(start_paused = true)]
async fn start_while_active_is_rejected() {
    let connector = MemoryConnector::new();
    let _server = connector.accept();
    let (session, mut events) = alice_session(&connector);

    session.start().unwrap();
    until_identity(&mut events).await;
    assert!(matches!(
        session.start(),
        Err(SessionError::AlreadyActive(ConnectionState::Connected))
    ));
    assert_eq!(connector.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_counts_as_failed_attempt() {
    let connector = HangingConnector::default();
    let (session, mut events) = session_over(&connector, FixedName::new("alice"));

    let started = Instant::now();
    session.start().unwrap();
    assert_eq!(
        states(&mut events, 2).await,
        vec![ConnectionState::Connecting, ConnectionState::Reconnecting(1)]
    );
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn presence_is_last_write_wins() {
    let connector = MemoryConnector::new();
    let server = connector.accept();
    let (session, mut events) = alice_session(&connector);

    session.start().unwrap();
    until_identity(&mut events).await;

    server.send(&ServerEvent::UsersCount(7));
    server.send(&ServerEvent::UsersCount(3));
    assert_eq!(next_event(&mut events).await, SessionEvent::PresenceChanged(7));
    assert_eq!(next_event(&mut events).await, SessionEvent::PresenceChanged(3));
    assert_eq!(session.presence(), 3);
}

#[tokio::test(start_paused = true)]
async fn log_holds_textual_messages_in_delivery_order() {
    let connector = MemoryConnector::new();
    let server = connector.accept();
    let (session, mut events) = alice_session(&connector);

    session.start().unwrap();
    until_identity(&mut events).await;

    server.send(&chat("Bob", "hi"));
    server.send_frame(
        Frame::decode(r#"{"event":"response","data":{"username":"Bob","message":42}}"#).unwrap(),
    );
    server.send_frame(Frame::decode(r#"{"event":"users_count","data":{"count":"many"}}"#).unwrap());
    server.send(&chat("Bob", "there"));
    server.send_frame(Frame::decode(r#"{"event":"response","data":{"message":"who?"}}"#).unwrap());
    server.send(&ServerEvent::UsersCount(1));
    until_presence(&mut events, 1).await;

    let log: Vec<(String, String)> = session
        .snapshot()
        .messages
        .into_iter()
        .map(|m| (m.author, m.body))
        .collect();
    assert_eq!(
        log,
        vec![
            ("Bob".to_string(), "hi".to_string()),
            ("Bob".to_string(), "there".to_string()),
            ("Unknown".to_string(), "who?".to_string()),
        ]
    );
    assert_eq!(session.presence(), 1);
}

#[tokio::test(start_paused = true)]
async fn typing_indicators_flow_both_ways() {
    let connector = MemoryConnector::new();
    let mut server = connector.accept();
    let (session, mut events) = alice_session(&connector);

    session.start().unwrap();
    until_identity(&mut events).await;
    assert_eq!(server.recv().await, Some(ClientEvent::SetUsername("alice".to_string())));

    session.notify_typing(true);
    session.notify_typing(true);
    session.notify_typing(false);
    assert_eq!(server.recv().await, Some(ClientEvent::Typing));
    assert_eq!(server.recv().await, Some(ClientEvent::StoppedTyping));

    server.send(&ServerEvent::UserJoined("bob".to_string()));
    server.send(&ServerEvent::UserTyping("bob".to_string()));
    server.send(&ServerEvent::UserStoppedTyping(None));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::ParticipantJoined("bob".to_string())
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::TypingChanged(vec!["bob".to_string()])
    );
    assert_eq!(next_event(&mut events).await, SessionEvent::TypingChanged(vec![]));
    assert!(session.snapshot().messages.is_empty());
}

#[tokio::test(start_paused = true)]
async fn typing_set_cleared_on_disconnect() {
    let connector = MemoryConnector::new();
    let server = connector.accept();
    let _next = connector.accept();
    let (session, mut events) = alice_session(&connector);

    session.start().unwrap();
    until_identity(&mut events).await;
    server.send(&ServerEvent::UserTyping("bob".to_string()));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::TypingChanged(vec!["bob".to_string()])
    );

    drop(server);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::StateChanged(ConnectionState::Reconnecting(0))
    );
    assert_eq!(next_event(&mut events).await, SessionEvent::TypingChanged(vec![]));
    assert!(session.snapshot().typing.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_releases_transport_and_keeps_log() {
    let connector = MemoryConnector::new();
    let mut server = connector.accept();
    let (session, mut events) = alice_session(&connector);

    session.start().unwrap();
    until_identity(&mut events).await;
    assert_eq!(server.recv().await, Some(ClientEvent::SetUsername("alice".to_string())));
    server.send(&chat("Bob", "hi"));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::MessageAppended(_)
    ));

    session.stop().await;
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::StateChanged(ConnectionState::Idle)
    );
    assert_eq!(server.recv_frame().await, None);

    let snap = session.snapshot();
    assert_eq!(snap.state, ConnectionState::Idle);
    assert_eq!(snap.identity, None);
    assert_eq!(snap.messages.len(), 1);
    assert_eq!(
        session.submit("hello?"),
        Err(SubmitError::NotConnected(ConnectionState::Idle))
    );
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_retry() {
    let connector = MemoryConnector::new();
    connector.refuse(10);
    let (session, mut events) = alice_session(&connector);

    session.start().unwrap();
    assert_eq!(
        states(&mut events, 2).await,
        vec![ConnectionState::Connecting, ConnectionState::Reconnecting(1)]
    );
    session.stop().await;
    assert_eq!(session.state(), ConnectionState::Idle);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_session_releases_transport() {
    let connector = MemoryConnector::new();
    let mut server = connector.accept();
    let (session, mut events) = alice_session(&connector);

    session.start().unwrap();
    until_identity(&mut events).await;
    assert_eq!(server.recv().await, Some(ClientEvent::SetUsername("alice".to_string())));

    drop(session);
    let closed = timeout(Duration::from_secs(5), server.recv_frame()).await;
    assert_eq!(closed, Ok(None));
    assert_eq!(connector.opens(), 1);
}
