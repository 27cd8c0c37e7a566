use crate::app::App;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use huddle_session::{ChatSession, SessionError, SubmitError};

/// Handle a key event against the app and its session.
pub fn handle_key(app: &mut App, session: &ChatSession, key: KeyEvent) {
    if key.kind != KeyEventKind::Press {
        return;
    }

    // Ctrl+C quits from anywhere.
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.cancel_prompt();
        app.should_quit = true;
        return;
    }

    if app.prompt.is_some() {
        handle_prompt_key(app, key);
        return;
    }

    match key.code {
        KeyCode::Esc => app.should_quit = true,
        KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => restart(app, session),
        KeyCode::PageUp => app.scroll_up(),
        KeyCode::PageDown => app.scroll_down(),
        KeyCode::Enter => match session.submit_pending() {
            Ok(()) => {
                app.input = session.input();
                app.scroll = 0;
                session.notify_typing(false);
            }
            Err(SubmitError::Empty) => {}
            Err(SubmitError::NotConnected(state)) => {
                app.status_msg = format!("Not sent: {state}");
            }
            Err(e @ (SubmitError::Negotiating | SubmitError::TooLarge)) => {
                app.status_msg = format!("Not sent: {e}");
            }
        },
        KeyCode::Backspace => {
            app.input.pop();
            input_changed(app, session);
        }
        KeyCode::Char(c) => {
            app.input.push(c);
            input_changed(app, session);
        }
        _ => {}
    }
}

fn handle_prompt_key(app: &mut App, key: KeyEvent) {
    let Some(prompt) = app.prompt.as_mut() else {
        return;
    };
    match key.code {
        KeyCode::Enter => {
            let name = prompt.buffer.clone();
            app.answer_prompt(Some(name));
        }
        // Declining picks a random name.
        KeyCode::Esc => app.cancel_prompt(),
        KeyCode::Backspace => {
            prompt.buffer.pop();
        }
        KeyCode::Char(c) => prompt.buffer.push(c),
        _ => {}
    }
}

fn input_changed(app: &mut App, session: &ChatSession) {
    session.set_input(app.input.as_str());
    session.notify_typing(!app.input.trim().is_empty());
}

fn restart(app: &mut App, session: &ChatSession) {
    match session.start() {
        Ok(()) => app.status_msg = "Connecting...".to_string(),
        Err(SessionError::AlreadyActive(state)) => {
            app.status_msg = format!("Already {state}");
        }
        Err(e) => {
            tracing::error!(err = %e, "restart failed");
            app.status_msg = format!("Error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle::protocol::ClientEvent;
    use huddle_session::{
        ConnectionState, FixedName, IdentityNegotiator, RetryPolicy, SessionEvent,
    };
    use huddle_transport::memory::MemoryConnector;
    use huddle_transport::{Connector, TransportError};
    use tokio::sync::{mpsc, oneshot};

    fn new_session(
        connector: &MemoryConnector,
    ) -> (ChatSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let connector = connector.clone();
        ChatSession::new(
            RetryPolicy::default(),
            Box::new(move || -> Result<Box<dyn Connector>, TransportError> {
                Ok(Box::new(connector.clone()))
            }),
            IdentityNegotiator::with_entropy(Box::new(FixedName::new("alice"))),
        )
    }

    fn new_app(session: &ChatSession) -> App {
        App::new("http://localhost:8000".to_string(), &session.snapshot())
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn type_text(app: &mut App, session: &ChatSession, text: &str) {
        for c in text.chars() {
            handle_key(app, session, key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn typing_mirrors_into_session_buffer() {
        let (session, _events) = new_session(&MemoryConnector::new());
        let mut app = new_app(&session);

        type_text(&mut app, &session, "hey");
        handle_key(&mut app, &session, key(KeyCode::Backspace));
        assert_eq!(app.input, "he");
        assert_eq!(session.input(), "he");
    }

    #[test]
    fn enter_while_offline_keeps_input() {
        let (session, _events) = new_session(&MemoryConnector::new());
        let mut app = new_app(&session);

        type_text(&mut app, &session, "hello");
        handle_key(&mut app, &session, key(KeyCode::Enter));
        assert_eq!(app.input, "hello");
        assert_eq!(app.status_msg, "Not sent: idle");
    }

    #[test]
    fn prompt_captures_keys_until_answered() {
        let (session, _events) = new_session(&MemoryConnector::new());
        let mut app = new_app(&session);
        let (tx, mut rx) = oneshot::channel();
        app.begin_prompt(tx);

        type_text(&mut app, &session, "bob");
        assert_eq!(app.input, "");
        handle_key(&mut app, &session, key(KeyCode::Enter));
        assert!(app.prompt.is_none());
        assert_eq!(rx.try_recv().unwrap(), Some("bob".to_string()));
    }

    #[test]
    fn esc_in_prompt_declines_without_quitting() {
        let (session, _events) = new_session(&MemoryConnector::new());
        let mut app = new_app(&session);
        let (tx, mut rx) = oneshot::channel();
        app.begin_prompt(tx);

        handle_key(&mut app, &session, key(KeyCode::Esc));
        assert!(!app.should_quit);
        assert_eq!(rx.try_recv().unwrap(), None);
    }

    #[test]
    fn quit_keys() {
        let (session, _events) = new_session(&MemoryConnector::new());
        let mut app = new_app(&session);
        handle_key(&mut app, &session, ctrl('c'));
        assert!(app.should_quit);

        let mut app = new_app(&session);
        handle_key(&mut app, &session, key(KeyCode::Esc));
        assert!(app.should_quit);
    }

    #[tokio::test(start_paused = true)]
    async fn ctrl_r_starts_and_enter_sends() {
        let connector = MemoryConnector::new();
        let mut server = connector.accept();
        let (session, mut events) = new_session(&connector);
        let mut app = new_app(&session);

        handle_key(&mut app, &session, ctrl('r'));
        assert_eq!(session.state(), ConnectionState::Connecting);
        while let Some(event) = events.recv().await {
            let done = matches!(event, SessionEvent::IdentityAssigned(_));
            app.handle_event(event);
            if done {
                break;
            }
        }

        handle_key(&mut app, &session, ctrl('r'));
        assert_eq!(app.status_msg, "Already connected");

        type_text(&mut app, &session, "hi");
        handle_key(&mut app, &session, key(KeyCode::Enter));
        assert_eq!(app.input, "");

        assert_eq!(
            server.recv().await,
            Some(ClientEvent::SetUsername("alice".to_string()))
        );
        assert_eq!(server.recv().await, Some(ClientEvent::Typing));
        assert_eq!(
            server.recv().await,
            Some(ClientEvent::Message("hi".to_string()))
        );
        assert_eq!(server.recv().await, Some(ClientEvent::StoppedTyping));
    }
}
