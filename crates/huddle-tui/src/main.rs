mod app;
mod input;
mod prompt;
mod ui;

use anyhow::{Context, Result};
use app::App;
use clap::Parser;
use crossterm::event::{self, Event};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use huddle::config::ClientConfig;
use huddle_session::{
    ChatSession, ConnectionState, FixedName, IdentityNegotiator, IdentityProvider, SessionEvent,
};
use prompt::{PromptProvider, PromptRequest};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "huddle", version, about = "huddle terminal chat client")]
struct Args {
    /// Chat server URL (overrides the config file).
    #[arg(long)]
    server: Option<String>,

    /// Path to the config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write logs. The terminal is taken by the UI.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Display name to use on every connect instead of prompting.
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_path = args.log_file.clone().unwrap_or_else(default_log_path);
    init_logging(&log_path)?;

    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    if let Some(server) = args.server {
        config.server_url = server;
        config.validate()?;
    }
    tracing::info!(server = %config.server_url, "starting huddle");

    let (prompt_tx, mut prompt_rx) = mpsc::unbounded_channel::<PromptRequest>();
    let provider: Box<dyn IdentityProvider> = match args.name {
        Some(name) => Box::new(FixedName::new(name)),
        None => Box::new(PromptProvider::new(prompt_tx)),
    };
    let (session, mut events) =
        ChatSession::from_config(&config, IdentityNegotiator::with_entropy(provider));
    let mut app = App::new(config.server_url.clone(), &session.snapshot());
    session.start().context("failed to start session")?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app, &session, &mut events, &mut prompt_rx).await;

    session.stop().await;

    // Restore terminal
    disable_raw_mode()?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    session: &ChatSession,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    prompts: &mut mpsc::UnboundedReceiver<PromptRequest>,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        tokio::select! {
            poll_result = tokio::task::spawn_blocking(|| event::poll(Duration::from_millis(50))) => {
                if let Ok(Ok(true)) = poll_result
                    && let Ok(Event::Key(key)) = event::read()
                {
                    input::handle_key(app, session, key);
                }
            }

            Some(event) = events.recv() => {
                let connected = event == SessionEvent::StateChanged(ConnectionState::Connected);
                app.handle_event(event);
                if connected {
                    app.transport = session.snapshot().transport;
                }
            }

            Some(reply) = prompts.recv() => {
                app.begin_prompt(reply);
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

/// Log to a file, filtered by `RUST_LOG` (default `huddle=info`).
fn init_logging(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "huddle=info,huddle_session=info,huddle_transport=info,huddle_tui=info".into()
            }),
        )
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn default_log_path() -> PathBuf {
    if let Ok(state_dir) = std::env::var("XDG_STATE_HOME") {
        PathBuf::from(state_dir).join("huddle").join("huddle.log")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("huddle")
            .join("huddle.log")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/huddle-{uid}.log"))
    }
}
