use crate::app::{App, Entry};
use chrono::Local;
use huddle_session::ConnectionState;
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Wrap};

pub fn draw(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // header
            Constraint::Min(5),    // timeline
            Constraint::Length(1), // typing indicator
            Constraint::Length(3), // input
            Constraint::Length(1), // status bar
        ])
        .split(frame.area());

    draw_header(frame, app, chunks[0]);
    draw_timeline(frame, app, chunks[1]);
    draw_typing(frame, app, chunks[2]);
    draw_input(frame, app, chunks[3]);
    draw_status_bar(frame, app, chunks[4]);
}

fn draw_header(frame: &mut Frame, app: &App, area: Rect) {
    let mut spans = vec![Span::styled(
        format!(" Active Users - {} ", app.presence),
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )];
    if let Some(name) = &app.identity {
        spans.push(Span::styled(
            format!("| Connected as {name}"),
            Style::default().fg(Color::Green),
        ));
    }
    spans.push(Span::styled(
        "   PgUp/PgDn scroll, Ctrl+R reconnect, Esc quit",
        Style::default().fg(Color::DarkGray),
    ));
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_timeline(frame: &mut Frame, app: &App, area: Rect) {
    let height = area.height.saturating_sub(2) as usize;
    let items: Vec<ListItem> = scroll_window(&app.timeline, height, app.scroll)
        .iter()
        .map(|entry| match entry {
            Entry::Chat(m) => {
                let author_style = if app.is_own(m) {
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::Cyan)
                };
                let stamp = m.received_at.with_timezone(&Local).format("%H:%M");
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{stamp} "), Style::default().fg(Color::DarkGray)),
                    Span::styled(format!("{}: ", m.author), author_style),
                    Span::styled(m.body.as_str(), Style::default().fg(Color::White)),
                ]))
            }
            Entry::Notice(text) => ListItem::new(Span::styled(
                format!("-- {text}"),
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            )),
        })
        .collect();

    let title = if app.scroll > 0 {
        format!(" Chat (+{} newer) ", app.scroll)
    } else {
        " Chat ".to_string()
    };
    let block = Block::default().borders(Borders::ALL).title(title);
    frame.render_widget(List::new(items).block(block), area);
}

fn draw_typing(frame: &mut Frame, app: &App, area: Rect) {
    if let Some(line) = app.typing_line() {
        let typing = Paragraph::new(Span::styled(
            format!(" {line}"),
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        ));
        frame.render_widget(typing, area);
    }
}

fn draw_input(frame: &mut Frame, app: &App, area: Rect) {
    let (title, text, style) = if let Some(prompt) = &app.prompt {
        (
            " Choose a display name (Enter to accept, Esc for a random one) ".to_string(),
            prompt.buffer.as_str(),
            Style::default().fg(Color::Yellow),
        )
    } else if app.state.is_connected() && app.identity.is_none() {
        (
            " Choosing a name... ".to_string(),
            app.input.as_str(),
            Style::default().fg(Color::DarkGray),
        )
    } else if app.state.is_connected() {
        (
            " Message (Enter to send) ".to_string(),
            app.input.as_str(),
            Style::default().fg(Color::White),
        )
    } else {
        (
            format!(" Offline: {} ", app.state),
            app.input.as_str(),
            Style::default().fg(Color::DarkGray),
        )
    };
    let input = Paragraph::new(text)
        .style(style)
        .block(Block::default().borders(Borders::ALL).title(title))
        .wrap(Wrap { trim: false });
    frame.render_widget(input, area);
}

fn draw_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let state_color = match app.state {
        ConnectionState::Connected => Color::Green,
        ConnectionState::Connecting | ConnectionState::Reconnecting(_) => Color::Yellow,
        ConnectionState::Failed => Color::Red,
        ConnectionState::Idle => Color::Gray,
    };
    let state = match app.transport {
        Some(transport) if app.state.is_connected() => format!(" {} via {transport} ", app.state),
        _ => format!(" {} ", app.state),
    };
    let status = Line::from(vec![
        Span::styled(state, Style::default().fg(state_color)),
        Span::raw(format!("| {} ", app.server_url)),
        if !app.status_msg.is_empty() {
            Span::styled(
                format!("| {} ", app.status_msg),
                Style::default().fg(Color::Yellow),
            )
        } else {
            Span::raw("")
        },
    ]);
    frame.render_widget(
        Paragraph::new(status).style(Style::default().bg(Color::DarkGray)),
        area,
    );
}

/// Return a window of `height` entries, shifted up by `offset` from the bottom.
/// offset=0 shows the newest entries.
fn scroll_window(entries: &[Entry], height: usize, offset: usize) -> &[Entry] {
    let total = entries.len();
    let clamped_offset = offset.min(total.saturating_sub(1));
    let end = total.saturating_sub(clamped_offset);
    let start = end.saturating_sub(height);
    &entries[start..end]
}
