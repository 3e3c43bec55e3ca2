//! Terminal client for the anonymous chat.
//!
//! Run with: cargo run -p chat-tui [-- path/to/anon-chat.toml]
//!
//! Start `chat-relay` first, or point `ANON_CHAT_SERVER_URL` at another
//! backend. Logs go to `anon-chat-tui.log` in the temp directory.

use std::{
    fs::File,
    io,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use anon_chat_core::{AnonymousIdentity, ChatConfig, ChatMessage};
use anon_chat_session::{
    ChatController, ChatError, ChatState, ChatStatus, LinkStatus, storage::FileStorage,
};
use anon_chat_transport::WebSocketConnector;
use anyhow::Context;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "anon-chat.toml";
const LOG_FILE: &str = "anon-chat-tui.log";

type Chat = ChatController<WebSocketConnector, FileStorage>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from);
    let config = ChatConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let connector = WebSocketConnector::new(&config.server_url)
        .with_context(|| format!("invalid server url {}", config.server_url))?;
    let storage = config
        .identity_path
        .clone()
        .map(FileStorage::new)
        .or_else(FileStorage::default_location)
        .unwrap_or_else(|| FileStorage::new(std::env::temp_dir().join("anon-chat-identity.json")));
    tracing::info!(server = %config.server_url, identity = %storage.path().display(), "Starting chat");

    let mut chat = ChatController::new(config, Arc::new(connector), storage);

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut chat).await;
    chat.stop().await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn init_logging() -> anyhow::Result<()> {
    let path = std::env::temp_dir().join(LOG_FILE);
    let file = File::create(&path).with_context(|| format!("failed to open {}", path.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    Ok(())
}

struct App {
    state: ChatState,
    identity: Option<AnonymousIdentity>,
    input: String,
    /// Lines scrolled up from the bottom.
    scroll_back: u16,
    notice: Option<String>,
}

impl App {
    fn new() -> Self {
        Self {
            state: ChatState::default(),
            identity: None,
            input: String::new(),
            scroll_back: 0,
            notice: None,
        }
    }

    fn submit(&mut self, chat: &Chat) {
        match chat.send_text(&self.input) {
            Ok(_) => {
                self.input.clear();
                self.scroll_back = 0;
                self.notice = None;
            }
            Err(ChatError::EmptyMessage) => self.input.clear(),
            Err(e @ ChatError::NotConnected) => self.notice = Some(e.to_string()),
        }
    }

    fn scroll_up(&mut self, lines: u16) {
        self.scroll_back = self.scroll_back.saturating_add(lines);
    }

    fn scroll_down(&mut self, lines: u16) {
        self.scroll_back = self.scroll_back.saturating_sub(lines);
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    chat: &mut Chat,
) -> anyhow::Result<()> {
    let mut app = App::new();
    let mut updates = chat.subscribe();

    chat.start().await;
    app.identity = chat.identity().cloned();

    loop {
        if updates.has_changed().unwrap_or(false) {
            app.state = updates.borrow_and_update().clone();
        }

        terminal.draw(|f| ui(f, &app))?;

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };

        match key {
            KeyEvent {
                code: KeyCode::Char('c'),
                modifiers: KeyModifiers::CONTROL,
                ..
            }
            | KeyEvent {
                code: KeyCode::Esc, ..
            } => return Ok(()),
            KeyEvent {
                code: KeyCode::Char(c),
                modifiers: KeyModifiers::NONE | KeyModifiers::SHIFT,
                ..
            } => app.input.push(c),
            KeyEvent {
                code: KeyCode::Backspace,
                ..
            } => {
                app.input.pop();
            }
            KeyEvent {
                code: KeyCode::Enter,
                ..
            } => app.submit(chat),
            KeyEvent {
                code: KeyCode::Up, ..
            } => app.scroll_up(1),
            KeyEvent {
                code: KeyCode::Down,
                ..
            } => app.scroll_down(1),
            KeyEvent {
                code: KeyCode::PageUp,
                ..
            } => app.scroll_up(10),
            KeyEvent {
                code: KeyCode::PageDown,
                ..
            } => app.scroll_down(10),
            _ => {}
        }
    }
}

/// Status bar label and colour.
fn status_label(status: ChatStatus) -> (String, Color) {
    match status {
        ChatStatus::Idle => ("idle".to_string(), Color::DarkGray),
        ChatStatus::Starting => ("connecting...".to_string(), Color::Yellow),
        ChatStatus::Live(LinkStatus::Connected) => ("live".to_string(), Color::Green),
        ChatStatus::Live(LinkStatus::Reconnecting { attempt }) => {
            (format!("reconnecting (attempt {attempt})"), Color::Yellow)
        }
        ChatStatus::Ended => ("ended".to_string(), Color::Red),
    }
}

fn message_line<'a>(msg: &'a ChatMessage, me: Option<&AnonymousIdentity>) -> Line<'a> {
    let time = msg
        .timestamp
        .with_timezone(&chrono::Local)
        .format("%H:%M")
        .to_string();
    let time = Span::styled(time, Style::default().fg(Color::DarkGray));

    if me.is_some_and(|me| msg.is_from(me)) {
        return Line::from(vec![
            Span::styled(msg.text.as_str(), Style::default().fg(Color::Cyan)),
            Span::raw(" "),
            time,
        ])
        .alignment(Alignment::Right);
    }

    let sender_style = if msg.is_system() {
        Style::default()
            .fg(Color::Magenta)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Blue)
    };
    Line::from(vec![
        time,
        Span::raw(" "),
        Span::styled(msg.sender.as_str(), sender_style),
        Span::raw(": "),
        Span::raw(msg.text.as_str()),
    ])
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),    // Transcript
            Constraint::Length(3), // Input
            Constraint::Length(1), // Status
        ])
        .split(f.area());

    // Transcript
    let lines: Vec<Line> = if app.state.messages.is_empty() {
        vec![Line::styled("No messages yet", Style::default().fg(Color::DarkGray))]
    } else {
        app.state
            .messages
            .iter()
            .map(|m| message_line(m, app.identity.as_ref()))
            .collect()
    };
    // Scroll by rendered rows so wrapped messages keep the newest line in view.
    let transcript = Paragraph::new(lines).wrap(Wrap { trim: false });
    let visible = chunks[0].height.saturating_sub(2);
    let rows = transcript.line_count(chunks[0].width.saturating_sub(2));
    let total = u16::try_from(rows).unwrap_or(u16::MAX);
    let scroll = total
        .saturating_sub(visible)
        .saturating_sub(app.scroll_back);

    let title = app
        .identity
        .as_ref()
        .map_or_else(|| "Chat".to_string(), |id| format!("Chat as {id}"));
    let transcript = transcript
        .block(Block::default().borders(Borders::ALL).title(title))
        .scroll((scroll, 0));
    f.render_widget(transcript, chunks[0]);

    // Input
    let input = Paragraph::new(app.input.as_str())
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL).title("Message"));
    f.render_widget(input, chunks[1]);

    let cursor = u16::try_from(app.input.chars().count()).unwrap_or(u16::MAX);
    f.set_cursor_position((
        chunks[1].x.saturating_add(cursor).saturating_add(1),
        chunks[1].y + 1,
    ));

    // Status bar
    let (label, colour) = status_label(app.state.status);
    let mut spans = vec![
        Span::raw(" "),
        Span::styled(label, Style::default().fg(colour)),
    ];
    if let Some(notice) = &app.notice {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(notice.as_str(), Style::default().fg(Color::Red)));
    }
    spans.extend([
        Span::raw(" | "),
        Span::styled("Esc", Style::default().fg(Color::Yellow)),
        Span::raw(" quit | "),
        Span::styled("Up/Down/PgUp/PgDn", Style::default().fg(Color::Yellow)),
        Span::raw(" scroll "),
    ]);
    f.render_widget(Paragraph::new(Line::from(spans)), chunks[2]);
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ratatui::backend::TestBackend;

    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label(ChatStatus::Starting).0, "connecting...");
        assert_eq!(status_label(ChatStatus::Live(LinkStatus::Connected)).0, "live");
        assert_eq!(
            status_label(ChatStatus::Live(LinkStatus::Reconnecting { attempt: 3 })).0,
            "reconnecting (attempt 3)"
        );
        assert_eq!(status_label(ChatStatus::Ended).0, "ended");
    }

    #[test]
    fn test_own_messages_are_right_aligned() {
        let me = AnonymousIdentity::parse("User-0000beef").unwrap();
        let mine = ChatMessage::new("User-0000beef", "hi", Utc::now());
        let theirs = ChatMessage::system("welcome", Utc::now());

        assert_eq!(message_line(&mine, Some(&me)).alignment, Some(Alignment::Right));
        assert_eq!(message_line(&theirs, Some(&me)).alignment, None);
    }

    #[test]
    fn test_empty_transcript_placeholder() {
        let mut terminal = Terminal::new(TestBackend::new(40, 10)).unwrap();
        let app = App::new();
        terminal.draw(|f| ui(f, &app)).unwrap();

        let rendered: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(ratatui::buffer::Cell::symbol)
            .collect();
        assert!(rendered.contains("No messages yet"));
        assert!(rendered.contains("idle"));
    }

    #[test]
    fn test_wrapped_messages_keep_newest_visible() {
        let mut terminal = Terminal::new(TestBackend::new(24, 10)).unwrap();
        let mut app = App::new();
        let long = "lorem ipsum dolor sit amet ".repeat(4);
        app.state.messages = vec![
            ChatMessage::new("a", "first", Utc::now()),
            ChatMessage::new("a", long, Utc::now()),
            ChatMessage::new("a", "newest", Utc::now()),
        ];
        terminal.draw(|f| ui(f, &app)).unwrap();

        let rendered: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(ratatui::buffer::Cell::symbol)
            .collect();
        assert!(rendered.contains("newest"));
        assert!(!rendered.contains("first"));
    }
}
