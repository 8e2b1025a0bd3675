use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Frame,
};

use agent_grove::config::Shortcuts;
use agent_grove::{AgentKind, HostingMode, SessionEvent, SessionInfo, SessionState, TerminalSize, Worktree};

use crate::actions::Action;

/// Theme colors
pub struct Theme {
    pub fg: Color,
    pub accent: Color,
    pub dim: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            fg: Color::Rgb(220, 220, 220),
            accent: Color::Rgb(217, 119, 87),
            dim: Color::Rgb(100, 100, 100),
            success: Color::Rgb(80, 200, 120),
            warning: Color::Rgb(255, 193, 7),
            error: Color::Rgb(220, 53, 69),
        }
    }
}

/// Input mode for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    /// Keys go to the foreground session
    Attached(PathBuf),
    Confirming,
}

/// One line of the worktree list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub path: PathBuf,
    pub branch: Option<String>,
}

/// Main application state
pub struct App {
    /// Worktrees plus any session directory git did not report
    pub rows: Vec<Row>,
    pub worktrees: Vec<Worktree>,
    pub sessions: HashMap<PathBuf, SessionInfo>,
    /// Currently selected row
    pub list_state: ListState,
    /// Current message to display (info or error)
    pub message: Option<String>,
    /// Agent used for new sessions and panes
    pub agent: AgentKind,
    /// Visible rows of the selected owned session
    pub screen: Vec<String>,
    /// Inner size of the detail pane at the last render
    pub viewport: TerminalSize,
    pub shortcuts: Shortcuts,
    pub theme: Theme,
    pub input_mode: InputMode,
    /// Pending action queue
    pub pending_actions: Vec<Action>,
}

impl App {
    pub fn new(shortcuts: Shortcuts) -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            rows: Vec::new(),
            worktrees: Vec::new(),
            sessions: HashMap::new(),
            list_state,
            message: None,
            agent: AgentKind::default(),
            screen: Vec::new(),
            viewport: TerminalSize::default(),
            shortcuts,
            theme: Theme::default(),
            input_mode: InputMode::Normal,
            pending_actions: Vec::new(),
        }
    }

    pub fn selected_row(&self) -> Option<&Row> {
        self.list_state.selected().and_then(|i| self.rows.get(i))
    }

    pub fn selected_path(&self) -> Option<PathBuf> {
        self.selected_row().map(|row| row.path.clone())
    }

    pub fn selected_session(&self) -> Option<&SessionInfo> {
        self.selected_row()
            .and_then(|row| self.sessions.get(&row.path))
    }

    /// Where the screen shown in the detail pane should come from
    pub fn screen_source(&self) -> Option<PathBuf> {
        match &self.input_mode {
            InputMode::Attached(path) => Some(path.clone()),
            _ => self
                .selected_session()
                .filter(|s| s.hosting_mode == HostingMode::OwnedProcess)
                .map(|s| s.worktree.clone()),
        }
    }

    /// Take pending actions (drains the queue)
    pub fn take_pending_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Handle an action and return whether to quit
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::KeyPress(key) => self.handle_key(key),
            Action::WorktreesUpdated(worktrees) => {
                self.worktrees = worktrees;
                self.rebuild_rows();
                Ok(false)
            }
            Action::Session(event) => {
                self.apply_event(event);
                Ok(false)
            }
            Action::Error(msg) => {
                self.message = Some(msg);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn apply_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Created(info) => {
                self.sessions.insert(info.worktree.clone(), info);
                self.rebuild_rows();
            }
            SessionEvent::StateChanged { worktree, new, .. } => {
                if let Some(info) = self.sessions.get_mut(&worktree) {
                    info.state = new;
                }
            }
            SessionEvent::Destroyed { worktree, .. } => {
                self.sessions.remove(&worktree);
                if self.input_mode == InputMode::Attached(worktree) {
                    self.input_mode = InputMode::Normal;
                }
                self.rebuild_rows();
            }
            SessionEvent::Exit { worktree, .. } => {
                self.message = Some(format!("Agent in {} exited", display_name(&worktree)));
            }
            SessionEvent::Restore { worktree, history, .. } => {
                let bytes: usize = history.iter().map(Vec::len).sum();
                self.message = Some(format!(
                    "Attached to {} ({} bytes of history)",
                    display_name(&worktree),
                    bytes
                ));
            }
            // The emulator already tracks the screen
            SessionEvent::Data { .. } => {}
        }
    }

    fn rebuild_rows(&mut self) {
        let selected = self.selected_path();

        let mut rows: Vec<Row> = self
            .worktrees
            .iter()
            // Sessions are keyed by canonical path
            .map(|wt| Row {
                path: wt.path.canonicalize().unwrap_or_else(|_| wt.path.clone()),
                branch: wt.branch.clone(),
            })
            .collect();
        let mut extra: Vec<&PathBuf> = self
            .sessions
            .keys()
            .filter(|path| !rows.iter().any(|row| &row.path == *path))
            .collect();
        extra.sort();
        rows.extend(extra.into_iter().map(|path| Row {
            path: path.clone(),
            branch: None,
        }));
        self.rows = rows;

        let index = selected
            .and_then(|path| self.rows.iter().position(|row| row.path == path))
            .unwrap_or(0);
        self.list_state
            .select(if self.rows.is_empty() { None } else { Some(index) });
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        // Clear message on any key press
        if self.message.is_some() && self.input_mode == InputMode::Normal {
            self.message = None;
        }

        match self.input_mode.clone() {
            InputMode::Normal => self.handle_normal_key(key),
            InputMode::Attached(path) => self.handle_attached_key(key, path),
            InputMode::Confirming => self.handle_confirming_key(key),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return Ok(key.code == KeyCode::Char('c'));
        }

        let shortcuts = self.shortcuts.clone();
        match key.code {
            KeyCode::Char(c) if c == shortcuts.quit => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.next_row(),
            KeyCode::Char('k') | KeyCode::Up => self.previous_row(),
            KeyCode::Char(c) if c == shortcuts.switch_agent => {
                self.agent = match self.agent {
                    AgentKind::Claude => AgentKind::Gemini,
                    AgentKind::Gemini => AgentKind::Claude,
                };
            }
            KeyCode::Char(c) if c == shortcuts.new_session => {
                if let Some(path) = self.selected_path() {
                    self.pending_actions.push(Action::CreateSession(path, self.agent));
                }
            }
            KeyCode::Char(c) if c == shortcuts.new_pane => {
                if let Some(path) = self.selected_path() {
                    self.pending_actions.push(Action::CreatePane(path, self.agent));
                }
            }
            KeyCode::Char(c) if c == shortcuts.focus => {
                if let Some(path) = self.selected_path() {
                    self.pending_actions.push(Action::FocusPane(path));
                }
            }
            KeyCode::Char(c) if c == shortcuts.destroy => {
                if self.selected_session().is_some() {
                    self.input_mode = InputMode::Confirming;
                }
            }
            KeyCode::Enter => {
                let target = self
                    .selected_session()
                    .map(|s| (s.worktree.clone(), s.hosting_mode));
                match target {
                    Some((path, HostingMode::OwnedProcess)) => {
                        self.pending_actions.push(Action::Attach(path.clone()));
                        self.input_mode = InputMode::Attached(path);
                    }
                    Some((path, HostingMode::MultiplexerPane)) => {
                        self.pending_actions.push(Action::FocusPane(path));
                    }
                    None => {}
                }
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_attached_key(&mut self, key: KeyEvent, path: PathBuf) -> Result<bool> {
        if key.modifiers.contains(KeyModifiers::CONTROL)
            && key.code == KeyCode::Char(self.shortcuts.back)
        {
            self.pending_actions.push(Action::Detach(path));
            self.input_mode = InputMode::Normal;
            return Ok(false);
        }

        if let Some(bytes) = key_to_bytes(key) {
            self.pending_actions.push(Action::SendInput(path, bytes));
        }
        Ok(false)
    }

    fn handle_confirming_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                if let Some(path) = self.selected_path() {
                    self.pending_actions.push(Action::DestroySession(path));
                }
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
            }
            _ => {}
        }
        Ok(false)
    }

    fn next_row(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) if i + 1 < self.rows.len() => i + 1,
            _ => 0,
        };
        self.list_state.select(Some(i));
    }

    fn previous_row(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let i = match self.list_state.selected() {
            Some(0) | None => self.rows.len() - 1,
            Some(i) => i - 1,
        };
        self.list_state.select(Some(i));
    }

    fn state_span(&self, state: Option<SessionState>) -> Span<'static> {
        match state {
            Some(SessionState::Busy) => Span::styled("● ", Style::default().fg(self.theme.warning)),
            Some(SessionState::Idle) => Span::styled("● ", Style::default().fg(self.theme.success)),
            Some(SessionState::WaitingInput) => {
                Span::styled("? ", Style::default().fg(self.theme.accent))
            }
            None => Span::styled("○ ", Style::default().fg(self.theme.dim)),
        }
    }

    fn state_color(&self, state: SessionState) -> Color {
        match state {
            SessionState::Busy => self.theme.warning,
            SessionState::Idle => self.theme.success,
            SessionState::WaitingInput => self.theme.accent,
        }
    }

    pub fn render(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Main content
                Constraint::Length(3), // Footer/status
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0]);
        self.render_main(frame, chunks[1]);
        self.render_footer(frame, chunks[2]);

        if self.input_mode == InputMode::Confirming {
            self.render_confirm_dialog(frame);
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let title = Paragraph::new(Line::from(vec![
            Span::styled(
                " agent-grove ",
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("│ new sessions run {}", self.agent),
                Style::default().fg(self.theme.dim),
            ),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(title, area);
    }

    fn render_main(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(35), // Worktree list
                Constraint::Percentage(65), // Detail pane
            ])
            .split(area);

        self.render_worktree_list(frame, chunks[0]);
        self.render_detail_pane(frame, chunks[1]);
    }

    fn render_worktree_list(&mut self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = if self.rows.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "  No worktrees found.",
                Style::default().fg(self.theme.dim),
            )))]
        } else {
            self.rows
                .iter()
                .map(|row| {
                    let session = self.sessions.get(&row.path);
                    let mut spans = vec![
                        self.state_span(session.map(|s| s.state)),
                        Span::styled(display_name(&row.path), Style::default().fg(self.theme.fg)),
                    ];
                    if let Some(branch) = &row.branch {
                        spans.push(Span::styled(
                            format!(" [{}]", branch),
                            Style::default().fg(self.theme.dim),
                        ));
                    }
                    if session.is_some_and(|s| s.hosting_mode == HostingMode::MultiplexerPane) {
                        spans.push(Span::styled(" ⧉", Style::default().fg(self.theme.dim)));
                    }
                    ListItem::new(Line::from(spans))
                })
                .collect()
        };

        let list = List::new(items)
            .block(
                Block::default()
                    .title(" Worktrees ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::Rgb(50, 50, 50))
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");

        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn render_detail_pane(&mut self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .title(" Session ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(match self.input_mode {
                InputMode::Attached(_) => self.theme.accent,
                _ => self.theme.dim,
            }));
        let inner = block.inner(area);
        self.track_viewport(inner);

        let content: Vec<Line> = match self.selected_session() {
            Some(_) if !self.screen.is_empty() => self
                .screen
                .iter()
                .map(|row| Line::from(Span::styled(row.clone(), Style::default().fg(self.theme.fg))))
                .collect(),
            Some(session) => vec![
                Line::from(vec![
                    Span::styled("Agent: ", Style::default().fg(self.theme.dim)),
                    Span::styled(session.agent_kind.to_string(), Style::default().fg(self.theme.fg)),
                ]),
                Line::from(vec![
                    Span::styled("State: ", Style::default().fg(self.theme.dim)),
                    Span::styled(
                        session.state.to_string(),
                        Style::default().fg(self.state_color(session.state)),
                    ),
                ]),
                Line::from(vec![
                    Span::styled("Pane: ", Style::default().fg(self.theme.dim)),
                    Span::styled(
                        session.pane_id.clone().unwrap_or_else(|| "-".to_string()),
                        Style::default().fg(self.theme.fg),
                    ),
                ]),
                Line::from(vec![
                    Span::styled("Last activity: ", Style::default().fg(self.theme.dim)),
                    Span::styled(
                        session.last_activity.format("%H:%M:%S").to_string(),
                        Style::default().fg(self.theme.fg),
                    ),
                ]),
                Line::from(""),
                Line::from(Span::styled(
                    format!("Press Enter or '{}' to focus the pane", self.shortcuts.focus),
                    Style::default().fg(self.theme.dim),
                )),
            ],
            None => vec![
                Line::from(Span::styled(
                    "No agent in this worktree",
                    Style::default().fg(self.theme.dim),
                )),
                Line::from(""),
                Line::from(Span::styled(
                    format!(
                        "Press '{}' for a session or '{}' for a zellij pane",
                        self.shortcuts.new_session, self.shortcuts.new_pane
                    ),
                    Style::default().fg(self.theme.dim),
                )),
            ],
        };

        frame.render_widget(block, area);
        frame.render_widget(Paragraph::new(content), inner);
    }

    /// Resize the foreground session when the detail pane changes size
    fn track_viewport(&mut self, inner: Rect) {
        let size = TerminalSize {
            cols: inner.width.max(1),
            rows: inner.height.max(1),
        };
        if size == self.viewport {
            return;
        }
        self.viewport = size;
        if let InputMode::Attached(path) = &self.input_mode {
            self.pending_actions
                .push(Action::ResizeSession(path.clone(), size));
        }
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let s = &self.shortcuts;
        let help_text = match self.input_mode {
            InputMode::Attached(_) => format!(" Attached │ Ctrl+{}: Back ", s.back),
            _ => format!(
                " {}: Quit │ j/k: Navigate │ Enter: Open │ {}: Session │ {}: Pane │ {}: Focus │ {}: Destroy │ {}: Agent ",
                s.quit, s.new_session, s.new_pane, s.focus, s.destroy, s.switch_agent
            ),
        };

        let content = match &self.message {
            Some(msg) => Line::from(Span::styled(
                format!(" {} ", msg),
                Style::default().fg(self.theme.warning),
            )),
            None => Line::from(Span::styled(help_text, Style::default().fg(self.theme.dim))),
        };

        let footer = Paragraph::new(content).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(footer, area);
    }

    fn render_confirm_dialog(&self, frame: &mut Frame) {
        let area = centered_rect(50, 20, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" Confirm Destroy ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.error));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let name = self
            .selected_row()
            .map(|row| display_name(&row.path))
            .unwrap_or_else(|| "unknown".to_string());

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(
                format!("Stop the agent in '{}'?", name),
                Style::default().fg(self.theme.fg),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Its process is killed or its pane closed.",
                Style::default().fg(self.theme.warning),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Press 'y' to confirm, 'n' or Esc to cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];

        frame.render_widget(Paragraph::new(text), inner);
    }
}

/// Last path component, for labels
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Encode a key press the way a terminal would send it
pub fn key_to_bytes(key: KeyEvent) -> Option<Vec<u8>> {
    let bytes = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            if !c.is_ascii_alphabetic() {
                return None;
            }
            vec![(c.to_ascii_lowercase() as u8) & 0x1f]
        }
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        _ => return None,
    };
    Some(bytes)
}

/// Helper function to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
