use std::path::PathBuf;

use crossterm::event::KeyEvent;

use agent_grove::{AgentKind, SessionEvent, TerminalSize, Worktree};

/// Actions that can be dispatched through the application
#[derive(Debug, Clone)]
pub enum Action {
    /// A key was pressed
    KeyPress(KeyEvent),
    /// Worktrees were re-read from git
    WorktreesUpdated(Vec<Worktree>),
    /// Something happened to a session
    Session(SessionEvent),
    /// An error occurred
    Error(String),
    /// Start an owned agent in a worktree
    CreateSession(PathBuf, AgentKind),
    /// Open a zellij pane running an agent in a worktree
    CreatePane(PathBuf, AgentKind),
    /// Destroy the session of a worktree, closing its pane if it has one
    DestroySession(PathBuf),
    /// Move zellij focus to a worktree's pane
    FocusPane(PathBuf),
    /// Bring an owned session to the foreground and forward keys to it
    Attach(PathBuf),
    /// Leave the foreground session
    Detach(PathBuf),
    /// Keystrokes for the foreground session
    SendInput(PathBuf, Vec<u8>),
    /// The session viewport changed size
    ResizeSession(PathBuf, TerminalSize),
}
