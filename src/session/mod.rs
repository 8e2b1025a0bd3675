mod heuristics;
mod history;
mod manager;
mod pty;

pub use heuristics::{
    recent_lines, strip_control_sequences, SessionState, StateInferenceEngine, STATE_WINDOW_LINES,
};
pub use history::{OutputHistory, MAX_HISTORY_BYTES};
pub use manager::SessionManager;
pub use pty::TerminalSize;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentKind;

/// How a session's agent process is hosted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostingMode {
    /// We own the PTY and the process
    OwnedProcess,
    /// zellij owns the pane; we only observe it
    MultiplexerPane,
}

/// Point-in-time view of a session, safe to hand to the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub worktree: PathBuf,
    pub agent_kind: AgentKind,
    pub hosting_mode: HostingMode,
    pub state: SessionState,
    pub last_activity: DateTime<Utc>,
    pub is_foreground: bool,
    /// Process id of an owned agent
    pub pid: Option<u32>,
    /// zellij pane identifier of a multiplexer session, when known
    pub pane_id: Option<String>,
    pub history_bytes: usize,
}

/// Lifecycle notifications published to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Created(SessionInfo),
    Destroyed {
        session_id: String,
        worktree: PathBuf,
    },
    /// The hosted process ended on its own; the session is gone
    Exit {
        session_id: String,
        worktree: PathBuf,
    },
    /// Raw output, only while the session is in the foreground
    Data {
        session_id: String,
        worktree: PathBuf,
        bytes: Vec<u8>,
    },
    StateChanged {
        session_id: String,
        worktree: PathBuf,
        old: SessionState,
        new: SessionState,
    },
    /// Full retained history, sent when a session returns to the foreground
    Restore {
        session_id: String,
        worktree: PathBuf,
        history: Vec<Vec<u8>>,
    },
}

impl SessionEvent {
    pub fn worktree(&self) -> &std::path::Path {
        match self {
            SessionEvent::Created(info) => &info.worktree,
            SessionEvent::Destroyed { worktree, .. }
            | SessionEvent::Exit { worktree, .. }
            | SessionEvent::Data { worktree, .. }
            | SessionEvent::StateChanged { worktree, .. }
            | SessionEvent::Restore { worktree, .. } => worktree,
        }
    }
}
