use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the session engine and its collaborators
#[derive(Debug, Error)]
pub enum GroveError {
    /// An agent or multiplexer binary could not be found in PATH
    #[error("command '{0}' is not available in PATH")]
    CommandUnavailable(String),

    /// A multiplexer operation was attempted outside a zellij session
    #[error("not running inside a zellij session")]
    NotInsideHostSession,

    #[error("no pane found for worktree {}", .0.display())]
    PaneNotFound(PathBuf),

    /// The layout dump could not be obtained or parsed
    #[error("failed to read zellij layout: {0}")]
    LayoutParseFailure(String),

    #[error("failed to spawn process: {0}")]
    ProcessSpawnFailure(String),

    #[error("status hook failed: {0}")]
    HookExecutionFailure(String),

    /// A reconciliation probe for a single session failed
    #[error("probe failed: {0}")]
    ProbeFailure(String),

    #[error("multiplexer command failed: {0}")]
    MultiplexerCommand(String),

    #[error("no session for worktree {}", .0.display())]
    SessionNotFound(PathBuf),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GroveError>;
