//! Run AI coding agents side by side, one per git worktree.
//!
//! Agents are either owned PTY processes or zellij panes; either way the
//! [`SessionManager`] tracks whether each one is idle, busy or waiting for
//! input and fires the configured status hooks on every change.

pub mod agent;
pub mod config;
pub mod error;
pub mod hooks;
pub mod session;
pub mod worktree;
pub mod zellij;

pub use agent::AgentKind;
pub use config::Config;
pub use error::{GroveError, Result};
pub use session::{HostingMode, SessionEvent, SessionInfo, SessionManager, SessionState, TerminalSize};
pub use worktree::{Worktree, WorktreeService};
pub use zellij::ZellijClient;
