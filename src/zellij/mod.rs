mod client;
mod layout;
mod probe;
#[cfg(test)]
pub(crate) mod test_support;

pub use client::{ClosePanesReport, PaneClose, ZellijClient};
pub use layout::{navigation_plan, parse_layout, FocusDirection, LayoutScan, NavigationPlan};
pub use probe::{AgentProcess, ProcessProbe};

use std::path::PathBuf;

use crate::agent::AgentKind;

/// Focus index of records whose position in the layout is unknown
pub const UNKNOWN_FOCUS_INDEX: i32 = -1;

/// One agent-bearing pane reported by zellij
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneRecord {
    /// Identifier reported by zellij (or the agent's pid for records from
    /// the process table). `None` when the dump carries no id; the focus
    /// index is only a position and must not stand in for one.
    pub pane_id: Option<String>,
    pub cwd: PathBuf,
    pub command: String,
    pub agent_kind: AgentKind,
    /// Position among all command-bearing panes, or [`UNKNOWN_FOCUS_INDEX`]
    pub focus_index: i32,
}

impl PaneRecord {
    pub fn has_focus_index(&self) -> bool {
        self.focus_index >= 0
    }
}

/// The pane zellij currently has focused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusedPane {
    pub cwd: PathBuf,
    pub focus_index: i32,
}
