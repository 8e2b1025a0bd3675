//! Parser for `zellij action dump-layout` output.
//!
//! The dump is KDL, but we only need a handful of attributes, so it is read
//! line by line without building a tree. Fields may come and go between
//! zellij versions; anything missing is simply skipped.

use std::path::{Path, PathBuf};

use super::{FocusedPane, PaneRecord};
use crate::agent::AgentKind;

/// Result of a single pass over a layout dump
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutScan {
    /// Agent panes only, in layout order
    pub panes: Vec<PaneRecord>,
    pub focused: Option<FocusedPane>,
    /// Number of command-bearing panes seen, agents or not
    pub command_panes: usize,
}

/// Scan a layout dump.
///
/// The focus index counts every pane carrying a `command=` attribute, even
/// ones that are filtered out, so it matches the order zellij cycles through
/// with focus-next-pane.
pub fn parse_layout(layout: &str) -> LayoutScan {
    let mut scan = LayoutScan::default();
    let mut context_cwd: Option<PathBuf> = None;
    let mut focus_index: i32 = 0;
    let mut saw_tab = false;
    let mut tab_focused = false;
    let mut fallback_focus: Option<FocusedPane> = None;
    // A shell pane whose args may turn out to exec an agent
    let mut pending_shell: Option<PaneRecord> = None;

    for line in layout.lines() {
        let trimmed = line.trim();

        if let Some(mut shell) = pending_shell.take() {
            if let Some(kind) = trimmed.strip_prefix("args").and_then(exec_target) {
                shell.agent_kind = kind;
                scan.panes.push(shell);
                continue;
            }
        }

        if let Some(cwd) = bare_cwd_value(trimmed) {
            context_cwd = Some(resolve_cwd(context_cwd.as_deref(), &cwd));
            continue;
        }

        if is_decl(trimmed, "tab") {
            saw_tab = true;
            tab_focused = has_flag(trimmed, "focus");
            continue;
        }

        if !is_decl(trimmed, "pane") {
            continue;
        }
        let Some(command) = extract_attr(trimmed, "command") else {
            continue;
        };

        let index = focus_index;
        focus_index += 1;
        scan.command_panes += 1;

        let cwd = match extract_attr(trimmed, "cwd") {
            Some(own) => resolve_cwd(context_cwd.as_deref(), &own),
            None => match context_cwd.clone() {
                Some(cwd) => cwd,
                None => PathBuf::new(),
            },
        };

        if has_flag(trimmed, "focus") {
            let focused = FocusedPane {
                cwd: cwd.clone(),
                focus_index: index,
            };
            if !saw_tab || tab_focused {
                if scan.focused.is_none() {
                    scan.focused = Some(focused);
                }
            } else if fallback_focus.is_none() {
                fallback_focus = Some(focused);
            }
        }

        let pane_id = extract_attr(trimmed, "pane_id").or_else(|| extract_attr(trimmed, "id"));

        match AgentKind::from_command(&command) {
            Some(agent_kind) => scan.panes.push(PaneRecord {
                pane_id,
                cwd,
                command,
                agent_kind,
                focus_index: index,
            }),
            None if trimmed.ends_with('{') => {
                pending_shell = Some(PaneRecord {
                    pane_id,
                    cwd,
                    command,
                    agent_kind: AgentKind::default(),
                    focus_index: index,
                });
            }
            None => {}
        }
    }

    if scan.focused.is_none() {
        scan.focused = fallback_focus;
    }

    scan
}

/// Resolve a possibly relative cwd against the tracked context
fn resolve_cwd(context: Option<&Path>, cwd: &str) -> PathBuf {
    let path = PathBuf::from(cwd);
    if path.is_absolute() {
        return path;
    }
    match context {
        Some(base) => base.join(path),
        None => path,
    }
}

fn is_decl(trimmed: &str, keyword: &str) -> bool {
    match trimmed.strip_prefix(keyword) {
        Some(rest) => rest.is_empty() || rest.starts_with([' ', '\t', '{']),
        None => false,
    }
}

/// Value of a standalone `cwd "..."` node
fn bare_cwd_value(trimmed: &str) -> Option<String> {
    let rest = trimmed.strip_prefix("cwd")?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    let value = &rest[..end];
    (!value.is_empty()).then(|| value.to_string())
}

/// Value of an `attr="..."` property, matched on a word boundary
fn extract_attr(line: &str, attr: &str) -> Option<String> {
    let needle = format!("{attr}=\"");
    let mut search_from = 0;
    while let Some(offset) = line[search_from..].find(&needle) {
        let start = search_from + offset;
        let at_boundary = start == 0
            || line[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_whitespace());
        let value_start = start + needle.len();
        if at_boundary {
            let tail = &line[value_start..];
            let end = tail.find('"')?;
            let value = tail[..end].trim();
            return (!value.is_empty()).then(|| value.to_string());
        }
        search_from = value_start;
    }
    None
}

/// Agent started by a `... exec <agent>` shell script in an `args` node
fn exec_target(args: &str) -> Option<AgentKind> {
    let (_, after) = args.rsplit_once("exec ")?;
    let program = after
        .split_whitespace()
        .next()?
        .trim_matches(|c| c == '"' || c == '\'' || c == ';');
    AgentKind::from_command(program)
}

fn has_flag(line: &str, attr: &str) -> bool {
    line.split_whitespace()
        .any(|word| word.trim_end_matches('{') == format!("{attr}=true"))
}

/// Direction of a single zellij focus move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusDirection {
    Next,
    Previous,
}

impl FocusDirection {
    pub fn action(&self) -> &'static str {
        match self {
            FocusDirection::Next => "focus-next-pane",
            FocusDirection::Previous => "focus-previous-pane",
        }
    }
}

/// Focus moves needed to get from one pane to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationPlan {
    pub direction: Option<FocusDirection>,
    pub steps: usize,
}

impl NavigationPlan {
    pub fn actions(&self) -> impl Iterator<Item = FocusDirection> + '_ {
        self.direction
            .into_iter()
            .flat_map(move |dir| std::iter::repeat(dir).take(self.steps))
    }
}

pub fn navigation_plan(current: i32, target: i32) -> NavigationPlan {
    let delta = target - current;
    let direction = match delta.signum() {
        1 => Some(FocusDirection::Next),
        -1 => Some(FocusDirection::Previous),
        _ => None,
    };
    NavigationPlan {
        direction,
        steps: delta.unsigned_abs() as usize,
    }
}
