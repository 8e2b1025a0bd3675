use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::layout::{navigation_plan, parse_layout, LayoutScan};
use super::probe::ProcessProbe;
use super::{FocusedPane, PaneRecord, UNKNOWN_FOCUS_INDEX};
use crate::agent::AgentKind;
use crate::config::{Config, PaneStrategy};
use crate::error::{GroveError, Result};

/// Outcome of closing the pane of a single worktree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneClose {
    Closed,
    /// The worktree had no pane; nothing was done
    NothingToClose,
}

/// Outcome of closing the panes of several worktrees
#[derive(Debug, Default)]
pub struct ClosePanesReport {
    pub closed: usize,
    pub errors: Vec<(PathBuf, GroveError)>,
}

impl ClosePanesReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Client for driving zellij via its CLI
#[derive(Clone)]
pub struct ZellijClient {
    /// Path to zellij binary
    zellij_path: String,
    settle_delay: Duration,
    config: Arc<Config>,
    probe: ProcessProbe,
    /// Overrides the `ZELLIJ` environment check
    inside_host: Option<bool>,
}

impl ZellijClient {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            zellij_path: config.zellij.binary.clone(),
            settle_delay: config.zellij.settle_delay(),
            probe: ProcessProbe::new(config.probe.clone()),
            config,
            inside_host: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn assume_inside(mut self, inside: bool) -> Self {
        self.inside_host = Some(inside);
        self
    }

    /// Check if the zellij binary is on PATH
    pub fn is_available(&self) -> bool {
        which::which(&self.zellij_path).is_ok()
    }

    /// Check if we are running inside a zellij session
    pub fn is_inside_host_session(&self) -> bool {
        self.inside_host
            .unwrap_or_else(|| std::env::var_os("ZELLIJ").is_some())
    }

    /// Run `zellij action <args>` and return its stdout
    async fn action(&self, args: &[&str]) -> Result<String> {
        debug!(?args, "zellij action");
        let output = Command::new(&self.zellij_path)
            .arg("action")
            .args(args)
            .output()
            .await
            .map_err(|e| GroveError::MultiplexerCommand(format!("{}: {}", args.join(" "), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GroveError::MultiplexerCommand(format!(
                "{} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn scan_layout(&self) -> Result<LayoutScan> {
        let layout = self
            .action(&["dump-layout"])
            .await
            .map_err(|e| GroveError::LayoutParseFailure(e.to_string()))?;
        if layout.trim().is_empty() {
            return Err(GroveError::LayoutParseFailure("empty layout dump".into()));
        }
        Ok(parse_layout(&layout))
    }

    /// List all agent panes.
    ///
    /// Falls back to scanning the process table when the layout cannot be
    /// read; those records carry no usable focus index.
    pub async fn list_panes(&self) -> Result<Vec<PaneRecord>> {
        match self.scan_layout().await {
            Ok(scan) => Ok(scan.panes),
            Err(e) => {
                warn!(error = %e, "Layout dump unavailable, scanning processes instead");
                self.panes_from_processes().await
            }
        }
    }

    async fn panes_from_processes(&self) -> Result<Vec<PaneRecord>> {
        let processes = self.probe.agent_processes().await?;
        Ok(processes
            .into_iter()
            .filter_map(|p| {
                let cwd = p.cwd?;
                Some(PaneRecord {
                    pane_id: Some(format!("pid-{}", p.pid)),
                    cwd,
                    command: p.kind.command().to_string(),
                    agent_kind: p.kind,
                    focus_index: UNKNOWN_FOCUS_INDEX,
                })
            })
            .collect())
    }

    /// Find the agent pane whose cwd is `path`
    pub async fn find_pane_for_worktree(&self, path: &Path) -> Result<Option<PaneRecord>> {
        let target = canonical(path);
        let panes = self.list_panes().await?;
        Ok(panes.into_iter().find(|pane| canonical(&pane.cwd) == target))
    }

    pub async fn get_current_focused_pane(&self) -> Result<Option<FocusedPane>> {
        Ok(self.scan_layout().await?.focused)
    }

    /// Move zellij focus to the pane running in `target_path`
    pub async fn focus_pane(&self, target_path: &Path) -> Result<()> {
        self.ensure_inside()?;

        let target = self
            .find_pane_for_worktree(target_path)
            .await?
            .ok_or_else(|| GroveError::PaneNotFound(target_path.to_path_buf()))?;
        if !target.has_focus_index() {
            return Err(GroveError::LayoutParseFailure(
                "pane position unknown, cannot navigate".into(),
            ));
        }

        let current = self.get_current_focused_pane().await?.ok_or_else(|| {
            GroveError::LayoutParseFailure("layout has no focused pane".into())
        })?;

        let plan = navigation_plan(current.focus_index, target.focus_index);
        debug!(
            from = current.focus_index,
            to = target.focus_index,
            steps = plan.steps,
            "Navigating panes"
        );

        for (i, direction) in plan.actions().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settle_delay).await;
            }
            self.action(&[direction.action()]).await?;
        }

        Ok(())
    }

    /// Open a new pane in `path` running the agent
    pub async fn create_pane(&self, path: &Path, label: &str, kind: AgentKind) -> Result<()> {
        self.ensure_inside()?;
        if !self.is_available() {
            return Err(GroveError::CommandUnavailable(self.zellij_path.clone()));
        }

        let (command, args) = self.config.agent_invocation(kind);
        if which::which(&command).is_err() {
            return Err(GroveError::CommandUnavailable(command));
        }
        let agent_line = std::iter::once(command.as_str())
            .chain(args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ");
        let cwd = path.to_string_lossy().to_string();

        match self.config.zellij.pane_strategy {
            PaneStrategy::OneShot => {
                let script = format!(
                    "echo {}; exec {}",
                    shell_quote(&format!("== {} ({}) ==", label, kind)),
                    agent_line
                );
                self.action(&[
                    "new-pane",
                    "--cwd",
                    cwd.as_str(),
                    "--name",
                    label,
                    "--",
                    "sh",
                    "-c",
                    script.as_str(),
                ])
                .await?;
            }
            PaneStrategy::Scripted => {
                self.action(&["new-pane", "--cwd", cwd.as_str(), "--name", label])
                    .await?;
                tokio::time::sleep(self.settle_delay).await;

                let lines = [format!("cd {}", shell_quote(&cwd)), agent_line];
                for (i, line) in lines.iter().enumerate() {
                    if i > 0 {
                        tokio::time::sleep(self.settle_delay).await;
                    }
                    self.action(&["write-chars", line.as_str()]).await?;
                    self.action(&["write", "13"]).await?;
                }
            }
        }

        info!(worktree = %path.display(), %kind, "Created zellij pane");
        Ok(())
    }

    /// Close the pane of a worktree.
    ///
    /// zellij can only close the focused pane, so the target is focused first.
    pub async fn close_pane_for_worktree(&self, path: &Path) -> Result<PaneClose> {
        self.ensure_inside()?;
        if self.find_pane_for_worktree(path).await?.is_none() {
            return Ok(PaneClose::NothingToClose);
        }

        self.focus_pane(path).await?;
        self.action(&["close-pane"]).await?;
        info!(worktree = %path.display(), "Closed zellij pane");
        Ok(PaneClose::Closed)
    }

    pub async fn close_panes_for_worktrees(&self, paths: &[PathBuf]) -> ClosePanesReport {
        let mut report = ClosePanesReport::default();
        for path in paths {
            match self.close_pane_for_worktree(path).await {
                Ok(PaneClose::Closed) => report.closed += 1,
                Ok(PaneClose::NothingToClose) | Err(GroveError::PaneNotFound(_)) => {}
                Err(e) => report.errors.push((path.clone(), e)),
            }
        }
        report
    }

    /// Whether the agent in `path` appears to be working
    pub async fn is_pane_active(&self, path: &Path, kind: AgentKind) -> Result<bool> {
        let processes = self.probe.agents_in(path, kind).await?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(processes.iter().any(|p| self.probe.looks_active(p, now)))
    }

    /// Whether any agent process of `kind` still runs in `path`
    pub async fn agent_process_exists(&self, path: &Path, kind: AgentKind) -> Result<bool> {
        Ok(!self.probe.agents_in(path, kind).await?.is_empty())
    }

    fn ensure_inside(&self) -> Result<()> {
        if self.is_inside_host_session() {
            Ok(())
        } else {
            Err(GroveError::NotInsideHostSession)
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Quote a word for `sh`, leaving plain words untouched
fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
