//! Status hooks: user commands run when a session changes state.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::StatusHooks;
use crate::error::{GroveError, Result};
use crate::session::SessionState;
use crate::worktree::WorktreeService;

const UNKNOWN_BRANCH: &str = "unknown";

/// The session a hook fires for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub session_id: String,
    pub worktree: PathBuf,
}

/// Runs configured hook commands without blocking the caller
#[derive(Debug, Clone)]
pub struct HookDispatcher {
    hooks: StatusHooks,
    worktrees: WorktreeService,
}

impl HookDispatcher {
    pub fn new(hooks: StatusHooks, worktrees: WorktreeService) -> Self {
        Self { hooks, worktrees }
    }

    /// Fire the hook for `new`, if one is configured and enabled.
    ///
    /// Must be called from within a tokio runtime. Failures are logged by the
    /// spawned task and never reported back.
    pub fn dispatch(
        &self,
        old: SessionState,
        new: SessionState,
        context: HookContext,
    ) -> Option<JoinHandle<()>> {
        let hook = self.hooks.for_state(new)?;
        if !hook.enabled || hook.command.trim().is_empty() {
            return None;
        }

        let command = hook.command.clone();
        let worktrees = self.worktrees.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_hook(&command, old, new, &context, &worktrees).await {
                error!(
                    session_id = %context.session_id,
                    worktree = %context.worktree.display(),
                    error = %e,
                    "Status hook failed"
                );
            }
        }))
    }
}

async fn run_hook(
    command: &str,
    old: SessionState,
    new: SessionState,
    context: &HookContext,
    worktrees: &WorktreeService,
) -> Result<()> {
    let branch = worktrees
        .branch_for_path(&context.worktree)
        .await
        .unwrap_or_else(|| UNKNOWN_BRANCH.to_string());

    debug!(%command, %old, %new, %branch, "Running status hook");
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&context.worktree)
        .env("GROVE_OLD_STATE", old.as_str())
        .env("GROVE_NEW_STATE", new.as_str())
        .env("GROVE_WORKTREE_PATH", &context.worktree)
        .env("GROVE_WORKTREE_BRANCH", &branch)
        .env("GROVE_SESSION_ID", &context.session_id)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| GroveError::HookExecutionFailure(format!("{}: {}", command, e)))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(GroveError::HookExecutionFailure(format!(
            "{} exited with {}: {}",
            command,
            output.status,
            stderr.trim()
        )));
    }
    if !stderr.trim().is_empty() {
        warn!(%command, stderr = %stderr.trim(), "Status hook wrote to stderr");
    }

    Ok(())
}
