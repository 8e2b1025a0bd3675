//! Process-table inspection used when zellij cannot tell us what a pane is
//! doing. Everything here is approximate; thresholds come from config.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio::task;
use tracing::debug;

use crate::agent::AgentKind;
use crate::config::ProbeConfig;
use crate::error::{GroveError, Result};

/// Snapshots younger than this are reused instead of refreshing again
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// An agent process found in the process table
#[derive(Debug, Clone, PartialEq)]
pub struct AgentProcess {
    pub pid: u32,
    pub kind: AgentKind,
    pub cwd: Option<PathBuf>,
    pub cpu_usage: f32,
    /// Seconds since the epoch
    pub start_time: u64,
    pub open_fds: Option<usize>,
}

struct ProbeState {
    system: System,
    refreshed_at: Option<Instant>,
}

/// Shared, lazily refreshed view of the process table
#[derive(Clone)]
pub struct ProcessProbe {
    state: Arc<Mutex<ProbeState>>,
    config: ProbeConfig,
}

impl ProcessProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProbeState {
                system: System::new(),
                refreshed_at: None,
            })),
            config,
        }
    }

    /// All processes whose invocation mentions a supported agent
    pub async fn agent_processes(&self) -> Result<Vec<AgentProcess>> {
        let state = Arc::clone(&self.state);
        let want_fds = self.config.open_fd_threshold.is_some();
        task::spawn_blocking(move || {
            let mut state = state
                .lock()
                .map_err(|_| GroveError::ProbeFailure("process probe lock poisoned".into()))?;
            refresh_if_stale(&mut state);
            Ok(collect_agents(&state.system, want_fds))
        })
        .await
        .map_err(|e| GroveError::ProbeFailure(format!("process scan task failed: {}", e)))?
    }

    /// Agent processes of `kind` running with `worktree` as their cwd
    pub async fn agents_in(&self, worktree: &Path, kind: AgentKind) -> Result<Vec<AgentProcess>> {
        let target = canonical(worktree);
        Ok(self
            .agent_processes()
            .await?
            .into_iter()
            .filter(|p| p.kind == kind && p.cwd.as_deref().map(canonical) == Some(target.clone()))
            .collect())
    }

    /// Whether an agent process looks like it is doing work right now
    pub fn looks_active(&self, process: &AgentProcess, now_secs: u64) -> bool {
        if process.cpu_usage >= self.config.cpu_threshold {
            return true;
        }
        if now_secs.saturating_sub(process.start_time) < self.config.recent_start_secs {
            return true;
        }
        match (self.config.open_fd_threshold, process.open_fds) {
            (Some(limit), Some(open)) => open > limit,
            _ => false,
        }
    }
}

fn refresh_if_stale(state: &mut ProbeState) {
    let fresh = state
        .refreshed_at
        .is_some_and(|at| at.elapsed() < MIN_REFRESH_INTERVAL);
    if fresh {
        return;
    }

    let refresh = ProcessRefreshKind::nothing()
        .with_cpu()
        .with_cmd(UpdateKind::OnlyIfNotSet)
        .with_cwd(UpdateKind::OnlyIfNotSet);
    let count = state
        .system
        .refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);
    state.refreshed_at = Some(Instant::now());
    debug!(processes = count, "Refreshed process table");
}

fn collect_agents(system: &System, want_fds: bool) -> Vec<AgentProcess> {
    let own_pid = sysinfo::get_current_pid().ok();
    let mut found = Vec::new();

    for (pid, process) in system.processes() {
        if Some(*pid) == own_pid {
            continue;
        }
        let invocation = process
            .cmd()
            .iter()
            .map(|s| s.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let invocation = if invocation.is_empty() {
            process.name().to_string_lossy().to_string()
        } else {
            invocation
        };

        let Some(kind) = AgentKind::ALL.into_iter().find(|k| k.mentioned_in(&invocation)) else {
            continue;
        };

        found.push(AgentProcess {
            pid: pid.as_u32(),
            kind,
            cwd: process.cwd().map(Path::to_path_buf),
            cpu_usage: process.cpu_usage(),
            start_time: process.start_time(),
            open_fds: if want_fds { open_fd_count(*pid) } else { None },
        });
    }

    found.sort_by_key(|p| p.pid);
    found
}

#[cfg(target_os = "linux")]
fn open_fd_count(pid: Pid) -> Option<usize> {
    std::fs::read_dir(format!("/proc/{}/fd", pid.as_u32()))
        .ok()
        .map(|entries| entries.count())
}

#[cfg(not(target_os = "linux"))]
fn open_fd_count(_pid: Pid) -> Option<usize> {
    None
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
