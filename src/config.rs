//! Persisted settings: status hooks, agent arguments, shortcuts and the
//! polling constants used by the reconciliation heuristics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::AgentKind;
use crate::error::{GroveError, Result};
use crate::session::SessionState;

/// A shell command run when a session enters a given state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHook {
    pub command: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusHooks {
    pub idle: Option<StatusHook>,
    pub busy: Option<StatusHook>,
    pub waiting_input: Option<StatusHook>,
}

impl StatusHooks {
    pub fn for_state(&self, state: SessionState) -> Option<&StatusHook> {
        match state {
            SessionState::Idle => self.idle.as_ref(),
            SessionState::Busy => self.busy.as_ref(),
            SessionState::WaitingInput => self.waiting_input.as_ref(),
        }
    }
}

/// Executable and extra arguments for one agent; an empty command means the
/// agent's default executable name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentCommand {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentCommands {
    pub claude: AgentCommand,
    pub gemini: AgentCommand,
}

impl Default for AgentCommands {
    fn default() -> Self {
        Self {
            claude: AgentCommand {
                command: AgentKind::Claude.command().to_string(),
                args: Vec::new(),
            },
            gemini: AgentCommand {
                command: AgentKind::Gemini.command().to_string(),
                args: Vec::new(),
            },
        }
    }
}

impl AgentCommands {
    pub fn get(&self, kind: AgentKind) -> &AgentCommand {
        match kind {
            AgentKind::Claude => &self.claude,
            AgentKind::Gemini => &self.gemini,
        }
    }

    pub fn get_mut(&mut self, kind: AgentKind) -> &mut AgentCommand {
        match kind {
            AgentKind::Claude => &mut self.claude,
            AgentKind::Gemini => &mut self.gemini,
        }
    }
}

/// Dashboard key bindings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Shortcuts {
    pub new_session: char,
    pub new_pane: char,
    pub destroy: char,
    pub focus: char,
    pub switch_agent: char,
    pub quit: char,
    /// Combined with Ctrl to leave an attached session
    pub back: char,
}

impl Default for Shortcuts {
    fn default() -> Self {
        Self {
            new_session: 'n',
            new_pane: 'z',
            destroy: 'd',
            focus: 'f',
            switch_agent: 'a',
            quit: 'q',
            back: 'e',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub state_interval_ms: u64,
    pub multiplexer_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            state_interval_ms: 100,
            multiplexer_interval_ms: 2000,
        }
    }
}

impl PollingConfig {
    pub fn state_interval(&self) -> Duration {
        Duration::from_millis(self.state_interval_ms.max(1))
    }

    pub fn multiplexer_interval(&self) -> Duration {
        Duration::from_millis(self.multiplexer_interval_ms.max(1))
    }
}

/// Thresholds for the process-based pane activity heuristic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// CPU percentage above which an agent process counts as working
    pub cpu_threshold: f32,
    /// Processes younger than this are treated as still starting up
    pub recent_start_secs: u64,
    /// Open descriptor count above which a process counts as working
    pub open_fd_threshold: Option<usize>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 5.0,
            recent_start_secs: 10,
            open_fd_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaneStrategy {
    /// Spawn the pane with a shell that prints a banner and execs the agent
    #[default]
    OneShot,
    /// Open a bare pane and type the commands into it
    Scripted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZellijConfig {
    pub binary: String,
    pub settle_delay_ms: u64,
    pub pane_strategy: PaneStrategy,
}

impl Default for ZellijConfig {
    fn default() -> Self {
        Self {
            binary: "zellij".to_string(),
            settle_delay_ms: 100,
            pane_strategy: PaneStrategy::default(),
        }
    }
}

impl ZellijConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub status_hooks: StatusHooks,
    pub agents: AgentCommands,
    pub shortcuts: Shortcuts,
    pub polling: PollingConfig,
    pub probe: ProbeConfig,
    pub zellij: ZellijConfig,
}

impl Config {
    /// Default location: `<config dir>/agent-grove/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("agent-grove").join("config.json"))
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| GroveError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| GroveError::Config(e.to_string()))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Executable and arguments for an agent, honouring the
    /// `GROVE_<AGENT>_ARGS` environment override
    pub fn agent_invocation(&self, kind: AgentKind) -> (String, Vec<String>) {
        let env: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key == kind.args_env_var())
            .collect();
        self.agent_invocation_with_env(kind, &env)
    }

    fn agent_invocation_with_env(
        &self,
        kind: AgentKind,
        env: &HashMap<String, String>,
    ) -> (String, Vec<String>) {
        let agent = self.agents.get(kind);
        let command = if agent.command.trim().is_empty() {
            kind.command().to_string()
        } else {
            agent.command.clone()
        };

        let args = match env.get(kind.args_env_var()) {
            Some(value) => {
                let args: Vec<String> = value.split_whitespace().map(str::to_string).collect();
                if args.is_empty() {
                    warn!(var = kind.args_env_var(), "Ignoring empty argument override");
                    agent.args.clone()
                } else {
                    args
                }
            }
            None => agent.args.clone(),
        };

        (command, args)
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("missing.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.polling.state_interval(), Duration::from_millis(100));
        assert_eq!(config.polling.multiplexer_interval(), Duration::from_millis(2000));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "status_hooks": {
                    "waiting_input": { "command": "notify-send waiting" },
                    "idle": { "command": "say done", "enabled": false }
                },
                "agents": { "claude": { "args": ["--model", "opus"] } },
                "probe": { "cpu_threshold": 12.5 }
            }"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        let waiting = config.status_hooks.for_state(SessionState::WaitingInput).unwrap();
        assert_eq!(waiting.command, "notify-send waiting");
        assert!(waiting.enabled);
        assert!(!config.status_hooks.for_state(SessionState::Idle).unwrap().enabled);
        assert!(config.status_hooks.for_state(SessionState::Busy).is_none());
        assert_eq!(config.agents.claude.args, vec!["--model", "opus"]);
        assert_eq!(config.agents.gemini.command, "gemini");
        assert_eq!(config.probe.cpu_threshold, 12.5);
        assert_eq!(config.probe.recent_start_secs, 10);
        assert_eq!(config.shortcuts.quit, 'q');
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load_from(&path), Err(GroveError::Config(_))));
    }

    #[test]
    fn test_save_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.zellij.pane_strategy = PaneStrategy::Scripted;
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_env_override_replaces_configured_args() {
        let mut config = Config::default();
        config.agents.get_mut(AgentKind::Gemini).args = vec!["--sandbox".to_string()];

        let env = HashMap::new();
        let (command, args) = config.agent_invocation_with_env(AgentKind::Gemini, &env);
        assert_eq!(command, "gemini");
        assert_eq!(args, vec!["--sandbox"]);

        let env = HashMap::from([("GROVE_GEMINI_ARGS".to_string(), "-y  --debug".to_string())]);
        let (_, args) = config.agent_invocation_with_env(AgentKind::Gemini, &env);
        assert_eq!(args, vec!["-y", "--debug"]);
    }
}
