use serde::{Deserialize, Serialize};

/// The external coding agents a session can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    #[default]
    Claude,
    Gemini,
}

impl AgentKind {
    pub const ALL: [AgentKind; 2] = [AgentKind::Claude, AgentKind::Gemini];

    /// Default executable name for this agent
    pub fn command(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Gemini => "gemini",
        }
    }

    /// Environment variable holding extra arguments for this agent
    pub fn args_env_var(&self) -> &'static str {
        match self {
            AgentKind::Claude => "GROVE_CLAUDE_ARGS",
            AgentKind::Gemini => "GROVE_GEMINI_ARGS",
        }
    }

    /// Match a command line (or bare program name) against the known agents
    pub fn from_command(command: &str) -> Option<AgentKind> {
        let program = command.split_whitespace().next()?;
        let name = program.rsplit('/').next().unwrap_or(program);
        Self::ALL.into_iter().find(|kind| kind.command() == name)
    }

    /// Whether a full process invocation mentions this agent anywhere
    pub fn mentioned_in(&self, invocation: &str) -> bool {
        invocation
            .split_whitespace()
            .any(|word| word.rsplit('/').next() == Some(self.command()))
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_command() {
        assert_eq!(AgentKind::from_command("claude"), Some(AgentKind::Claude));
        assert_eq!(AgentKind::from_command("/usr/local/bin/gemini --yolo"), Some(AgentKind::Gemini));
        assert_eq!(AgentKind::from_command("lazygit"), None);
        assert_eq!(AgentKind::from_command(""), None);
    }

    #[test]
    fn test_mentioned_in() {
        assert!(AgentKind::Claude.mentioned_in("node /opt/homebrew/bin/claude --resume"));
        assert!(!AgentKind::Claude.mentioned_in("vim claude-notes.md"));
        assert!(AgentKind::Gemini.mentioned_in("gemini"));
    }
}
