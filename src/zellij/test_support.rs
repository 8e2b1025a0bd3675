//! A stand-in `zellij` executable for exercising the CLI adapter.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use super::ZellijClient;
use crate::config::{AgentCommand, Config};

/// Shell script that appends its arguments to `calls.log` and answers
/// `action dump-layout` with the contents of `layout.kdl`, failing when
/// that file does not exist
pub(crate) struct FakeZellij {
    dir: TempDir,
}

impl FakeZellij {
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "#!/bin/sh\n\
             printf '%s\\n' \"$*\" >> '{log}'\n\
             if [ \"$2\" = dump-layout ]; then\n\
             \x20 cat '{layout}' 2>/dev/null || exit 1\n\
             fi\n",
            log = dir.path().join("calls.log").display(),
            layout = dir.path().join("layout.kdl").display(),
        );
        let binary = dir.path().join("zellij");
        fs::write(&binary, script).unwrap();
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir }
    }

    pub(crate) fn binary(&self) -> PathBuf {
        self.dir.path().join("zellij")
    }

    pub(crate) fn set_layout(&self, layout: &str) {
        fs::write(self.dir.path().join("layout.kdl"), layout).unwrap();
    }

    /// Every `zellij action` issued so far except layout dumps, in order
    pub(crate) fn actions(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.strip_prefix("action "))
            .filter(|line| *line != "dump-layout")
            .map(str::to_string)
            .collect()
    }

    /// Config pointing at this binary, with no settle delay and `sh` as
    /// the claude command so agent lookup succeeds
    pub(crate) fn config(&self) -> Config {
        let mut config = Config::default();
        config.zellij.binary = self.binary().to_string_lossy().into_owned();
        config.zellij.settle_delay_ms = 0;
        config.agents.claude = AgentCommand {
            command: "sh".to_string(),
            args: Vec::new(),
        };
        config
    }

    pub(crate) fn client(&self, config: Config) -> ZellijClient {
        ZellijClient::new(Arc::new(config)).assume_inside(true)
    }
}

/// One `pane` line per cwd, each running claude, with focus on `focused`
pub(crate) fn claude_layout(cwds: &[&Path], focused: Option<usize>) -> String {
    let mut layout = String::from("layout {\n    tab name=\"Tab #1\" focus=true {\n");
    for (i, cwd) in cwds.iter().enumerate() {
        let focus = if focused == Some(i) { " focus=true" } else { "" };
        layout.push_str(&format!(
            "        pane command=\"claude\" cwd=\"{}\"{}\n",
            cwd.display(),
            focus
        ));
    }
    layout.push_str("    }\n}\n");
    layout
}
