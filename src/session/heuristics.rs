use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Number of non-blank trailing lines considered when inferring state
pub const STATE_WINDOW_LINES: usize = 30;

/// Activity state of an agent session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Agent is at its prompt with nothing to do
    #[default]
    Idle,
    /// Agent is actively working
    Busy,
    /// Agent is blocked on a confirmation from the user
    WaitingInput,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Busy => "busy",
            SessionState::WaitingInput => "waiting_input",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal control sequences: OSC, DCS/SOS/PM/APC strings, CSI (including
/// private modes and colon/semicolon colour forms), charset designators and
/// the remaining two-byte escapes.
static RE_CONTROL_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)?",
        r"|\x1b[P^_X][^\x1b]*(?:\x1b\\)?",
        r"|\x1b\[[0-?]*[ -/]*[@-~]",
        r"|\x1b[()*+#][0-9A-Za-z]",
        r"|\x1b[0-9=>@-Z\\-_a-z]",
    ))
    .unwrap()
});

/// Control bytes other than newline, including carriage returns and bare ESC
static RE_CONTROL_BYTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x09\x0b-\x1f\x7f]").unwrap());

static RE_BOXED_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[│|]\s*(?:Do you want|Would you like)").unwrap());

const BUSY_MARKER: &str = "esc to interrupt";

/// Engine for inferring session state from terminal content
pub struct StateInferenceEngine;

impl StateInferenceEngine {
    /// Classify a window of terminal lines, oldest first.
    ///
    /// A boxed confirmation prompt wins over the busy banner: agents keep the
    /// "esc to interrupt" hint on screen while asking for confirmation.
    pub fn analyze<S: AsRef<str>>(lines: &[S]) -> SessionState {
        let joined = lines
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("\n");
        let content = strip_control_sequences(&joined);
        let lowered = content.to_lowercase();

        if RE_BOXED_PROMPT.is_match(&content) {
            return SessionState::WaitingInput;
        }

        if lowered.contains(BUSY_MARKER) {
            return SessionState::Busy;
        }

        SessionState::Idle
    }

    /// Classify the visible rows of a terminal screen, top to bottom
    pub fn analyze_screen<S: AsRef<str>>(rows: &[S]) -> SessionState {
        Self::analyze(recent_lines(rows, STATE_WINDOW_LINES).as_slice())
    }
}

/// Remove escape sequences and non-printable control bytes, keeping newlines
pub fn strip_control_sequences(text: &str) -> String {
    let without_sequences = RE_CONTROL_SEQUENCE.replace_all(text, "");
    RE_CONTROL_BYTE.replace_all(&without_sequences, "").into_owned()
}

/// Collect up to `limit` lines from the bottom of `rows`, oldest first.
///
/// Blank rows below the last content are skipped; blank rows between content
/// lines are kept so multi-line prompts stay intact.
pub fn recent_lines<S: AsRef<str>>(rows: &[S], limit: usize) -> Vec<&str> {
    let mut collected = Vec::with_capacity(limit.min(rows.len()));
    let mut seen_content = false;

    for row in rows.iter().rev() {
        let line = row.as_ref();
        if !seen_content {
            if line.trim().is_empty() {
                continue;
            }
            seen_content = true;
        }
        collected.push(line);
        if collected.len() >= limit {
            break;
        }
    }

    collected.reverse();
    collected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_waiting_input() {
        let lines = ["│ Do you want to proceed?", "Yes / No"];
        assert_eq!(StateInferenceEngine::analyze(&lines), SessionState::WaitingInput);

        let lines = ["╭────────╮", "│ Would you like to continue? │", "╰────────╯"];
        assert_eq!(StateInferenceEngine::analyze(&lines), SessionState::WaitingInput);
    }

    #[test]
    fn test_detect_busy() {
        let lines = ["Reading src/main.rs", "Thinking... (esc to interrupt)"];
        assert_eq!(StateInferenceEngine::analyze(&lines), SessionState::Busy);

        let lines = ["✻ Working… (ESC to interrupt)"];
        assert_eq!(StateInferenceEngine::analyze(&lines), SessionState::Busy);
    }

    #[test]
    fn test_detect_idle() {
        assert_eq!(StateInferenceEngine::analyze(&["Ready."]), SessionState::Idle);
        let empty: [&str; 0] = [];
        assert_eq!(StateInferenceEngine::analyze(&empty), SessionState::Idle);
    }

    #[test]
    fn test_prompt_wins_over_busy_banner() {
        let lines = [
            "Thinking... (esc to interrupt)",
            "│ Do you want to make this edit to lib.rs?",
            "│ ❯ 1. Yes",
        ];
        assert_eq!(StateInferenceEngine::analyze(&lines), SessionState::WaitingInput);
    }

    #[test]
    fn test_escape_codes_are_stripped_before_matching() {
        let lines = ["\x1b[38;2;215;119;87m│\x1b[0m \x1b[1mDo you want\x1b[22m to run this?"];
        assert_eq!(StateInferenceEngine::analyze(&lines), SessionState::WaitingInput);

        let lines = ["\x1b[2mesc\x1b[0m to interrupt"];
        assert_eq!(StateInferenceEngine::analyze(&lines), SessionState::Busy);
    }

    #[test]
    fn test_strip_control_sequences() {
        let raw = "\x1b]0;title\x07\x1b[?25l\x1b[38;2;1;2;3mred\x1b[0m\r\n\x1bP1$r\x1b\\done\x07";
        assert_eq!(strip_control_sequences(raw), "red\ndone");
    }

    #[test]
    fn test_recent_lines_skips_trailing_blanks_only() {
        let rows = ["old", "│ Do you want", "", "│ 1. Yes", "", "   ", ""];
        assert_eq!(recent_lines(&rows, 30), vec!["old", "│ Do you want", "", "│ 1. Yes"]);
    }

    #[test]
    fn test_recent_lines_respects_limit() {
        let rows: Vec<String> = (0..50).map(|i| format!("line {i}")).collect();
        let window = recent_lines(rows.as_slice(), STATE_WINDOW_LINES);
        assert_eq!(window.len(), 30);
        assert_eq!(window[0], "line 20");
        assert_eq!(window[29], "line 49");
    }

    #[test]
    fn test_analyze_screen_ignores_prompt_scrolled_out_of_window() {
        let mut rows = vec!["│ Do you want to proceed?".to_string()];
        rows.extend((0..40).map(|i| format!("output {i}")));
        assert_eq!(StateInferenceEngine::analyze_screen(rows.as_slice()), SessionState::Idle);
    }
}
