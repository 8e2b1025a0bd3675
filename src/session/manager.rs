//! The session store: one session per worktree, owned PTY processes or
//! observed zellij panes, and the two polling loops that keep their state
//! current.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{self, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::heuristics::{SessionState, StateInferenceEngine};
use super::history::OutputHistory;
use super::pty::{spawn_read_loop, OwnedProcess, SpawnRequest, TerminalSize};
use super::{HostingMode, SessionEvent, SessionInfo};
use crate::agent::AgentKind;
use crate::config::Config;
use crate::error::{GroveError, Result};
use crate::hooks::{HookContext, HookDispatcher};
use crate::worktree::WorktreeService;
use crate::zellij::{PaneRecord, ZellijClient};

enum Hosting {
    OwnedProcess(Box<OwnedProcess>),
    MultiplexerPane { pane_id: Option<String> },
}

struct Session {
    id: String,
    worktree: PathBuf,
    agent_kind: AgentKind,
    state: SessionState,
    hosting: Hosting,
    history: OutputHistory,
    last_activity: DateTime<Utc>,
    is_foreground: bool,
    poll_handle: Option<JoinHandle<()>>,
}

impl Session {
    fn info(&self) -> SessionInfo {
        let (hosting_mode, pid, pane_id) = match &self.hosting {
            Hosting::OwnedProcess(process) => (HostingMode::OwnedProcess, process.pid(), None),
            Hosting::MultiplexerPane { pane_id } => {
                (HostingMode::MultiplexerPane, None, pane_id.clone())
            }
        };
        SessionInfo {
            id: self.id.clone(),
            worktree: self.worktree.clone(),
            agent_kind: self.agent_kind,
            hosting_mode,
            state: self.state,
            last_activity: self.last_activity,
            is_foreground: self.is_foreground,
            pid,
            pane_id,
            history_bytes: self.history.total_bytes(),
        }
    }

    fn hook_context(&self) -> HookContext {
        HookContext {
            session_id: self.id.clone(),
            worktree: self.worktree.clone(),
        }
    }

    /// Stop polling and end the owned process, if any
    fn teardown(&mut self) {
        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
        }
        if let Hosting::OwnedProcess(process) = &mut self.hosting {
            process.kill();
        }
    }
}

struct Inner {
    sessions: Mutex<HashMap<PathBuf, Session>>,
    subscribers: Mutex<Vec<UnboundedSender<SessionEvent>>>,
    multiplexer_poll: Mutex<Option<JoinHandle<()>>>,
    /// Serializes creation so a key never gets two processes
    create_lock: tokio::sync::Mutex<()>,
    config: Arc<Config>,
    hooks: HookDispatcher,
    zellij: ZellijClient,
}

/// Owns every agent session, keyed by worktree path
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(config: Arc<Config>, worktrees: WorktreeService) -> Self {
        let zellij = ZellijClient::new(Arc::clone(&config));
        Self::with_zellij(config, worktrees, zellij)
    }

    pub fn with_zellij(config: Arc<Config>, worktrees: WorktreeService, zellij: ZellijClient) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
                multiplexer_poll: Mutex::new(None),
                create_lock: tokio::sync::Mutex::new(()),
                hooks: HookDispatcher::new(config.status_hooks.clone(), worktrees),
                config,
                zellij,
            }),
        }
    }

    pub fn zellij(&self) -> &ZellijClient {
        &self.inner.zellij
    }

    /// Register a new event subscriber
    pub fn subscribe(&self) -> UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscribers).push(tx);
        rx
    }

    /// Return the session for `worktree`, creating it if needed.
    ///
    /// An existing session is returned as is; `agent_kind` and `mode` only
    /// apply to new sessions.
    pub async fn create_session(
        &self,
        worktree: &Path,
        agent_kind: AgentKind,
        mode: HostingMode,
        size: TerminalSize,
    ) -> Result<SessionInfo> {
        let key = worktree_key(worktree);
        let _creating = self.inner.create_lock.lock().await;

        if let Some(existing) = self.get_session(&key) {
            debug!(worktree = %key.display(), session_id = %existing.id, "Reusing session");
            return Ok(existing);
        }

        match mode {
            HostingMode::OwnedProcess => self.spawn_owned_session(key, agent_kind, size).await,
            HostingMode::MultiplexerPane => {
                let info = self.inner.insert_multiplexer_session(key, agent_kind, None);
                self.start_multiplexer_polling();
                Ok(info)
            }
        }
    }

    async fn spawn_owned_session(
        &self,
        key: PathBuf,
        agent_kind: AgentKind,
        size: TerminalSize,
    ) -> Result<SessionInfo> {
        let (program, args) = self.inner.config.agent_invocation(agent_kind);
        if which::which(&program).is_err() {
            return Err(GroveError::CommandUnavailable(program));
        }

        let request = SpawnRequest {
            program,
            args,
            cwd: key.clone(),
            size,
        };
        let (process, io) = task::spawn_blocking(move || OwnedProcess::spawn(request))
            .await
            .map_err(|e| GroveError::ProcessSpawnFailure(format!("spawn task failed: {}", e)))??;

        let id = uuid::Uuid::new_v4().to_string();
        let mut session = Session {
            id: id.clone(),
            worktree: key.clone(),
            agent_kind,
            state: SessionState::Busy,
            hosting: Hosting::OwnedProcess(Box::new(process)),
            history: OutputHistory::new(),
            last_activity: Utc::now(),
            is_foreground: false,
            poll_handle: None,
        };
        let info = session.info();

        {
            let mut sessions = lock(&self.inner.sessions);
            // The poll task reads under this lock, so it never misses the entry
            session.poll_handle = Some(self.inner.spawn_state_poll(key.clone(), id.clone()));
            sessions.insert(key.clone(), session);
            self.inner.emit(SessionEvent::Created(info.clone()));
        }

        let ingest = Arc::clone(&self.inner);
        let (ingest_key, ingest_id) = (key.clone(), id.clone());
        spawn_read_loop(io.reader, move |chunk| {
            ingest.ingest(&ingest_key, &ingest_id, chunk)
        });

        let inner = Arc::clone(&self.inner);
        let mut child = io.child;
        tokio::spawn(async move {
            match task::spawn_blocking(move || child.wait()).await {
                Ok(Ok(status)) => debug!(session_id = %id, ?status, "Agent process exited"),
                Ok(Err(e)) => warn!(session_id = %id, error = %e, "Waiting on agent failed"),
                Err(e) => warn!(session_id = %id, error = %e, "Wait task failed"),
            }
            inner.handle_exit(&key, &id);
        });

        info!(
            worktree = %info.worktree.display(),
            session_id = %info.id,
            agent = %agent_kind,
            pid = ?info.pid,
            "Started agent session"
        );
        Ok(info)
    }

    pub fn get_session(&self, worktree: &Path) -> Option<SessionInfo> {
        let key = worktree_key(worktree);
        lock(&self.inner.sessions).get(&key).map(Session::info)
    }

    /// All sessions, ordered by worktree path
    pub fn get_all_sessions(&self) -> Vec<SessionInfo> {
        let mut all: Vec<SessionInfo> = lock(&self.inner.sessions)
            .values()
            .map(Session::info)
            .collect();
        all.sort_by(|a, b| a.worktree.cmp(&b.worktree));
        all
    }

    /// Mark a session as the one being viewed (or not).
    ///
    /// Coming to the foreground replays the retained history via a
    /// [`SessionEvent::Restore`].
    pub fn set_active(&self, worktree: &Path, active: bool) -> Result<()> {
        let key = worktree_key(worktree);
        let mut sessions = lock(&self.inner.sessions);
        let session = sessions
            .get_mut(&key)
            .ok_or_else(|| GroveError::SessionNotFound(key.clone()))?;

        let was_foreground = session.is_foreground;
        session.is_foreground = active;
        if active && !was_foreground && !session.history.is_empty() {
            self.inner.emit(SessionEvent::Restore {
                session_id: session.id.clone(),
                worktree: session.worktree.clone(),
                history: session.history.to_vec(),
            });
        }
        Ok(())
    }

    /// Destroy the session for `worktree`. Absent sessions are ignored.
    pub fn destroy_session(&self, worktree: &Path) {
        self.inner.destroy(&worktree_key(worktree), None);
    }

    /// Send keystrokes to an owned session
    pub fn write_input(&self, worktree: &Path, bytes: &[u8]) -> Result<()> {
        let key = worktree_key(worktree);
        let sessions = lock(&self.inner.sessions);
        match sessions.get(&key).map(|s| &s.hosting) {
            Some(Hosting::OwnedProcess(process)) => process.write(bytes),
            Some(Hosting::MultiplexerPane { .. }) => Ok(()),
            None => Err(GroveError::SessionNotFound(key)),
        }
    }

    pub fn resize(&self, worktree: &Path, size: TerminalSize) -> Result<()> {
        let key = worktree_key(worktree);
        let mut sessions = lock(&self.inner.sessions);
        match sessions.get_mut(&key).map(|s| &mut s.hosting) {
            Some(Hosting::OwnedProcess(process)) => process.resize(size),
            Some(Hosting::MultiplexerPane { .. }) => Ok(()),
            None => Err(GroveError::SessionNotFound(key)),
        }
    }

    /// Visible terminal rows of an owned session
    pub fn screen_lines(&self, worktree: &Path) -> Option<Vec<String>> {
        let key = worktree_key(worktree);
        let sessions = lock(&self.inner.sessions);
        match &sessions.get(&key)?.hosting {
            Hosting::OwnedProcess(process) => Some(process.screen_rows()),
            Hosting::MultiplexerPane { .. } => None,
        }
    }

    /// Adopt every agent pane zellij already has open.
    ///
    /// Only does anything when running inside zellij.
    pub async fn discover_existing_sessions(&self) -> Result<Vec<SessionInfo>> {
        if !self.inner.zellij.is_inside_host_session() {
            return Ok(Vec::new());
        }

        let panes = self.inner.zellij.list_panes().await?;
        let _creating = self.inner.create_lock.lock().await;
        let mut adopted = Vec::new();
        for pane in panes {
            if let Some(info) = self.adopt_pane(pane) {
                adopted.push(info);
            }
        }
        drop(_creating);

        if !adopted.is_empty() {
            info!(count = adopted.len(), "Discovered zellij agent panes");
            self.start_multiplexer_polling();
        }
        Ok(adopted)
    }

    /// Find or adopt the session of a single worktree
    pub async fn restore_session_for_worktree(&self, worktree: &Path) -> Result<Option<SessionInfo>> {
        if let Some(existing) = self.get_session(worktree) {
            return Ok(Some(existing));
        }
        if !self.inner.zellij.is_inside_host_session() {
            return Ok(None);
        }

        let Some(pane) = self.inner.zellij.find_pane_for_worktree(worktree).await? else {
            return Ok(None);
        };
        let _creating = self.inner.create_lock.lock().await;
        let adopted = self.adopt_pane(pane);
        drop(_creating);

        match adopted {
            Some(info) => {
                self.start_multiplexer_polling();
                Ok(Some(info))
            }
            None => Ok(self.get_session(worktree)),
        }
    }

    fn adopt_pane(&self, pane: PaneRecord) -> Option<SessionInfo> {
        let key = worktree_key(&pane.cwd);
        if key.as_os_str().is_empty() || self.get_session(&key).is_some() {
            return None;
        }
        Some(
            self.inner
                .insert_multiplexer_session(key, pane.agent_kind, pane.pane_id),
        )
    }

    /// Start the shared zellij reconciliation loop if it is not running
    pub fn start_multiplexer_polling(&self) {
        let mut slot = lock(&self.inner.multiplexer_poll);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let period = self.inner.config.polling.multiplexer_interval();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.reconcile_multiplexer_sessions().await;
            }
        }));
        debug!(?period, "Started zellij reconciliation");
    }

    pub fn stop_multiplexer_polling(&self) {
        if let Some(handle) = lock(&self.inner.multiplexer_poll).take() {
            handle.abort();
            debug!("Stopped zellij reconciliation");
        }
    }

    pub fn is_multiplexer_polling(&self) -> bool {
        lock(&self.inner.multiplexer_poll)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop every timer and kill every owned process
    pub fn shutdown(&self) {
        self.stop_multiplexer_polling();
        let keys: Vec<PathBuf> = lock(&self.inner.sessions).keys().cloned().collect();
        for key in keys {
            self.inner.destroy(&key, None);
        }
        info!("Session manager shut down");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn insert_multiplexer_session(
        &self,
        key: PathBuf,
        agent_kind: AgentKind,
        pane_id: Option<String>,
    ) -> SessionInfo {
        let id = match &pane_id {
            Some(pane_id) => format!("zellij-{}", pane_id),
            None => format!("zellij-{}", uuid::Uuid::new_v4()),
        };
        let session = Session {
            id,
            worktree: key.clone(),
            agent_kind,
            state: SessionState::Idle,
            hosting: Hosting::MultiplexerPane { pane_id },
            history: OutputHistory::new(),
            last_activity: Utc::now(),
            is_foreground: false,
            poll_handle: None,
        };
        let info = session.info();

        let mut sessions = lock(&self.sessions);
        sessions.insert(key, session);
        self.emit(SessionEvent::Created(info.clone()));
        info!(worktree = %info.worktree.display(), session_id = %info.id, "Tracking zellij pane");
        info
    }

    fn spawn_state_poll(self: &Arc<Self>, key: PathBuf, id: String) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        let period = self.config.polling.state_interval();
        tokio::spawn(async move {
            // A fresh session stays Busy for at least one period
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !inner.check_state(&key, &id) {
                    break;
                }
            }
        })
    }

    /// Re-classify an owned session from its screen. Returns false once the
    /// session is gone.
    fn check_state(&self, key: &Path, id: &str) -> bool {
        let mut sessions = lock(&self.sessions);
        let Some(session) = sessions.get_mut(key).filter(|s| s.id == id) else {
            return false;
        };
        let Hosting::OwnedProcess(process) = &session.hosting else {
            return false;
        };

        let observed = StateInferenceEngine::analyze_screen(process.screen_rows().as_slice());
        self.transition(session, observed);
        true
    }

    /// Record a new state, fire hooks and notify. Caller holds the lock.
    fn transition(&self, session: &mut Session, new: SessionState) -> bool {
        let old = session.state;
        if old == new {
            return false;
        }

        session.state = new;
        debug!(session_id = %session.id, %old, %new, "Session state changed");
        self.hooks.dispatch(old, new, session.hook_context());
        self.emit(SessionEvent::StateChanged {
            session_id: session.id.clone(),
            worktree: session.worktree.clone(),
            old,
            new,
        });
        true
    }

    /// Apply output from an owned process. Returns false once the session
    /// is gone so the reader can stop.
    fn ingest(&self, key: &Path, id: &str, bytes: &[u8]) -> bool {
        let mut sessions = lock(&self.sessions);
        let Some(session) = sessions.get_mut(key).filter(|s| s.id == id) else {
            return false;
        };

        session.history.append(bytes);
        session.last_activity = Utc::now();
        if let Hosting::OwnedProcess(process) = &mut session.hosting {
            process.process(bytes);
        }
        if session.is_foreground {
            self.emit(SessionEvent::Data {
                session_id: session.id.clone(),
                worktree: session.worktree.clone(),
                bytes: bytes.to_vec(),
            });
        }
        true
    }

    /// The hosted process ended on its own
    fn handle_exit(&self, key: &Path, id: &str) {
        {
            let mut sessions = lock(&self.sessions);
            let Some(session) = sessions.get_mut(key).filter(|s| s.id == id) else {
                return;
            };
            let old = session.state;
            session.state = SessionState::Idle;
            if old != SessionState::Idle {
                self.hooks.dispatch(old, SessionState::Idle, session.hook_context());
            }
            self.emit(SessionEvent::StateChanged {
                session_id: session.id.clone(),
                worktree: session.worktree.clone(),
                old,
                new: SessionState::Idle,
            });
        }

        if self.destroy(key, Some(id)) {
            info!(worktree = %key.display(), session_id = %id, "Agent exited");
            self.emit(SessionEvent::Exit {
                session_id: id.to_string(),
                worktree: key.to_path_buf(),
            });
        }
    }

    /// Remove and tear down a session; with `expected_id`, only if it still
    /// matches. Returns whether anything was removed.
    fn destroy(&self, key: &Path, expected_id: Option<&str>) -> bool {
        let removed = {
            let mut sessions = lock(&self.sessions);
            let matches = sessions
                .get(key)
                .is_some_and(|s| expected_id.map_or(true, |id| s.id == id));
            if matches {
                sessions.remove(key)
            } else {
                None
            }
        };
        let Some(mut session) = removed else {
            return false;
        };

        session.teardown();
        info!(worktree = %key.display(), session_id = %session.id, "Destroyed session");
        self.emit(SessionEvent::Destroyed {
            session_id: session.id,
            worktree: session.worktree,
        });
        true
    }

    /// One reconciliation tick over all zellij sessions
    async fn reconcile_multiplexer_sessions(&self) {
        let targets: Vec<(PathBuf, String, AgentKind)> = lock(&self.sessions)
            .values()
            .filter(|s| matches!(s.hosting, Hosting::MultiplexerPane { .. }))
            .map(|s| (s.worktree.clone(), s.id.clone(), s.agent_kind))
            .collect();

        for (key, id, kind) in targets {
            match self.observe_pane(&key, kind).await {
                Ok(observed) => {
                    self.apply_observed_state(&key, &id, observed);
                }
                Err(e) => {
                    warn!(worktree = %key.display(), session_id = %id, error = %e, "Pane probe failed");
                }
            }
        }
    }

    async fn observe_pane(&self, key: &Path, kind: AgentKind) -> Result<SessionState> {
        if self.zellij.is_pane_active(key, kind).await? {
            return Ok(SessionState::Busy);
        }
        if !self.zellij.agent_process_exists(key, kind).await? {
            debug!(worktree = %key.display(), "Agent process no longer running");
        }
        Ok(SessionState::Idle)
    }

    /// Apply a probe result, discarding it if the session went away meanwhile
    fn apply_observed_state(&self, key: &Path, id: &str, observed: SessionState) -> bool {
        let mut sessions = lock(&self.sessions);
        let Some(session) = sessions.get_mut(key).filter(|s| s.id == id) else {
            return false;
        };
        let changed = self.transition(session, observed);
        if changed {
            session.last_activity = Utc::now();
        }
        changed
    }
}

/// Normalize a worktree path into a store key
fn worktree_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentCommand;
    use crate::zellij::test_support::{claude_layout, FakeZellij};
    use std::time::Duration;
    use tokio::time::timeout;

    fn manager_running(script: &str) -> SessionManager {
        let mut config = Config::default();
        config.agents.claude = AgentCommand {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        };
        SessionManager::new(Arc::new(config), WorktreeService::new(std::env::temp_dir()))
    }

    async fn next_matching<F>(rx: &mut UnboundedReceiver<SessionEvent>, mut pred: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_running("sleep 5");

        let first = manager
            .create_session(dir.path(), AgentKind::Claude, HostingMode::OwnedProcess, TerminalSize::default())
            .await
            .unwrap();
        let second = manager
            .create_session(dir.path(), AgentKind::Gemini, HostingMode::MultiplexerPane, TerminalSize::default())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.pid, second.pid);
        assert!(first.pid.is_some());
        assert_eq!(second.hosting_mode, HostingMode::OwnedProcess);
        assert_eq!(second.agent_kind, AgentKind::Claude);
        assert_eq!(manager.get_all_sessions().len(), 1);
        assert_eq!(first.state, SessionState::Busy);
    }

    #[tokio::test]
    async fn test_new_session_stays_busy_for_first_period() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.agents.claude = AgentCommand {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 5".to_string()],
        };
        config.polling.state_interval_ms = 500;
        let manager = SessionManager::new(Arc::new(config), WorktreeService::new(dir.path()));
        let mut events = manager.subscribe();

        manager
            .create_session(dir.path(), AgentKind::Claude, HostingMode::OwnedProcess, TerminalSize::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        while let Ok(event) = events.try_recv() {
            assert!(
                !matches!(event, SessionEvent::StateChanged { .. }),
                "state changed before the first poll: {:?}",
                event
            );
        }
        assert_eq!(manager.get_session(dir.path()).unwrap().state, SessionState::Busy);

        let event = next_matching(&mut events, |e| matches!(e, SessionEvent::StateChanged { .. })).await;
        assert!(matches!(
            event,
            SessionEvent::StateChanged { old: SessionState::Busy, new: SessionState::Idle, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_agent_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.agents.claude.command = "grove-no-such-agent".to_string();
        let manager = SessionManager::new(Arc::new(config), WorktreeService::new(dir.path()));

        let err = manager
            .create_session(dir.path(), AgentKind::Claude, HostingMode::OwnedProcess, TerminalSize::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GroveError::CommandUnavailable(_)));
        assert!(manager.get_session(dir.path()).is_none());
    }

    #[tokio::test]
    async fn test_prompt_on_screen_means_waiting_input() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_running("printf '│ Do you want to proceed?\\nYes / No\\n'; sleep 5");
        let mut events = manager.subscribe();

        manager
            .create_session(dir.path(), AgentKind::Claude, HostingMode::OwnedProcess, TerminalSize::default())
            .await
            .unwrap();

        let event = next_matching(&mut events, |e| {
            matches!(e, SessionEvent::StateChanged { new: SessionState::WaitingInput, .. })
        })
        .await;
        assert_eq!(event.worktree(), worktree_key(dir.path()));
        assert_eq!(
            manager.get_session(dir.path()).unwrap().state,
            SessionState::WaitingInput
        );
        assert!(manager
            .screen_lines(dir.path())
            .unwrap()
            .iter()
            .any(|line| line.contains("Do you want to proceed?")));
    }

    #[tokio::test]
    async fn test_plain_output_settles_idle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_running("printf 'Ready.\\n'; sleep 5");
        let mut events = manager.subscribe();

        manager
            .create_session(dir.path(), AgentKind::Claude, HostingMode::OwnedProcess, TerminalSize::default())
            .await
            .unwrap();

        let event = next_matching(&mut events, |e| matches!(e, SessionEvent::StateChanged { .. })).await;
        assert!(matches!(
            event,
            SessionEvent::StateChanged { old: SessionState::Busy, new: SessionState::Idle, .. }
        ));
    }

    #[tokio::test]
    async fn test_input_reaches_process() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_running("read line; echo \"got:$line\"; sleep 5");

        manager
            .create_session(dir.path(), AgentKind::Claude, HostingMode::OwnedProcess, TerminalSize::default())
            .await
            .unwrap();
        manager.write_input(dir.path(), b"ping\r").unwrap();

        timeout(Duration::from_secs(5), async {
            loop {
                let lines = manager.screen_lines(dir.path()).unwrap_or_default();
                if lines.iter().any(|l| l.contains("got:ping")) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("echoed input never appeared");
        assert!(manager.get_session(dir.path()).unwrap().history_bytes > 0);
    }

    #[tokio::test]
    async fn test_destroy_stops_state_events() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_running("sleep 0.5; printf '│ Do you want to proceed?\\n'; sleep 5");
        let mut events = manager.subscribe();

        manager
            .create_session(dir.path(), AgentKind::Claude, HostingMode::OwnedProcess, TerminalSize::default())
            .await
            .unwrap();
        manager.destroy_session(dir.path());
        manager.destroy_session(dir.path());

        next_matching(&mut events, |e| matches!(e, SessionEvent::Destroyed { .. })).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;

        while let Ok(event) = events.try_recv() {
            assert!(
                !matches!(event, SessionEvent::StateChanged { .. } | SessionEvent::Destroyed { .. }),
                "unexpected event after destroy: {:?}",
                event
            );
        }
        assert!(manager.get_session(dir.path()).is_none());
    }

    #[tokio::test]
    async fn test_recreate_after_destroy_gets_fresh_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_running("sleep 5");
        let size = TerminalSize::default();

        let first = manager
            .create_session(dir.path(), AgentKind::Claude, HostingMode::OwnedProcess, size)
            .await
            .unwrap();
        manager.destroy_session(dir.path());
        let second = manager
            .create_session(dir.path(), AgentKind::Claude, HostingMode::OwnedProcess, size)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_natural_exit_goes_idle_then_destroyed_then_exit() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_running("printf 'bye\\n'; exit 0");
        let mut events = manager.subscribe();

        let info = manager
            .create_session(dir.path(), AgentKind::Claude, HostingMode::OwnedProcess, TerminalSize::default())
            .await
            .unwrap();

        let mut tail = Vec::new();
        timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("event channel closed");
                let done = matches!(event, SessionEvent::Exit { .. });
                tail.push(event);
                if done {
                    break;
                }
            }
        })
        .await
        .expect("no exit event");

        let n = tail.len();
        assert!(n >= 3);
        assert!(matches!(tail[n - 3], SessionEvent::StateChanged { new: SessionState::Idle, .. }));
        assert!(matches!(&tail[n - 2], SessionEvent::Destroyed { session_id, .. } if *session_id == info.id));
        assert!(matches!(&tail[n - 1], SessionEvent::Exit { session_id, .. } if *session_id == info.id));
        assert!(manager.get_session(dir.path()).is_none());
    }

    #[tokio::test]
    async fn test_restore_replays_history_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_running("sleep 5");
        let mut events = manager.subscribe();

        let info = manager
            .create_session(dir.path(), AgentKind::Claude, HostingMode::MultiplexerPane, TerminalSize::default())
            .await
            .unwrap();
        let key = info.worktree.clone();
        for chunk in [&b"first "[..], b"second ", b"third"] {
            assert!(manager.inner.ingest(&key, &info.id, chunk));
        }

        manager.set_active(dir.path(), true).unwrap();
        let event = next_matching(&mut events, |e| matches!(e, SessionEvent::Restore { .. })).await;
        let SessionEvent::Restore { history, .. } = event else {
            unreachable!()
        };
        assert_eq!(history, vec![b"first ".to_vec(), b"second ".to_vec(), b"third".to_vec()]);

        assert!(manager.inner.ingest(&key, &info.id, b"live"));
        let event = next_matching(&mut events, |e| matches!(e, SessionEvent::Data { .. })).await;
        assert!(matches!(event, SessionEvent::Data { bytes, .. } if bytes == b"live"));

        manager.set_active(dir.path(), false).unwrap();
        assert!(manager.inner.ingest(&key, &info.id, b"quiet"));
        assert!(events.try_recv().is_err());
        assert_eq!(manager.get_session(dir.path()).unwrap().history_bytes, 27);
    }

    #[tokio::test]
    async fn test_set_active_on_unknown_worktree_fails() {
        let manager = manager_running("sleep 5");
        let err = manager.set_active(Path::new("/grove/nowhere"), true).unwrap_err();
        assert!(matches!(err, GroveError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_multiplexer_session_tracks_observed_state() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_running("sleep 5");
        let mut events = manager.subscribe();

        let info = manager
            .create_session(dir.path(), AgentKind::Gemini, HostingMode::MultiplexerPane, TerminalSize::default())
            .await
            .unwrap();
        assert_eq!(info.state, SessionState::Idle);
        assert_eq!(info.pid, None);
        assert!(manager.screen_lines(dir.path()).is_none());
        assert!(manager.is_multiplexer_polling());

        let before = info.last_activity;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(manager.inner.apply_observed_state(&info.worktree, &info.id, SessionState::Busy));
        assert!(!manager.inner.apply_observed_state(&info.worktree, &info.id, SessionState::Busy));
        assert!(!manager.inner.apply_observed_state(&info.worktree, "stale-id", SessionState::Idle));

        let event = next_matching(&mut events, |e| matches!(e, SessionEvent::StateChanged { .. })).await;
        assert!(matches!(
            event,
            SessionEvent::StateChanged { old: SessionState::Idle, new: SessionState::Busy, .. }
        ));
        let now = manager.get_session(dir.path()).unwrap();
        assert_eq!(now.state, SessionState::Busy);
        assert!(now.last_activity > before);

        manager.stop_multiplexer_polling();
        assert!(!manager.is_multiplexer_polling());
    }

    #[tokio::test]
    async fn test_discovery_outside_zellij_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(Config::default());
        let client = ZellijClient::new(Arc::clone(&config)).assume_inside(false);
        let manager = SessionManager::with_zellij(config, WorktreeService::new(dir.path()), client);
        assert!(manager.discover_existing_sessions().await.unwrap().is_empty());
        assert_eq!(manager.restore_session_for_worktree(dir.path()).await.unwrap(), None);
        assert!(!manager.is_multiplexer_polling());
    }

    fn manager_with_fake_zellij(zellij: &FakeZellij) -> SessionManager {
        let config = zellij.config();
        let client = zellij.client(config.clone());
        SessionManager::with_zellij(Arc::new(config), WorktreeService::new(std::env::temp_dir()), client)
    }

    #[tokio::test]
    async fn test_discovery_over_shifting_layout_keeps_ids_unique() {
        let root = tempfile::tempdir().unwrap();
        let [a, b, c] = ["a", "b", "c"].map(|name| {
            let path = root.path().join(name);
            std::fs::create_dir(&path).unwrap();
            path
        });
        let zellij = FakeZellij::new();
        let manager = manager_with_fake_zellij(&zellij);

        zellij.set_layout(&claude_layout(&[a.as_path(), b.as_path()], Some(0)));
        let first = manager.discover_existing_sessions().await.unwrap();
        assert_eq!(first.len(), 2);

        // `a` closed, so `c` now sits where `b` used to be
        zellij.set_layout(&claude_layout(&[b.as_path(), c.as_path()], Some(0)));
        let second = manager.discover_existing_sessions().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].worktree, worktree_key(&c));
        assert_eq!(second[0].pane_id, None);

        let all = manager.get_all_sessions();
        assert_eq!(all.len(), 3);
        let ids: std::collections::HashSet<&str> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert!(all.iter().all(|s| s.hosting_mode == HostingMode::MultiplexerPane));
        assert!(manager.is_multiplexer_polling());
    }

    #[tokio::test]
    async fn test_discovery_uses_pane_id_reported_by_zellij() {
        let dir = tempfile::tempdir().unwrap();
        let zellij = FakeZellij::new();
        let manager = manager_with_fake_zellij(&zellij);
        zellij.set_layout(&format!(
            "pane command=\"gemini\" cwd=\"{}\" pane_id=\"terminal_7\"\n",
            dir.path().display()
        ));

        let info = manager
            .restore_session_for_worktree(dir.path())
            .await
            .unwrap()
            .expect("pane not adopted");
        assert_eq!(info.id, "zellij-terminal_7");
        assert_eq!(info.pane_id.as_deref(), Some("terminal_7"));
        assert_eq!(info.agent_kind, AgentKind::Gemini);

        // Already tracked, so nothing new
        assert!(manager.discover_existing_sessions().await.unwrap().is_empty());
        assert_eq!(manager.get_all_sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_destroys_everything() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let manager = manager_running("sleep 5");
        let size = TerminalSize::default();

        manager
            .create_session(a.path(), AgentKind::Claude, HostingMode::OwnedProcess, size)
            .await
            .unwrap();
        manager
            .create_session(b.path(), AgentKind::Claude, HostingMode::MultiplexerPane, size)
            .await
            .unwrap();

        manager.shutdown();
        assert!(manager.get_all_sessions().is_empty());
        assert!(!manager.is_multiplexer_polling());
    }
}
