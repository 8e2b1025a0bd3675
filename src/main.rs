use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use agent_grove::{AgentKind, Config, HostingMode, SessionManager, WorktreeService};

mod actions;
mod app;

use actions::Action;
use app::{display_name, App};

const WORKTREE_REFRESH: Duration = Duration::from_millis(2000);

/// The dashboard owns the terminal, so logs go to a file
fn init_logging() {
    let writer = dirs::data_local_dir()
        .map(|dir| dir.join("agent-grove"))
        .and_then(|dir| {
            std::fs::create_dir_all(&dir).ok()?;
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("grove.log"))
                .ok()
        })
        .map(|file| BoxMakeWriter::new(Mutex::new(file)))
        .unwrap_or_else(|| BoxMakeWriter::new(std::io::sink));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = Arc::new(Config::load().context("Failed to load config")?);
    let repo_root = std::env::current_dir().context("Failed to read current directory")?;
    let worktrees = WorktreeService::new(&repo_root);
    let manager = SessionManager::new(Arc::clone(&config), worktrees.clone());
    info!(repo = %repo_root.display(), "Starting agent-grove");

    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();

    // Forward session events
    let mut events = manager.subscribe();
    let event_tx = tx.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if event_tx.send(Action::Session(event)).is_err() {
                break;
            }
        }
    });

    let mut app = App::new(config.shortcuts.clone());

    // Adopt agent panes that were already open
    match manager.discover_existing_sessions().await {
        Ok(found) => {
            for info in found {
                app.handle_action(Action::Session(agent_grove::SessionEvent::Created(info)))?;
            }
        }
        Err(e) => app.message = Some(format!("Pane discovery failed: {}", e)),
    }

    // Initialize terminal
    let mut terminal = ratatui::init();

    // Spawn input handler
    let input_tx = tx.clone();
    tokio::task::spawn_blocking(move || loop {
        if event::poll(Duration::from_millis(100)).unwrap_or(false) {
            if let Ok(Event::Key(key)) = event::read() {
                if key.kind == KeyEventKind::Press && input_tx.send(Action::KeyPress(key)).is_err() {
                    break;
                }
            }
        }
        if input_tx.is_closed() {
            break;
        }
    });

    // Spawn worktree poller
    let worktree_tx = tx.clone();
    tokio::spawn(async move {
        loop {
            let action = match worktrees.list_worktrees().await {
                Ok(list) => Action::WorktreesUpdated(list),
                Err(e) => Action::Error(format!("Git: {}", e)),
            };
            if worktree_tx.send(action).is_err() {
                break;
            }
            tokio::time::sleep(WORKTREE_REFRESH).await;
        }
    });

    // Main event loop
    let result = loop {
        app.screen = app
            .screen_source()
            .and_then(|path| manager.screen_lines(&path))
            .unwrap_or_default();

        // Render
        if let Err(e) = terminal.draw(|f| app.render(f)) {
            break Err(e).context("Failed to draw");
        }

        for pending_action in app.take_pending_actions() {
            if let Err(e) = run_action(&manager, &mut app, pending_action).await {
                warn!(error = %e, "Dashboard action failed");
                app.message = Some(format!("{:#}", e));
            }
        }

        // Handle events from channel, redrawing at least every 100ms for the
        // attached screen
        let action = tokio::select! {
            action = rx.recv() => action,
            _ = tokio::time::sleep(config.polling.state_interval()) => continue,
        };
        let Some(action) = action else {
            break Ok(());
        };
        match app.handle_action(action) {
            Ok(true) => break Ok(()),
            Ok(false) => {}
            Err(e) => break Err(e),
        }
    };

    // Restore terminal
    ratatui::restore();
    manager.shutdown();
    result
}

/// Carry out an action queued by the UI
async fn run_action(
    manager: &SessionManager,
    app: &mut App,
    action: Action,
) -> Result<()> {
    match action {
        Action::CreateSession(path, kind) => {
            manager
                .create_session(&path, kind, HostingMode::OwnedProcess, app.viewport)
                .await
                .with_context(|| format!("Failed to start {} in {}", kind, path.display()))?;
        }
        Action::CreatePane(path, kind) => create_pane(manager, app, &path, kind).await?,
        Action::DestroySession(path) => {
            let was_pane = manager
                .get_session(&path)
                .is_some_and(|s| s.hosting_mode == HostingMode::MultiplexerPane);
            manager.destroy_session(&path);
            if was_pane && manager.zellij().is_inside_host_session() {
                manager
                    .zellij()
                    .close_pane_for_worktree(&path)
                    .await
                    .context("Failed to close pane")?;
            }
        }
        Action::FocusPane(path) => {
            manager
                .zellij()
                .focus_pane(&path)
                .await
                .with_context(|| format!("Failed to focus {}", display_name(&path)))?;
        }
        Action::Attach(path) => {
            manager.resize(&path, app.viewport)?;
            manager.set_active(&path, true)?;
        }
        Action::Detach(path) => {
            // Gone already when the agent exited while attached
            if manager.get_session(&path).is_some() {
                manager.set_active(&path, false)?;
            }
        }
        Action::SendInput(path, bytes) => manager.write_input(&path, &bytes)?,
        Action::ResizeSession(path, size) => manager.resize(&path, size)?,
        _ => {}
    }
    Ok(())
}

/// Open a zellij pane, falling back to an owned session when that fails
async fn create_pane(
    manager: &SessionManager,
    app: &mut App,
    path: &Path,
    kind: AgentKind,
) -> Result<()> {
    let label = pane_label(app, path);
    match manager.zellij().create_pane(path, &label, kind).await {
        Ok(()) => {
            manager
                .create_session(path, kind, HostingMode::MultiplexerPane, app.viewport)
                .await?;
        }
        Err(e) => {
            warn!(error = %e, worktree = %path.display(), "Pane creation failed, starting owned session");
            manager
                .create_session(path, kind, HostingMode::OwnedProcess, app.viewport)
                .await
                .with_context(|| format!("Failed to start {} in {}", kind, path.display()))?;
            app.message = Some(format!("No zellij pane ({}), started {} here", e, kind));
        }
    }
    Ok(())
}

fn pane_label(app: &App, path: &Path) -> String {
    app.rows
        .iter()
        .find(|row| row.path == path)
        .and_then(|row| row.branch.clone())
        .unwrap_or_else(|| display_name(path))
}
