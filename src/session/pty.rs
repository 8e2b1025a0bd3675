//! Pseudo-terminal hosting for owned agent processes.

use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GroveError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;
const SCROLLBACK_LINES: usize = 1_000;

/// Viewport size for a hosted terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl TerminalSize {
    fn to_pty_size(self) -> PtySize {
        PtySize {
            cols: self.cols,
            rows: self.rows,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub size: TerminalSize,
}

/// A running agent attached to a PTY, plus the headless terminal that
/// mirrors what it has drawn
pub struct OwnedProcess {
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    stdin_tx: std_mpsc::Sender<Vec<u8>>,
    parser: vt100::Parser,
    pid: Option<u32>,
}

/// Halves of a freshly spawned process that the caller drives itself
pub struct SpawnedIo {
    pub reader: Box<dyn Read + Send>,
    pub child: Box<dyn Child + Send + Sync>,
}

impl OwnedProcess {
    pub fn spawn(request: SpawnRequest) -> Result<(Self, SpawnedIo)> {
        if request.size.cols == 0 || request.size.rows == 0 {
            return Err(GroveError::ProcessSpawnFailure(
                "terminal size must have non-zero rows and columns".into(),
            ));
        }

        let pair = native_pty_system()
            .openpty(request.size.to_pty_size())
            .map_err(spawn_error)?;

        let mut command = CommandBuilder::new(&request.program);
        command.args(&request.args);
        command.cwd(&request.cwd);

        let mut child = pair.slave.spawn_command(command).map_err(spawn_error)?;
        drop(pair.slave);

        let io = pair
            .master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, pair.master.take_writer()?)));
        let (reader, writer) = match io {
            Ok(io) => io,
            Err(e) => {
                let _ = child.kill();
                return Err(spawn_error(e));
            }
        };

        let (stdin_tx, stdin_rx) = std_mpsc::channel();
        spawn_write_loop(writer, stdin_rx);

        let process = Self {
            master: pair.master,
            killer: child.clone_killer(),
            stdin_tx,
            parser: vt100::Parser::new(request.size.rows, request.size.cols, SCROLLBACK_LINES),
            pid: child.process_id(),
        };

        Ok((process, SpawnedIo { reader, child }))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Feed output bytes into the emulator
    pub fn process(&mut self, bytes: &[u8]) {
        self.parser.process(bytes);
    }

    /// Queue bytes for the process's stdin
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        self.stdin_tx
            .send(bytes.to_vec())
            .map_err(|_| GroveError::ProcessSpawnFailure("process input is closed".into()))
    }

    pub fn resize(&mut self, size: TerminalSize) -> Result<()> {
        if size.cols == 0 || size.rows == 0 {
            return Ok(());
        }
        self.master.resize(size.to_pty_size()).map_err(spawn_error)?;
        self.parser.set_size(size.rows, size.cols);
        Ok(())
    }

    /// Visible rows, top to bottom
    pub fn screen_rows(&self) -> Vec<String> {
        let screen = self.parser.screen();
        let (_, cols) = screen.size();
        screen.rows(0, cols).collect()
    }

    /// Best-effort kill; the process may already be gone
    pub fn kill(&mut self) {
        if let Err(e) = self.killer.kill() {
            debug!(error = %e, pid = ?self.pid, "Kill failed, process likely exited");
        }
    }
}

fn spawn_error(error: impl std::fmt::Display) -> GroveError {
    GroveError::ProcessSpawnFailure(error.to_string())
}

fn spawn_write_loop(mut writer: Box<dyn Write + Send>, stdin_rx: std_mpsc::Receiver<Vec<u8>>) {
    std::thread::spawn(move || {
        while let Ok(bytes) = stdin_rx.recv() {
            if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
                warn!(error = %e, "PTY write failed");
                break;
            }
        }
    });
}

/// Read output until EOF, handing each chunk to `on_chunk` in arrival order.
///
/// Stops early when `on_chunk` returns false.
pub fn spawn_read_loop<F>(mut reader: Box<dyn Read + Send>, mut on_chunk: F)
where
    F: FnMut(&[u8]) -> bool + Send + 'static,
{
    std::thread::spawn(move || {
        let mut buffer = [0_u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => {
                    if !on_chunk(&buffer[..read]) {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emulator_tracks_screen() {
        let mut parser = vt100::Parser::new(4, 20, 10);
        parser.process(b"hello\x1b[2DXY\r\nnext");
        let screen = parser.screen();
        let rows: Vec<String> = screen.rows(0, 20).collect();
        assert_eq!(rows[0].trim_end(), "helXY");
        assert_eq!(rows[1].trim_end(), "next");
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let result = OwnedProcess::spawn(SpawnRequest {
            program: "sh".into(),
            args: Vec::new(),
            cwd: std::env::temp_dir(),
            size: TerminalSize { cols: 0, rows: 24 },
        });
        assert!(matches!(result, Err(GroveError::ProcessSpawnFailure(_))));
    }

    #[test]
    fn test_resize_reshapes_screen() {
        let (mut process, _io) = OwnedProcess::spawn(SpawnRequest {
            program: "sh".into(),
            args: vec!["-c".into(), "sleep 5".into()],
            cwd: std::env::temp_dir(),
            size: TerminalSize::default(),
        })
        .unwrap();
        assert_eq!(process.screen_rows().len(), 24);

        process.resize(TerminalSize { cols: 120, rows: 40 }).unwrap();
        assert_eq!(process.screen_rows().len(), 40);

        // Zero sizes leave the screen alone
        process.resize(TerminalSize { cols: 0, rows: 10 }).unwrap();
        assert_eq!(process.screen_rows().len(), 40);
        process.kill();
    }
}
