use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::process::Command;

use crate::config::Config;
use crate::display::{DisplayAllocator, DisplayId, PixelSize, TerminalSize};
use crate::input::{Input, InputDispatcher, InputError};
use crate::process::{ChildProcess, ProcessError};
use crate::screenshot::{CaptureError, Screenshot, ScreenshotCapturer, ScreenshotMetadata};
use crate::window::{WindowId, WindowLocator};

/// Lifecycle of a session.
///
/// `Created -> Starting -> Running -> Stopping -> Stopped`, with
/// `Starting -> Stopping -> Stopped` when startup fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("session is {0}, not running")]
    NotRunning(SessionState),
    #[error("session has already been started")]
    AlreadyStarted,
    #[error("display {display} is already served by pid {owner}")]
    DisplayTaken { display: DisplayId, owner: u32 },
}

/// Listing entry for a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub command: String,
    pub display: String,
    pub terminal_size: String,
    pub display_size: String,
    pub state: SessionState,
}

/// One program running in its own terminal emulator on its own virtual
/// display.
///
/// A session owns the display number, the display server and terminal
/// emulator processes, and a scratch directory for screenshots (created on
/// first capture). [`Session::cleanup`] releases all of them and is safe to
/// call any number of times from any state.
#[derive(Debug)]
pub struct Session {
    id: String,
    command: String,
    terminal: TerminalSize,
    pixels: PixelSize,
    display: DisplayId,
    state: SessionState,
    display_server: Option<ChildProcess>,
    terminal_emulator: Option<ChildProcess>,
    /// PID of our display server once its lock file names it; only then are
    /// the display's files ours to remove.
    display_owner: Option<u32>,
    scratch: Option<tempfile::TempDir>,
    screenshot_seq: u64,
    allocator: DisplayAllocator,
    config: Arc<Config>,
}

impl Session {
    /// Create an unstarted session and allocate a display number for it.
    pub fn new(command: impl Into<String>, terminal: TerminalSize, config: Arc<Config>) -> Self {
        let allocator = DisplayAllocator::new(&config.display);
        let display = allocator.allocate();
        let pixels = PixelSize::for_terminal(terminal, &config.display);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            command: command.into(),
            terminal,
            pixels,
            display,
            state: SessionState::Created,
            display_server: None,
            terminal_emulator: None,
            display_owner: None,
            scratch: None,
            screenshot_seq: 0,
            allocator,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn terminal_size(&self) -> TerminalSize {
        self.terminal
    }

    pub fn pixel_size(&self) -> PixelSize {
        self.pixels
    }

    pub fn display(&self) -> DisplayId {
        self.display
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            command: self.command.clone(),
            display: self.display.to_string(),
            terminal_size: self.terminal.to_string(),
            display_size: self.pixels.to_string(),
            state: self.state,
        }
    }

    /// Start the display server, then the terminal emulator running the
    /// session's command.
    ///
    /// On failure everything already started is torn down, the session ends
    /// up `Stopped`, and the startup error is returned.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Created {
            return Err(SessionError::AlreadyStarted);
        }
        self.state = SessionState::Starting;
        tracing::info!(
            session = %self.id,
            display = %self.display,
            command = %self.command,
            terminal = %self.terminal,
            "starting session"
        );

        match self.start_children().await {
            Ok(()) => {
                self.state = SessionState::Running;
                tracing::info!(session = %self.id, display = %self.display, "session running");
                Ok(())
            }
            Err(e) => {
                tracing::error!(session = %self.id, display = %self.display, error = %e, "session failed to start");
                self.cleanup().await;
                Err(e)
            }
        }
    }

    async fn start_children(&mut self) -> Result<(), SessionError> {
        let config = Arc::clone(&self.config);
        let timing = &config.timing;
        let allocator = self.allocator.clone();
        let display = self.display;

        if allocator.in_use(display) {
            tracing::warn!(session = %self.id, display = %self.display, "display files already present before starting server");
        }

        let mut xvfb = Command::new(&config.tools.xvfb);
        xvfb.arg(self.display.to_string())
            .arg("-screen")
            .arg("0")
            .arg(format!("{}x{}", self.pixels, config.display.color_depth))
            .arg("-dpi")
            .arg(config.display.dpi.to_string())
            .args(["-ac", "+extension", "GLX"])
            .env("DISPLAY", self.display.to_string());
        let server = self
            .display_server
            .insert(ChildProcess::spawn("Xvfb", xvfb)?);
        let server_pid = server.pid();
        // Files that some other server created do not count as ready.
        server
            .await_startup(timing.display_settle(), timing.poll_interval(), || {
                server_pid.is_some_and(|pid| allocator.served_by(display, pid))
            })
            .await?;
        self.claim_display(server_pid)?;

        let mut xterm = Command::new(&config.tools.xterm);
        xterm
            .arg("-geometry")
            .arg(self.terminal.to_string())
            .arg("-fn")
            .arg(&config.terminal.font)
            .arg("-bg")
            .arg(&config.terminal.background)
            .arg("-fg")
            .arg(&config.terminal.foreground)
            .arg("-e")
            .arg(&self.command)
            .env("DISPLAY", self.display.to_string());
        let emulator = self
            .terminal_emulator
            .insert(ChildProcess::spawn("xterm", xterm)?);
        // No readiness signal for the window; wait the full settle interval
        // while still catching an early exit.
        emulator
            .await_startup(timing.terminal_settle(), timing.poll_interval(), || false)
            .await?;

        // A display server that lost a race for the display exits after the
        // terminal has been started against the winner.
        if let Some(server) = self.display_server.as_mut() {
            server.ensure_alive()?;
        }
        self.claim_display(server_pid)?;
        Ok(())
    }

    /// Record our display server as the display's owner if its lock file
    /// names it. A lock naming any other process means the display belongs
    /// to someone else.
    fn claim_display(&mut self, server_pid: Option<u32>) -> Result<(), SessionError> {
        match self.allocator.lock_owner(self.display) {
            Some(owner) if Some(owner) == server_pid => {
                self.display_owner = Some(owner);
                Ok(())
            }
            Some(owner) => Err(SessionError::DisplayTaken {
                display: self.display,
                owner,
            }),
            None => Ok(()),
        }
    }

    fn ensure_running(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Running => Ok(()),
            other => Err(SessionError::NotRunning(other)),
        }
    }

    fn locator(&self) -> WindowLocator<'_> {
        WindowLocator::new(
            &self.config.tools.xdotool,
            &self.config.window.strategies,
            self.display,
        )
    }

    /// Find the terminal emulator's window, if it can be seen yet.
    pub async fn locate_window(&self) -> Option<WindowId> {
        self.locator().locate().await
    }

    /// Deliver `input` to the terminal window and describe what was sent.
    pub async fn send_input(&self, input: &Input) -> Result<String, SessionError> {
        self.ensure_running()?;
        let dispatcher = InputDispatcher::new(
            self.locator(),
            &self.config.tools.xdotool,
            self.display,
            self.config.timing.focus_settle(),
        );
        let window = dispatcher.send(input).await?;
        tracing::info!(session = %self.id, %window, "{}", input.describe());
        Ok(input.describe())
    }

    pub async fn send_key(&self, key: &str) -> Result<String, SessionError> {
        self.send_input(&Input::Key(key.to_string())).await
    }

    pub async fn send_text(&self, text: &str) -> Result<String, SessionError> {
        self.send_input(&Input::Text(text.to_string())).await
    }

    /// Capture the whole display.
    ///
    /// Works whether or not the terminal window can be located, since the
    /// root window is what gets captured.
    pub async fn capture(&mut self) -> Result<Screenshot, SessionError> {
        self.ensure_running()?;
        let path = {
            let scratch = self.scratch_dir()?;
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            self.screenshot_seq += 1;
            scratch.join(format!("screenshot_{millis}_{}.png", self.screenshot_seq))
        };

        let image = ScreenshotCapturer::new(&self.config.tools.import, self.display)
            .capture(&path)
            .await?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        tracing::info!(session = %self.id, bytes = image.file_size, "captured screenshot");

        Ok(Screenshot {
            image_data: image.encode(),
            metadata: ScreenshotMetadata {
                timestamp,
                file_size: image.file_size,
                display_size: self.pixels.to_string(),
                terminal_size: self.terminal.to_string(),
                session_id: self.id.clone(),
            },
        })
    }

    /// The session's scratch directory, created on first use.
    fn scratch_dir(&mut self) -> Result<std::path::PathBuf, CaptureError> {
        if let Some(dir) = &self.scratch {
            return Ok(dir.path().to_path_buf());
        }
        let prefix = format!("termctl_{}_", self.id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match &self.config.sessions.scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(CaptureError::ScratchDir)?;
        let path = dir.path().to_path_buf();
        tracing::debug!(session = %self.id, path = %path.display(), "created scratch directory");
        self.scratch = Some(dir);
        Ok(path)
    }

    /// Stop both processes (terminal emulator first), release the display
    /// and remove the scratch directory.
    ///
    /// Never fails and may be called repeatedly; each process is stopped at
    /// most once.
    pub async fn cleanup(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        self.state = SessionState::Stopping;
        tracing::info!(session = %self.id, display = %self.display, "cleaning up session");
        let timeout = self.config.timing.stop_timeout();

        if let Some(emulator) = self.terminal_emulator.take() {
            emulator.terminate(timeout).await;
        }
        if let Some(server) = self.display_server.take() {
            server.terminate(timeout).await;
            if let Some(pid) = self.display_owner.take() {
                self.allocator.release(self.display, pid);
            }
            tokio::time::sleep(self.config.timing.post_cleanup()).await;
        }
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(e) = scratch.close() {
                tracing::warn!(session = %self.id, path = %path.display(), error = %e, "failed to remove scratch directory");
            }
        }

        self.state = SessionState::Stopped;
        tracing::info!(session = %self.id, "session stopped");
    }
}

/// Shared handle to a registered session. Calls on one session are
/// serialized by its lock.
pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Session {0} not found")]
    NotFound(String),
    #[error("session id already exists: {0}")]
    IdExists(String),
    #[error("maximum number of sessions reached ({0})")]
    MaxSessionsReached(usize),
    #[error("service is shutting down")]
    Closed,
}

struct RegistryInner {
    sessions: HashMap<String, SessionHandle>,
    max_sessions: usize,
    closed: bool,
}

/// Live sessions by id.
///
/// Only the request boundary inserts and removes entries; sessions never
/// touch the registry themselves.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                max_sessions,
                closed: false,
            })),
        }
    }

    /// **Advisory** capacity check, done before the expensive process
    /// startup. A concurrent launch can still fill the last slot first;
    /// [`insert`](Self::insert) is the authoritative check, and the caller
    /// must clean up a started session it could not insert.
    pub fn check_capacity(&self) -> Result<(), RegistryError> {
        let inner = self.inner.read();
        if inner.sessions.len() >= inner.max_sessions {
            return Err(RegistryError::MaxSessionsReached(inner.max_sessions));
        }
        Ok(())
    }

    /// Register a started session under `id`. Refused once the registry
    /// has been closed.
    pub fn insert(&self, id: &str, session: SessionHandle) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(RegistryError::Closed);
        }
        if inner.sessions.len() >= inner.max_sessions {
            return Err(RegistryError::MaxSessionsReached(inner.max_sessions));
        }
        if inner.sessions.contains_key(id) {
            return Err(RegistryError::IdExists(id.to_string()));
        }
        inner.sessions.insert(id.to_string(), session);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<SessionHandle, RegistryError> {
        self.inner
            .read()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn remove(&self, id: &str) -> Result<SessionHandle, RegistryError> {
        self.inner
            .write()
            .sessions
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Snapshot of all registered handles.
    pub fn list(&self) -> Vec<(String, SessionHandle)> {
        self.inner
            .read()
            .sessions
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting new sessions. Existing entries stay until drained.
    pub fn close(&self) {
        self.inner.write().closed = true;
    }

    /// Remove every session in one step, so nothing inserted afterwards is
    /// mistaken for part of the drained set.
    pub fn drain(&self) -> Vec<SessionHandle> {
        self.inner.write().sessions.drain().map(|(_, s)| s).collect()
    }

    /// Drain the registry and clean up every session concurrently. Returns
    /// how many sessions were torn down.
    pub async fn cleanup_all(&self) -> usize {
        let sessions = self.drain();
        let count = sessions.len();
        if count > 0 {
            tracing::info!(count, "cleaning up all sessions");
        }
        futures::future::join_all(sessions.into_iter().map(|session| async move {
            session.lock().await.cleanup().await;
        }))
        .await;
        count
    }
}
