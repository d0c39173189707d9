//! Request boundary: owns the session registry and turns every outcome of
//! the four terminal operations into a tagged response.
//!
//! Nothing here returns `Err`. Failures become the `Error` variant of the
//! operation's response with a human-readable message.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::display::TerminalSize;
use crate::input::Input;
use crate::screenshot::ScreenshotMetadata;
use crate::session::{RegistryError, Session, SessionError, SessionRegistry, SessionSummary};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("service is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LaunchResponse {
    Launched {
        session_id: String,
        command: String,
        width: u16,
        height: u16,
        display: String,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InputResponse {
    Sent { session_id: String, action: String },
    Error { error: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaptureResponse {
    Captured {
        session_id: String,
        /// Base64-encoded PNG.
        image_data: String,
        metadata: ScreenshotMetadata,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CloseResponse {
    Closed { session_id: String },
    Error { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
    pub sessions: Vec<SessionSummary>,
}

/// Turn a fallible operation into its response, logging the failure.
macro_rules! respond {
    ($op:literal, $result:expr, $response:ident) => {
        match $result {
            Ok(ok) => ok,
            Err(e) => {
                tracing::error!(operation = $op, error = %e, "request failed");
                $response::Error { error: e.to_string() }
            }
        }
    };
}

/// The four terminal operations plus listing, over one session registry.
///
/// Launches in progress are tracked so that [`shutdown`](Self::shutdown)
/// can abort them and tear down whatever they had started.
#[derive(Clone)]
pub struct TerminalService {
    sessions: SessionRegistry,
    config: Arc<Config>,
    shutdown: CancellationToken,
    launches: TaskTracker,
}

impl TerminalService {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            sessions: SessionRegistry::new(config.sessions.max_sessions),
            config,
            shutdown: CancellationToken::new(),
            launches: TaskTracker::new(),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Start `command` (default from config) in a new session of
    /// `width` x `height` cells.
    pub async fn launch(
        &self,
        command: Option<String>,
        width: Option<u16>,
        height: Option<u16>,
    ) -> LaunchResponse {
        let launch = self.launches.track_future(self.try_launch(command, width, height));
        respond!("launch", launch.await, LaunchResponse)
    }

    async fn try_launch(
        &self,
        command: Option<String>,
        width: Option<u16>,
        height: Option<u16>,
    ) -> Result<LaunchResponse, ServiceError> {
        if self.shutdown.is_cancelled() {
            return Err(ServiceError::ShuttingDown);
        }
        let limits = &self.config.terminal;
        let command = command.unwrap_or_else(|| limits.default_command.clone());
        if command.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("command must not be empty".into()));
        }
        let width = width.unwrap_or(limits.default_width);
        let height = height.unwrap_or(limits.default_height);
        if !(1..=limits.max_width).contains(&width) {
            return Err(ServiceError::InvalidRequest(format!(
                "width must be between 1 and {}, got {width}",
                limits.max_width
            )));
        }
        if !(1..=limits.max_height).contains(&height) {
            return Err(ServiceError::InvalidRequest(format!(
                "height must be between 1 and {}, got {height}",
                limits.max_height
            )));
        }

        // Advisory pre-check; the insert below is authoritative.
        self.sessions.check_capacity()?;

        let size = TerminalSize { cols: width, rows: height };
        let mut session = Session::new(command.clone(), size, Arc::clone(&self.config));
        let started = tokio::select! {
            result = session.start() => Some(result),
            _ = self.shutdown.cancelled() => None,
        };
        match started {
            Some(result) => result?,
            None => {
                tracing::warn!(session = %session.id(), "shutdown during launch, tearing session down");
                session.cleanup().await;
                return Err(ServiceError::ShuttingDown);
            }
        }

        let session_id = session.id().to_string();
        let display_name = session.display().to_string();
        let handle = Arc::new(tokio::sync::Mutex::new(session));
        if let Err(e) = self.sessions.insert(&session_id, Arc::clone(&handle)) {
            handle.lock().await.cleanup().await;
            return Err(e.into());
        }

        tracing::info!(session = %session_id, display = %display_name, %command, "launched terminal session");
        Ok(LaunchResponse::Launched {
            session_id,
            command,
            width,
            height,
            display: display_name,
        })
    }

    /// Send either `text` or `key` (exactly one) to a session.
    pub async fn input(
        &self,
        session_id: &str,
        text: Option<String>,
        key: Option<String>,
    ) -> InputResponse {
        respond!("input", self.try_input(session_id, text, key).await, InputResponse)
    }

    async fn try_input(
        &self,
        session_id: &str,
        text: Option<String>,
        key: Option<String>,
    ) -> Result<InputResponse, ServiceError> {
        let session = self.sessions.get(session_id)?;
        let input = match (text, key) {
            (Some(text), None) => Input::Text(text),
            (None, Some(key)) => Input::Key(key),
            (None, None) => {
                return Err(ServiceError::InvalidRequest(
                    "Must provide either input_text or key".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(ServiceError::InvalidRequest(
                    "Provide only one of input_text or key".into(),
                ))
            }
        };

        let action = session.lock().await.send_input(&input).await?;
        Ok(InputResponse::Sent {
            session_id: session_id.to_string(),
            action,
        })
    }

    /// Screenshot a session's display.
    pub async fn capture(&self, session_id: &str) -> CaptureResponse {
        respond!("capture", self.try_capture(session_id).await, CaptureResponse)
    }

    async fn try_capture(&self, session_id: &str) -> Result<CaptureResponse, ServiceError> {
        let session = self.sessions.get(session_id)?;
        let shot = session.lock().await.capture().await?;
        Ok(CaptureResponse::Captured {
            session_id: session_id.to_string(),
            image_data: shot.image_data,
            metadata: shot.metadata,
        })
    }

    /// Tear a session down and forget it.
    ///
    /// The entry is removed before cleanup runs, so a concurrent or repeated
    /// close reports the session as not found.
    pub async fn close(&self, session_id: &str) -> CloseResponse {
        respond!("close", self.try_close(session_id).await, CloseResponse)
    }

    async fn try_close(&self, session_id: &str) -> Result<CloseResponse, ServiceError> {
        let session = self.sessions.remove(session_id)?;
        session.lock().await.cleanup().await;
        tracing::info!(session = %session_id, "closed terminal session");
        Ok(CloseResponse::Closed {
            session_id: session_id.to_string(),
        })
    }

    /// Summaries of all registered sessions.
    ///
    /// A session busy with another call is reported once that call returns.
    pub async fn list(&self) -> ListResponse {
        let mut sessions = Vec::new();
        for (_, handle) in self.sessions.list() {
            let session = handle.lock().await;
            sessions.push((session.display().number(), session.summary()));
        }
        sessions.sort_by_key(|(display, _)| *display);
        ListResponse {
            sessions: sessions.into_iter().map(|(_, summary)| summary).collect(),
        }
    }

    /// Abort launches in progress, refuse new ones, and clean up every
    /// session. Used on shutdown.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.sessions.close();
        self.launches.close();
        if !self.launches.is_empty() {
            tracing::info!(count = self.launches.len(), "waiting for launches in progress");
        }
        self.launches.wait().await;
        let count = self.sessions.cleanup_all().await;
        tracing::info!(count, "all terminal sessions cleaned up");
    }
}
