use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde::Serialize;
use thiserror::Error;

use crate::display::DisplayId;
use crate::process::{diagnostics, run_helper, ProcessError};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to create scratch directory: {0}")]
    ScratchDir(#[source] std::io::Error),

    #[error(transparent)]
    Helper(#[from] ProcessError),

    #[error("Screenshot capture failed: {0}")]
    CommandFailed(String),

    #[error("Screenshot file was not created: {}", .0.display())]
    NotProduced(PathBuf),

    #[error("failed to read screenshot {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Metadata returned alongside every screenshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreenshotMetadata {
    /// Capture time, seconds since the Unix epoch.
    pub timestamp: u64,
    /// Size of the encoded image in bytes, before base64.
    pub file_size: u64,
    /// Virtual display size, `WIDTHxHEIGHT` in pixels.
    pub display_size: String,
    /// Terminal size, `COLSxROWS` in character cells.
    pub terminal_size: String,
    pub session_id: String,
}

/// A rendered screenshot, ready for transport.
#[derive(Debug, Clone, Serialize)]
pub struct Screenshot {
    /// Base64-encoded PNG.
    pub image_data: String,
    pub metadata: ScreenshotMetadata,
}

/// Raw capture result, before metadata is attached.
#[derive(Debug)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub file_size: u64,
}

impl CapturedImage {
    pub fn encode(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

/// Screenshot file on disk, removed on drop unless already removed.
struct ScratchFile {
    path: PathBuf,
    removed: bool,
}

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    async fn remove(&mut self) {
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove screenshot file");
            }
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Captures the root window of one display to PNG.
pub struct ScreenshotCapturer<'a> {
    import: &'a str,
    display: DisplayId,
}

impl<'a> ScreenshotCapturer<'a> {
    pub fn new(import: &'a str, display: DisplayId) -> Self {
        Self { import, display }
    }

    /// Capture the whole display into `path`, read it back and delete it.
    ///
    /// The file is gone when this returns, whether it succeeded or not.
    pub async fn capture(&self, path: &Path) -> Result<CapturedImage, CaptureError> {
        let mut file = ScratchFile::new(path.to_path_buf());
        tracing::debug!(display = %self.display, path = %path.display(), "taking screenshot");

        let output = run_helper(
            self.import,
            [OsStr::new("-window"), OsStr::new("root"), path.as_os_str()],
            self.display,
        )
        .await?;
        if !output.status.success() {
            return Err(CaptureError::CommandFailed(diagnostics(&output)));
        }
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(CaptureError::NotProduced(path.to_path_buf()));
        }

        let bytes = tokio::fs::read(path).await.map_err(|source| CaptureError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file_size = tokio::fs::metadata(path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(bytes.len() as u64);
        file.remove().await;

        Ok(CapturedImage { bytes, file_size })
    }
}
