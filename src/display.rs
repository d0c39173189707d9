use std::fmt;
use std::path::PathBuf;

use crate::config::DisplayConfig;

/// An X display number, rendered as `:<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayId(u32);

impl DisplayId {
    pub fn new(number: u32) -> Self {
        Self(number)
    }

    pub fn number(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

/// Terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Virtual display size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    /// Approximate the pixel area needed to show a terminal of `size` cells,
    /// never going below the configured minimum screen.
    pub fn for_terminal(size: TerminalSize, config: &DisplayConfig) -> Self {
        Self {
            width: config.min_width.max(u32::from(size.cols) * config.cell_width),
            height: config.min_height.max(u32::from(size.rows) * config.cell_height),
        }
    }
}

impl fmt::Display for PixelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Picks unused display numbers by probing the X server socket and lock files.
///
/// The probe is a check-then-use: two allocations racing each other can pick
/// the same number. The loser's display server refuses to bind and the
/// session start fails with its diagnostics, so no lock is taken here.
#[derive(Debug, Clone)]
pub struct DisplayAllocator {
    first: u32,
    candidates: u32,
    socket_dir: PathBuf,
    lock_dir: PathBuf,
}

impl DisplayAllocator {
    pub fn new(config: &DisplayConfig) -> Self {
        Self {
            first: config.first,
            candidates: config.candidates,
            socket_dir: config.socket_dir.clone(),
            lock_dir: config.lock_dir.clone(),
        }
    }

    /// Path of the socket an X server listens on for `display`.
    pub fn socket_path(&self, display: DisplayId) -> PathBuf {
        self.socket_dir.join(format!("X{}", display.number()))
    }

    /// Path of the lock file an X server holds for `display`.
    pub fn lock_path(&self, display: DisplayId) -> PathBuf {
        self.lock_dir.join(format!(".X{}-lock", display.number()))
    }

    /// True if some X server appears to own `display`.
    pub fn in_use(&self, display: DisplayId) -> bool {
        self.socket_path(display).exists() || self.lock_path(display).exists()
    }

    /// PID recorded in the display's lock file, if it holds one.
    ///
    /// X servers write their PID as decimal text padded with spaces.
    pub fn lock_owner(&self, display: DisplayId) -> Option<u32> {
        std::fs::read_to_string(self.lock_path(display))
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// True once the server with `pid` holds the lock for `display` and has
    /// created its socket.
    pub fn served_by(&self, display: DisplayId, pid: u32) -> bool {
        self.lock_owner(display) == Some(pid) && self.socket_path(display).exists()
    }

    /// Return the first display in the probed range that nothing claims.
    ///
    /// When the whole range is taken, returns the number just past it and
    /// logs a warning rather than failing.
    pub fn allocate(&self) -> DisplayId {
        let end = self.first.saturating_add(self.candidates);
        for number in self.first..end {
            let candidate = DisplayId::new(number);
            if !self.in_use(candidate) {
                tracing::debug!(display = %candidate, "found free display");
                return candidate;
            }
        }

        let fallback = DisplayId::new(end);
        tracing::warn!(
            first = self.first,
            last = end.saturating_sub(1),
            display = %fallback,
            "all probed displays appear taken, using fallback"
        );
        fallback
    }

    /// Remove lock and socket files left behind for `display` by the stopped
    /// server `pid`.
    ///
    /// Nothing is touched if the lock now names a different process, since
    /// another server has taken the display over. Missing files are not an
    /// error.
    pub fn release(&self, display_id: DisplayId, pid: u32) {
        if let Some(owner) = self.lock_owner(display_id) {
            if owner != pid {
                tracing::warn!(
                    display = %display_id,
                    pid,
                    owner,
                    "display lock belongs to another server, leaving it in place"
                );
                return;
            }
        }
        for path in [self.lock_path(display_id), self.socket_path(display_id)] {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(display = %display_id, path = %path.display(), "removed stale display file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(display = %display_id, path = %path.display(), error = %e, "failed to remove display file")
                }
            }
        }
    }
}
