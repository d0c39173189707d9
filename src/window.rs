use std::fmt;

use serde::{Deserialize, Serialize};

use crate::display::DisplayId;
use crate::process::run_helper;

/// Cap on how many window names are fetched when logging a failed lookup.
const MAX_LOGGED_WINDOWS: usize = 20;

/// One way of asking the window system for the terminal emulator's window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WindowStrategy {
    /// Match by WM_CLASS.
    Class(String),
    /// Match by window title.
    Name(String),
    /// Whatever window currently has focus.
    Active,
}

impl WindowStrategy {
    /// The stock xterm lookup order: both class capitalizations, then the
    /// title, then the focused window.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::Class("XTerm".into()),
            Self::Class("xterm".into()),
            Self::Name("xterm".into()),
            Self::Active,
        ]
    }

    fn args(&self) -> Vec<&str> {
        match self {
            Self::Class(class) => vec!["search", "--class", class],
            Self::Name(name) => vec!["search", "--name", name],
            Self::Active => vec!["getactivewindow"],
        }
    }
}

impl fmt::Display for WindowStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(class) => write!(f, "class {class}"),
            Self::Name(name) => write!(f, "name {name}"),
            Self::Active => write!(f, "active window"),
        }
    }
}

/// Opaque window handle as printed by the window tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowId(String);

impl WindowId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First window id in a tool's stdout, if any.
fn first_window(stdout: &[u8]) -> Option<WindowId> {
    String::from_utf8_lossy(stdout)
        .split_whitespace()
        .next()
        .map(|id| WindowId(id.to_string()))
}

/// Finds the terminal emulator's window on one display.
pub struct WindowLocator<'a> {
    xdotool: &'a str,
    strategies: &'a [WindowStrategy],
    display: DisplayId,
}

impl<'a> WindowLocator<'a> {
    pub fn new(xdotool: &'a str, strategies: &'a [WindowStrategy], display: DisplayId) -> Self {
        Self {
            xdotool,
            strategies,
            display,
        }
    }

    /// Try each strategy in order and return the first window found.
    ///
    /// When a strategy matches several windows the first one is used. A miss
    /// is not an error: right after startup the window may simply not be
    /// mapped yet, so this returns `None` and logs what *is* visible.
    pub async fn locate(&self) -> Option<WindowId> {
        for strategy in self.strategies {
            match run_helper(self.xdotool, strategy.args(), self.display).await {
                Ok(output) if output.status.success() => {
                    if let Some(window) = first_window(&output.stdout) {
                        tracing::debug!(display = %self.display, %window, %strategy, "found window");
                        return Some(window);
                    }
                    tracing::debug!(display = %self.display, %strategy, "lookup matched nothing");
                }
                Ok(output) => {
                    tracing::debug!(display = %self.display, %strategy, status = %output.status, "lookup failed");
                }
                Err(e) => {
                    tracing::debug!(display = %self.display, %strategy, error = %e, "lookup failed");
                }
            }
        }

        self.log_visible_windows().await;
        None
    }

    async fn log_visible_windows(&self) {
        let ids = match run_helper(self.xdotool, ["search", "--onlyvisible", "--name", ""], self.display).await {
            Ok(output) => String::from_utf8_lossy(&output.stdout)
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>(),
            Err(e) => {
                tracing::warn!(display = %self.display, error = %e, "no window found and listing windows failed");
                return;
            }
        };

        let mut described = Vec::with_capacity(ids.len().min(MAX_LOGGED_WINDOWS));
        for id in ids.iter().take(MAX_LOGGED_WINDOWS) {
            let name = run_helper(self.xdotool, ["getwindowname", id.as_str()], self.display)
                .await
                .ok()
                .filter(|output| output.status.success())
                .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
                .unwrap_or_default();
            described.push(format!("{id} {name:?}"));
        }
        tracing::warn!(
            display = %self.display,
            visible = ids.len(),
            windows = ?described,
            "no terminal window found"
        );
    }
}
