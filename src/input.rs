use std::time::Duration;

use thiserror::Error;

use crate::display::DisplayId;
use crate::process::{diagnostics, run_helper, ProcessError};
use crate::window::{WindowId, WindowLocator};

#[derive(Error, Debug)]
pub enum InputError {
    #[error("No xterm window found on display {0}")]
    NoWindow(DisplayId),

    #[error(transparent)]
    Helper(#[from] ProcessError),

    #[error("failed to {action} on window {window}: {diagnostics}")]
    Rejected {
        action: &'static str,
        window: WindowId,
        diagnostics: String,
    },
}

/// Synthetic input for the program running in a session's terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A key or chord in keysym syntax, e.g. `Return`, `F3`, `ctrl+c`.
    Key(String),
    /// Literal text, typed character by character.
    Text(String),
}

impl Input {
    /// Short description of what was sent, for responses and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Key(key) => format!("sent key: {key}"),
            Self::Text(text) => format!("typed text: {text}"),
        }
    }

    fn command(&self) -> (&'static str, &str) {
        match self {
            Self::Key(key) => ("key", key),
            Self::Text(text) => ("type", text),
        }
    }
}

/// Delivers input to the terminal window of one display.
pub struct InputDispatcher<'a> {
    locator: WindowLocator<'a>,
    xdotool: &'a str,
    display: DisplayId,
    focus_settle: Duration,
}

impl<'a> InputDispatcher<'a> {
    pub fn new(
        locator: WindowLocator<'a>,
        xdotool: &'a str,
        display: DisplayId,
        focus_settle: Duration,
    ) -> Self {
        Self {
            locator,
            xdotool,
            display,
            focus_settle,
        }
    }

    /// Locate the window, focus it, then send `input` addressed to that
    /// window. Returns the window that received the input.
    ///
    /// A missing window is an error here, with no retry.
    pub async fn send(&self, input: &Input) -> Result<WindowId, InputError> {
        let window = self
            .locator
            .locate()
            .await
            .ok_or(InputError::NoWindow(self.display))?;

        let focus = run_helper(self.xdotool, ["windowfocus", window.as_str()], self.display).await?;
        if !focus.status.success() {
            // Input is still addressed to the window explicitly, so carry on.
            tracing::warn!(
                display = %self.display,
                %window,
                diagnostics = %diagnostics(&focus),
                "failed to focus window"
            );
        }

        // Focus changes are asynchronous; give the server time to apply it.
        tokio::time::sleep(self.focus_settle).await;

        let (action, payload) = input.command();
        let output = run_helper(
            self.xdotool,
            [action, "--window", window.as_str(), "--", payload],
            self.display,
        )
        .await?;
        if !output.status.success() {
            return Err(InputError::Rejected {
                action,
                window,
                diagnostics: diagnostics(&output),
            });
        }

        tracing::debug!(display = %self.display, %window, "{}", input.describe());
        Ok(window)
    }
}
