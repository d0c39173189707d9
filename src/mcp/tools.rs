// MCP tool parameter types

use serde::Deserialize;

/// Parameters for the `terminal_launch` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct LaunchParams {
    /// Command to run inside the terminal. Defaults to the configured shell.
    #[schemars(description = "Command to run in the terminal. Defaults to bash.")]
    pub command: Option<String>,

    /// Terminal width in character cells. Defaults to 80.
    #[schemars(description = "Terminal width in characters. Defaults to 80.")]
    pub width: Option<u16>,

    /// Terminal height in character cells. Defaults to 24.
    #[schemars(description = "Terminal height in characters. Defaults to 24.")]
    pub height: Option<u16>,
}

/// Parameters for the `terminal_input` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct InputParams {
    #[schemars(description = "ID of the terminal session, as returned by terminal_launch.")]
    pub session_id: String,

    /// Literal text to type.
    #[serde(alias = "text")]
    #[schemars(description = "Text to type, character by character. Provide either this or key.")]
    pub input_text: Option<String>,

    /// Key or chord in keysym syntax.
    #[schemars(description = "Special key or chord to press, e.g. Return, Tab, Escape, F3, ctrl+c. Provide either this or input_text.")]
    pub key: Option<String>,
}

/// Parameters for tools that only address a session
/// (`terminal_capture`, `terminal_close`).
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SessionParams {
    #[schemars(description = "ID of the terminal session, as returned by terminal_launch.")]
    pub session_id: String,
}

/// Parameters for the `terminal_list` tool.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct ListParams {}
