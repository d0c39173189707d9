pub mod tools;

use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::Serialize;

use crate::service::{CaptureResponse, TerminalService};

use tools::{InputParams, LaunchParams, ListParams, SessionParams};

/// MCP front end for a [`TerminalService`].
///
/// Domain failures come back as successful tool results carrying an
/// `{"status": "error", ...}` payload; only malformed parameters are
/// protocol errors.
#[derive(Clone)]
pub struct TermctlMcpServer {
    service: TerminalService,
    tool_router: ToolRouter<TermctlMcpServer>,
}

impl TermctlMcpServer {
    pub fn new(service: TerminalService) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }
}

fn json_result<T: Serialize>(value: &T) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string(value).unwrap_or_default(),
    )])
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for TermctlMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "termctl".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Drive terminal programs on headless X displays: launch, type, \
                     press keys and take screenshots."
                        .to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Start a program with terminal_launch and keep the returned session_id. \
                 Send keystrokes with terminal_input (key) or text (input_text), look at \
                 the screen with terminal_capture, and always finish with terminal_close. \
                 terminal_list shows the live sessions."
                    .to_string(),
            ),
        }
    }
}

#[tool_router]
impl TermctlMcpServer {
    #[tool(description = "Launch a program in a new terminal on its own virtual X display. Returns the session_id used by the other tools, plus the command and terminal size.")]
    async fn terminal_launch(
        &self,
        Parameters(params): Parameters<LaunchParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let response = self
            .service
            .launch(params.command, params.width, params.height)
            .await;
        Ok(json_result(&response))
    }

    #[tool(description = "Send input to a terminal session. Provide either input_text (typed literally) or key (a key name such as Return, Tab, Escape, F3 or a chord like ctrl+c), not both.")]
    async fn terminal_input(
        &self,
        Parameters(params): Parameters<InputParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let response = self
            .service
            .input(&params.session_id, params.input_text, params.key)
            .await;
        Ok(json_result(&response))
    }

    #[tool(description = "Capture the terminal's display as a PNG screenshot. Returns the base64 image data with metadata (timestamp, file size, display and terminal size), and the image itself.")]
    async fn terminal_capture(
        &self,
        Parameters(params): Parameters<SessionParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let response = self.service.capture(&params.session_id).await;
        let mut content = vec![Content::text(
            serde_json::to_string(&response).unwrap_or_default(),
        )];
        if let CaptureResponse::Captured { image_data, .. } = &response {
            content.push(Content::image(image_data.clone(), "image/png"));
        }
        Ok(CallToolResult::success(content))
    }

    #[tool(description = "Close a terminal session: stop the program, its terminal and display, and delete its temporary files.")]
    async fn terminal_close(
        &self,
        Parameters(params): Parameters<SessionParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let response = self.service.close(&params.session_id).await;
        Ok(json_result(&response))
    }

    #[tool(description = "List live terminal sessions with their command, display, terminal size and state.")]
    async fn terminal_list(
        &self,
        #[allow(unused_variables)]
        Parameters(params): Parameters<ListParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let response = self.service.list().await;
        Ok(json_result(&response))
    }
}
