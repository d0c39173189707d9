#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Shell-script stand-ins for Xvfb, xterm, xdotool and import, plus a config
/// file pointing `termctl` at them and at private display/scratch dirs.
pub struct FakeTools {
    pub dir: tempfile::TempDir,
    pub config_path: PathBuf,
}

impl FakeTools {
    pub fn new() -> Self {
        Self::build(true, 100)
    }

    /// `working_import: false` configures an import path that does not exist.
    pub fn with_import(working_import: bool) -> Self {
        Self::build(working_import, 100)
    }

    /// Fake tools whose terminal takes `terminal_settle` ms to come up.
    pub fn with_terminal_settle(terminal_settle: u64) -> Self {
        Self::build(true, terminal_settle)
    }

    fn build(working_import: bool, terminal_settle: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let x11 = root.join("x11");
        let scratch = root.join("scratch");
        std::fs::create_dir_all(&x11).unwrap();
        std::fs::create_dir_all(&scratch).unwrap();
        let r = root.display();
        let x = x11.display();

        let xvfb = write_script(
            root,
            "Xvfb",
            &format!(
                "case \"$1\" in :*) ;; *) exit 0 ;; esac\n\
                 num=\"${{1#:}}\"\n\
                 if ! ( set -C; printf '%10d\\n' $$ > \"{x}/.X$num-lock\" ) 2>/dev/null; then\n\
                 sleep 0.1; echo \"(EE) Server is already active for display $1\" >&2; exit 1\n\
                 fi\n\
                 touch \"{x}/X$num\"\n\
                 exec sleep 600\n"
            ),
        );
        let xterm = write_script(
            root,
            "xterm",
            "[ \"$1\" = \"-version\" ] && exit 0\nexec sleep 600\n",
        );
        let xdotool = write_script(
            root,
            "xdotool",
            &format!(
                "case \"$1\" in\n\
                 search) echo 4194317 ;;\n\
                 windowfocus|key|type) echo \"$*\" >> \"{r}/input.log\" ;;\n\
                 *) exit 0 ;;\n\
                 esac\n"
            ),
        );
        let import = if working_import {
            write_script(
                root,
                "import",
                &format!(
                    "[ \"$1\" = \"-version\" ] && exit 0\n\
                     for last; do :; done\n\
                     {{ printf 'PNG'; cat \"{r}/input.log\" 2>/dev/null || true; }} > \"$last\"\n"
                ),
            )
        } else {
            root.join("no-such-import").display().to_string()
        };

        let config = format!(
            r#"[tools]
xvfb = "{xvfb}"
xterm = "{xterm}"
xdotool = "{xdotool}"
import = "{import}"

[display]
socket_dir = "{x}"
lock_dir = "{x}"

[timing]
display_settle = 500
terminal_settle = {terminal_settle}
focus_settle = 5
stop_timeout = 1000
poll_interval = 10
post_cleanup = 0

[sessions]
scratch_dir = "{scratch}"
"#,
            scratch = scratch.display(),
        );
        let config_path = root.join("config.toml");
        std::fs::write(&config_path, config).unwrap();

        Self { dir, config_path }
    }

    pub fn x11_dir(&self) -> PathBuf {
        self.dir.path().join("x11")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    /// PID written into the fake display server's lock file for `:number`.
    pub fn display_server_pid(&self, number: u32) -> Option<i32> {
        std::fs::read_to_string(self.x11_dir().join(format!(".X{number}-lock")))
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    pub fn input_log(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("input.log"))
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

/// True while `pid` exists and is not a zombie.
#[cfg(target_os = "linux")]
pub fn process_running(pid: i32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            stat.rsplit(')')
                .next()
                .map(|rest| !rest.trim_start().starts_with('Z'))
        })
        .unwrap_or(false)
}

pub fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

/// Start `termctl mcp` against the given config.
pub fn spawn_mcp(config: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_termctl"))
        .arg("mcp")
        .arg("--config")
        .arg(config)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn termctl mcp")
}

/// Send a JSON-RPC message over stdin using newline-delimited JSON framing.
pub fn send_jsonrpc(stdin: &mut impl Write, msg: &serde_json::Value) {
    let payload = serde_json::to_string(msg).unwrap();
    writeln!(stdin, "{}", payload).unwrap();
    stdin.flush().unwrap();
}

/// Read lines until a JSON-RPC response (has "jsonrpc" and "id") arrives.
pub fn read_jsonrpc(reader: &mut BufReader<impl std::io::Read>) -> serde_json::Value {
    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .expect("failed to read line from stdout");
        if bytes_read == 0 {
            panic!("unexpected EOF while reading JSON-RPC response from stdout");
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if json.get("jsonrpc").is_some() && json.get("id").is_some() {
                return json;
            }
        }
    }
}

/// Run the initialize handshake (request + initialized notification).
pub fn initialize(
    stdin: &mut impl Write,
    reader: &mut BufReader<impl std::io::Read>,
) -> serde_json::Value {
    send_jsonrpc(
        stdin,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "termctl-test", "version": "0.1"}
            }
        }),
    );
    let response = read_jsonrpc(reader);
    send_jsonrpc(
        stdin,
        &serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    );
    response
}

/// Call a tool and return the full JSON-RPC response.
pub fn call_tool(
    stdin: &mut impl Write,
    reader: &mut BufReader<impl std::io::Read>,
    id: u64,
    name: &str,
    arguments: serde_json::Value,
) -> serde_json::Value {
    send_jsonrpc(
        stdin,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments}
        }),
    );
    let response = read_jsonrpc(reader);
    assert_eq!(response["id"], id, "mismatched response: {response}");
    response
}

/// The JSON payload of a tool result's first (text) content block.
pub fn tool_payload(response: &serde_json::Value) -> serde_json::Value {
    let text = response["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| panic!("expected text content, got: {response}"));
    serde_json::from_str(text).expect("tool result is not JSON")
}

/// Run `body` on a thread, failing the test if it takes longer than `timeout`.
pub fn with_timeout<F>(timeout: Duration, body: F)
where
    F: FnOnce() + Send + 'static,
{
    let handle = std::thread::spawn(body);
    let start = std::time::Instant::now();
    while !handle.is_finished() {
        if start.elapsed() > timeout {
            panic!("test timed out after {:?}", timeout);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    if let Err(panic) = handle.join() {
        std::panic::resume_unwind(panic);
    }
}

/// Wait for a child to exit, killing it after `timeout`.
pub fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let start = std::time::Instant::now();
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return None;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
