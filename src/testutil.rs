//! Shell-script stand-ins for Xvfb, xterm, xdotool and import.
//!
//! Each script reproduces the part of the real tool's contract a session
//! relies on: the display server creates its socket and lock files, the
//! terminal records the display it was pointed at, window searches answer
//! with fixed ids, and input is appended to a log that the fake `import`
//! folds into every screenshot it writes.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XvfbBehavior {
    /// Claim the lock file (writing its PID) and create the socket, then run
    /// until killed, leaving both behind. Like the real server it refuses a
    /// display whose lock already exists, exiting shortly after start.
    Serve,
    /// Run without ever creating a socket.
    Silent,
    /// Exit immediately complaining the display is taken.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XtermBehavior {
    Run,
    /// Ignore SIGTERM so teardown has to escalate.
    IgnoreTerm,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowBehavior {
    /// `search --class XTerm` finds two windows.
    Class,
    /// Only `search --name xterm` finds a window.
    NameOnly,
    /// Only `getactivewindow` answers.
    ActiveOnly,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportBehavior {
    Write,
    Fail,
    /// Exit 0 without writing anything.
    NoFile,
    /// Write a partial file, then fail.
    WriteThenFail,
}

pub struct FakeX11Builder {
    xvfb: XvfbBehavior,
    xterm: XtermBehavior,
    window: WindowBehavior,
    import: ImportBehavior,
}

impl FakeX11Builder {
    pub fn xvfb(mut self, behavior: XvfbBehavior) -> Self {
        self.xvfb = behavior;
        self
    }

    pub fn xterm(mut self, behavior: XtermBehavior) -> Self {
        self.xterm = behavior;
        self
    }

    pub fn window(mut self, behavior: WindowBehavior) -> Self {
        self.window = behavior;
        self
    }

    pub fn import(mut self, behavior: ImportBehavior) -> Self {
        self.import = behavior;
        self
    }

    pub fn build(self) -> FakeX11 {
        let dir = tempfile::tempdir().expect("failed to create fake X11 dir");
        let root = dir.path().to_path_buf();
        let x11 = root.join("x11");
        let scratch = root.join("scratch");
        std::fs::create_dir_all(&x11).unwrap();
        std::fs::create_dir_all(&scratch).unwrap();

        let root_s = root.display().to_string();
        let x11_s = x11.display().to_string();

        let xvfb = match self.xvfb {
            XvfbBehavior::Serve => format!(
                "num=\"${{1#:}}\"\n\
                 lock=\"{x11_s}/.X$num-lock\"\n\
                 if ! ( set -C; printf '%10d\\n' $$ > \"$lock\" ) 2>/dev/null; then\n\
                 sleep 0.1\n\
                 echo \"(EE) Fatal server error: Server is already active for display $1\" >&2\n\
                 exit 1\n\
                 fi\n\
                 printf '%s\\n' \"$*\" > \"{root_s}/xvfb.args\"\n\
                 touch \"{x11_s}/X$num\"\n\
                 exec sleep 600\n"
            ),
            XvfbBehavior::Silent => "exec sleep 600\n".to_string(),
            XvfbBehavior::Fail => "echo \"(EE) Fatal server error: Server is already active for display $1\" >&2\nexit 1\n".to_string(),
        };

        let xterm_record = format!(
            "printf '%s\\n' \"$DISPLAY\" > \"{root_s}/xterm.display\"\n\
             printf '%s\\n' \"$*\" > \"{root_s}/xterm.args\"\n"
        );
        let xterm = match self.xterm {
            XtermBehavior::Run => format!("{xterm_record}exec sleep 600\n"),
            XtermBehavior::IgnoreTerm => format!("trap '' TERM\n{xterm_record}exec sleep 600\n"),
            XtermBehavior::Fail => "echo \"xterm: Xt error: Can't open display: $DISPLAY\" >&2\nexit 1\n".to_string(),
        };

        let (search_match, search_result, active) = match self.window {
            WindowBehavior::Class => ("--class XTerm", "echo 4194317; echo 4194318", "exit 1"),
            WindowBehavior::NameOnly => ("--name xterm", "echo 6291469", "exit 1"),
            WindowBehavior::ActiveOnly => ("--none", "exit 1", "echo 777"),
            WindowBehavior::Missing => ("--none", "exit 1", "exit 1"),
        };
        let xdotool = format!(
            "log=\"{root_s}/input.log\"\n\
             case \"$1\" in\n\
             search)\n\
             if [ \"$2 $3\" = \"{search_match}\" ]; then {search_result}; exit 0; fi\n\
             if [ \"$2\" = \"--onlyvisible\" ]; then echo 123; exit 0; fi\n\
             exit 1 ;;\n\
             getactivewindow) {active} ;;\n\
             getwindowname) echo 'fake window' ;;\n\
             windowfocus|key|type) echo \"$*\" >> \"$log\" ;;\n\
             *) exit 1 ;;\n\
             esac\n"
        );

        let write_image = format!(
            "for last; do :; done\n\
             {{ printf 'PNG'; cat \"{root_s}/input.log\" 2>/dev/null || true; }} > \"$last\"\n"
        );
        let import = match self.import {
            ImportBehavior::Write => write_image,
            ImportBehavior::Fail => "echo 'import: unable to open X server' >&2\nexit 1\n".to_string(),
            ImportBehavior::NoFile => "exit 0\n".to_string(),
            ImportBehavior::WriteThenFail => format!("{write_image}echo 'import: write error' >&2\nexit 1\n"),
        };

        let mut config = Config::default();
        config.tools.xvfb = write_script(&root, "Xvfb", &xvfb);
        config.tools.xterm = write_script(&root, "xterm", &xterm);
        config.tools.xdotool = write_script(&root, "xdotool", &xdotool);
        config.tools.import = write_script(&root, "import", &import);
        config.display.socket_dir = x11.clone();
        config.display.lock_dir = x11;
        config.timing.display_settle = 300;
        config.timing.terminal_settle = 100;
        config.timing.focus_settle = 5;
        config.timing.stop_timeout = 1000;
        config.timing.poll_interval = 10;
        config.timing.post_cleanup = 0;
        config.sessions.scratch_dir = Some(scratch);

        FakeX11 { dir, config }
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

/// A temp directory of fake tools plus a [`Config`] pointing at them.
pub struct FakeX11 {
    dir: tempfile::TempDir,
    config: Config,
}

impl FakeX11 {
    pub fn builder() -> FakeX11Builder {
        FakeX11Builder {
            xvfb: XvfbBehavior::Serve,
            xterm: XtermBehavior::Run,
            window: WindowBehavior::Class,
            import: ImportBehavior::Write,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Directory holding the fake X sockets and lock files.
    pub fn x11_dir(&self) -> PathBuf {
        self.dir.path().join("x11")
    }

    /// Parent of the per-session scratch directories.
    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    /// Lines the fake xdotool recorded for focus/key/type commands.
    pub fn input_log(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("input.log"))
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Contents of a file the fake tools wrote, trimmed.
    pub fn recorded(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.dir.path().join(name))
            .ok()
            .map(|text| text.trim().to_string())
    }
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
