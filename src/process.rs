use std::ffi::OsStr;
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::display::DisplayId;

/// How long to wait for a dead child's stderr to hit EOF. A grandchild that
/// inherited the pipe can keep it open indefinitely.
const DIAGNOSTICS_READ_TIMEOUT: Duration = Duration::from_secs(1);

const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} failed to start ({status}): {diagnostics}")]
    EarlyExit {
        name: &'static str,
        status: ExitStatus,
        diagnostics: String,
    },

    #[error("failed to poll {name}: {source}")]
    Poll {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// A supervised long-lived child process (display server or terminal
/// emulator).
///
/// The child runs in its own process group so that termination reaches
/// whatever it spawned, and is killed on drop if it was never stopped
/// explicitly.
#[derive(Debug)]
pub struct ChildProcess {
    name: &'static str,
    child: Child,
    pid: Option<u32>,
}

impl ChildProcess {
    /// Spawn `command` with stdin/stdout discarded and stderr captured.
    pub fn spawn(name: &'static str, mut command: Command) -> Result<Self, ProcessError> {
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|source| ProcessError::Spawn { program, source })?;
        let pid = child.id();
        tracing::debug!(process = name, pid, "spawned child process");
        Ok(Self { name, child, pid })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the child to settle after spawning.
    ///
    /// Polls every `poll` until `ready` reports true or `settle` has elapsed,
    /// whichever comes first. If the child exits in the meantime its stderr is
    /// collected and returned as an [`ProcessError::EarlyExit`]. On success
    /// the remaining stderr is forwarded to the log in the background.
    pub async fn await_startup<F>(
        &mut self,
        settle: Duration,
        poll: Duration,
        mut ready: F,
    ) -> Result<(), ProcessError>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + settle;
        loop {
            let exited = self.child.try_wait().map_err(|source| ProcessError::Poll {
                name: self.name,
                source,
            })?;
            if let Some(status) = exited {
                let diagnostics = self.read_diagnostics().await;
                return Err(ProcessError::EarlyExit {
                    name: self.name,
                    status,
                    diagnostics,
                });
            }
            if ready() {
                tracing::debug!(process = self.name, pid = self.pid, "child reported ready");
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(process = self.name, pid = self.pid, "settle interval elapsed");
                break;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
        self.forward_stderr();
        Ok(())
    }

    /// Read whatever the (exited) child wrote to stderr.
    async fn read_diagnostics(&mut self) -> String {
        let Some(mut stderr) = self.child.stderr.take() else {
            return "no stderr output".to_string();
        };
        let mut buf = Vec::new();
        let _ = tokio::time::timeout(DIAGNOSTICS_READ_TIMEOUT, stderr.read_to_end(&mut buf)).await;
        let text = String::from_utf8_lossy(&buf).trim().to_string();
        if text.is_empty() {
            "no stderr output".to_string()
        } else {
            text
        }
    }

    /// Drain stderr into the log so a chatty child never blocks on a full pipe.
    fn forward_stderr(&mut self) {
        let Some(stderr) = self.child.stderr.take() else {
            return;
        };
        let name = self.name;
        let pid = self.pid;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(process = name, pid, "{line}");
            }
        });
    }

    /// Fail with [`ProcessError::EarlyExit`] if the child has exited since
    /// it was started.
    pub fn ensure_alive(&mut self) -> Result<(), ProcessError> {
        let exited = self.child.try_wait().map_err(|source| ProcessError::Poll {
            name: self.name,
            source,
        })?;
        match exited {
            Some(status) => Err(ProcessError::EarlyExit {
                name: self.name,
                status,
                diagnostics: "exited during startup".to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Stop the child: SIGTERM to its process group, wait up to `timeout`,
    /// then SIGKILL. Whatever is left in the group afterwards gets the same
    /// treatment, even when the child itself had already exited.
    ///
    /// Never fails. Problems are logged because teardown usually runs on a
    /// path that is already reporting a different error.
    pub async fn terminate(mut self, timeout: Duration) {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(process = self.name, pid = self.pid, %status, "child already exited");
                self.stop_group(timeout).await;
                return;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(process = self.name, pid = self.pid, error = %e, "failed to poll child before termination");
            }
        }

        self.signal(Signal::Terminate);
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(process = self.name, pid = self.pid, %status, "child terminated");
            }
            Ok(Err(e)) => {
                tracing::warn!(process = self.name, pid = self.pid, error = %e, "error waiting for child");
            }
            Err(_) => {
                tracing::warn!(
                    process = self.name,
                    pid = self.pid,
                    "{} didn't terminate gracefully, killing it",
                    self.name
                );
                self.signal(Signal::Kill);
                match tokio::time::timeout(timeout, self.child.kill()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(process = self.name, pid = self.pid, error = %e, "failed to kill child");
                    }
                    Err(_) => {
                        tracing::error!(process = self.name, pid = self.pid, "child survived SIGKILL");
                    }
                }
            }
        }
        self.stop_group(timeout).await;
    }

    /// Terminate any processes still in the child's group (such as the
    /// command a terminal emulator ran) once the child itself is gone.
    async fn stop_group(&mut self, timeout: Duration) {
        if !self.signal(Signal::Terminate) {
            return;
        }
        tracing::debug!(process = self.name, pid = self.pid, "signalled leftover process group");
        let deadline = Instant::now() + timeout;
        while self.group_alive() {
            if Instant::now() >= deadline {
                tracing::warn!(process = self.name, pid = self.pid, "process group survived SIGTERM, killing it");
                self.signal(Signal::Kill);
                return;
            }
            tokio::time::sleep(GROUP_POLL_INTERVAL).await;
        }
    }

    /// Signal the child's process group. Returns false if the group no
    /// longer exists (or cannot be signalled).
    fn signal(&mut self, signal: Signal) -> bool {
        let Some(pgid) = self.group_id() else {
            return false;
        };
        #[cfg(unix)]
        {
            let signo = match signal {
                Signal::Terminate => libc::SIGTERM,
                Signal::Kill => libc::SIGKILL,
            };
            if unsafe { libc::kill(-pgid, signo) } == 0 {
                return true;
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::warn!(process = self.name, pgid, error = %err, "failed to signal process group");
            }
            false
        }
        #[cfg(not(unix))]
        {
            let _ = (signal, pgid);
            self.child.start_kill().is_ok()
        }
    }

    fn group_alive(&self) -> bool {
        let Some(pgid) = self.group_id() else {
            return false;
        };
        #[cfg(unix)]
        {
            unsafe { libc::kill(-pgid, 0) == 0 }
        }
        #[cfg(not(unix))]
        {
            let _ = pgid;
            false
        }
    }

    /// The child leads its own group, so the group id is its PID.
    fn group_id(&self) -> Option<i32> {
        match self.pid {
            Some(pid) if pid != 0 && pid <= i32::MAX as u32 => Some(pid as i32),
            Some(pid) => {
                tracing::warn!(pid, "PID is 0 or exceeds i32::MAX, cannot send signal");
                None
            }
            None => None,
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // Dropped without `terminate`, e.g. when startup was abandoned.
        if matches!(self.child.try_wait(), Ok(None)) {
            tracing::debug!(process = self.name, pid = self.pid, "killing process group on drop");
            self.signal(Signal::Kill);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

/// Run a short-lived X11 helper (window query, input, capture) against
/// `display` and collect its output.
pub async fn run_helper<I, S>(program: &str, args: I, display: DisplayId) -> Result<Output, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(program)
        .args(args)
        .env("DISPLAY", display.to_string())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })
}

/// Human-readable diagnostics for a failed helper run.
pub fn diagnostics(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("{} with no stderr output", output.status)
    } else {
        stderr
    }
}

/// Check that `program` can be executed at all, by running it with a
/// harmless argument. Only a failure to spawn counts as unavailable.
pub async fn probe(program: &str, arg: &str) -> Result<(), std::io::Error> {
    Command::new(program)
        .arg(arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|_| ())
}
