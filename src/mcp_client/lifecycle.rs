//! Server process lifecycle management.
//!
//! A [`ChildProcess`] owns one spawned MCP server. Dropping it kills the
//! child; [`ChildProcess::terminate`] asks it to exit with SIGTERM and reaps
//! it in the background so shutdown never blocks on a misbehaving server.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::errors::McpError;
use super::types::ServerConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long a terminated server gets to exit before it is force-killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ─── ChildProcess ────────────────────────────────────────────────────────────

/// A running MCP server process.
#[derive(Debug)]
pub struct ChildProcess {
    server_name: String,
    child: Child,
}

/// Pipe ends held by the parent: the child's stdin and stdout.
pub type ChildPipes = (ChildStdin, ChildStdout);

impl ChildProcess {
    /// Spawn `config.command` with piped stdin/stdout and inherited stderr.
    ///
    /// `config.env` is merged into the inherited environment.
    pub fn spawn(config: &ServerConfig) -> Result<(Self, ChildPipes), McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        cmd.envs(&config.env);

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            #[allow(unused_imports)]
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: config.name.clone(),
            reason: e.to_string(),
        })?;

        // On either failure below `child` is dropped, which closes whatever
        // pipes were created and kills the process.
        let stdin = child.stdin.take().ok_or_else(|| McpError::SpawnFailed {
            name: config.name.clone(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::SpawnFailed {
            name: config.name.clone(),
            reason: "failed to capture stdout".into(),
        })?;

        tracing::debug!(
            server = %config.name,
            pid = ?child.id(),
            command = %config.command,
            "spawned MCP server process"
        );

        Ok((
            Self {
                server_name: config.name.clone(),
                child,
            },
            (stdin, stdout),
        ))
    }

    /// OS process id, if the process has not been reaped yet.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Request graceful termination without waiting for the exit.
    ///
    /// Sends SIGTERM (a hard kill on platforms without signals) and does a
    /// single non-blocking reap. A process still running afterwards is handed
    /// to a background task that force-kills it after [`SHUTDOWN_GRACE`].
    pub fn terminate(mut self) {
        self.signal_terminate();

        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(server = %self.server_name, %status, "server exited");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(server = %self.server_name, error = %e, "failed to poll server exit");
            }
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // No runtime to reap on; dropping `self` kills the child.
            return;
        };

        let Self {
            server_name,
            mut child,
        } = self;
        runtime.spawn(async move {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server = %server_name, %status, "server exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(server = %server_name, error = %e, "failed to reap server");
                }
                Err(_) => {
                    tracing::warn!(
                        server = %server_name,
                        grace_secs = SHUTDOWN_GRACE.as_secs(),
                        "server ignored SIGTERM, killing"
                    );
                    let _ = child.kill().await;
                }
            }
        });
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return;
        };
        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            tracing::debug!(server = %self.server_name, error = %e, "SIGTERM delivery failed");
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) {
        let _ = self.child.start_kill();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
