// ABOUTME: Server process handle - spawn, poll and terminate one pooled server
//
// Owns a single child process for a pooled client. Polls exit status without
// blocking so liveness checks stay cheap, and terminates with SIGTERM followed
// by SIGKILL after a grace period. Restarting is the registry's job (a dead
// client is replaced on its next acquisition), so there is no retry logic here.

// Allow if-let/else patterns instead of map_or_else for readability
#![allow(clippy::option_if_let_else)]

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, error, info, warn};

/// Errors that can occur while managing a server process
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Process spawn failed
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// Command could not be resolved on PATH
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    /// Process already running
    #[error("Process already running with PID {0}")]
    AlreadyRunning(u32),

    /// Termination failed
    #[error("Failed to terminate process: {0}")]
    TerminateFailed(#[source] std::io::Error),

    /// Invalid command
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

/// Current state of a server process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process has not been started yet
    NotStarted,

    /// Process is running with the given PID
    Running {
        /// Process ID
        pid: u32,
    },

    /// Process exited normally with exit code
    Exited {
        /// Exit code from the process
        code: i32,
    },

    /// Process was terminated by a signal
    Signaled {
        /// Signal number that terminated the process
        signal: i32,
    },

    /// Process was stopped by us
    Stopped,

    /// Process status could not be determined
    Failed {
        /// Description of the failure
        reason: String,
    },
}

impl ProcessState {
    /// Returns true if the process is currently running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// One spawned server process and its stdio handles
pub struct ServerProcess {
    /// The child process (if running)
    child: Option<Child>,

    /// Child's stdin for JSON-RPC communication
    stdin: Option<ChildStdin>,

    /// Child's stdout for JSON-RPC communication
    stdout: Option<ChildStdout>,

    /// Current process state
    state: ProcessState,
}

impl Default for ServerProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerProcess {
    /// Create a handle with no process attached
    #[must_use]
    pub const fn new() -> Self {
        Self {
            child: None,
            stdin: None,
            stdout: None,
            state: ProcessState::NotStarted,
        }
    }

    /// Spawn the server
    ///
    /// The command is resolved on PATH first so a missing binary is reported
    /// as `CommandNotFound` rather than a bare I/O error.
    ///
    /// # Errors
    /// Returns error if a process is already running, the command is empty or
    /// unknown, or the spawn fails
    pub fn spawn(
        &mut self,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&Path>,
    ) -> Result<u32, ProcessError> {
        if let ProcessState::Running { pid } = self.state {
            return Err(ProcessError::AlreadyRunning(pid));
        }

        if command.trim().is_empty() {
            return Err(ProcessError::InvalidCommand(
                "Command cannot be empty".to_string(),
            ));
        }

        let program = which::which(command)
            .map_err(|_| ProcessError::CommandNotFound(command.to_string()))?;

        debug!(command = %program.display(), args = ?args, "Spawning server process");

        let mut process_cmd = Command::new(&program);
        process_cmd
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);

        if let Some(dir) = cwd {
            process_cmd.current_dir(dir);
        }

        let mut child = process_cmd.spawn().map_err(ProcessError::SpawnFailed)?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let pid = child.id().unwrap_or(0);

        info!(pid = pid, command = %command, "Server process spawned");

        self.child = Some(child);
        self.stdin = stdin;
        self.stdout = stdout;
        self.state = ProcessState::Running { pid };

        Ok(pid)
    }

    /// Poll the child without blocking and return the current state
    pub fn check_status(&mut self) -> ProcessState {
        if let Some(ref mut child) = self.child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let new_state = if let Some(code) = status.code() {
                        debug!(code = code, "Server process exited");
                        ProcessState::Exited { code }
                    } else {
                        #[cfg(unix)]
                        {
                            use std::os::unix::process::ExitStatusExt;
                            if let Some(signal) = status.signal() {
                                debug!(signal = signal, "Server process terminated by signal");
                                ProcessState::Signaled { signal }
                            } else {
                                ProcessState::Failed {
                                    reason: "Unknown termination".to_string(),
                                }
                            }
                        }
                        #[cfg(not(unix))]
                        {
                            ProcessState::Failed {
                                reason: "Unknown termination".to_string(),
                            }
                        }
                    };

                    self.state = new_state;
                    self.release_handles();
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "Failed to check process status");
                    self.state = ProcessState::Failed {
                        reason: format!("Status check failed: {e}"),
                    };
                }
            }
        }

        self.state.clone()
    }

    /// Gracefully terminate the process
    ///
    /// Sends SIGTERM, waits up to `grace`, then sends SIGKILL. Terminating a
    /// process that is not running is a no-op.
    ///
    /// # Errors
    /// Returns error if the final kill fails
    pub async fn terminate(&mut self, grace: Duration) -> Result<(), ProcessError> {
        let Some(ref mut child) = self.child else {
            return Ok(());
        };

        let pid = child.id().unwrap_or(0);
        info!(pid = pid, "Terminating server process");

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if pid > 0 {
                // Safe cast: pid is u32, fits in i32 for typical PIDs
                #[allow(clippy::cast_possible_wrap)]
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(_status)) => {
                debug!(pid = pid, "Server process terminated gracefully");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Error waiting for server process");
            }
            Err(_) => {
                warn!(pid = pid, "Server process did not terminate gracefully, sending SIGKILL");

                if let Err(e) = child.kill().await {
                    error!(error = %e, "Failed to kill server process");
                    return Err(ProcessError::TerminateFailed(e));
                }
            }
        }

        self.state = ProcessState::Stopped;
        self.release_handles();

        Ok(())
    }

    /// Send SIGKILL without waiting for the process to exit
    pub fn kill_now(&mut self) {
        if let Some(ref mut child) = self.child {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "start_kill failed, process likely already gone");
            }
        }
        self.state = ProcessState::Stopped;
        self.release_handles();
    }

    /// Take ownership of the child's stdin handle
    ///
    /// This can only be called once - subsequent calls return None.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Take ownership of the child's stdout handle
    ///
    /// This can only be called once - subsequent calls return None.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Check if the process is currently running (as of the last poll)
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Get a reference to the current process state
    #[must_use]
    pub const fn state(&self) -> &ProcessState {
        &self.state
    }

    fn release_handles(&mut self) {
        self.child = None;
        self.stdin = None;
        self.stdout = None;
    }
}
