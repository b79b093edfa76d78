/// Lifecycle supervision for a single external process: spawn with piped
/// stdio, forward output to logs, answer liveness probes, and shut down
/// gracefully with a bounded SIGTERM-then-SIGKILL escalation.
use crate::config::WardenConfig;
use crate::secrets::{install_secrets, SecretsError, SecretsRecord};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

/// How a supervised process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Process exit code (None if killed by signal).
    pub code: Option<i32>,
    /// Terminating signal number, if any.
    pub signal: Option<i32>,
}

impl ProcessExit {
    pub fn normal(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with code {}", code),
            (None, Some(signal)) => write!(f, "killed by signal {}", signal),
            (None, None) => write!(f, "terminated with unknown status"),
        }
    }
}

/// Ownership token for the one running process.
///
/// The exit watcher task publishes the exit status on the watch channel;
/// the handle itself is only ever touched by `Supervisor` methods.
#[derive(Debug)]
struct ProcessHandle {
    pid: u32,
    killed: bool,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

/// Errors that can occur while starting or stopping the process.
#[derive(Debug)]
pub enum SupervisorError {
    /// `start` was called while a process is already live.
    AlreadyRunning { pid: u32 },
    /// The OS failed to create the process.
    Spawn { source: std::io::Error },
    /// The process was observed dead within the startup grace window.
    StartupFailed { exit: ProcessExit },
    /// Failed to deliver a termination signal.
    Signal {
        signal: &'static str,
        source: Errno,
    },
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::AlreadyRunning { pid } => {
                write!(f, "a supervised process is already running (pid {})", pid)
            }
            SupervisorError::Spawn { source } => {
                write!(f, "failed to spawn supervised process: {}", source)
            }
            SupervisorError::StartupFailed { exit } => {
                write!(f, "process died during startup grace window: {}", exit)
            }
            SupervisorError::Signal { signal, source } => {
                write!(f, "failed to send {}: {}", signal, source)
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Spawn { source } => Some(source),
            SupervisorError::Signal { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Supervises at most one external process at a time.
pub struct Supervisor {
    config: WardenConfig,
    handle: Option<ProcessHandle>,
}

impl Supervisor {
    pub fn new(config: WardenConfig) -> Self {
        Self {
            config,
            handle: None,
        }
    }

    /// Install secrets into the configured config file. Run once per
    /// deployment, before `start`.
    pub fn configure(&self, secrets: &SecretsRecord) -> Result<(), SecretsError> {
        tracing::info!(
            path = %self.config.secrets.config_path.display(),
            "installing secrets for {}", self.config.process.name
        );
        install_secrets(
            secrets,
            &self.config.secrets.config_path,
            &self.config.secrets.placeholders,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "failed to install secrets");
            e
        })
    }

    /// Spawn the configured process and wait out the startup grace window.
    ///
    /// The grace wait is a best-effort liveness check, not a readiness
    /// probe: a process that crashes after the window is only caught by
    /// later `is_healthy` calls.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        if let Some(handle) = &self.handle {
            if handle.exit_rx.borrow().is_none() && !handle.killed {
                tracing::warn!(pid = handle.pid, "start called while process is live");
                return Err(SupervisorError::AlreadyRunning { pid: handle.pid });
            }
            // Previous process already exited; its handle can be replaced.
            self.handle = None;
        }

        let name = self.config.process.name.clone();
        tracing::info!(
            command = %self.config.process.command,
            args = ?self.config.process.args,
            cwd = %self.config.process.working_dir.display(),
            "starting {} process", name
        );

        let mut child = Command::new(&self.config.process.command)
            .args(&self.config.process.args)
            .current_dir(&self.config.process.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0) // New process group for clean kill
            .spawn()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to start {} process", name);
                SupervisorError::Spawn { source: e }
            })?;

        let pid = child.id().unwrap_or(0);
        tracing::info!(pid, "{} process spawned", name);

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, name.clone(), false);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, name.clone(), true);
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let watcher_name = name.clone();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ProcessExit {
                    code: status.code(),
                    signal: status.signal(),
                },
                Err(e) => {
                    tracing::error!(error = %e, "failed to wait for {} process", watcher_name);
                    ProcessExit {
                        code: None,
                        signal: None,
                    }
                }
            };
            if exit.normal() {
                tracing::info!(pid, "{} process exited normally", watcher_name);
            } else {
                tracing::error!(
                    pid,
                    code = ?exit.code,
                    signal = ?exit.signal,
                    "{} process exited abnormally", watcher_name
                );
            }
            let _ = exit_tx.send(Some(exit));
        });

        self.handle = Some(ProcessHandle {
            pid,
            killed: false,
            exit_rx,
        });

        tokio::time::sleep(Duration::from_millis(self.config.startup.grace_period_ms)).await;

        let exited = self.handle.as_ref().and_then(|h| *h.exit_rx.borrow());
        if let Some(exit) = exited {
            self.handle = None;
            tracing::error!(pid, %exit, "{} process died during startup grace window", name);
            return Err(SupervisorError::StartupFailed { exit });
        }

        tracing::info!(pid, "{} process started successfully", name);
        Ok(())
    }

    /// OS-level liveness only: the process exists and has not terminated.
    /// Never errors; any fault degrades to `false`.
    pub fn is_healthy(&self) -> bool {
        match &self.handle {
            None => false,
            Some(handle) => !handle.killed && handle.exit_rx.borrow().is_none(),
        }
    }

    /// Pid of the supervised process, if one is held.
    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(|h| h.pid)
    }

    /// Graceful shutdown: SIGTERM the process group, wait up to the
    /// shutdown timeout for the exit notification, then SIGKILL.
    ///
    /// Always completes in bounded time and always clears the handle,
    /// clearing last so every terminal path observes it.
    pub async fn stop(&mut self) -> Result<(), SupervisorError> {
        let result = self.shutdown_inner().await;
        self.handle = None;
        result
    }

    async fn shutdown_inner(&mut self) -> Result<(), SupervisorError> {
        let name = self.config.process.name.clone();
        let Some(handle) = self.handle.as_mut() else {
            tracing::debug!("stop called with no {} process", name);
            return Ok(());
        };
        if handle.killed {
            tracing::debug!(pid = handle.pid, "{} process was already killed", name);
            return Ok(());
        }
        if handle.exit_rx.borrow().is_some() {
            tracing::info!(pid = handle.pid, "{} process already exited", name);
            return Ok(());
        }

        let pid = handle.pid;
        tracing::info!(pid, "stopping {} process", name);
        let pgid = Pid::from_raw(pid as i32);

        match killpg(pgid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                // Process group already gone
                tracing::info!(pid, "{} process already gone", name);
                return Ok(());
            }
            Err(e) => {
                tracing::error!(pid, error = %e, "failed to signal {} process", name);
                return Err(SupervisorError::Signal {
                    signal: "SIGTERM",
                    source: e,
                });
            }
        }

        let timeout = Duration::from_secs(self.config.shutdown.timeout_secs);
        match tokio::time::timeout(timeout, handle.exit_rx.wait_for(|e| e.is_some())).await {
            Ok(Ok(_)) => {
                tracing::info!(pid, "{} process exited gracefully", name);
            }
            Ok(Err(_)) => {
                // Watcher dropped its sender; the process is gone either way
                tracing::debug!(pid, "exit watcher gone, treating {} as exited", name);
            }
            Err(_) => {
                tracing::warn!(
                    pid,
                    timeout_secs = self.config.shutdown.timeout_secs,
                    "graceful shutdown timeout, forcing kill"
                );
                handle.killed = true;
                match killpg(pgid, Signal::SIGKILL) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(e) => {
                        tracing::error!(pid, error = %e, "failed to kill {} process", name);
                        return Err(SupervisorError::Signal {
                            signal: "SIGKILL",
                            source: e,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Pump one child pipe into tracing, line by line. Delivery is FIFO per
/// stream; no ordering is guaranteed between stdout and stderr.
fn forward_lines<R>(reader: R, name: String, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                tracing::error!(stream = "stderr", "{}: {}", name, line);
            } else {
                tracing::info!(stream = "stdout", "{}: {}", name, line);
            }
        }
    });
}
