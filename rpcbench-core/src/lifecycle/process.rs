// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Backend server process management.
//!
//! Spawns a backend in its own process and waits for a line containing
//! `READY` on its stdout. A process that never becomes ready, or exits first,
//! is killed and reaped before the error is returned.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::error::LifecycleError;
use crate::server::READY_SIGNAL;
use crate::types::{Port, ServiceName, TransportKind};

/// Most recent output lines kept for startup error reports.
const MAX_CAPTURED_LINES: usize = 200;

/// Program and arguments of a backend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ServerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `<program> serve --kind K --port P [--register NAME --directory ADDR]`
    pub fn serve(
        program: impl Into<PathBuf>,
        kind: TransportKind,
        port: Port,
        registration: Option<(&ServiceName, SocketAddr)>,
    ) -> Self {
        let mut args = vec![
            "serve".to_string(),
            "--kind".to_string(),
            kind.to_string(),
            "--port".to_string(),
            port.to_string(),
        ];
        if let Some((name, directory)) = registration {
            args.extend([
                "--register".to_string(),
                name.to_string(),
                "--directory".to_string(),
                directory.to_string(),
            ]);
        }
        Self::new(program, args)
    }
}

/// A backend process, owned from spawn until it has been reaped.
pub struct ServerProcess {
    kind: TransportKind,
    child: Child,
    pid: u32,
    /// Output not yet handed to the drain task.
    output: Option<OutputLines<ChildStdout, ChildStderr>>,
    drain: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerProcess")
            .field("kind", &self.kind)
            .field("pid", &self.pid)
            .field("draining", &self.drain.is_some())
            .finish()
    }
}

/// Line readers over the child's stdout and stderr.
struct OutputLines<O, E> {
    stdout: Option<Lines<BufReader<O>>>,
    stderr: Option<Lines<BufReader<E>>>,
}

enum OutputLine {
    Stdout(String),
    Stderr(String),
    Closed,
}

impl<O, E> OutputLines<O, E>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    fn is_open(&self) -> bool {
        self.stdout.is_some() || self.stderr.is_some()
    }

    /// Next line from either stream. `Closed` once both have ended.
    async fn next(&mut self) -> OutputLine {
        loop {
            if !self.is_open() {
                return OutputLine::Closed;
            }
            let (from_stdout, line) = tokio::select! {
                line = next_line(&mut self.stdout), if self.stdout.is_some() => (true, line),
                line = next_line(&mut self.stderr), if self.stderr.is_some() => (false, line),
            };
            match (from_stdout, line) {
                (true, Some(line)) => return OutputLine::Stdout(line),
                (false, Some(line)) => return OutputLine::Stderr(line),
                (true, None) => self.stdout = None,
                (false, None) => self.stderr = None,
            }
        }
    }
}

async fn next_line<R: AsyncRead + Unpin>(lines: &mut Option<Lines<BufReader<R>>>) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

impl ServerProcess {
    /// Spawn `command` and wait up to `ready_timeout` for the READY line.
    pub async fn spawn(
        command: &ServerCommand,
        kind: TransportKind,
        ready_timeout: Duration,
    ) -> Result<Self, LifecycleError> {
        let mut process = Self::start(command, kind)?;
        process.wait_ready(ready_timeout).await?;
        Ok(process)
    }

    /// Spawn `command` without waiting for readiness.
    pub fn start(command: &ServerCommand, kind: TransportKind) -> Result<Self, LifecycleError> {
        tracing::debug!(
            program = %command.program.display(),
            args = ?command.args,
            "Spawning backend process"
        );

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LifecycleError::BackendStartup {
                kind,
                reason: format!("failed to spawn {}: {}", command.program.display(), e),
                output: Vec::new(),
            })?;

        let pid = child.id().unwrap_or_default();
        let output = OutputLines {
            stdout: child.stdout.take().map(|s| BufReader::new(s).lines()),
            stderr: child.stderr.take().map(|s| BufReader::new(s).lines()),
        };
        Ok(Self {
            kind,
            child,
            pid,
            output: Some(output),
            drain: None,
        })
    }

    /// Wait up to `ready_timeout` for a stdout line containing READY.
    ///
    /// On failure the process is killed and reaped before returning. If this
    /// future is dropped early the process stays owned by `self`, so
    /// [`terminate`](Self::terminate) still releases it.
    pub async fn wait_ready(&mut self, ready_timeout: Duration) -> Result<(), LifecycleError> {
        let kind = self.kind;
        let pid = self.pid;
        let Some(output) = self.output.as_mut() else {
            return Ok(());
        };
        let mut captured: VecDeque<String> = VecDeque::new();
        let deadline = tokio::time::Instant::now() + ready_timeout;

        let failure = loop {
            let line = tokio::select! {
                line = output.next() => line,
                _ = tokio::time::sleep_until(deadline) => {
                    break format!("no {} within {}ms", READY_SIGNAL, ready_timeout.as_millis());
                }
            };

            match line {
                OutputLine::Stdout(line) => {
                    let ready = line.contains(READY_SIGNAL);
                    capture(&mut captured, line);
                    if ready {
                        tracing::info!(kind = %kind, pid, "Backend process ready");
                        if let Some(output) = self.output.take() {
                            self.drain = Some(tokio::spawn(drain_output(output, kind, pid)));
                        }
                        return Ok(());
                    }
                }
                OutputLine::Stderr(line) => capture(&mut captured, line),
                OutputLine::Closed => {
                    // Both pipes closed: the process is exiting or has exited.
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    break match tokio::time::timeout(remaining, self.child.wait()).await {
                        Ok(Ok(status)) => format!("exited with {} before {}", status, READY_SIGNAL),
                        Ok(Err(e)) => format!("wait failed: {}", e),
                        Err(_) => format!(
                            "closed its output without {} and did not exit within {}ms",
                            READY_SIGNAL,
                            ready_timeout.as_millis()
                        ),
                    };
                }
            }
        };

        // Kill and reap so no orphan survives a failed handshake.
        if let Err(e) = self.child.kill().await {
            tracing::debug!(pid, error = %e, "Kill after failed startup");
        }
        self.output = None;

        let output: Vec<String> = captured.into_iter().collect();
        tracing::warn!(
            kind = %kind,
            pid,
            reason = %failure,
            captured_lines = output.len(),
            "Backend process failed to start"
        );

        Err(LifecycleError::BackendStartup {
            kind,
            reason: failure,
            output,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL. Always reaps; never fails.
    pub async fn terminate(&mut self, grace: Duration) {
        // pid 0 would signal our own process group
        if self.pid != 0 && self.is_running() {
            match kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
                Ok(()) => match tokio::time::timeout(grace, self.child.wait()).await {
                    Ok(Ok(status)) => {
                        tracing::debug!(pid = self.pid, status = %status, "Backend process exited");
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(pid = self.pid, error = %e, "Waiting for backend process failed");
                    }
                    Err(_) => {
                        tracing::warn!(
                            pid = self.pid,
                            grace_ms = grace.as_millis() as u64,
                            "Backend ignored SIGTERM, killing"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(pid = self.pid, error = %e, "SIGTERM delivery failed");
                }
            }
        }

        // Escalate if still alive; reaps either way.
        if self.is_running() {
            if let Err(e) = self.child.kill().await {
                tracing::warn!(pid = self.pid, error = %e, "Failed to kill backend process");
            }
        }

        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
        self.output = None;
    }
}

fn capture(captured: &mut VecDeque<String>, line: String) {
    if captured.len() == MAX_CAPTURED_LINES {
        captured.pop_front();
    }
    captured.push_back(line);
}

async fn drain_output<O, E>(mut output: OutputLines<O, E>, kind: TransportKind, pid: u32)
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    loop {
        match output.next().await {
            OutputLine::Stdout(line) => tracing::debug!(kind = %kind, pid, stream = "stdout", "{}", line),
            OutputLine::Stderr(line) => tracing::debug!(kind = %kind, pid, stream = "stderr", "{}", line),
            OutputLine::Closed => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ServerCommand {
        ServerCommand::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_serve_command_arguments() {
        let name = ServiceName::new("svc").unwrap();
        let directory: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        let cmd = ServerCommand::serve(
            "/bin/rpcbench",
            TransportKind::Broker,
            Port::new(4000).unwrap(),
            Some((&name, directory)),
        );
        assert_eq!(
            cmd.args,
            vec![
                "serve",
                "--kind",
                "broker",
                "--port",
                "4000",
                "--register",
                "svc",
                "--directory",
                "127.0.0.1:9090"
            ]
        );
    }

    #[tokio::test]
    async fn test_ready_handshake() {
        let mut process = ServerProcess::spawn(
            &sh("echo starting >&2; echo READY; exec sleep 30"),
            TransportKind::Framed,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(process.is_running());

        process.terminate(Duration::from_secs(2)).await;
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_early_exit_keeps_output() {
        let err = ServerProcess::spawn(
            &sh("echo 'bind failed' >&2; exit 3"),
            TransportKind::Framed,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        match err {
            LifecycleError::BackendStartup { reason, output, .. } => {
                assert!(reason.contains("exited"), "reason: {}", reason);
                assert_eq!(output, vec!["bind failed".to_string()]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = ServerProcess::spawn(
            &ServerCommand::new("/nonexistent/rpcbench-server", Vec::new()),
            TransportKind::Threaded,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LifecycleError::BackendStartup { .. }));
    }

    #[tokio::test]
    async fn test_sigterm_ignored_escalates_to_kill() {
        let mut process = ServerProcess::spawn(
            &sh("trap '' TERM; echo READY; while true; do sleep 1; done"),
            TransportKind::Threaded,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        process.terminate(Duration::from_millis(200)).await;
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_terminate_before_ready_reaps() {
        let mut process =
            ServerProcess::start(&sh("exec sleep 30"), TransportKind::Framed).unwrap();
        assert!(process.is_running());

        let waiting = tokio::time::timeout(
            Duration::from_millis(100),
            process.wait_ready(Duration::from_secs(30)),
        )
        .await;
        assert!(waiting.is_err());

        process.terminate(Duration::from_secs(2)).await;
        assert!(!process.is_running());
    }
}
