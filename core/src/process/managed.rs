//! Supervised external process
//!
//! A [`ManagedProcess`] wraps both control channels of an external process:
//! the OS handle (exit status, kill) and its TCP console port. A supervision task
//! owns the OS child and publishes the exit outcome on a watch channel, so any
//! number of [`ExitWatch`]es can await it while the owner keeps the kill switch.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::ProcessError;

/// Timeout for connecting to a process console
const CONSOLE_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// OS exit code (`None` if terminated by a signal or unknown)
    pub code: Option<i32>,
    /// Whether we killed it
    pub killed: bool,
}

impl ExitOutcome {
    /// Supervision was lost before an exit status could be observed.
    pub const UNKNOWN: Self = Self {
        code: None,
        killed: false,
    };

    pub fn success(&self) -> bool {
        !self.killed && self.code == Some(0)
    }
}

/// Awaitable exit of a [`ManagedProcess`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ExitWatch(watch::Receiver<Option<ExitOutcome>>);

impl ExitWatch {
    /// Exit outcome if the process already ended.
    pub fn outcome(&self) -> Option<ExitOutcome> {
        *self.0.borrow()
    }

    /// Resolves once the process has exited.
    pub async fn wait(mut self) -> ExitOutcome {
        match self.0.wait_for(Option::is_some).await {
            Ok(outcome) => {
                let outcome = *outcome;
                outcome.unwrap_or(ExitOutcome::UNKNOWN)
            }
            Err(_) => ExitOutcome::UNKNOWN,
        }
    }
}

/// Kill switch detached from the process handle (used by the keep-alive).
#[derive(Debug, Clone)]
pub struct KillHandle(CancellationToken);

impl KillHandle {
    pub fn kill(&self) {
        self.0.cancel();
    }
}

/// Running external process.
pub struct ManagedProcess {
    name: String,
    pid: Option<u32>,
    console: Option<SocketAddr>,
    exit: watch::Receiver<Option<ExitOutcome>>,
    kill: CancellationToken,
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("console", &self.console)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl ManagedProcess {
    /// Take ownership of a spawned child and supervise it.
    ///
    /// stdout/stderr (if piped) are forwarded to `tracing` line by line.
    /// Must be called from within a tokio runtime.
    pub fn supervise(
        name: impl Into<String>,
        mut child: Child,
        console: Option<SocketAddr>,
    ) -> Self {
        let name = name.into();
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            forward_output(name.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(name.clone(), "stderr", stderr);
        }

        let task_name = name.clone();
        let mut process = Self::from_task(name, console, move |kill| async move {
            let (status, killed) = tokio::select! {
                status = child.wait() => (status, false),
                _ = kill.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(process = %task_name, "Failed to kill process: {}", e);
                    }
                    (child.wait().await, true)
                }
            };

            match status {
                Ok(status) => ExitOutcome {
                    code: status.code(),
                    killed,
                },
                Err(e) => {
                    tracing::warn!(process = %task_name, "Failed to wait for process: {}", e);
                    ExitOutcome { code: None, killed }
                }
            }
        });
        process.pid = pid;
        process
    }

    /// Supervise an arbitrary exit future.
    ///
    /// `wait` receives the kill token and must resolve once the process is gone
    /// (promptly after the token is cancelled). [`supervise`](Self::supervise)
    /// is built on this; it also serves in-process stand-ins.
    pub fn from_task<F, Fut>(
        name: impl Into<String>,
        console: Option<SocketAddr>,
        wait: F,
    ) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ExitOutcome> + Send + 'static,
    {
        let name = name.into();
        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = CancellationToken::new();
        let waiter = wait(kill.clone());

        let log_name = name.clone();
        tokio::spawn(async move {
            let outcome = waiter.await;
            tracing::info!(
                process = %log_name,
                code = ?outcome.code,
                killed = outcome.killed,
                "Process exited"
            );
            let _ = exit_tx.send(Some(outcome));
        });

        Self {
            name,
            pid: None,
            console,
            exit: exit_rx,
            kill,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn console_addr(&self) -> Option<SocketAddr> {
        self.console
    }

    pub fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }

    pub fn exit_watch(&self) -> ExitWatch {
        ExitWatch(self.exit.clone())
    }

    pub fn kill_handle(&self) -> KillHandle {
        KillHandle(self.kill.clone())
    }

    /// Request termination. The exit outcome will report `killed`.
    pub fn kill(&self) {
        if self.is_alive() {
            tracing::info!(process = %self.name, "Killing process");
        }
        self.kill.cancel();
    }

    /// Write one newline-terminated command to the process console.
    pub async fn send(&self, command: &str) -> Result<(), ProcessError> {
        let addr = self
            .console
            .ok_or_else(|| ProcessError::NoConsole(self.name.clone()))?;
        if !self.is_alive() {
            return Err(ProcessError::NotRunning(self.name.clone()));
        }

        let mut stream = tokio::time::timeout(CONSOLE_CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ProcessError::ConsoleTimeout(addr))?
            .map_err(|source| ProcessError::Console { addr, source })?;

        let line = format!("{}\n", command);
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|source| ProcessError::Console { addr, source })?;
        stream
            .shutdown()
            .await
            .map_err(|source| ProcessError::Console { addr, source })?;

        tracing::debug!(process = %self.name, command, "Sent console command");
        Ok(())
    }
}

fn forward_output<R>(name: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tracing::debug!(process = %name, stream, "{}", line),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(process = %name, stream, "Output closed: {}", e);
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Process stand-in that exits when `exit` fires or when killed.
    fn fake_process(console: Option<SocketAddr>) -> (ManagedProcess, oneshot::Sender<i32>) {
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        let process = ManagedProcess::from_task("fake", console, |kill| async move {
            tokio::select! {
                code = exit_rx => ExitOutcome { code: code.ok(), killed: false },
                _ = kill.cancelled() => ExitOutcome { code: None, killed: true },
            }
        });
        (process, exit_tx)
    }

    #[tokio::test]
    async fn test_exit_watch_reports_code() {
        let (process, exit) = fake_process(None);
        assert!(process.is_alive());
        let watch = process.exit_watch();

        exit.send(3).unwrap();
        let outcome = watch.wait().await;
        assert_eq!(outcome, ExitOutcome { code: Some(3), killed: false });
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_kill_handle_terminates() {
        let (process, _exit) = fake_process(None);
        let watch = process.exit_watch();
        process.kill_handle().kill();

        let outcome = watch.wait().await;
        assert!(outcome.killed);
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_send_writes_line_to_console() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (process, _exit) = fake_process(Some(addr));

        let reader = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            socket.read_to_string(&mut received).await.unwrap();
            received
        });

        process.send("launch").await.unwrap();
        assert_eq!(reader.await.unwrap(), "launch\n");
    }

    #[tokio::test]
    async fn test_send_without_console_fails() {
        let (process, _exit) = fake_process(None);
        assert!(matches!(
            process.send("quit").await,
            Err(ProcessError::NoConsole(_))
        ));
    }

    #[tokio::test]
    async fn test_send_after_exit_fails() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let (process, exit) = fake_process(Some(addr));
        let watch = process.exit_watch();
        exit.send(0).unwrap();
        watch.wait().await;

        assert!(matches!(
            process.send("quit").await,
            Err(ProcessError::NotRunning(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_real_child() {
        let child = tokio::process::Command::new("sh")
            .args(["-c", "exit 7"])
            .spawn()
            .unwrap();
        let process = ManagedProcess::supervise("sh", child, None);
        assert!(process.pid().is_some());

        let outcome = process.exit_watch().wait().await;
        assert_eq!(outcome.code, Some(7));
        assert!(!outcome.killed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_real_child() {
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let process = ManagedProcess::supervise("sleep", child, None);
        let watch = process.exit_watch();

        process.kill();
        let outcome = tokio::time::timeout(Duration::from_secs(5), watch.wait())
            .await
            .unwrap();
        assert!(outcome.killed);
        assert_eq!(outcome.code, None);
    }
}
