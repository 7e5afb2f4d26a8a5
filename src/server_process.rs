//! The monitored game-server process
//!
//! Backups and the java/server/plugin/mod updaters refuse to run while the server is up;
//! they only see it through [`ServerStatus`].

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::ServerConfig;

/// Poll step while waiting for the process to exit after the stop command
const EXIT_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("No server command configured")]
    NotConfigured,

    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotRunning,

    #[error("Failed to start server: {0}")]
    Spawn(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Read-only view of whether the server is up
pub trait ServerStatus: Send + Sync {
    fn is_running(&self) -> bool;
}

impl ServerStatus for AtomicBool {
    fn is_running(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// Spawns, feeds and stops the server
pub struct ServerProcess {
    config: ServerConfig,
    working_dir: PathBuf,
    child: Mutex<Option<Child>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    output: broadcast::Sender<String>,
}

impl ServerProcess {
    pub fn new(config: ServerConfig, working_dir: PathBuf) -> Self {
        let (output, _) = broadcast::channel(256);
        Self {
            config,
            working_dir,
            child: Mutex::new(None),
            stdin: tokio::sync::Mutex::new(None),
            output,
        }
    }

    /// Lines the server prints on stdout and stderr
    pub fn subscribe_output(&self) -> broadcast::Receiver<String> {
        self.output.subscribe()
    }

    pub async fn start(&self) -> Result<()> {
        let command = self.config.command.as_deref().ok_or(ServerError::NotConfigured)?;
        if self.is_running() {
            return Err(ServerError::AlreadyRunning);
        }

        let mut child = Command::new(command)
            .args(&self.config.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ServerError::Spawn)?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, self.output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, self.output.clone()));
        }
        *self.stdin.lock().await = child.stdin.take();
        info!(command, pid = child.id(), "Server started");
        *self.lock_child() = Some(child);
        Ok(())
    }

    /// Write one line to the server's stdin.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        if !self.is_running() {
            return Err(ServerError::NotRunning);
        }
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or(ServerError::NotRunning)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Send the stop command and wait for the process to exit, killing it after the grace period.
    pub async fn stop(&self) -> Result<()> {
        self.send_line(&self.config.stop_command).await?;

        let deadline = tokio::time::Instant::now() + self.config.stop_timeout.as_duration();
        while tokio::time::Instant::now() < deadline {
            if let Some(status) = self.try_reap()? {
                info!(%status, "Server stopped");
                return Ok(());
            }
            tokio::time::sleep(EXIT_POLL).await;
        }

        warn!(
            timeout = %self.config.stop_timeout,
            "Server did not stop in time, killing it"
        );
        self.kill().await
    }

    pub async fn kill(&self) -> Result<()> {
        let child = self.lock_child().take();
        let Some(mut child) = child else {
            return Err(ServerError::NotRunning);
        };
        child.kill().await?;
        *self.stdin.lock().await = None;
        info!("Server killed");
        Ok(())
    }

    /// Reap the child if it exited; returns its status.
    fn try_reap(&self) -> Result<Option<ExitStatus>> {
        let mut slot = self.lock_child();
        let Some(child) = slot.as_mut() else {
            return Err(ServerError::NotRunning);
        };
        let status = child.try_wait()?;
        if status.is_some() {
            *slot = None;
        }
        Ok(status)
    }

    fn lock_child(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ServerStatus for ServerProcess {
    fn is_running(&self) -> bool {
        let mut slot = self.lock_child();
        match slot.as_mut().map(|child| child.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                info!(%status, "Server exited");
                *slot = None;
                false
            }
            Some(Err(err)) => {
                warn!(error = %err, "Failed to query server process");
                false
            }
            None => false,
        }
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(stream: R, output: broadcast::Sender<String>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                info!(target: "server", "{}", line);
                // No subscribers is fine.
                let _ = output.send(line);
            }
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "Failed to read server output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_configured() {
        let server = ServerProcess::new(ServerConfig::default(), PathBuf::from("."));
        assert!(!server.is_running());
        assert!(matches!(server.start().await, Err(ServerError::NotConfigured)));
        assert!(matches!(server.send_line("say hi").await, Err(ServerError::NotRunning)));
        assert!(matches!(server.kill().await, Err(ServerError::NotRunning)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_send_and_stop() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = ServerConfig {
            command: Some("sh".to_string()),
            // Echo every line, exit on "stop".
            args: vec![
                "-c".to_string(),
                "while read line; do echo \"got $line\"; [ \"$line\" = stop ] && exit 0; done".to_string(),
            ],
            ..ServerConfig::default()
        };
        let server = ServerProcess::new(config, temp.path().to_path_buf());
        let mut output = server.subscribe_output();

        server.start().await.unwrap();
        assert!(server.is_running());
        assert!(matches!(server.start().await, Err(ServerError::AlreadyRunning)));

        server.send_line("hello").await.unwrap();
        assert_eq!(output.recv().await.unwrap(), "got hello");

        server.stop().await.unwrap();
        assert!(!server.is_running());
    }

    #[test]
    fn test_atomic_status() {
        let status = AtomicBool::new(false);
        assert!(!ServerStatus::is_running(&status));
        status.store(true, Ordering::SeqCst);
        assert!(ServerStatus::is_running(&status));
    }
}
