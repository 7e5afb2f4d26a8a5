use std::io;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::connection::{Connections, TcpWriter};
use super::error::Result;
use super::registry::{KindLease, SecondaryKind};

/// Receives command lines from a console source.
///
/// `submit` must not block; long-running commands are spawned by the implementation.
pub trait CommandSink: Send + Sync + 'static {
    fn submit(&self, line: String);
}

/// The online console: a console-kind secondary connection with a dedicated reader loop.
///
/// At most one exists per process. Dropping or closing it stops the reader and releases the
/// console kind.
pub struct OnlineConsole {
    reader_task: JoinHandle<()>,
    writer: Mutex<TcpWriter>,
    _lease: KindLease,
}

impl OnlineConsole {
    pub async fn open(connections: &Connections, sink: Arc<dyn CommandSink>) -> Result<Self> {
        let secondary = connections.open_secondary(SecondaryKind::Console).await?;
        let (mut reader, writer, lease) = secondary.into_parts();
        reader.set_timeout(None);

        let reader_task = tokio::spawn(async move {
            loop {
                match reader.read_utf().await {
                    Ok(line) => {
                        info!(command = %line, "Online console command received");
                        sink.submit(line);
                    }
                    Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                        info!("Online console closed by remote");
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "Online console connection failed");
                        break;
                    }
                }
            }
        });

        info!("Online console connected");
        Ok(Self {
            reader_task,
            writer: Mutex::new(writer),
            _lease: lease,
        })
    }

    /// True while the reader loop is still receiving commands.
    pub fn is_alive(&self) -> bool {
        !self.reader_task.is_finished()
    }

    /// Send one line of output to the remote console.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_utf(line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Interrupt the blocked reader, shut the transport and release the console kind.
    pub async fn close(mut self) {
        self.reader_task.abort();
        let _ = (&mut self.reader_task).await;
        let _ = self.writer.get_mut().shutdown().await;
        info!("Online console closed");
    }
}

impl Drop for OnlineConsole {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
