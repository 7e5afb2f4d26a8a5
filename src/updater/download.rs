//! HTTP downloads
//!
//! Resources are streamed into `<dest>.part` and only renamed to `<dest>` once complete. When
//! the download replaces an installed file, that file is first moved aside into the
//! `replaced` directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use bytes::Bytes;
use reqwest::Client;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::tasks::{self, Task, TaskContext, TaskKind};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DownloadError>;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DownloadError + '_ {
    move |source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            max_retries: 3,
            user_agent: format!("plugkeeper/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Retrying HTTP client shared by every download and release check
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| DownloadError::RequestFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Fetch a small resource fully into memory, with retry.
    pub async fn fetch(&self, url: &str) -> Result<Bytes> {
        self.with_retry(url, || async {
            let response = self.send(url).await?;
            response
                .bytes()
                .await
                .map_err(|e| DownloadError::RequestFailed(format!("Failed to read body: {}", e)))
        })
        .await
    }

    /// Stream a resource into `part`, with retry. Each attempt starts the file over.
    ///
    /// `on_progress` receives the bytes written so far in the current attempt and the
    /// advertised total, if any.
    pub async fn download_to(
        &self,
        url: &str,
        part: &Path,
        on_progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    ) -> Result<u64> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.stream_once(url, part, on_progress).await {
                Ok(written) => {
                    if attempts > 1 {
                        debug!(url, attempts, "Download succeeded after retry");
                    }
                    return Ok(written);
                }
                Err(err) => {
                    if attempts >= self.config.max_retries {
                        warn!(url, attempts, error = %err, "Download failed after retries");
                        return Err(err);
                    }
                    warn!(url, attempts, error = %err, "Download failed, retrying");
                    tokio::time::sleep(backoff(attempts)).await;
                }
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, url: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if attempts >= self.config.max_retries => {
                    warn!(url, attempts, error = %err, "Request failed after retries");
                    return Err(err);
                }
                Err(err) => {
                    warn!(url, attempts, error = %err, "Request failed, retrying");
                    tokio::time::sleep(backoff(attempts)).await;
                }
            }
        }
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        debug!(url, "Sending request");
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::Timeout
            } else if e.is_redirect() {
                DownloadError::TooManyRedirects
            } else {
                DownloadError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::RequestFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }
        Ok(response)
    }

    async fn stream_once(
        &self,
        url: &str,
        part: &Path,
        on_progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    ) -> Result<u64> {
        let mut response = self.send(url).await?;
        let total = response.content_length();

        let mut file = fs::File::create(part).await.map_err(io_error(part))?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DownloadError::RequestFailed(format!("Failed to read body: {}", e)))?
        {
            file.write_all(&chunk).await.map_err(io_error(part))?;
            written += chunk.len() as u64;
            on_progress(written, total);
        }
        file.flush().await.map_err(io_error(part))?;
        file.sync_all().await.map_err(io_error(part))?;

        debug!(url, size = written, "Download completed");
        Ok(written)
    }
}

/// Exponential backoff: 1s, 2s, 4s, ...
fn backoff(attempts: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempts.saturating_sub(1)))
}

/// Where a finished download goes and what it replaces
#[derive(Debug, Clone, Builder)]
pub struct DownloadPlan {
    #[builder(into)]
    pub url: String,
    pub dest: PathBuf,
    /// Installed file to move aside before the download takes its place
    pub replaces: Option<PathBuf>,
    /// Directory that receives replaced files
    pub replaced_dir: Option<PathBuf>,
}

impl DownloadPlan {
    pub fn part_path(&self) -> PathBuf {
        let mut name = self
            .dest
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "download".into());
        name.push(".part");
        self.dest.with_file_name(name)
    }
}

/// Run a plan, reporting bytes as progress on `ctx`.
///
/// Progress only ever grows: a retried attempt reports again from the last high-water mark.
pub async fn execute_plan(client: &HttpClient, plan: &DownloadPlan, ctx: &TaskContext) -> tasks::Result<u64> {
    if let Some(parent) = plan.dest.parent() {
        fs::create_dir_all(parent).await.map_err(io_error(parent))?;
    }
    let part = plan.part_path();

    let mut reported = 0u64;
    let mut max_known = false;
    let mut progress = |written: u64, total: Option<u64>| {
        if !max_known {
            if let Some(total) = total {
                max_known = ctx.set_max(total).is_ok();
            }
        }
        if written > reported {
            let _ = ctx.step_by(written - reported);
            reported = written;
        }
    };

    let result = client.download_to(&plan.url, &part, &mut progress).await;
    let written = match result {
        Ok(written) => written,
        Err(err) => {
            let _ = fs::remove_file(&part).await;
            return Err(err.into());
        }
    };

    if let Some(old) = &plan.replaces {
        if fs::try_exists(old).await.unwrap_or(false) {
            move_aside(old, plan.replaced_dir.as_deref()).await?;
        }
    }
    fs::rename(&part, &plan.dest).await.map_err(io_error(&plan.dest))?;

    Ok(written)
}

/// Move an installed file into `replaced_dir`, or delete it when no directory is configured.
async fn move_aside(old: &Path, replaced_dir: Option<&Path>) -> Result<()> {
    let Some(dir) = replaced_dir else {
        return fs::remove_file(old).await.map_err(io_error(old));
    };
    fs::create_dir_all(dir).await.map_err(io_error(dir))?;
    let target = dir.join(old.file_name().unwrap_or_else(|| "replaced".as_ref()));
    if fs::try_exists(&target).await.unwrap_or(false) {
        fs::remove_file(&target).await.map_err(io_error(&target))?;
    }
    fs::rename(old, &target).await.map_err(io_error(old))?;
    debug!(from = %old.display(), to = %target.display(), "Moved replaced file aside");
    Ok(())
}

/// Nested task started by updaters for every file they fetch
pub struct DownloadTask {
    name: String,
    plan: DownloadPlan,
    client: Arc<HttpClient>,
}

impl DownloadTask {
    pub fn new(plan: DownloadPlan, client: Arc<HttpClient>) -> Self {
        let file = plan
            .dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| plan.url.clone());
        Self {
            name: format!("Download {}", file),
            plan,
            client,
        }
    }

    pub fn plan(&self) -> &DownloadPlan {
        &self.plan
    }
}

#[async_trait]
impl Task for DownloadTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Download
    }

    async fn run(&mut self, ctx: TaskContext) -> tasks::Result<()> {
        ctx.set_status(format!("Downloading {}...", self.plan.url))?;
        let written = execute_plan(&self.client, &self.plan, &ctx).await?;
        info!(url = %self.plan.url, dest = %self.plan.dest.display(), bytes = written, "Download finished");
        ctx.finish(format!("Downloaded to {}.", self.plan.dest.display()))
    }
}
