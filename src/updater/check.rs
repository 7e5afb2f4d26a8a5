//! One update-check cycle over a secondary connection
//!
//! ```text
//! remote -> i64 cooldown ms (non-zero: stop here)
//! client -> i32 total, i32 x4 bucket counts (id A, id B, custom link, unidentified)
//! per item, bucket by bucket:
//!   client -> utf name, utf version, utf author, bucket fields
//!   remote -> u8 code [0|1: utf file type, utf latest, utf url, utf id A, utf id B]
//! ```

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::net::{WireReader, WireWriter};
use crate::tasks::{TaskContext, TaskError};

use super::UpdateProfile;
use super::download::{DownloadPlan, DownloadTask, HttpClient};
use super::item::{Bucket, DetailedItem, ItemRecord};

const CODE_UP_TO_DATE: u8 = 0;
const CODE_UPDATE_AVAILABLE: u8 = 1;
const CODE_NOT_FOUND: u8 = 2;
const CODE_LOOKUP_ERROR: u8 = 3;

/// Literal the remote sends for "no value"
const NULL_ID: &str = "null";

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("I/O error while checking {item}: {source}")]
    Item {
        item: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Too many items to check: {0}")]
    TooManyItems(usize),

    #[error(transparent)]
    Progress(Box<TaskError>),
}

impl From<TaskError> for CheckError {
    fn from(err: TaskError) -> Self {
        CheckError::Progress(Box::new(err))
    }
}

impl CheckError {
    /// Name of the item in flight when the error happened, if any
    pub fn item(&self) -> Option<&str> {
        match self {
            CheckError::Item { item, .. } => Some(item),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CheckError>;

/// How downloads are placed for one catalog
#[derive(Clone)]
pub struct CycleSettings {
    pub profile: UpdateProfile,
    /// MANUAL downloads land here
    pub staging_dir: PathBuf,
    /// AUTOMATIC downloads land here (the item directory)
    pub install_dir: PathBuf,
    pub replaced_dir: PathBuf,
    pub client: Arc<HttpClient>,
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// The remote refused to run a cycle yet
    CooldownActive(Duration),
    Completed(CycleReport),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub checked: usize,
    pub updates_available: usize,
    /// Destinations of started download tasks
    pub downloads: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UpdateInfo {
    file_type: String,
    latest: String,
    url: String,
    id_a: Option<u32>,
    id_b: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CheckResponse {
    UpToDate(UpdateInfo),
    Available(UpdateInfo),
    NotFound,
    LookupError,
    Unknown(u8),
}

fn parse_id(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() || raw == NULL_ID {
        return None;
    }
    raw.parse::<u32>().ok().filter(|id| *id != 0)
}

fn wire_count(count: usize) -> Result<i32> {
    i32::try_from(count).map_err(|_| CheckError::TooManyItems(count))
}

/// Runs one cycle for a catalog. `label` is the plural item noun ("plugins", "mods").
pub struct UpdateCheck<'a> {
    label: &'a str,
    settings: &'a CycleSettings,
    ctx: &'a TaskContext,
}

impl<'a> UpdateCheck<'a> {
    pub fn new(label: &'a str, settings: &'a CycleSettings, ctx: &'a TaskContext) -> Self {
        Self {
            label,
            settings,
            ctx,
        }
    }

    /// Drive the exchange. `records` is updated in place; persisting it is the caller's job.
    pub async fn run<R, W>(
        &self,
        reader: &mut WireReader<R>,
        writer: &mut WireWriter<W>,
        items: &[DetailedItem],
        records: &mut BTreeMap<String, ItemRecord>,
    ) -> Result<CycleOutcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.ctx.set_status("Waiting for the remote cool-down check...")?;
        let remaining_ms = reader.read_i64().await?;
        if remaining_ms != 0 {
            let remaining = Duration::from_millis(u64::try_from(remaining_ms).unwrap_or(0));
            return Ok(CycleOutcome::CooldownActive(remaining));
        }

        let buckets: Vec<Vec<&DetailedItem>> = Bucket::ORDER
            .iter()
            .map(|bucket| items.iter().filter(|item| item.bucket() == *bucket).collect())
            .collect();

        writer.write_i32(wire_count(items.len())?).await?;
        for bucket in &buckets {
            writer.write_i32(wire_count(bucket.len())?).await?;
        }
        writer.flush().await?;
        self.ctx.set_max(items.len() as u64)?;

        let mut report = CycleReport::default();
        let total = items.len();
        for (bucket, bucket_items) in Bucket::ORDER.iter().zip(&buckets) {
            for item in bucket_items {
                report.checked += 1;
                self.ctx.set_status(format!(
                    "Checking {} ({}/{}) for updates...",
                    item.name, report.checked, total
                ))?;

                let response = exchange(reader, writer, *bucket, item)
                    .await
                    .map_err(|source| CheckError::Item {
                        item: item.name.clone(),
                        source,
                    })?;
                self.apply(response, item, records, &mut report)?;
                self.ctx.step()?;
            }
        }

        Ok(CycleOutcome::Completed(report))
    }

    fn apply(
        &self,
        response: CheckResponse,
        item: &DetailedItem,
        records: &mut BTreeMap<String, ItemRecord>,
        report: &mut CycleReport,
    ) -> Result<()> {
        match response {
            CheckResponse::UpToDate(info) => {
                debug!(item = %item.name, latest = %info.latest, "Up to date");
            }
            CheckResponse::Available(info) => {
                report.updates_available += 1;
                info!(
                    item = %item.name,
                    installed = item.version.as_deref().unwrap_or_default(),
                    latest = %info.latest,
                    "Update available"
                );

                let record = records.entry(item.name.clone()).or_default();
                record.latest_version = Some(info.latest.clone());
                if let Some(id) = info.id_a {
                    record.id_a = id;
                }
                if let Some(id) = info.id_b {
                    record.id_b = id;
                }

                if let Some(dest) = self.start_download(item, &info)? {
                    report.downloads.push(dest);
                }
            }
            CheckResponse::NotFound => {
                self.ctx.warn_with_hint(
                    format!(
                        "{} ({}) was not found by the search-algorithm",
                        item.name,
                        item.version.as_deref().unwrap_or_default()
                    ),
                    "Specify an id for it in the item records",
                )?;
            }
            CheckResponse::LookupError => {
                self.ctx.warn(format!(
                    "Remote api-error while checking {} ({})",
                    item.name,
                    item.version.as_deref().unwrap_or_default()
                ))?;
            }
            CheckResponse::Unknown(code) => {
                self.ctx.warn(format!(
                    "Unknown error occurred! Code: {} while checking {}",
                    code as i8, item.name
                ))?;
            }
        }
        Ok(())
    }

    /// Start the nested download the profile asks for. Returns its destination.
    fn start_download(&self, item: &DetailedItem, info: &UpdateInfo) -> Result<Option<PathBuf>> {
        if self.settings.profile == UpdateProfile::Notify {
            return Ok(None);
        }

        let file_type = info.file_type.trim().trim_start_matches('.').to_ascii_lowercase();
        if file_type != "jar" && file_type != "external" {
            self.ctx.warn(format!(
                "Failed to download {} {}: unsupported file type '{}'",
                self.label, item.name, info.file_type
            ))?;
            return Ok(None);
        }

        let file_name = file_safe(&item.name);
        let plan = match self.settings.profile {
            UpdateProfile::Manual => DownloadPlan::builder()
                .url(info.url.clone())
                .dest(
                    self.settings
                        .staging_dir
                        .join(format!("{}[{}].jar", file_name, file_safe(&info.latest))),
                )
                .build(),
            _ => DownloadPlan::builder()
                .url(info.url.clone())
                .dest(
                    self.settings
                        .install_dir
                        .join(format!("{}-LATEST-[{}].jar", file_name, file_safe(&info.latest))),
                )
                .replaces(item.path.clone())
                .replaced_dir(self.settings.replaced_dir.clone())
                .build(),
        };

        let dest = plan.dest.clone();
        self.ctx
            .spawn(DownloadTask::new(plan, Arc::clone(&self.settings.client)));
        Ok(Some(dest))
    }
}

/// Keep remote-provided names from escaping the target directory.
fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

async fn exchange<R, W>(
    reader: &mut WireReader<R>,
    writer: &mut WireWriter<W>,
    bucket: Bucket,
    item: &DetailedItem,
) -> io::Result<CheckResponse>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_utf(&item.name).await?;
    writer.write_utf(item.version.as_deref().unwrap_or_default()).await?;
    writer.write_utf(item.author.as_deref().unwrap_or_default()).await?;
    match bucket {
        Bucket::IdA => writer.write_i32(item.id_a as i32).await?,
        Bucket::IdB => writer.write_i32(item.id_b as i32).await?,
        Bucket::CustomLink => {
            writer.write_i32(item.id_a as i32).await?;
            writer.write_i32(item.id_b as i32).await?;
        }
        Bucket::Unidentified => {}
    }
    writer.flush().await?;

    let code = reader.read_u8().await?;
    match code {
        CODE_UP_TO_DATE | CODE_UPDATE_AVAILABLE => {
            let info = UpdateInfo {
                file_type: reader.read_utf().await?,
                latest: reader.read_utf().await?,
                url: reader.read_utf().await?,
                id_a: parse_id(&reader.read_utf().await?),
                id_b: parse_id(&reader.read_utf().await?),
            };
            Ok(if code == CODE_UP_TO_DATE {
                CheckResponse::UpToDate(info)
            } else {
                CheckResponse::Available(info)
            })
        }
        CODE_NOT_FOUND => Ok(CheckResponse::NotFound),
        CODE_LOOKUP_ERROR => Ok(CheckResponse::LookupError),
        other => Ok(CheckResponse::Unknown(other)),
    }
}
