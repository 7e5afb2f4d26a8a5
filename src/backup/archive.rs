use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::error::{BackupError, Result};

/// `backup-<dd-MM-yyyy-HH.mm>.zip`
pub fn archive_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("backup-{}.zip", at.format("%d-%m-%Y-%H.%M"))
}

/// Top-level files and directories of `source`, sorted, without `exclude`.
pub fn top_level_entries(source: &Path, exclude: &Path) -> io::Result<Vec<PathBuf>> {
    let exclude = canonical(exclude);
    let mut entries: Vec<PathBuf> = fs::read_dir(source)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| canonical(path) != exclude)
        .collect();
    entries.sort();
    Ok(entries)
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Zip archive written one top-level entry at a time
pub struct ArchiveWriter {
    zip: ZipWriter<File>,
    path: PathBuf,
    source: PathBuf,
    exclude: PathBuf,
    options: SimpleFileOptions,
}

impl ArchiveWriter {
    /// Create `dest`; entry names are relative to `source`, and nothing under `exclude` is added.
    pub fn create(dest: &Path, source: &Path, exclude: &Path) -> Result<Self> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(dest)?;
        Ok(Self {
            zip: ZipWriter::new(file),
            path: canonical(dest),
            source: canonical(source),
            exclude: canonical(exclude),
            options: SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .large_file(true),
        })
    }

    /// Add one file, or one directory recursively.
    pub fn add(&mut self, entry: &Path) -> Result<usize> {
        let entry = canonical(entry);
        if entry.starts_with(&self.exclude) || entry == self.path {
            return Ok(0);
        }

        let mut added = 0;
        let walker = WalkDir::new(&entry)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !e.path().starts_with(&self.exclude));
        for item in walker {
            let item = item?;
            let path = item.path();
            if path == self.path {
                continue;
            }
            let name = self.entry_name(path)?;

            if item.file_type().is_dir() {
                self.zip.add_directory(name, self.options)?;
            } else if item.file_type().is_file() {
                self.zip.start_file(name, self.options)?;
                let mut file = File::open(path)?;
                io::copy(&mut file, &mut self.zip)?;
                added += 1;
            }
        }
        Ok(added)
    }

    fn entry_name(&self, path: &Path) -> Result<String> {
        let relative = path
            .strip_prefix(&self.source)
            .map_err(|_| BackupError::OutsideSource(path.to_path_buf()))?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Ok(parts.join("/"))
    }

    pub fn finish(self) -> Result<PathBuf> {
        let file = self.zip.finish()?;
        file.sync_all()?;
        Ok(self.path)
    }
}
