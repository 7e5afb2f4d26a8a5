//! Self-update bootstrap
//!
//! An AUTOMATIC self-update downloads the new binary into `<root>/.plugkeeper/downloads` and
//! starts it from there. On startup, before configuration or logging exist, the binary checks
//! whether it runs from that staging directory. If so it copies itself over
//! `<root>/<executable name>`, relaunches the installed copy from `<root>` and exits.
//!
//! The copy goes to a temporary sibling first and is renamed over the target only once
//! complete, so a failure leaves the previous install runnable. Errors go to a plain-text
//! fallback log next to the running executable.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use chrono::Local;
use thiserror::Error;

use crate::config::{APP_DIR, STAGING_DIR};

pub const FALLBACK_LOG: &str = "PLUGKEEPER-SELF-UPDATE-ERROR.log";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Cannot determine the running executable: {0}")]
    CurrentExe(#[source] io::Error),

    #[error("Failed to copy {from} over {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to relaunch {path}: {source}")]
    Relaunch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BootstrapError>;

/// A staged binary about to be installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staged {
    pub install_root: PathBuf,
}

impl Staged {
    pub fn target(&self, exe_name: &str) -> PathBuf {
        self.install_root.join(exe_name)
    }
}

/// Purely structural: `cwd` must be `<root>/.plugkeeper/downloads`.
pub fn detect_staging(cwd: &Path) -> Option<Staged> {
    let downloads = cwd.file_name()?;
    let app_dir = cwd.parent()?;
    if downloads != STAGING_DIR || app_dir.file_name()? != APP_DIR {
        return None;
    }
    let install_root = app_dir.parent()?.to_path_buf();
    Some(Staged { install_root })
}

/// Write `source` to a temporary sibling of `target`, then rename it over `target`.
///
/// On any error the temporary file is removed and `target` keeps its previous bytes.
pub fn replace_atomically<R: Read>(source: &mut R, target: &Path, permissions: Option<Permissions>) -> io::Result<u64> {
    let file_name = target
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no file name"))?;
    let mut temp_name = file_name.to_os_string();
    temp_name.push(".updating");
    let temp = target.with_file_name(temp_name);

    let result = (|| -> io::Result<u64> {
        let mut file = File::create(&temp)?;
        let written = io::copy(source, &mut file)?;
        file.sync_all()?;
        drop(file);
        if let Some(permissions) = permissions {
            fs::set_permissions(&temp, permissions)?;
        }
        fs::rename(&temp, target)?;
        Ok(written)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// Copy the staged executable over the installed one.
pub fn install(staged_exe: &Path, target: &Path) -> Result<u64> {
    let copy_error = |source| BootstrapError::Copy {
        from: staged_exe.to_path_buf(),
        to: target.to_path_buf(),
        source,
    };
    let mut source = File::open(staged_exe).map_err(copy_error)?;
    let permissions = source.metadata().map_err(copy_error)?.permissions();
    replace_atomically(&mut source, target, Some(permissions)).map_err(copy_error)
}

/// Start the installed executable from the install root, detached.
pub fn relaunch(target: &Path, install_root: &Path) -> Result<()> {
    Command::new(target)
        .current_dir(install_root)
        .spawn()
        .map(|_| ())
        .map_err(|source| BootstrapError::Relaunch {
            path: target.to_path_buf(),
            source,
        })
}

/// Run the bootstrap when started from the staging directory.
///
/// `None` means not staged: continue normal startup.
pub fn run_if_staged() -> Option<ExitCode> {
    let cwd = std::env::current_dir().ok()?;
    let staged = detect_staging(&cwd)?;

    match complete(&staged) {
        Ok(()) => Some(ExitCode::SUCCESS),
        Err(err) => {
            write_fallback_log(&err.to_string());
            Some(ExitCode::FAILURE)
        }
    }
}

fn complete(staged: &Staged) -> Result<()> {
    let exe = std::env::current_exe().map_err(BootstrapError::CurrentExe)?;
    let exe_name = exe
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| BootstrapError::CurrentExe(io::Error::new(io::ErrorKind::NotFound, "no file name")))?;

    let target = staged.target(&exe_name);
    install(&exe, &target)?;
    relaunch(&target, &staged.install_root)
}

/// Append a timestamped line to the fallback log next to the running executable.
pub fn write_fallback_log(message: &str) {
    let dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = append_log(&dir.join(FALLBACK_LOG), message);
}

fn append_log(path: &Path, message: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), message)
}
