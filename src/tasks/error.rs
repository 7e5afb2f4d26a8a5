use thiserror::Error;

use crate::backup::BackupError;
use crate::net::NetError;
use crate::store::StoreError;
use crate::updater::{CheckError, DownloadError};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task '{task}' already reached a terminal state")]
    AlreadyTerminal { task: String },

    #[error("Progress maximum of task '{task}' was already set")]
    MaxAlreadySet { task: String },

    #[error("{0}")]
    Precondition(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid release descriptor: {0}")]
    Release(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;
