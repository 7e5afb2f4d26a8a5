//! Update checking for plugins, mods and released binaries
//!
//! Plugins and mods are checked item by item against the remote service over a dedicated
//! secondary connection ([`check`]). The agent itself, the java runtime and the server binary
//! are checked against plain JSON release feeds over HTTP ([`release`]). Both start nested
//! [`DownloadTask`]s for the files they fetch.

pub mod check;
pub mod download;
pub mod item;
pub mod release;
pub mod scan;
pub mod task;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::SecondaryKind;
use crate::tasks::TaskKind;

pub use check::{CheckError, CycleOutcome, CycleReport, CycleSettings, UpdateCheck};
pub use download::{DownloadError, DownloadPlan, DownloadTask, HttpClient, HttpConfig, execute_plan};
pub use item::{Bucket, DetailedItem, Discovered, ItemRecord, Reconciled, reconcile};
pub use release::{Component, ReleaseInfo, ReleaseUpdater, is_newer};
pub use scan::{DescriptorFormat, ScanReport, scan_dir};
pub use task::ItemUpdater;

/// What an updater does once it knows a newer version exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateProfile {
    /// Only report the update
    Notify,
    /// Download into the staging directory for the operator to install
    #[default]
    Manual,
    /// Download and install in place
    Automatic,
}

impl fmt::Display for UpdateProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateProfile::Notify => "NOTIFY",
            UpdateProfile::Manual => "MANUAL",
            UpdateProfile::Automatic => "AUTOMATIC",
        };
        f.write_str(name)
    }
}

/// A family of items checked through the update-check protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Catalog {
    /// Store key of the item records
    pub key: &'static str,
    /// Plural noun used in status messages
    pub label: &'static str,
    pub task_name: &'static str,
    pub secondary: SecondaryKind,
    pub task_kind: TaskKind,
    pub format: DescriptorFormat,
}

impl Catalog {
    pub const PLUGINS: Catalog = Catalog {
        key: "plugins",
        label: "plugins",
        task_name: "PluginsUpdater",
        secondary: SecondaryKind::PluginsUpdater,
        task_kind: TaskKind::PluginUpdate,
        format: DescriptorFormat::Plugin,
    };

    pub const MODS: Catalog = Catalog {
        key: "mods",
        label: "mods",
        task_name: "ModsUpdater",
        secondary: SecondaryKind::ModsUpdater,
        task_kind: TaskKind::ModUpdate,
        format: DescriptorFormat::Mod,
    };
}
