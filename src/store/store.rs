use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use crate::updater::ItemRecord;

use super::error::{Result, StoreError};
use super::keys::{
    decode_item_key, encode_item_key, encode_item_prefix, encode_run_key, encode_version_key,
};

/// Fjall-backed persistent agent state: last-run timestamps, item records, installed versions
#[derive(Clone)]
pub struct StateStore {
    keyspace: Keyspace,
    timestamps: PartitionHandle,
    items: PartitionHandle,
    versions: PartitionHandle,
    save_lock: Arc<Mutex<()>>,
}

impl StateStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening state store at: {}", path.display());

        std::fs::create_dir_all(path)?;

        let keyspace = Config::new(path).open()?;

        let timestamps = keyspace.open_partition("timestamps", PartitionCreateOptions::default())?;
        let items = keyspace.open_partition("items", PartitionCreateOptions::default())?;
        let versions = keyspace.open_partition("versions", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            timestamps,
            items,
            versions,
            save_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Last recorded run of a recurring task kind
    pub fn last_run(&self, kind: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(value) = self.timestamps.get(encode_run_key(kind))? else {
            return Ok(None);
        };
        let raw = String::from_utf8_lossy(&value).to_string();
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|_| StoreError::InvalidTimestamp {
                key: kind.to_string(),
                value: raw,
            })
    }

    pub fn record_run(&self, kind: &str, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.timestamps
            .insert(encode_run_key(kind), at.to_rfc3339().as_bytes())?;
        self.persist()?;
        debug!(kind, at = %at, "Recorded run timestamp");
        Ok(())
    }

    /// All stored item records of a catalog, keyed by item name
    pub fn load_items(&self, catalog: &str) -> Result<BTreeMap<String, ItemRecord>> {
        let mut records = BTreeMap::new();
        for entry in self.items.prefix(encode_item_prefix(catalog)) {
            let (key, value) = entry?;
            let (_, name) = decode_item_key(&key)
                .ok_or_else(|| StoreError::InvalidKey(String::from_utf8_lossy(&key).to_string()))?;
            records.insert(name, serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    /// Replace every record of a catalog in a single batch.
    ///
    /// Records missing from `records` are removed. Saves are serialized across tasks.
    pub fn save_items(&self, catalog: &str, records: &BTreeMap<String, ItemRecord>) -> Result<()> {
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut batch = self.keyspace.batch();
        for entry in self.items.prefix(encode_item_prefix(catalog)) {
            let (key, _) = entry?;
            if let Some((_, name)) = decode_item_key(&key) {
                if !records.contains_key(&name) {
                    batch.remove(&self.items, key);
                }
            }
        }
        for (name, record) in records {
            batch.insert(
                &self.items,
                encode_item_key(catalog, name),
                serde_json::to_vec(record)?,
            );
        }
        batch.commit()?;
        self.persist()?;

        debug!(catalog, count = records.len(), "Saved item records");
        Ok(())
    }

    pub fn installed_version(&self, component: &str) -> Result<Option<String>> {
        Ok(self
            .versions
            .get(encode_version_key(component))?
            .map(|value| String::from_utf8_lossy(&value).to_string()))
    }

    pub fn set_installed_version(&self, component: &str, version: &str) -> Result<()> {
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.versions
            .insert(encode_version_key(component), version.as_bytes())?;
        self.persist()?;
        Ok(())
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}
