use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::error::{NetError, Result};

/// Kind byte written right after a secondary connection's handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SecondaryKind {
    Console = 1,
    PluginsUpdater = 2,
    ModsUpdater = 3,
}

impl SecondaryKind {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(SecondaryKind::Console),
            2 => Some(SecondaryKind::PluginsUpdater),
            3 => Some(SecondaryKind::ModsUpdater),
            _ => None,
        }
    }
}

impl fmt::Display for SecondaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SecondaryKind::Console => "console",
            SecondaryKind::PluginsUpdater => "plugins-updater",
            SecondaryKind::ModsUpdater => "mods-updater",
        })
    }
}

/// Process-wide set of live secondary connection kinds.
///
/// First opener wins; the kind is released when its [`KindLease`] drops.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    open: Arc<Mutex<HashSet<SecondaryKind>>>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<SecondaryKind>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn acquire(&self, kind: SecondaryKind) -> Result<KindLease> {
        if !self.lock().insert(kind) {
            return Err(NetError::KindAlreadyOpen(kind));
        }
        Ok(KindLease {
            kind,
            registry: self.clone(),
        })
    }

    pub fn is_open(&self, kind: SecondaryKind) -> bool {
        self.lock().contains(&kind)
    }
}

/// Holds one kind open in the registry for as long as it lives
#[derive(Debug)]
pub struct KindLease {
    kind: SecondaryKind,
    registry: KindRegistry,
}

impl KindLease {
    pub fn kind(&self) -> SecondaryKind {
        self.kind
    }
}

impl Drop for KindLease {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.kind);
    }
}
