use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::debug;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Delete `backup-*.zip` archives in `dir` last modified more than `max_days` ago.
///
/// Returns the number deleted. `max_days == 0` disables pruning. A file that cannot be
/// inspected or deleted is left alone.
pub fn prune_archives(dir: &Path, max_days: u32, now: SystemTime) -> usize {
    if max_days == 0 {
        return 0;
    }
    let Some(oldest_allowed) = now.checked_sub(Duration::from_secs(u64::from(max_days) * SECS_PER_DAY)) else {
        return 0;
    };
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut deleted = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_archive = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("backup-") && n.ends_with(".zip"));
        if !is_archive {
            continue;
        }

        let modified = entry.metadata().and_then(|m| m.modified());
        match modified {
            Ok(modified) if modified < oldest_allowed => match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(err) => debug!(path = %path.display(), error = %err, "Failed to delete old backup"),
            },
            Ok(_) => {}
            Err(err) => debug!(path = %path.display(), error = %err, "Failed to read backup age"),
        }
    }
    deleted
}
