use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Persisted state of one tracked plugin or mod, keyed by name in the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// External id A (spigot / curseforge), 0 = unknown
    #[serde(default)]
    pub id_a: u32,
    /// External id B (bukkit / modrinth), 0 = unknown
    #[serde(default)]
    pub id_b: u32,
    #[serde(default)]
    pub custom_link: Option<String>,
    #[serde(default)]
    pub exclude: bool,
    #[serde(default)]
    pub latest_version: Option<String>,
}

/// A plugin or mod as seen by one checking cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailedItem {
    pub name: String,
    pub version: Option<String>,
    pub author: Option<String>,
    pub path: PathBuf,
    pub id_a: u32,
    pub id_b: u32,
    pub custom_link: Option<String>,
    pub excluded: bool,
    pub latest_version: Option<String>,
}

impl DetailedItem {
    /// Name, version and author are all present and non-blank.
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && present(&self.version) && present(&self.author)
    }

    /// Known ids take precedence over a custom link.
    pub fn bucket(&self) -> Bucket {
        if self.id_a != 0 {
            Bucket::IdA
        } else if self.id_b != 0 {
            Bucket::IdB
        } else if present(&self.custom_link) {
            Bucket::CustomLink
        } else {
            Bucket::Unidentified
        }
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Wire buckets, in the order they are declared and streamed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    IdA,
    IdB,
    CustomLink,
    Unidentified,
}

impl Bucket {
    pub const ORDER: [Bucket; 4] = [
        Bucket::IdA,
        Bucket::IdB,
        Bucket::CustomLink,
        Bucket::Unidentified,
    ];
}

/// Item metadata read from an installed jar's descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub name: String,
    pub version: Option<String>,
    pub author: Option<String>,
    pub path: PathBuf,
    pub id_a: u32,
    pub id_b: u32,
}

/// Result of merging a scan with the stored records
#[derive(Debug, Default)]
pub struct Reconciled {
    /// Every installed item, in discovery order
    pub items: Vec<DetailedItem>,
    /// Records to persist at the end of the cycle
    pub records: BTreeMap<String, ItemRecord>,
    /// Names discovered more than once; only the first one is tracked
    pub duplicates: Vec<DetailedItem>,
}

impl Reconciled {
    /// Items the cycle actually sends to the remote.
    pub fn checkable(&self) -> Vec<DetailedItem> {
        self.items.iter().filter(|item| !item.excluded).cloned().collect()
    }
}

/// Merge discovered items with stored records.
///
/// Stored ids set by the operator win; discovered ids only fill ids that are still 0. Version
/// and author always come from the descriptor. Incomplete items are excluded without touching
/// the stored flag. Records of uninstalled items survive only with `keep_removed`, and are
/// never checked.
pub fn reconcile(
    discovered: Vec<Discovered>,
    mut stored: BTreeMap<String, ItemRecord>,
    keep_removed: bool,
) -> Reconciled {
    let mut reconciled = Reconciled::default();
    let mut seen = HashSet::new();

    for found in discovered {
        if !seen.insert(found.name.clone()) {
            reconciled.duplicates.push(DetailedItem {
                name: found.name.clone(),
                version: found.version.clone(),
                author: found.author.clone(),
                path: found.path.clone(),
                id_a: found.id_a,
                id_b: found.id_b,
                custom_link: None,
                excluded: true,
                latest_version: None,
            });
            continue;
        }

        let mut record = stored.remove(&found.name).unwrap_or_default();
        record.version = found.version.clone();
        record.author = found.author.clone();
        if record.id_a == 0 {
            record.id_a = found.id_a;
        }
        if record.id_b == 0 {
            record.id_b = found.id_b;
        }

        let mut item = DetailedItem {
            name: found.name,
            version: record.version.clone(),
            author: record.author.clone(),
            path: found.path,
            id_a: record.id_a,
            id_b: record.id_b,
            custom_link: record.custom_link.clone(),
            excluded: record.exclude,
            latest_version: record.latest_version.clone(),
        };
        if !item.is_complete() {
            item.excluded = true;
        }

        reconciled.records.insert(item.name.clone(), record);
        reconciled.items.push(item);
    }

    if keep_removed {
        for (name, record) in stored {
            reconciled.records.entry(name).or_insert(record);
        }
    }

    reconciled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(name: &str, version: Option<&str>, author: Option<&str>) -> Discovered {
        Discovered {
            name: name.to_string(),
            version: version.map(String::from),
            author: author.map(String::from),
            path: PathBuf::from(format!("plugins/{}.jar", name)),
            id_a: 0,
            id_b: 0,
        }
    }

    #[test]
    fn test_incomplete_items_are_excluded() {
        let discovered = vec![
            found("Complete", Some("1.0"), Some("me")),
            found("NoVersion", None, Some("me")),
            found("NoAuthor", Some("1.0"), None),
            found("BlankAuthor", Some("1.0"), Some("  ")),
        ];
        let reconciled = reconcile(discovered, BTreeMap::new(), false);

        let excluded: Vec<_> = reconciled
            .items
            .iter()
            .filter(|i| i.excluded)
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(excluded, vec!["NoVersion", "NoAuthor", "BlankAuthor"]);
        assert_eq!(reconciled.checkable().len(), 1);
        assert!(!reconciled.records["NoVersion"].exclude);
    }

    #[test]
    fn test_incomplete_excluded_even_when_stored_flag_is_false() {
        let mut stored = BTreeMap::new();
        stored.insert(
            "NoAuthor".to_string(),
            ItemRecord {
                exclude: false,
                id_a: 5,
                ..ItemRecord::default()
            },
        );
        let reconciled = reconcile(vec![found("NoAuthor", Some("1.0"), None)], stored, false);
        assert!(reconciled.items[0].excluded);
        assert!(reconciled.checkable().is_empty());
    }

    #[test]
    fn test_stored_exclude_flag_is_honoured() {
        let mut stored = BTreeMap::new();
        stored.insert(
            "Vault".to_string(),
            ItemRecord {
                exclude: true,
                ..ItemRecord::default()
            },
        );
        let reconciled = reconcile(vec![found("Vault", Some("1.7"), Some("me"))], stored, false);
        assert!(reconciled.checkable().is_empty());
    }

    #[test]
    fn test_stored_ids_win_over_discovered() {
        let mut stored = BTreeMap::new();
        stored.insert(
            "Essentials".to_string(),
            ItemRecord {
                id_a: 9,
                version: Some("old".to_string()),
                ..ItemRecord::default()
            },
        );
        let mut discovered = found("Essentials", Some("2.0"), Some("me"));
        discovered.id_a = 42;
        discovered.id_b = 7;

        let reconciled = reconcile(vec![discovered], stored, false);
        let item = &reconciled.items[0];
        assert_eq!(item.id_a, 9);
        assert_eq!(item.id_b, 7);
        assert_eq!(item.version.as_deref(), Some("2.0"));
        assert_eq!(reconciled.records["Essentials"].version.as_deref(), Some("2.0"));
    }

    #[test]
    fn test_removed_items_retained_only_with_keep_removed() {
        let mut stored = BTreeMap::new();
        stored.insert("Gone".to_string(), ItemRecord::default());

        let kept = reconcile(Vec::new(), stored.clone(), true);
        assert!(kept.records.contains_key("Gone"));
        assert!(kept.items.is_empty());

        let dropped = reconcile(Vec::new(), stored, false);
        assert!(dropped.records.is_empty());
    }

    #[test]
    fn test_duplicate_names_first_wins() {
        let mut second = found("Dup", Some("2.0"), Some("me"));
        second.path = PathBuf::from("plugins/Dup-copy.jar");
        let reconciled = reconcile(vec![found("Dup", Some("1.0"), Some("me")), second], BTreeMap::new(), false);

        assert_eq!(reconciled.items.len(), 1);
        assert_eq!(reconciled.items[0].version.as_deref(), Some("1.0"));
        assert_eq!(reconciled.duplicates.len(), 1);
        assert_eq!(reconciled.duplicates[0].path, PathBuf::from("plugins/Dup-copy.jar"));
    }

    #[test]
    fn test_bucket_classification() {
        let mut item = reconcile(vec![found("X", Some("1"), Some("a"))], BTreeMap::new(), false)
            .items
            .remove(0);
        assert_eq!(item.bucket(), Bucket::Unidentified);
        item.custom_link = Some("   ".to_string());
        assert_eq!(item.bucket(), Bucket::Unidentified);

        item.custom_link = Some("https://example.com/x.jar".to_string());
        assert_eq!(item.bucket(), Bucket::CustomLink);
        item.id_b = 3;
        assert_eq!(item.bucket(), Bucket::IdB);
        item.id_a = 4;
        assert_eq!(item.bucket(), Bucket::IdA);

        item.id_b = 0;
        assert_eq!(item.bucket(), Bucket::IdA);
        item.id_a = 0;
        assert_eq!(item.bucket(), Bucket::CustomLink);
    }
}
