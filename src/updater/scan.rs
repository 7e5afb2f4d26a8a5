//! Installed item discovery
//!
//! Every `*.jar` directly inside the scanned directory is opened as a zip archive and its
//! embedded descriptor read: `plugin.yml` / `paper-plugin.yml` for plugins, `fabric.mod.json`
//! or `META-INF/mods.toml` for mods. A jar without a readable descriptor is reported as a
//! problem and skipped.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml_ng::Value as YamlValue;
use zip::ZipArchive;
use zip::result::ZipError;

use super::item::Discovered;

/// Which descriptor family a catalog reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFormat {
    Plugin,
    Mod,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub found: Vec<Discovered>,
    /// Jars that could not be read, with the reason
    pub problems: Vec<(PathBuf, String)>,
}

/// Scan `dir` for jars, in file-name order.
pub fn scan_dir(dir: &Path, format: DescriptorFormat) -> io::Result<ScanReport> {
    let mut jars: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("jar"))
        })
        .collect();
    jars.sort();

    let mut report = ScanReport::default();
    for jar in jars {
        match read_descriptor(&jar, format) {
            Ok(Some(found)) => report.found.push(found),
            Ok(None) => report
                .problems
                .push((jar, "no descriptor found inside the jar".to_string())),
            Err(err) => report.problems.push((jar, err)),
        }
    }
    Ok(report)
}

fn read_descriptor(jar: &Path, format: DescriptorFormat) -> Result<Option<Discovered>, String> {
    let file = File::open(jar).map_err(|e| e.to_string())?;
    let mut archive = ZipArchive::new(file).map_err(|e| e.to_string())?;

    match format {
        DescriptorFormat::Plugin => {
            for name in ["plugin.yml", "paper-plugin.yml"] {
                if let Some(text) = read_entry(&mut archive, name).map_err(|e| e.to_string())? {
                    return parse_plugin_yml(&text, jar).map(Some);
                }
            }
            Ok(None)
        }
        DescriptorFormat::Mod => {
            if let Some(text) = read_entry(&mut archive, "fabric.mod.json").map_err(|e| e.to_string())? {
                return parse_fabric_json(&text, jar).map(Some);
            }
            if let Some(text) =
                read_entry(&mut archive, "META-INF/mods.toml").map_err(|e| e.to_string())?
            {
                return parse_mods_toml(&text, jar).map(Some);
            }
            Ok(None)
        }
    }
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<Option<String>, ZipError> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            Ok(Some(text))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Deserialize)]
struct PluginYml {
    name: Option<String>,
    version: Option<YamlValue>,
    author: Option<YamlValue>,
    authors: Option<YamlValue>,
    #[serde(rename = "spigot-id")]
    spigot_id: Option<u32>,
    #[serde(rename = "bukkit-id")]
    bukkit_id: Option<u32>,
}

fn yaml_scalar(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Sequence(items) => items.iter().find_map(yaml_scalar),
        _ => None,
    }
}

fn parse_plugin_yml(text: &str, jar: &Path) -> Result<Discovered, String> {
    let yml: PluginYml = serde_yaml_ng::from_str(text).map_err(|e| format!("invalid plugin.yml: {}", e))?;
    let name = yml
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| "plugin.yml has no name".to_string())?;
    let author = yml
        .author
        .as_ref()
        .and_then(yaml_scalar)
        .or_else(|| yml.authors.as_ref().and_then(yaml_scalar));

    Ok(Discovered {
        name,
        version: yml.version.as_ref().and_then(yaml_scalar),
        author,
        path: jar.to_path_buf(),
        id_a: yml.spigot_id.unwrap_or(0),
        id_b: yml.bukkit_id.unwrap_or(0),
    })
}

fn json_author(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => map.get("name").and_then(|n| n.as_str()).map(String::from),
        serde_json::Value::Array(items) => items.iter().find_map(json_author),
        _ => None,
    }
}

fn parse_fabric_json(text: &str, jar: &Path) -> Result<Discovered, String> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("invalid fabric.mod.json: {}", e))?;
    let name = json
        .get("name")
        .or_else(|| json.get("id"))
        .and_then(|n| n.as_str())
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| "fabric.mod.json has no name or id".to_string())?;

    Ok(Discovered {
        name: name.to_string(),
        version: json.get("version").and_then(|v| v.as_str()).map(String::from),
        author: json.get("authors").and_then(json_author),
        path: jar.to_path_buf(),
        id_a: 0,
        id_b: 0,
    })
}

fn parse_mods_toml(text: &str, jar: &Path) -> Result<Discovered, String> {
    let table: toml::Table = toml::from_str(text).map_err(|e| format!("invalid mods.toml: {}", e))?;
    let first = table
        .get("mods")
        .and_then(|mods| mods.as_array())
        .and_then(|mods| mods.first())
        .and_then(|m| m.as_table())
        .ok_or_else(|| "mods.toml declares no [[mods]]".to_string())?;

    let text_of = |key: &str| first.get(key).and_then(|v| v.as_str()).map(String::from);
    let name = text_of("displayName")
        .or_else(|| text_of("modId"))
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| "mods.toml has no displayName or modId".to_string())?;
    // "${file.jarVersion}" is substituted at build time only; treat it as unknown.
    let version = text_of("version").filter(|v| !v.contains("${"));
    let author = text_of("authors").or_else(|| {
        table
            .get("authors")
            .and_then(|v| v.as_str())
            .map(String::from)
    });

    Ok(Discovered {
        name,
        version,
        author,
        path: jar.to_path_buf(),
        id_a: 0,
        id_b: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_jar(dir: &Path, file: &str, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(file);
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        for (name, content) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    #[test]
    fn test_scan_plugins() {
        let temp = TempDir::new().unwrap();
        write_jar(
            temp.path(),
            "Essentials.jar",
            &[(
                "plugin.yml",
                "name: Essentials\nversion: '2.0'\nauthors: [author, other]\nspigot-id: 42\n",
            )],
        );
        write_jar(
            temp.path(),
            "Vault.jar",
            &[("paper-plugin.yml", "name: Vault\nversion: '1.7.3'\nauthor: cereal\n")],
        );
        write_jar(temp.path(), "broken.jar", &[("README", "nothing here")]);
        fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let report = scan_dir(temp.path(), DescriptorFormat::Plugin).unwrap();
        assert_eq!(report.found.len(), 2);

        let essentials = &report.found[0];
        assert_eq!(essentials.name, "Essentials");
        assert_eq!(essentials.version.as_deref(), Some("2.0"));
        assert_eq!(essentials.author.as_deref(), Some("author"));
        assert_eq!(essentials.id_a, 42);
        assert_eq!(essentials.id_b, 0);

        assert_eq!(report.found[1].author.as_deref(), Some("cereal"));
        assert_eq!(report.problems.len(), 1);
        assert!(report.problems[0].0.ends_with("broken.jar"));
    }

    #[test]
    fn test_scan_mods() {
        let temp = TempDir::new().unwrap();
        write_jar(
            temp.path(),
            "a-fabric.jar",
            &[(
                "fabric.mod.json",
                r#"{"id": "sodium", "name": "Sodium", "version": "0.5.8", "authors": [{"name": "jellysquid"}]}"#,
            )],
        );
        write_jar(
            temp.path(),
            "b-forge.jar",
            &[(
                "META-INF/mods.toml",
                "modLoader = \"javafml\"\n[[mods]]\nmodId = \"create\"\ndisplayName = \"Create\"\nversion = \"${file.jarVersion}\"\nauthors = \"simibubi\"\n",
            )],
        );

        let report = scan_dir(temp.path(), DescriptorFormat::Mod).unwrap();
        assert!(report.problems.is_empty());
        assert_eq!(report.found[0].name, "Sodium");
        assert_eq!(report.found[0].author.as_deref(), Some("jellysquid"));
        assert_eq!(report.found[1].name, "Create");
        assert_eq!(report.found[1].version, None);
        assert_eq!(report.found[1].author.as_deref(), Some("simibubi"));
    }

    #[test]
    fn test_missing_dir_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(scan_dir(&temp.path().join("nope"), DescriptorFormat::Plugin).is_err());
    }
}
