//! On-disk plugin units.
//!
//! A plugin *unit* is the discoverable half of a plugin: a TOML manifest
//! under the plugin root that names the unit and carries its metadata. The
//! compiled half lives in the [`FactoryRegistry`](crate::plugin::FactoryRegistry);
//! a unit without a matching factory fails the contract at load time.
//!
//! Two layouts are accepted, resolved in this order:
//!
//! 1. `<root>/<name>/plugin.toml` — a packaged unit directory
//! 2. `<root>/<name>.toml` — a loose manifest file
//!
//! When both exist the packaged form wins. Neither existing is `NotFound`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{PluginError, PluginResult};

/// Default version for units that do not declare one.
const DEFAULT_VERSION: &str = "0.1.0";

/// Whether a plugin belongs to the system or the user set.
///
/// Derived from configuration membership — a unit never declares its own
/// kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    System,
    User,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::System => "system",
            PluginKind::User => "user",
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw manifest contents.
#[derive(Debug, Deserialize)]
struct UnitManifest {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
}

/// A resolved, validated plugin unit.
#[derive(Debug, Clone)]
pub struct PluginUnit {
    pub name: String,
    pub version: String,
    pub description: String,
    /// The manifest file the unit was resolved from.
    pub path: PathBuf,
}

/// The plugin root directory plus a cache of resolved units.
///
/// The cache exists so repeated listings do not re-read manifests; loads
/// always invalidate first so a reload observes the latest on-disk content.
#[derive(Debug)]
pub struct UnitStore {
    root: PathBuf,
    cache: Mutex<HashMap<String, PluginUnit>>,
}

impl UnitStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists every discoverable unit name, sorted.
    ///
    /// Discovery only checks that a manifest file exists; it does not parse
    /// or validate. A unit that is loaded-then-disabled therefore remains
    /// discoverable as long as its files remain on disk.
    pub fn discover(&self) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return names;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if path.join("plugin.toml").is_file()
                    && let Some(name) = path.file_name().and_then(|n| n.to_str())
                {
                    names.push(name.to_string());
                }
            } else if path.extension().is_some_and(|e| e == "toml")
                && let Some(stem) = path.file_stem().and_then(|n| n.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        names.dedup();
        names
    }

    /// Resolves `name` to a unit, reading the manifest from disk.
    ///
    /// The result is cached for listings; call [`invalidate`](Self::invalidate)
    /// first when fresh content is required.
    pub fn resolve(&self, name: &str) -> PluginResult<PluginUnit> {
        if let Some(unit) = self.cache.lock().get(name) {
            return Ok(unit.clone());
        }

        let packaged = self.root.join(name).join("plugin.toml");
        let loose = self.root.join(format!("{name}.toml"));
        let path = if packaged.is_file() {
            packaged
        } else if loose.is_file() {
            loose
        } else {
            return Err(PluginError::NotFound(name.to_string()));
        };

        let unit = parse_manifest(name, &path)?;
        self.cache.lock().insert(name.to_string(), unit.clone());
        Ok(unit)
    }

    /// Drops the cached entry for `name`.
    pub fn invalidate(&self, name: &str) {
        self.cache.lock().remove(name);
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        let mut cache = self.cache.lock();
        let dropped = cache.len();
        cache.clear();
        if dropped > 0 {
            debug!(dropped, "Cleared unit cache");
        }
    }

    /// Drops cached entries for every name in `names`.
    pub fn evict<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let mut cache = self.cache.lock();
        for name in names {
            cache.remove(name);
        }
    }
}

fn parse_manifest(name: &str, path: &Path) -> PluginResult<PluginUnit> {
    let raw = fs::read_to_string(path).map_err(|e| PluginError::InvalidContract {
        name: name.to_string(),
        reason: format!("manifest unreadable: {e}"),
    })?;
    let manifest: UnitManifest =
        toml::from_str(&raw).map_err(|e| PluginError::InvalidContract {
            name: name.to_string(),
            reason: format!("manifest parse error: {e}"),
        })?;

    let declared = manifest
        .name
        .ok_or_else(|| PluginError::InvalidContract {
            name: name.to_string(),
            reason: "manifest declares no name".to_string(),
        })?;
    if declared != name {
        return Err(PluginError::InvalidContract {
            name: name.to_string(),
            reason: format!("manifest declares name '{declared}'"),
        });
    }

    Ok(PluginUnit {
        name: declared,
        version: manifest.version.unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        description: manifest.description.unwrap_or_default(),
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_unit(root: &Path, name: &str, body: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("plugin.toml"), body).unwrap();
    }

    #[test]
    fn discovers_both_layouts() {
        let tmp = tempdir().unwrap();
        write_unit(tmp.path(), "alpha", "name = \"alpha\"\n");
        fs::write(tmp.path().join("beta.toml"), "name = \"beta\"\n").unwrap();
        fs::create_dir_all(tmp.path().join("empty")).unwrap();

        let store = UnitStore::new(tmp.path());
        assert_eq!(store.discover(), vec!["alpha", "beta"]);
    }

    #[test]
    fn packaged_form_wins_over_loose_manifest() {
        let tmp = tempdir().unwrap();
        write_unit(
            tmp.path(),
            "demo",
            "name = \"demo\"\nversion = \"2.0.0\"\n",
        );
        fs::write(
            tmp.path().join("demo.toml"),
            "name = \"demo\"\nversion = \"1.0.0\"\n",
        )
        .unwrap();

        let store = UnitStore::new(tmp.path());
        let unit = store.resolve("demo").unwrap();
        assert_eq!(unit.version, "2.0.0");
        assert!(unit.path.ends_with("demo/plugin.toml"));
    }

    #[test]
    fn missing_unit_is_not_found() {
        let tmp = tempdir().unwrap();
        let store = UnitStore::new(tmp.path());
        assert!(matches!(
            store.resolve("ghost"),
            Err(PluginError::NotFound(_))
        ));
    }

    #[test]
    fn name_mismatch_fails_the_contract() {
        let tmp = tempdir().unwrap();
        write_unit(tmp.path(), "demo", "name = \"other\"\n");

        let store = UnitStore::new(tmp.path());
        assert!(matches!(
            store.resolve("demo"),
            Err(PluginError::InvalidContract { .. })
        ));
    }

    #[test]
    fn missing_name_fails_the_contract() {
        let tmp = tempdir().unwrap();
        write_unit(tmp.path(), "demo", "version = \"1.0.0\"\n");

        let store = UnitStore::new(tmp.path());
        assert!(matches!(
            store.resolve("demo"),
            Err(PluginError::InvalidContract { .. })
        ));
    }

    #[test]
    fn invalidate_forces_fresh_read() {
        let tmp = tempdir().unwrap();
        write_unit(tmp.path(), "demo", "name = \"demo\"\nversion = \"1.0.0\"\n");

        let store = UnitStore::new(tmp.path());
        assert_eq!(store.resolve("demo").unwrap().version, "1.0.0");

        write_unit(tmp.path(), "demo", "name = \"demo\"\nversion = \"1.1.0\"\n");
        // Cached copy is returned until invalidated.
        assert_eq!(store.resolve("demo").unwrap().version, "1.0.0");
        store.invalidate("demo");
        assert_eq!(store.resolve("demo").unwrap().version, "1.1.0");
    }

    #[test]
    fn defaults_apply_when_fields_absent() {
        let tmp = tempdir().unwrap();
        write_unit(tmp.path(), "demo", "name = \"demo\"\n");

        let store = UnitStore::new(tmp.path());
        let unit = store.resolve("demo").unwrap();
        assert_eq!(unit.version, "0.1.0");
        assert!(unit.description.is_empty());
    }
}
