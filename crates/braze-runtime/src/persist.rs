//! Persistence sync for the plugin set.
//!
//! Enable/disable mirror their outcome into the `[plugins]` section of the
//! configuration file so a restart resumes the same plugin set. Edits go
//! through `toml_edit`, which rewrites only the touched entry — comments,
//! formatting, ordering, and every key the runtime does not own survive the
//! round-trip untouched.
//!
//! A persistence failure is reported to the caller but never reverts the
//! in-memory state: a consistent live system beats a consistent file during
//! a transient disk failure.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use toml_edit::{Array, DocumentMut, Item, Table, value};

use crate::error::{PluginError, PluginResult};
use crate::unit::PluginKind;

/// The on-disk record of which plugins auto-load and enable at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedPluginSet {
    pub system: Vec<String>,
    pub user: Vec<String>,
}

impl PersistedPluginSet {
    /// The list for one plugin kind.
    pub fn list(&self, kind: PluginKind) -> &[String] {
        match kind {
            PluginKind::System => &self.system,
            PluginKind::User => &self.user,
        }
    }

    /// Whether `name` is a member of `kind`'s list.
    pub fn contains(&self, kind: PluginKind, name: &str) -> bool {
        self.list(kind).iter().any(|n| n == name)
    }

    /// The kind whose list contains `name`, preferring `system`.
    pub fn kind_of(&self, name: &str) -> Option<PluginKind> {
        if self.contains(PluginKind::System, name) {
            Some(PluginKind::System)
        } else if self.contains(PluginKind::User, name) {
            Some(PluginKind::User)
        } else {
            None
        }
    }
}

/// Reads and edits the persisted plugin set in place.
#[derive(Debug, Clone)]
pub struct PluginSetStore {
    path: PathBuf,
}

impl PluginSetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current plugin set. A missing file yields the empty set.
    pub fn read(&self) -> PluginResult<PersistedPluginSet> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PersistedPluginSet::default()),
            Err(e) => {
                return Err(PluginError::Persistence(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };
        let doc: DocumentMut = raw.parse().map_err(|e| {
            PluginError::Persistence(format!("cannot parse {}: {e}", self.path.display()))
        })?;

        let read_list = |key: &str| -> Vec<String> {
            doc.get("plugins")
                .and_then(Item::as_table)
                .and_then(|t| t.get(key))
                .and_then(Item::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(PersistedPluginSet {
            system: read_list("system"),
            user: read_list("user"),
        })
    }

    /// Adds or removes `name` from `kind`'s list, touching nothing else in
    /// the file. Returns whether the file changed.
    pub fn set_membership(
        &self,
        kind: PluginKind,
        name: &str,
        present: bool,
    ) -> PluginResult<bool> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(PluginError::Persistence(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };
        let mut doc: DocumentMut = raw.parse().map_err(|e| {
            PluginError::Persistence(format!("cannot parse {}: {e}", self.path.display()))
        })?;

        let plugins = doc
            .entry("plugins")
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .ok_or_else(|| {
                PluginError::Persistence("'plugins' is not a table".to_string())
            })?;
        let list = plugins
            .entry(kind.as_str())
            .or_insert(value(Array::new()))
            .as_array_mut()
            .ok_or_else(|| {
                PluginError::Persistence(format!("'plugins.{kind}' is not an array"))
            })?;

        let position = list.iter().position(|v| v.as_str() == Some(name));
        let changed = match (present, position) {
            (true, None) => {
                list.push(name);
                true
            }
            (false, Some(idx)) => {
                list.remove(idx);
                true
            }
            _ => false,
        };

        if changed {
            fs::write(&self.path, doc.to_string()).map_err(|e| {
                PluginError::Persistence(format!(
                    "cannot write {}: {e}",
                    self.path.display()
                ))
            })?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FIXTURE: &str = "\
# host configuration
[gateway]
base_url = \"ws://127.0.0.1:3001\" # keep in sync with the gateway

[plugins]
system = [\"cmds\"]
user = [\"demo\"]

[logging]
level = \"debug\"
";

    #[test]
    fn reads_both_lists() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("braze.toml");
        fs::write(&path, FIXTURE).unwrap();

        let store = PluginSetStore::new(&path);
        let set = store.read().unwrap();
        assert_eq!(set.system, vec!["cmds"]);
        assert_eq!(set.user, vec!["demo"]);
        assert_eq!(set.kind_of("cmds"), Some(PluginKind::System));
        assert_eq!(set.kind_of("ghost"), None);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let tmp = tempdir().unwrap();
        let store = PluginSetStore::new(tmp.path().join("absent.toml"));
        assert_eq!(store.read().unwrap(), PersistedPluginSet::default());
    }

    #[test]
    fn membership_edit_preserves_untouched_content() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("braze.toml");
        fs::write(&path, FIXTURE).unwrap();

        let store = PluginSetStore::new(&path);
        assert!(store.set_membership(PluginKind::User, "weather", true).unwrap());
        assert!(store.set_membership(PluginKind::User, "demo", false).unwrap());

        let raw = fs::read_to_string(&path).unwrap();
        // Comments and unrelated sections survive the round-trip.
        assert!(raw.contains("# host configuration"));
        assert!(raw.contains("# keep in sync with the gateway"));
        assert!(raw.contains("level = \"debug\""));

        let set = store.read().unwrap();
        assert_eq!(set.system, vec!["cmds"]);
        assert_eq!(set.user, vec!["weather"]);
    }

    #[test]
    fn redundant_edits_do_not_touch_the_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("braze.toml");
        fs::write(&path, FIXTURE).unwrap();

        let store = PluginSetStore::new(&path);
        assert!(!store.set_membership(PluginKind::System, "cmds", true).unwrap());
        assert!(!store.set_membership(PluginKind::User, "ghost", false).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), FIXTURE);
    }

    #[test]
    fn creates_file_on_first_write() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("fresh.toml");

        let store = PluginSetStore::new(&path);
        assert!(store.set_membership(PluginKind::User, "demo", true).unwrap());
        let set = store.read().unwrap();
        assert_eq!(set.user, vec!["demo"]);
    }
}
