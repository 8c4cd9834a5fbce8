//! # Procedure Store
//!
//! Loads procedure definitions from a directory tree into an in-memory map
//! keyed by procedure id (file stem). The map lives behind an `RwLock<Arc<..>>`:
//! a reload builds the replacement map completely off to the side and swaps
//! the `Arc` in one write, so a concurrent reader always observes either the
//! pre-reload or the post-reload set in full, never a mix.
//!
//! Malformed definition files are logged and skipped; a load only fails on a
//! hard I/O fault at the root directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::error::Result;
use crate::procedure::Procedure;

pub type ProcedureMap = HashMap<String, Arc<Procedure>>;

pub struct ProcedureStore {
    dir: PathBuf,
    procedures: RwLock<Arc<ProcedureMap>>,
}

impl ProcedureStore {
    /// Create an empty store rooted at `dir`. Call [`reload`](Self::reload)
    /// to populate it.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            procedures: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Rebuild the whole map from disk and swap it in atomically.
    ///
    /// Returns the number of procedures loaded. Individual bad files are
    /// skipped with a warning.
    pub fn reload(&self) -> Result<usize> {
        let mut fresh = HashMap::new();
        load_dir(&self.dir, &mut fresh)?;
        let count = fresh.len();

        let mut guard = self.procedures.write().expect("store lock poisoned");
        *guard = Arc::new(fresh);
        drop(guard);

        info!(count, dir = %self.dir.display(), "procedure store reloaded");
        Ok(count)
    }

    /// Look up one procedure by id.
    pub fn get(&self, id: &str) -> Option<Arc<Procedure>> {
        self.procedures
            .read()
            .expect("store lock poisoned")
            .get(id)
            .cloned()
    }

    /// A consistent view of the full map, decoupled from later reloads.
    pub fn snapshot(&self) -> Arc<ProcedureMap> {
        Arc::clone(&self.procedures.read().expect("store lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.procedures.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn load_dir(dir: &Path, out: &mut ProcedureMap) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            load_dir(&path, out)?;
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
            continue;
        };

        match load_file(&path, &id) {
            Ok(procedure) => {
                out.insert(id, Arc::new(procedure));
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping malformed procedure definition");
            }
        }
    }
    Ok(())
}

fn load_file(path: &Path, id: &str) -> Result<Procedure> {
    let content = fs::read_to_string(path)?;
    let raw: serde_json::Value = serde_json::from_str(&content)?;
    let category = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("other");
    Procedure::from_json(id, category, &raw, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_definition(dir: &Path, name: &str, body: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    fn valid_definition(title: &str) -> String {
        format!(
            r#"{{
                "title": "{title}",
                "description": "A guide.",
                "keywords": ["one", "two", "three"],
                "steps": ["First step.", "Second step."]
            }}"#
        )
    }

    #[test]
    fn loads_recursively_and_keys_by_file_stem() {
        let tmp = TempDir::new().unwrap();
        let sub = tmp.path().join("asset_management");
        fs::create_dir(&sub).unwrap();
        write_definition(tmp.path(), "search_asset.json", &valid_definition("Search"));
        write_definition(&sub, "upload_asset.json", &valid_definition("Upload"));

        let store = ProcedureStore::new(tmp.path());
        assert_eq!(store.reload().unwrap(), 2);

        let upload = store.get("upload_asset").unwrap();
        assert_eq!(upload.title, "Upload");
        assert_eq!(upload.category, "asset_management");
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn round_trips_definition_content() {
        let tmp = TempDir::new().unwrap();
        write_definition(tmp.path(), "p.json", &valid_definition("Round Trip"));

        let store = ProcedureStore::new(tmp.path());
        store.reload().unwrap();

        let p = store.get("p").unwrap();
        assert_eq!(p.description, "A guide.");
        assert_eq!(p.body.step_count(), 2);
    }

    #[test]
    fn malformed_file_is_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        write_definition(tmp.path(), "good.json", &valid_definition("Good"));
        write_definition(tmp.path(), "bad.json", "{ not json at all");
        write_definition(
            tmp.path(),
            "incomplete.json",
            r#"{"title": "No description", "keywords": ["a","b","c"], "steps": ["x","y"]}"#,
        );

        let store = ProcedureStore::new(tmp.path());
        assert_eq!(store.reload().unwrap(), 1);
        assert!(store.get("good").is_some());
        assert!(store.get("bad").is_none());
        assert!(store.get("incomplete").is_none());
    }

    #[test]
    fn reload_replaces_the_set_wholesale() {
        let tmp = TempDir::new().unwrap();
        write_definition(tmp.path(), "old_name.json", &valid_definition("Old"));

        let store = ProcedureStore::new(tmp.path());
        store.reload().unwrap();
        let before = store.snapshot();
        assert!(before.contains_key("old_name"));

        // rename the definition on disk
        fs::rename(tmp.path().join("old_name.json"), tmp.path().join("new_name.json")).unwrap();
        store.reload().unwrap();

        let after = store.snapshot();
        assert!(after.contains_key("new_name"));
        assert!(!after.contains_key("old_name"));
        // an earlier snapshot still sees the old set in full
        assert!(before.contains_key("old_name"));
        assert!(!before.contains_key("new_name"));
    }

    #[test]
    fn missing_root_directory_is_an_error() {
        let store = ProcedureStore::new("/definitely/not/a/real/dir");
        assert!(store.reload().is_err());
    }
}
