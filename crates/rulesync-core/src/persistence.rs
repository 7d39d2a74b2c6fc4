use crate::error::{Result, RuleSyncError};
use crate::io;
use crate::manifest::SyncManifest;
use crate::paths;
use crate::types::{self, Rule};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Rule files read from disk. Files that exist but fail to parse are
/// listed by id in `unreadable` so sync can leave them alone.
#[derive(Debug, Default, Clone)]
pub struct LoadedRules {
    pub rules: Vec<Rule>,
    pub unreadable: BTreeSet<String>,
}

/// Durable storage for everything the sync core must remember across runs.
///
/// Every failure is reported as [`RuleSyncError::Persistence`] so callers can
/// abort a pass without caring which file was involved.
pub trait RulePersistence: Send + Sync {
    fn load_pending_deletions(&self) -> Result<BTreeSet<String>>;
    fn save_pending_deletions(&self, ids: &BTreeSet<String>) -> Result<()>;
    fn load_local_rules(&self) -> Result<LoadedRules>;
    fn save_local_rules(&self, rules: &[Rule]) -> Result<()>;
    fn remove_local_rule(&self, id: &str) -> Result<()>;
    fn load_manifest(&self) -> Result<SyncManifest>;
    fn save_manifest(&self, manifest: &SyncManifest) -> Result<()>;
}

fn persistence_err(what: &str, path: &Path, e: impl std::fmt::Display) -> RuleSyncError {
    RuleSyncError::Persistence(format!("{what} {}: {e}", path.display()))
}

// ---------------------------------------------------------------------------
// FsPersistence
// ---------------------------------------------------------------------------

/// Files under a project root: rule markdown in the rules directory, sync
/// bookkeeping as YAML under `.rulesync/`.
#[derive(Debug, Clone)]
pub struct FsPersistence {
    root: PathBuf,
    rules_dir: String,
}

impl FsPersistence {
    pub fn new(root: &Path, rules_dir: impl Into<String>) -> Self {
        Self {
            root: root.to_path_buf(),
            rules_dir: rules_dir.into(),
        }
    }

    pub fn rules_path(&self) -> PathBuf {
        paths::rules_dir(&self.root, &self.rules_dir)
    }

    fn read_yaml<T: serde::de::DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        let data =
            std::fs::read_to_string(path).map_err(|e| persistence_err("failed to read", path, e))?;
        if data.trim().is_empty() {
            return Ok(T::default());
        }
        serde_yaml::from_str(&data).map_err(|e| persistence_err("failed to parse", path, e))
    }

    fn write_yaml<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let data =
            serde_yaml::to_string(value).map_err(|e| persistence_err("failed to encode", path, e))?;
        io::atomic_write(path, data.as_bytes())
            .map_err(|e| persistence_err("failed to write", path, e))
    }
}

fn modified_at(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

impl RulePersistence for FsPersistence {
    fn load_pending_deletions(&self) -> Result<BTreeSet<String>> {
        self.read_yaml(&paths::pending_deletions_path(&self.root))
    }

    fn save_pending_deletions(&self, ids: &BTreeSet<String>) -> Result<()> {
        self.write_yaml(&paths::pending_deletions_path(&self.root), ids)
    }

    /// Rule files that fail to parse are skipped with a warning and reported
    /// as unreadable; one bad file does not hide the rest.
    fn load_local_rules(&self) -> Result<LoadedRules> {
        let dir = self.rules_path();
        if !dir.exists() {
            return Ok(LoadedRules::default());
        }
        let entries =
            std::fs::read_dir(&dir).map_err(|e| persistence_err("failed to list", &dir, e))?;
        let mut loaded = LoadedRules::default();
        for entry in entries {
            let entry = entry.map_err(|e| persistence_err("failed to list", &dir, e))?;
            let path = entry.path();
            if !path.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(paths::RULE_EXTENSION)
            {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().to_string();
            let content = std::fs::read_to_string(&path)
                .map_err(|e| persistence_err("failed to read", &path, e))?;
            match Rule::from_file(&filename, content, modified_at(&path)) {
                Ok(rule) => loaded.rules.push(rule),
                Err(e) => {
                    warn!(file = %filename, error = %e, "skipping unparseable rule file");
                    if let Ok(id) = types::id_from_filename(&filename) {
                        loaded.unreadable.insert(id);
                    }
                }
            }
        }
        loaded.rules.sort_by(|a, b| a.metadata.id.cmp(&b.metadata.id));
        Ok(loaded)
    }

    /// Writes only files whose content differs from disk.
    fn save_local_rules(&self, rules: &[Rule]) -> Result<()> {
        for rule in rules {
            let path = paths::rule_path(&self.root, &self.rules_dir, rule.id());
            let unchanged = std::fs::read_to_string(&path)
                .map(|existing| existing == rule.content)
                .unwrap_or(false);
            if unchanged {
                continue;
            }
            io::atomic_write(&path, rule.content.as_bytes())
                .map_err(|e| persistence_err("failed to write", &path, e))?;
        }
        Ok(())
    }

    fn remove_local_rule(&self, id: &str) -> Result<()> {
        let path = paths::rule_path(&self.root, &self.rules_dir, id);
        io::remove_if_exists(&path)
            .map(|_| ())
            .map_err(|e| persistence_err("failed to remove", &path, e))
    }

    fn load_manifest(&self) -> Result<SyncManifest> {
        let mut manifest: SyncManifest = self.read_yaml(&paths::manifest_path(&self.root))?;
        if manifest.version == 0 {
            manifest.version = 1;
        }
        Ok(manifest)
    }

    fn save_manifest(&self, manifest: &SyncManifest) -> Result<()> {
        self.write_yaml(&paths::manifest_path(&self.root), manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fs(dir: &TempDir) -> FsPersistence {
        FsPersistence::new(dir.path(), ".rules")
    }

    #[test]
    fn missing_files_load_as_empty() {
        let dir = TempDir::new().unwrap();
        let p = fs(&dir);
        assert!(p.load_pending_deletions().unwrap().is_empty());
        assert!(p.load_local_rules().unwrap().rules.is_empty());
        assert_eq!(p.load_manifest().unwrap().version, 1);
    }

    #[test]
    fn pending_deletions_survive_reload() {
        let dir = TempDir::new().unwrap();
        let ids: BTreeSet<String> = ["b".to_string(), "a".to_string()].into();
        fs(&dir).save_pending_deletions(&ids).unwrap();
        assert_eq!(fs(&dir).load_pending_deletions().unwrap(), ids);
    }

    #[test]
    fn corrupt_pending_file_is_a_persistence_error() {
        let dir = TempDir::new().unwrap();
        let path = paths::pending_deletions_path(dir.path());
        io::atomic_write(&path, b"{ not: [valid").unwrap();
        let err = fs(&dir).load_pending_deletions().unwrap_err();
        assert!(matches!(err, RuleSyncError::Persistence(_)));
    }

    #[test]
    fn rules_roundtrip_and_bad_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let p = fs(&dir);
        let rule = Rule::from_file("style.md", "# Style\n", Utc::now()).unwrap();
        p.save_local_rules(std::slice::from_ref(&rule)).unwrap();
        std::fs::write(p.rules_path().join("empty.md"), "").unwrap();
        std::fs::write(p.rules_path().join("notes.txt"), "ignored").unwrap();

        let loaded = p.load_local_rules().unwrap();
        assert_eq!(loaded.rules.len(), 1);
        assert_eq!(loaded.rules[0].id(), "style");
        assert_eq!(loaded.rules[0].content, "# Style\n");
        assert_eq!(loaded.unreadable, BTreeSet::from(["empty".to_string()]));
    }

    #[test]
    fn remove_local_rule_deletes_file() {
        let dir = TempDir::new().unwrap();
        let p = fs(&dir);
        let rule = Rule::from_file("gone.md", "# Gone\n", Utc::now()).unwrap();
        p.save_local_rules(&[rule]).unwrap();
        p.remove_local_rule("gone").unwrap();
        p.remove_local_rule("gone").unwrap();
        assert!(p.load_local_rules().unwrap().rules.is_empty());
    }

    #[test]
    fn rules_are_written_under_their_id() {
        let dir = TempDir::new().unwrap();
        let p = fs(&dir);
        let mut rule = Rule::from_file("evil.md", "# Evil\n", Utc::now()).unwrap();
        rule.metadata.filename = "../../escaped.md".into();
        p.save_local_rules(&[rule]).unwrap();
        assert!(p.rules_path().join("evil.md").exists());
        assert!(!dir.path().join("escaped.md").exists());
    }

    #[test]
    fn manifest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let p = fs(&dir);
        let mut m = SyncManifest::new();
        m.mark_conflict("x");
        p.save_manifest(&m).unwrap();
        assert!(p.load_manifest().unwrap().is_marked("x"));
    }
}
