use crate::error::Result;
use crate::persistence::RulePersistence;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Rule ids deleted locally whose server-side deletion is not yet confirmed.
///
/// Every mutation is written through to persistence before it returns; a
/// failed write rolls the in-memory set back so it never claims more than
/// the disk does.
pub struct PendingDeletions {
    ids: BTreeSet<String>,
    persistence: Arc<dyn RulePersistence>,
}

impl PendingDeletions {
    pub fn load(persistence: Arc<dyn RulePersistence>) -> Result<Self> {
        let ids = persistence.load_pending_deletions()?;
        Ok(Self { ids, persistence })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Queue `id` for server deletion. Returns false if it was already queued.
    pub fn add(&mut self, id: &str) -> Result<bool> {
        if !self.ids.insert(id.to_string()) {
            return Ok(false);
        }
        if let Err(e) = self.persistence.save_pending_deletions(&self.ids) {
            self.ids.remove(id);
            return Err(e);
        }
        debug!(rule_id = id, "queued pending deletion");
        Ok(true)
    }

    /// Drop ids the server confirmed as deleted. Returns how many were removed.
    pub fn confirm<'a>(&mut self, ids: impl IntoIterator<Item = &'a String>) -> Result<usize> {
        let removed: Vec<String> = ids
            .into_iter()
            .filter(|id| self.ids.remove(id.as_str()))
            .cloned()
            .collect();
        if removed.is_empty() {
            return Ok(0);
        }
        if let Err(e) = self.persistence.save_pending_deletions(&self.ids) {
            self.ids.extend(removed);
            return Err(e);
        }
        Ok(removed.len())
    }

    /// Cancel a queued deletion, e.g. when the rule is recreated locally.
    pub fn cancel(&mut self, id: &str) -> Result<bool> {
        if !self.ids.remove(id) {
            return Ok(false);
        }
        if let Err(e) = self.persistence.save_pending_deletions(&self.ids) {
            self.ids.insert(id.to_string());
            return Err(e);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleSyncError;
    use crate::manifest::SyncManifest;
    use crate::persistence::{FsPersistence, LoadedRules};
    use crate::types::Rule;
    use tempfile::TempDir;

    struct BrokenDisk;

    impl RulePersistence for BrokenDisk {
        fn load_pending_deletions(&self) -> Result<BTreeSet<String>> {
            Ok(["stale".to_string()].into())
        }
        fn save_pending_deletions(&self, _: &BTreeSet<String>) -> Result<()> {
            Err(RuleSyncError::Persistence("read-only filesystem".into()))
        }
        fn load_local_rules(&self) -> Result<LoadedRules> {
            Ok(LoadedRules::default())
        }
        fn save_local_rules(&self, _: &[Rule]) -> Result<()> {
            Ok(())
        }
        fn remove_local_rule(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn load_manifest(&self) -> Result<SyncManifest> {
            Ok(SyncManifest::new())
        }
        fn save_manifest(&self, _: &SyncManifest) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn add_persists_immediately() {
        let dir = TempDir::new().unwrap();
        let disk: Arc<dyn RulePersistence> = Arc::new(FsPersistence::new(dir.path(), ".rules"));
        let mut pending = PendingDeletions::load(disk.clone()).unwrap();
        assert!(pending.add("a").unwrap());
        assert!(!pending.add("a").unwrap());

        let reloaded = PendingDeletions::load(disk).unwrap();
        assert!(reloaded.contains("a"));
    }

    #[test]
    fn confirm_removes_and_persists() {
        let dir = TempDir::new().unwrap();
        let disk: Arc<dyn RulePersistence> = Arc::new(FsPersistence::new(dir.path(), ".rules"));
        let mut pending = PendingDeletions::load(disk.clone()).unwrap();
        pending.add("a").unwrap();
        pending.add("b").unwrap();

        let confirmed = vec!["a".to_string(), "unknown".to_string()];
        assert_eq!(pending.confirm(&confirmed).unwrap(), 1);

        let reloaded = PendingDeletions::load(disk).unwrap();
        assert_eq!(reloaded.ids().iter().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn failed_write_rolls_back() {
        let mut pending = PendingDeletions::load(Arc::new(BrokenDisk)).unwrap();
        assert!(pending.add("new").is_err());
        assert!(!pending.contains("new"));

        let confirmed = vec!["stale".to_string()];
        assert!(pending.confirm(&confirmed).is_err());
        assert!(pending.contains("stale"));
    }
}
