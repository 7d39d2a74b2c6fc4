use crate::types::{Rule, SyncStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What a rule looked like the last time both sides agreed on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub content_hash: String,
    pub synced_at: DateTime<Utc>,
}

/// The last known synced state, persisted between runs.
///
/// Without it, "only the server changed" and "only the local copy changed"
/// cannot be told apart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncManifest {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub entries: BTreeMap<String, BaselineEntry>,
    /// Conflicts the user chose to resolve by hand later.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub marked_conflicts: BTreeSet<String>,
}

fn default_version() -> u32 {
    1
}

impl SyncManifest {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            ..Self::default()
        }
    }

    pub fn baseline(&self, id: &str) -> Option<&BaselineEntry> {
        self.entries.get(id)
    }

    pub fn record_synced(&mut self, rule: &Rule, at: DateTime<Utc>) {
        self.entries.insert(
            rule.id().to_string(),
            BaselineEntry {
                content_hash: rule.content_hash(),
                synced_at: at,
            },
        );
    }

    pub fn forget(&mut self, id: &str) {
        self.entries.remove(id);
        self.marked_conflicts.remove(id);
    }

    pub fn mark_conflict(&mut self, id: &str) {
        self.marked_conflicts.insert(id.to_string());
    }

    /// Returns true if the id was marked.
    pub fn clear_conflict(&mut self, id: &str) -> bool {
        self.marked_conflicts.remove(id)
    }

    pub fn is_marked(&self, id: &str) -> bool {
        self.marked_conflicts.contains(id)
    }

    /// Status of a local rule as implied by the manifest.
    pub fn status_for(&self, rule: &Rule) -> SyncStatus {
        if self.is_marked(rule.id()) {
            return SyncStatus::Conflict;
        }
        match self.baseline(rule.id()) {
            Some(b) if b.content_hash == rule.content_hash() => SyncStatus::Synced,
            _ => SyncStatus::LocalOnly,
        }
    }
}
