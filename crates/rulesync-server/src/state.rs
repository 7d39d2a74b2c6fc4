use chrono::Utc;
use rulesync_core::error::{Result, RuleSyncError};
use rulesync_core::paths;
use rulesync_core::{Rule, SyncStatus};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    rules: Arc<RwLock<BTreeMap<String, Rule>>>,
    data_file: Option<PathBuf>,
    /// Ids touched by each mutation.
    pub event_tx: broadcast::Sender<Vec<String>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// In-memory only; everything is lost on shutdown.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            rules: Arc::new(RwLock::new(BTreeMap::new())),
            data_file: None,
            event_tx: tx,
        }
    }

    /// Backed by a JSON file holding the rule list. A missing file starts
    /// empty; an unreadable one is an error.
    pub fn with_data_file(path: PathBuf) -> Result<Self> {
        let mut state = Self::new();
        if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let loaded: Vec<Rule> = if data.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&data)?
            };
            let map = loaded
                .into_iter()
                .map(|r| (r.id().to_string(), r))
                .collect();
            state.rules = Arc::new(RwLock::new(map));
        }
        state.data_file = Some(path);
        Ok(state)
    }

    pub async fn list(&self) -> Vec<Rule> {
        self.rules.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<Rule> {
        self.rules.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }

    /// Unknown ids are left out of the reply.
    pub async fn get_many(&self, ids: &[String]) -> Vec<Rule> {
        let rules = self.rules.read().await;
        ids.iter().filter_map(|id| rules.get(id).cloned()).collect()
    }

    /// Store a batch. Each rule's metadata is re-derived from its content and
    /// stamped with the server time; one invalid rule rejects the batch. A
    /// file name other than `{id}.md` is invalid.
    ///
    /// The batch is persisted before it becomes visible, so a failed write
    /// leaves the stored set untouched.
    pub async fn upsert(&self, incoming: Vec<Rule>) -> Result<Vec<Rule>> {
        let now = Utc::now();
        let mut accepted = Vec::with_capacity(incoming.len());
        for rule in incoming {
            let m = rule.metadata;
            let filename = if m.filename.is_empty() {
                paths::rule_filename(&m.id)
            } else {
                m.filename
            };
            let mut fresh = Rule::new(m.id, filename, rule.content, now)?;
            fresh.validate()?;
            fresh.metadata.sync_status = SyncStatus::Synced;
            accepted.push(fresh);
        }

        let mut rules = self.rules.write().await;
        let mut next = rules.clone();
        for rule in &accepted {
            next.insert(rule.id().to_string(), rule.clone());
        }
        self.persist(&next)?;
        *rules = next;
        drop(rules);

        debug!(count = accepted.len(), "rules stored");
        self.notify(accepted.iter().map(|r| r.id().to_string()).collect());
        Ok(accepted)
    }

    /// Delete `ids`. Unknown ids are confirmed too, so a retried delete
    /// converges.
    pub async fn delete(&self, ids: &[String]) -> Result<Vec<String>> {
        let mut rules = self.rules.write().await;
        let removed: Vec<String> = ids
            .iter()
            .filter(|id| rules.contains_key(id.as_str()))
            .cloned()
            .collect();
        if !removed.is_empty() {
            let mut next = rules.clone();
            for id in &removed {
                next.remove(id);
            }
            self.persist(&next)?;
            *rules = next;
        }
        drop(rules);

        debug!(requested = ids.len(), removed = removed.len(), "rules deleted");
        if !removed.is_empty() {
            self.notify(removed);
        }
        Ok(ids.to_vec())
    }

    fn persist(&self, rules: &BTreeMap<String, Rule>) -> Result<()> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        let list: Vec<&Rule> = rules.values().collect();
        let data = serde_json::to_vec_pretty(&list)?;
        rulesync_core::io::atomic_write(path, &data)
            .map_err(|e| RuleSyncError::Persistence(format!("{}: {e}", path.display())))
    }

    fn notify(&self, ids: Vec<String>) {
        let _ = self.event_tx.send(ids);
    }
}
