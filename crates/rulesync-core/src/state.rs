use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// What observers see of the sync machinery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub is_syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Owner of the single [`SyncState`]; every change goes through one of the
/// transition methods and is broadcast to subscribers.
#[derive(Debug)]
pub struct SyncStateTracker {
    tx: watch::Sender<SyncState>,
}

impl Default for SyncStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStateTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SyncState::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> SyncState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    /// A pass started. The previous error stays visible until it ends.
    pub fn begin(&self) {
        self.tx.send_modify(|s| s.is_syncing = true);
    }

    /// A pass finished without errors.
    pub fn succeed(&self, at: DateTime<Utc>) {
        self.tx.send_modify(|s| {
            s.is_syncing = false;
            s.last_sync_time = Some(at);
            s.error = None;
        });
    }

    /// A pass finished but some work failed; it still counts as a sync.
    pub fn partial(&self, at: DateTime<Utc>, summary: impl Into<String>) {
        let summary = summary.into();
        self.tx.send_modify(|s| {
            s.is_syncing = false;
            s.last_sync_time = Some(at);
            s.error = Some(summary);
        });
    }

    /// A pass aborted; `last_sync_time` keeps the last good pass.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|s| {
            s.is_syncing = false;
            s.error = Some(message);
        });
    }
}
