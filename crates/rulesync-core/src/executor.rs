//! Applying [`SyncOperations`] to the server and the local store.
//!
//! Uploads and server deletes go out in fixed-size batches, each wrapped in
//! the retry policy. A failed batch is recorded and the next one proceeds.
//! Only a persistence failure stops execution, since continuing would leave
//! the pending-deletion queue in an unknown state.

use crate::error::{Result, RuleSyncError};
use crate::manifest::SyncManifest;
use crate::paths;
use crate::pending::PendingDeletions;
use crate::reconcile::SyncOperations;
use crate::remote::RuleServer;
use crate::retry::RetryPolicy;
use crate::store::LocalRuleStore;
use crate::types::{Rule, SyncStatus};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// SyncResult
// ---------------------------------------------------------------------------

/// Counts and failures for one execution. Failures are collected here
/// rather than returned as errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted_remote: usize,
    pub deleted_local: usize,
    pub unchanged: usize,
    pub upload_failures: usize,
    pub download_failures: usize,
    pub delete_failures: usize,
    pub validation_failures: usize,
    pub batches_sent: usize,
    pub batches_failed: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn error_occurred(&self) -> bool {
        self.failures() > 0
    }

    pub fn failures(&self) -> usize {
        self.upload_failures
            + self.download_failures
            + self.delete_failures
            + self.validation_failures
    }

    /// One-line description of what failed, for the sync state.
    pub fn failure_summary(&self) -> Option<String> {
        if !self.error_occurred() {
            return None;
        }
        let mut parts = Vec::new();
        if self.upload_failures > 0 {
            parts.push(format!("{} upload(s) failed", self.upload_failures));
        }
        if self.download_failures > 0 {
            parts.push(format!("{} download(s) failed", self.download_failures));
        }
        if self.delete_failures > 0 {
            parts.push(format!("{} deletion(s) failed", self.delete_failures));
        }
        if self.validation_failures > 0 {
            parts.push(format!("{} invalid rule(s) skipped", self.validation_failures));
        }
        Some(parts.join(", "))
    }

    fn record_error(&mut self, message: String) {
        warn!("{message}");
        self.errors.push(message);
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// The mutable state an execution writes to.
pub struct SyncTargets<'a> {
    pub store: &'a mut LocalRuleStore,
    pub pending: &'a mut PendingDeletions,
    pub manifest: &'a mut SyncManifest,
}

#[derive(Clone)]
pub struct Executor {
    server: Arc<dyn RuleServer>,
    policy: RetryPolicy,
    batch_size: usize,
}

impl Executor {
    pub fn new(server: Arc<dyn RuleServer>, policy: RetryPolicy, batch_size: usize) -> Self {
        Self {
            server,
            policy,
            batch_size: batch_size.max(1),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run every bucket except conflicts, which belong to the resolver.
    pub async fn execute(
        &self,
        ops: &SyncOperations,
        targets: &mut SyncTargets<'_>,
    ) -> Result<SyncResult> {
        let mut result = SyncResult::default();

        self.delete_remote(&ops.to_delete_remote, targets, &mut result)
            .await?;
        self.upload(ops.to_upload.clone(), targets, &mut result).await;
        self.download(ops.to_download.clone(), targets, &mut result);
        self.delete_local(&ops.to_delete_locally, targets, &mut result);
        self.mark_unchanged(&ops.unchanged, targets, &mut result);

        info!(
            uploaded = result.uploaded,
            downloaded = result.downloaded,
            deleted_remote = result.deleted_remote,
            deleted_local = result.deleted_local,
            failures = result.failures(),
            "executed sync operations"
        );
        Ok(result)
    }

    /// Upload in batches. Invalid rules are skipped without a request.
    pub async fn upload(
        &self,
        rules: Vec<Rule>,
        targets: &mut SyncTargets<'_>,
        result: &mut SyncResult,
    ) {
        let mut valid = Vec::with_capacity(rules.len());
        for rule in rules {
            match rule.validate() {
                Ok(()) => valid.push(rule),
                Err(e) => {
                    result.validation_failures += 1;
                    result.record_error(format!("skipped upload of {}: {e}", rule.id()));
                }
            }
        }

        for (n, batch) in valid.chunks(self.batch_size).enumerate() {
            result.batches_sent += 1;
            let outcome = self
                .policy
                .run("upload_rules", || self.server.upload_rules(batch))
                .await;
            match outcome {
                Ok(acked) => {
                    let now = Utc::now();
                    let mut confirmed = 0;
                    for ack in &acked {
                        let Some(local) = targets.store.get_mut(ack.id()) else {
                            debug!(rule_id = ack.id(), "upload ack for unknown rule");
                            continue;
                        };
                        local.metadata.last_modified = ack.metadata.last_modified;
                        local.metadata.sync_status = SyncStatus::Synced;
                        targets.manifest.record_synced(local, now);
                        confirmed += 1;
                    }
                    result.uploaded += confirmed;
                    if confirmed < batch.len() {
                        let missing = batch.len() - confirmed;
                        result.upload_failures += missing;
                        result.record_error(format!(
                            "upload batch {n}: server acknowledged {confirmed} of {} rule(s)",
                            batch.len()
                        ));
                    }
                }
                Err(e) => {
                    result.batches_failed += 1;
                    if matches!(e, RuleSyncError::Validation { .. }) {
                        result.validation_failures += batch.len();
                    } else {
                        result.upload_failures += batch.len();
                    }
                    result.record_error(format!("upload batch {n} failed: {e}"));
                }
            }
        }
    }

    /// Write server copies into the local store, re-deriving their metadata.
    /// The server's file name is ignored; the local file name comes from the id.
    pub fn download(
        &self,
        rules: Vec<Rule>,
        targets: &mut SyncTargets<'_>,
        result: &mut SyncResult,
    ) {
        let now = Utc::now();
        for server_rule in rules {
            let m = &server_rule.metadata;
            let filename = paths::rule_filename(&m.id);
            match Rule::new(&m.id, filename, server_rule.content.clone(), m.last_modified) {
                Ok(mut fresh) => {
                    fresh.metadata.sync_status = SyncStatus::Synced;
                    targets.manifest.record_synced(&fresh, now);
                    targets.store.insert(fresh);
                    result.downloaded += 1;
                }
                Err(e) => {
                    result.download_failures += 1;
                    result.record_error(format!("skipped download of {}: {e}", m.id));
                }
            }
        }
    }

    /// Delete on the server in batches and drain confirmed ids from the
    /// pending queue. The queue is persisted after every batch.
    pub async fn delete_remote(
        &self,
        ids: &[String],
        targets: &mut SyncTargets<'_>,
        result: &mut SyncResult,
    ) -> Result<()> {
        for (n, batch) in ids.chunks(self.batch_size).enumerate() {
            result.batches_sent += 1;
            let outcome = self
                .policy
                .run("delete_rules", || self.server.delete_rules(batch))
                .await;
            match outcome {
                Ok(confirmed) => {
                    targets.pending.confirm(&confirmed)?;
                    for id in &confirmed {
                        targets.manifest.forget(id);
                        targets.store.remove(id);
                    }
                    result.deleted_remote += confirmed.len();
                    let unconfirmed = batch.iter().filter(|id| !confirmed.contains(*id)).count();
                    if unconfirmed > 0 {
                        result.delete_failures += unconfirmed;
                        result.record_error(format!(
                            "delete batch {n}: {unconfirmed} deletion(s) not confirmed"
                        ));
                    }
                }
                Err(e) => {
                    result.batches_failed += 1;
                    result.delete_failures += batch.len();
                    result.record_error(format!("delete batch {n} failed: {e}"));
                }
            }
        }
        Ok(())
    }

    pub fn delete_local(
        &self,
        ids: &[String],
        targets: &mut SyncTargets<'_>,
        result: &mut SyncResult,
    ) {
        for id in ids {
            if targets.store.remove(id).is_some() {
                result.deleted_local += 1;
            }
            targets.manifest.forget(id);
        }
    }

    fn mark_unchanged(&self, ids: &[String], targets: &mut SyncTargets<'_>, result: &mut SyncResult) {
        let now = Utc::now();
        for id in ids {
            let Some(rule) = targets.store.get_mut(id) else {
                continue;
            };
            rule.metadata.sync_status = SyncStatus::Synced;
            let stale = targets
                .manifest
                .baseline(id)
                .map(|b| b.content_hash != rule.content_hash())
                .unwrap_or(true);
            if stale {
                targets.manifest.record_synced(rule, now);
            }
            result.unchanged += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::FsPersistence;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// In-memory server that can be told to fail any batch containing an id.
    #[derive(Default)]
    struct FakeServer {
        rules: Mutex<BTreeMap<String, Rule>>,
        poison: BTreeSet<String>,
        upload_calls: Mutex<Vec<Vec<String>>>,
        delete_calls: Mutex<usize>,
    }

    #[async_trait]
    impl RuleServer for FakeServer {
        async fn list_rules(&self) -> Result<Vec<Rule>> {
            Ok(self.rules.lock().unwrap().values().cloned().collect())
        }
        async fn upload_rules(&self, rules: &[Rule]) -> Result<Vec<Rule>> {
            self.upload_calls
                .lock()
                .unwrap()
                .push(rules.iter().map(|r| r.id().to_string()).collect());
            if rules.iter().any(|r| self.poison.contains(r.id())) {
                return Err(RuleSyncError::Network("connection reset".into()));
            }
            let mut stored = self.rules.lock().unwrap();
            Ok(rules
                .iter()
                .map(|r| {
                    let mut r = r.clone();
                    r.metadata.sync_status = SyncStatus::Synced;
                    stored.insert(r.id().to_string(), r.clone());
                    r
                })
                .collect())
        }
        async fn download_rules(&self, ids: &[String]) -> Result<Vec<Rule>> {
            let stored = self.rules.lock().unwrap();
            Ok(ids.iter().filter_map(|i| stored.get(i).cloned()).collect())
        }
        async fn delete_rules(&self, ids: &[String]) -> Result<Vec<String>> {
            *self.delete_calls.lock().unwrap() += 1;
            if ids.iter().any(|i| self.poison.contains(i)) {
                return Err(RuleSyncError::Network("connection reset".into()));
            }
            let mut stored = self.rules.lock().unwrap();
            for id in ids {
                stored.remove(id);
            }
            Ok(ids.to_vec())
        }
        async fn check_connection(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn rule(id: &str) -> Rule {
        Rule::new(id, format!("{id}.md"), format!("# {id}\n"), Utc::now()).unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(10),
            timeout: Duration::from_secs(1),
        }
    }

    struct Fixture {
        _dir: TempDir,
        disk: Arc<FsPersistence>,
        store: LocalRuleStore,
        pending: PendingDeletions,
        manifest: SyncManifest,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let disk = Arc::new(FsPersistence::new(dir.path(), ".rules"));
            let pending = PendingDeletions::load(disk.clone()).unwrap();
            Self {
                _dir: dir,
                disk,
                store: LocalRuleStore::new(),
                pending,
                manifest: SyncManifest::new(),
            }
        }

        fn targets(&mut self) -> SyncTargets<'_> {
            SyncTargets {
                store: &mut self.store,
                pending: &mut self.pending,
                manifest: &mut self.manifest,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn uploads_are_batched_and_failed_batches_isolated() {
        let mut fx = Fixture::new();
        let rules: Vec<Rule> = (0..25).map(|i| rule(&format!("r{i:02}"))).collect();
        for r in &rules {
            fx.store.insert(r.clone());
        }
        // r12 lands in the second batch of ten.
        let server = Arc::new(FakeServer {
            poison: ["r12".to_string()].into(),
            ..FakeServer::default()
        });
        let exec = Executor::new(server.clone(), policy(), 10);

        let ops = SyncOperations {
            to_upload: rules,
            ..SyncOperations::default()
        };
        let result = exec.execute(&ops, &mut fx.targets()).await.unwrap();

        assert_eq!(result.batches_sent, 3);
        assert_eq!(result.batches_failed, 1);
        assert_eq!(result.uploaded, 15);
        assert_eq!(result.upload_failures, 10);
        assert!(result.error_occurred());

        // One retry for the poisoned batch, none for the others.
        let calls = server.upload_calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].len(), 10);
        assert_eq!(calls[3].len(), 5);

        assert_eq!(fx.store.get("r00").unwrap().metadata.sync_status, SyncStatus::Synced);
        assert_eq!(fx.store.get("r24").unwrap().metadata.sync_status, SyncStatus::Synced);
        assert_eq!(fx.store.get("r12").unwrap().metadata.sync_status, SyncStatus::LocalOnly);
        assert!(fx.manifest.baseline("r24").is_some());
        assert!(fx.manifest.baseline("r12").is_none());
    }

    #[tokio::test]
    async fn invalid_rules_are_skipped_without_a_request() {
        let mut fx = Fixture::new();
        let mut bad = rule("bad");
        bad.metadata.file_patterns.push("stale".into());
        fx.store.insert(bad.clone());
        let server = Arc::new(FakeServer::default());
        let exec = Executor::new(server.clone(), policy(), 10);

        let ops = SyncOperations {
            to_upload: vec![bad],
            ..SyncOperations::default()
        };
        let result = exec.execute(&ops, &mut fx.targets()).await.unwrap();
        assert_eq!(result.validation_failures, 1);
        assert_eq!(result.batches_sent, 0);
        assert!(server.upload_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn downloads_overwrite_local_and_mark_synced() {
        let mut fx = Fixture::new();
        fx.store.insert(rule("a"));
        let mut server_copy = rule("a");
        server_copy
            .set_content("---\nglobs: \"*.rs\"\n---\n# new\n", Utc::now())
            .unwrap();
        let exec = Executor::new(Arc::new(FakeServer::default()), policy(), 10);

        let ops = SyncOperations {
            to_download: vec![server_copy.clone()],
            ..SyncOperations::default()
        };
        let result = exec.execute(&ops, &mut fx.targets()).await.unwrap();
        assert_eq!(result.downloaded, 1);
        let local = fx.store.get("a").unwrap();
        assert_eq!(local.content, server_copy.content);
        assert_eq!(local.metadata.file_patterns, vec!["*.rs"]);
        assert_eq!(local.metadata.sync_status, SyncStatus::Synced);
        assert_eq!(
            fx.manifest.baseline("a").unwrap().content_hash,
            server_copy.content_hash()
        );
    }

    #[tokio::test]
    async fn downloads_use_the_id_for_the_file_name() {
        let mut fx = Fixture::new();
        let mut evil = rule("evil");
        evil.metadata.filename = "../../escaped.md".into();
        let mut renamed = rule("a");
        renamed.metadata.filename = "b.md".into();
        let exec = Executor::new(Arc::new(FakeServer::default()), policy(), 10);

        let ops = SyncOperations {
            to_download: vec![evil, renamed],
            ..SyncOperations::default()
        };
        let result = exec.execute(&ops, &mut fx.targets()).await.unwrap();
        assert_eq!(result.downloaded, 2);
        assert_eq!(fx.store.get("evil").unwrap().metadata.filename, "evil.md");
        assert_eq!(fx.store.get("a").unwrap().metadata.filename, "a.md");
        assert!(fx.store.get("b").is_none());
    }

    #[tokio::test]
    async fn confirmed_deletes_leave_the_pending_queue_on_disk() {
        let mut fx = Fixture::new();
        fx.pending.add("x").unwrap();
        fx.pending.add("y").unwrap();
        let exec = Executor::new(Arc::new(FakeServer::default()), policy(), 1);

        let ops = SyncOperations {
            to_delete_remote: vec!["x".into(), "y".into()],
            ..SyncOperations::default()
        };
        let result = exec.execute(&ops, &mut fx.targets()).await.unwrap();
        assert_eq!(result.deleted_remote, 2);
        assert_eq!(result.batches_sent, 2);
        assert!(fx.pending.is_empty());

        use crate::persistence::RulePersistence;
        assert!(fx.disk.load_pending_deletions().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_keeps_id_pending() {
        let mut fx = Fixture::new();
        fx.pending.add("stuck").unwrap();
        let server = Arc::new(FakeServer {
            poison: ["stuck".to_string()].into(),
            ..FakeServer::default()
        });
        let exec = Executor::new(server.clone(), policy(), 10);

        let ops = SyncOperations {
            to_delete_remote: vec!["stuck".into()],
            ..SyncOperations::default()
        };
        let result = exec.execute(&ops, &mut fx.targets()).await.unwrap();
        assert_eq!(result.delete_failures, 1);
        assert!(fx.pending.contains("stuck"));
        assert_eq!(*server.delete_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn local_deletes_and_unchanged_update_bookkeeping() {
        let mut fx = Fixture::new();
        let gone = rule("gone");
        let same = rule("same");
        fx.manifest.record_synced(&gone, Utc::now());
        fx.store.insert(gone);
        fx.store.insert(same);
        let exec = Executor::new(Arc::new(FakeServer::default()), policy(), 10);

        let ops = SyncOperations {
            to_delete_locally: vec!["gone".into()],
            unchanged: vec!["same".into()],
            ..SyncOperations::default()
        };
        let result = exec.execute(&ops, &mut fx.targets()).await.unwrap();
        assert_eq!(result.deleted_local, 1);
        assert_eq!(result.unchanged, 1);
        assert!(!fx.store.contains("gone"));
        assert!(fx.manifest.baseline("gone").is_none());
        assert!(fx.manifest.baseline("same").is_some());
        assert_eq!(fx.store.take_removed(), vec!["gone".to_string()]);
    }

    #[test]
    fn failure_summary_lists_categories() {
        let result = SyncResult {
            upload_failures: 2,
            validation_failures: 1,
            ..SyncResult::default()
        };
        assert_eq!(
            result.failure_summary().unwrap(),
            "2 upload(s) failed, 1 invalid rule(s) skipped"
        );
        assert!(SyncResult::default().failure_summary().is_none());
    }
}
