//! The single owner of sync state for one project.
//!
//! Hosts (the CLI, a watch loop, an editor integration) talk to a
//! [`SyncController`]; they never touch the store, the pending queue or the
//! manifest directly. Every method takes the inner lock, so passes and local
//! edits are serialized.
//!
//! The rules directory is the source of truth. Operations that change state
//! start by reloading it, so edits made on disk while a controller is alive
//! are picked up instead of overwritten. Only rules the operation changed
//! are written back.

use crate::config::Config;
use crate::error::{Result, RuleSyncError};
use crate::executor::{Executor, SyncResult, SyncTargets};
use crate::manifest::SyncManifest;
use crate::pending::PendingDeletions;
use crate::persistence::{FsPersistence, RulePersistence};
use crate::reconcile::reconcile;
use crate::remote::{HttpRuleServer, RuleServer};
use crate::resolver::{apply_resolutions, ConflictResolver, Resolution, ResolvedConflict};
use crate::retry::RetryPolicy;
use crate::scheduler::SyncPass;
use crate::state::{SyncState, SyncStateTracker};
use crate::store::LocalRuleStore;
use crate::types::{id_from_filename, Rule, RuleConflict, SyncStatus};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// What one pass did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub pass_id: String,
    pub result: SyncResult,
    pub conflicts: usize,
    pub resolutions: Vec<ResolvedConflict>,
    /// Ids held back as marked conflicts or unreadable files.
    pub held: Vec<String>,
}

/// A point-in-time summary for `status` style displays.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub state: SyncState,
    pub rules: usize,
    pub synced: usize,
    pub local_only: usize,
    pub conflicts: Vec<String>,
    pub pending_deletions: Vec<String>,
    /// Rule files on disk that fail to parse.
    pub unreadable: Vec<String>,
}

struct Inner {
    store: LocalRuleStore,
    pending: PendingDeletions,
    manifest: SyncManifest,
    unreadable: BTreeSet<String>,
}

impl Inner {
    /// Read the rules directory, the manifest and the pending queue.
    ///
    /// A synced rule whose file is gone (and was not deleted through the
    /// controller) was deleted by hand: it is queued for server deletion
    /// rather than downloaded again.
    fn load(persistence: &Arc<dyn RulePersistence>) -> Result<Self> {
        let mut manifest = persistence.load_manifest()?;
        let loaded = persistence.load_local_rules()?;
        let mut pending = PendingDeletions::load(persistence.clone())?;
        let mut rules = loaded.rules;
        for rule in &mut rules {
            rule.metadata.sync_status = manifest.status_for(rule);
        }

        let present: BTreeSet<&str> = rules.iter().map(|r| r.id()).collect();
        let vanished: Vec<String> = manifest
            .entries
            .keys()
            .filter(|id| {
                !present.contains(id.as_str())
                    && !loaded.unreadable.contains(*id)
                    && !pending.contains(id)
            })
            .cloned()
            .collect();
        if !vanished.is_empty() {
            for id in &vanished {
                pending.add(id)?;
                manifest.forget(id);
                info!(rule_id = %id, "rule file removed on disk, server deletion queued");
            }
            persistence.save_manifest(&manifest)?;
        }

        Ok(Self {
            store: LocalRuleStore::from_rules(rules),
            pending,
            manifest,
            unreadable: loaded.unreadable,
        })
    }

    fn targets(&mut self) -> SyncTargets<'_> {
        SyncTargets {
            store: &mut self.store,
            pending: &mut self.pending,
            manifest: &mut self.manifest,
        }
    }
}

pub struct SyncController {
    config: Config,
    server: Arc<dyn RuleServer>,
    persistence: Arc<dyn RulePersistence>,
    executor: Executor,
    resolver: ConflictResolver,
    tracker: SyncStateTracker,
    inner: Mutex<Inner>,
}

impl SyncController {
    /// Load local state through `persistence`. A persistence failure here is
    /// fatal: without the pending queue a pass could resurrect deleted rules.
    pub fn new(
        config: Config,
        server: Arc<dyn RuleServer>,
        persistence: Arc<dyn RulePersistence>,
        resolver: ConflictResolver,
    ) -> Result<Self> {
        let inner = Inner::load(&persistence)?;
        let executor = Executor::new(
            server.clone(),
            RetryPolicy::from_settings(&config.sync),
            config.sync.batch_size,
        );
        debug!(
            rules = inner.store.len(),
            pending = inner.pending.len(),
            unreadable = inner.unreadable.len(),
            "sync controller loaded"
        );
        Ok(Self {
            config,
            server,
            persistence,
            executor,
            resolver,
            tracker: SyncStateTracker::new(),
            inner: Mutex::new(inner),
        })
    }

    /// The usual wiring: rule files under `root`, the HTTP server from config.
    pub fn open(root: &Path, config: Config, resolver: ConflictResolver) -> Result<Self> {
        let server = Arc::new(HttpRuleServer::new(
            config.server_url.clone(),
            config.sync.request_timeout(),
        )?);
        let persistence = Arc::new(FsPersistence::new(root, config.rules_dir.clone()));
        Self::new(config, server, persistence, resolver)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> SyncState {
        self.tracker.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tracker.subscribe()
    }

    /// Health check against the configured server; unreachable is `Ok(false)`.
    pub async fn check_connection(&self) -> Result<bool> {
        self.server.check_connection().await
    }

    pub async fn rules(&self) -> Vec<Rule> {
        self.inner.lock().await.store.snapshot()
    }

    pub async fn rule(&self, id: &str) -> Option<Rule> {
        self.inner.lock().await.store.get(id).cloned()
    }

    pub async fn status(&self) -> ControllerStatus {
        let inner = self.inner.lock().await;
        let count = |s: SyncStatus| {
            inner
                .store
                .rules()
                .filter(|r| r.metadata.sync_status == s)
                .count()
        };
        ControllerStatus {
            state: self.tracker.snapshot(),
            rules: inner.store.len(),
            synced: count(SyncStatus::Synced),
            local_only: count(SyncStatus::LocalOnly),
            conflicts: inner.manifest.marked_conflicts.iter().cloned().collect(),
            pending_deletions: inner.pending.ids().iter().cloned().collect(),
            unreadable: inner.unreadable.iter().cloned().collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    /// Run one full pass. The error, if any, is also left on the sync state.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let pass_id = Uuid::new_v4().to_string();
        let span = info_span!("sync_pass", pass_id = %pass_id);
        async {
            let mut inner = self.inner.lock().await;
            self.tracker.begin();
            match self.execute_pass(&mut inner, pass_id).await {
                Ok(report) => {
                    match report.result.failure_summary() {
                        Some(summary) => self.tracker.partial(Utc::now(), summary),
                        None => self.tracker.succeed(Utc::now()),
                    }
                    info!(
                        uploaded = report.result.uploaded,
                        downloaded = report.result.downloaded,
                        conflicts = report.conflicts,
                        "sync pass complete"
                    );
                    Ok(report)
                }
                Err(e) => {
                    self.tracker.fail(e.to_string());
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute_pass(&self, inner: &mut Inner, pass_id: String) -> Result<SyncReport> {
        self.reload(inner)?;
        let reachable = self
            .executor
            .policy()
            .run("check_connection", || self.server.check_connection())
            .await?;
        if !reachable {
            return Err(RuleSyncError::Network(format!(
                "server unreachable at {}",
                self.config.server_url
            )));
        }
        let server_rules = self
            .executor
            .policy()
            .run("list_rules", || self.server.list_rules())
            .await?;
        let server_ids: BTreeSet<String> =
            server_rules.iter().map(|r| r.id().to_string()).collect();

        let ops = reconcile(
            &inner.store.snapshot(),
            &server_rules,
            inner.pending.ids(),
            &inner.unreadable,
            &inner.manifest,
        );
        debug!(
            upload = ops.to_upload.len(),
            download = ops.to_download.len(),
            delete_local = ops.to_delete_locally.len(),
            delete_remote = ops.to_delete_remote.len(),
            conflicts = ops.conflicts.len(),
            "reconciled"
        );

        let mut result = self.executor.execute(&ops, &mut inner.targets()).await?;

        let conflicts = ops.conflicts.len();
        let resolutions = if ops.conflicts.is_empty() {
            Vec::new()
        } else {
            let decisions = self.resolver.decide(ops.conflicts.clone()).await;
            apply_resolutions(
                &self.executor,
                decisions,
                &mut inner.targets(),
                &server_ids,
                &mut result,
            )
            .await?
        };

        self.persist(inner)?;
        Ok(SyncReport {
            pass_id,
            result,
            conflicts,
            resolutions,
            held: ops.held,
        })
    }

    /// Replace the in-memory view with what is on disk now.
    fn reload(&self, inner: &mut Inner) -> Result<()> {
        *inner = Inner::load(&self.persistence)?;
        Ok(())
    }

    fn persist(&self, inner: &mut Inner) -> Result<()> {
        for id in inner.store.take_removed() {
            self.persistence.remove_local_rule(&id)?;
        }
        self.persistence.save_local_rules(&inner.store.take_dirty())?;
        self.persistence.save_manifest(&inner.manifest)
    }

    // -----------------------------------------------------------------------
    // Local edits
    // -----------------------------------------------------------------------

    /// Delete a rule locally and queue its server-side deletion. The queue
    /// is on disk before the rule file goes away.
    pub async fn delete_rule(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.reload(&mut inner)?;
        if !inner.store.contains(id) {
            // Removed on disk since the last load; the reload queued it.
            if inner.pending.contains(id) {
                return Ok(());
            }
            return Err(RuleSyncError::RuleNotFound(id.to_string()));
        }
        inner.pending.add(id)?;
        inner.store.remove(id);
        inner.manifest.forget(id);
        self.persist(&mut inner)?;
        info!(rule_id = id, "rule deleted, server deletion queued");
        Ok(())
    }

    /// Create or edit a rule from its file name and markdown.
    pub async fn upsert_rule(&self, filename: &str, content: &str) -> Result<Rule> {
        let mut inner = self.inner.lock().await;
        self.reload(&mut inner)?;
        let id = id_from_filename(filename)?;
        let now = Utc::now();
        let mut rule = match inner.store.get(&id) {
            Some(existing) => {
                let mut r = existing.clone();
                r.set_content(content, now)?;
                r
            }
            None => Rule::from_file(filename, content, now)?,
        };
        rule.metadata.sync_status = inner.manifest.status_for(&rule);
        if inner.pending.cancel(&id)? {
            debug!(rule_id = %id, "recreated rule, pending deletion cancelled");
        }
        inner.unreadable.remove(&id);
        inner.store.insert(rule.clone());
        self.persist(&mut inner)?;
        Ok(rule)
    }

    /// Resolve a rule previously marked as a conflict, against the server's
    /// current copy.
    pub async fn resolve_marked(&self, id: &str, resolution: Resolution) -> Result<ResolvedConflict> {
        let mut inner = self.inner.lock().await;
        self.reload(&mut inner)?;
        let local = inner
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| RuleSyncError::RuleNotFound(id.to_string()))?;

        let server_rules = self
            .executor
            .policy()
            .run("list_rules", || self.server.list_rules())
            .await?;
        let server_ids: BTreeSet<String> =
            server_rules.iter().map(|r| r.id().to_string()).collect();

        let Some(server) = server_rules.into_iter().find(|r| r.id() == id) else {
            // Nothing to resolve against; the next pass uploads the local copy.
            inner.manifest.clear_conflict(id);
            inner.store.set_status(id, SyncStatus::LocalOnly)?;
            self.persist(&mut inner)?;
            return Ok(ResolvedConflict {
                id: id.to_string(),
                resolution,
                duplicate_id: None,
                applied: true,
            });
        };

        let conflict = RuleConflict {
            id: id.to_string(),
            local,
            server,
        };
        let mut result = SyncResult::default();
        let mut outcomes = apply_resolutions(
            &self.executor,
            vec![(conflict, resolution)],
            &mut inner.targets(),
            &server_ids,
            &mut result,
        )
        .await?;
        self.persist(&mut inner)?;
        outcomes
            .pop()
            .ok_or_else(|| RuleSyncError::RuleNotFound(id.to_string()))
    }

    /// Fetch specific rules from the server, overwriting local copies.
    /// An explicit pull also replaces unreadable files.
    pub async fn pull(&self, ids: &[String]) -> Result<SyncResult> {
        let mut inner = self.inner.lock().await;
        self.reload(&mut inner)?;
        let rules = self
            .executor
            .policy()
            .run("download_rules", || self.server.download_rules(ids))
            .await?;
        let mut result = SyncResult::default();
        for id in ids {
            if !rules.iter().any(|r| r.id() == id) {
                result.download_failures += 1;
                result.errors.push(format!("rule not found on server: {id}"));
            }
        }
        for rule in &rules {
            inner.pending.cancel(rule.id())?;
            inner.manifest.clear_conflict(rule.id());
            inner.unreadable.remove(rule.id());
        }
        self.executor.download(rules, &mut inner.targets(), &mut result);
        self.persist(&mut inner)?;
        Ok(result)
    }
}

#[async_trait]
impl SyncPass for SyncController {
    async fn run_pass(&self) -> Result<()> {
        self.sync_now().await.map(|_| ())
    }
}
