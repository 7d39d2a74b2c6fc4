//! Diffing local rules against the server listing.
//!
//! [`reconcile`] is pure: it reads both rule sets, the pending-deletion set
//! and the last synced state, and returns the work a pass has to do. Each id
//! lands in at most one bucket of [`SyncOperations`]; ids in no bucket need
//! nothing (or are held back as manually marked conflicts).

use crate::manifest::SyncManifest;
use crate::types::{Rule, RuleConflict, SyncStatus};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Work produced by one reconciliation pass. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOperations {
    pub to_upload: Vec<Rule>,
    pub to_download: Vec<Rule>,
    pub to_delete_locally: Vec<String>,
    pub to_delete_remote: Vec<String>,
    pub conflicts: Vec<RuleConflict>,
    /// Identical on both sides; only bookkeeping needs refreshing.
    pub unchanged: Vec<String>,
    /// Marked as conflicts by the user, or unreadable on disk, and excluded
    /// until fixed.
    pub held: Vec<String>,
}

impl SyncOperations {
    /// True when the pass would not touch the server or the local store.
    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty()
            && self.to_download.is_empty()
            && self.to_delete_locally.is_empty()
            && self.to_delete_remote.is_empty()
            && self.conflicts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_upload.len()
            + self.to_download.len()
            + self.to_delete_locally.len()
            + self.to_delete_remote.len()
            + self.conflicts.len()
    }
}

/// How one side of a rule relates to the last synced copy.
fn changed_since_baseline(rule: &Rule, manifest: &SyncManifest) -> Option<bool> {
    manifest
        .baseline(rule.id())
        .map(|b| b.content_hash != rule.content_hash())
}

/// `unreadable` names rule files present on disk that failed to parse. They
/// are never downloaded over, since that would destroy the user's copy.
pub fn reconcile(
    local: &[Rule],
    server: &[Rule],
    pending: &BTreeSet<String>,
    unreadable: &BTreeSet<String>,
    manifest: &SyncManifest,
) -> SyncOperations {
    let local_by_id: BTreeMap<&str, &Rule> = local.iter().map(|r| (r.id(), r)).collect();
    let server_by_id: BTreeMap<&str, &Rule> = server.iter().map(|r| (r.id(), r)).collect();

    let mut ops = SyncOperations::default();

    // Pending deletions win over everything else, including stale listings.
    ops.to_delete_remote.extend(pending.iter().cloned());

    for (&id, &local_rule) in &local_by_id {
        if pending.contains(id) {
            continue;
        }
        if manifest.is_marked(id) || local_rule.metadata.sync_status == SyncStatus::Conflict {
            ops.held.push(id.to_string());
            continue;
        }
        let Some(&server_rule) = server_by_id.get(id) else {
            match changed_since_baseline(local_rule, manifest) {
                // Previously synced, untouched here, gone on the server.
                Some(false) => ops.to_delete_locally.push(id.to_string()),
                // New locally, or edited after the server deleted it.
                _ => ops.to_upload.push(local_rule.clone()),
            }
            continue;
        };

        if local_rule.content_hash() == server_rule.content_hash() {
            ops.unchanged.push(id.to_string());
            continue;
        }

        let local_changed = changed_since_baseline(local_rule, manifest);
        let server_changed = changed_since_baseline(server_rule, manifest);
        match (local_changed, server_changed) {
            (Some(true), Some(false)) => ops.to_upload.push(local_rule.clone()),
            (Some(false), Some(true)) => ops.to_download.push(server_rule.clone()),
            // Both moved, or no common ancestor: never pick a side silently,
            // whatever the timestamps say.
            _ => {
                debug!(
                    rule_id = id,
                    local_modified = %local_rule.metadata.last_modified,
                    server_modified = %server_rule.metadata.last_modified,
                    "both sides changed"
                );
                ops.conflicts.push(RuleConflict {
                    id: id.to_string(),
                    local: local_rule.clone(),
                    server: server_rule.clone(),
                });
            }
        }
    }

    for (&id, &server_rule) in &server_by_id {
        if pending.contains(id) || local_by_id.contains_key(id) {
            continue;
        }
        if unreadable.contains(id) {
            debug!(rule_id = id, "holding unreadable local file");
            ops.held.push(id.to_string());
            continue;
        }
        ops.to_download.push(server_rule.clone());
    }

    ops
}
