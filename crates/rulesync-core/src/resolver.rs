//! Turning conflicts into decisions, and decisions into changes.
//!
//! Every conflict becomes a [`ResolutionRequest`] sent to whoever holds the
//! receiving end of the channel (a terminal prompt, a UI, a
//! [`StaticResolver`]). All requests are outstanding at once; the answers are
//! then applied one at a time so two resolutions never race on the store.

use crate::diff::{line_diff, DiffLine};
use crate::error::{Result, RuleSyncError};
use crate::executor::{Executor, SyncResult, SyncTargets};
use crate::types::{Rule, RuleConflict, SyncStatus};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    KeepLocal,
    KeepServer,
    KeepBoth,
    MarkConflict,
    Skip,
}

impl Resolution {
    pub const ALL: [Resolution; 5] = [
        Resolution::KeepLocal,
        Resolution::KeepServer,
        Resolution::KeepBoth,
        Resolution::MarkConflict,
        Resolution::Skip,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::KeepLocal => "keep-local",
            Resolution::KeepServer => "keep-server",
            Resolution::KeepBoth => "keep-both",
            Resolution::MarkConflict => "mark",
            Resolution::Skip => "skip",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Resolution::KeepLocal => "keep the local copy and upload it",
            Resolution::KeepServer => "replace the local copy with the server copy",
            Resolution::KeepBoth => "keep local, save the server copy under a new id",
            Resolution::MarkConflict => "leave both alone and mark as a conflict",
            Resolution::Skip => "do nothing this time",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = RuleSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keep-local" | "local" => Ok(Resolution::KeepLocal),
            "keep-server" | "server" => Ok(Resolution::KeepServer),
            "keep-both" | "both" => Ok(Resolution::KeepBoth),
            "mark" | "mark-conflict" => Ok(Resolution::MarkConflict),
            "skip" => Ok(Resolution::Skip),
            other => Err(RuleSyncError::validation(
                "",
                format!("unknown resolution '{other}'"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One conflict awaiting a decision.
#[derive(Debug)]
pub struct ResolutionRequest {
    pub conflict: RuleConflict,
    pub choices: Vec<Resolution>,
    pub diff: Vec<DiffLine>,
    pub respond_to: oneshot::Sender<Resolution>,
}

impl ResolutionRequest {
    /// Answer the request. A receiver that went away is ignored.
    pub fn respond(self, resolution: Resolution) {
        let _ = self.respond_to.send(resolution);
    }
}

/// The sync side of the conflict channel.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    tx: mpsc::Sender<ResolutionRequest>,
}

impl ConflictResolver {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ResolutionRequest>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    /// A resolver whose every request is answered with `choice`.
    pub fn fixed(choice: Resolution) -> (Self, JoinHandle<()>) {
        let (resolver, rx) = Self::channel(16);
        let handle = tokio::spawn(StaticResolver::new(choice).serve(rx));
        (resolver, handle)
    }

    /// Ask about every conflict at once and wait for all answers.
    ///
    /// A request nobody answers (closed channel, dropped responder) is
    /// treated as [`Resolution::Skip`].
    pub async fn decide(&self, conflicts: Vec<RuleConflict>) -> Vec<(RuleConflict, Resolution)> {
        let asks = conflicts.into_iter().map(|conflict| {
            let tx = self.tx.clone();
            async move {
                let (respond_to, answer) = oneshot::channel();
                let request = ResolutionRequest {
                    diff: line_diff(&conflict.local.content, &conflict.server.content),
                    conflict: conflict.clone(),
                    choices: Resolution::ALL.to_vec(),
                    respond_to,
                };
                if tx.send(request).await.is_err() {
                    debug!(rule_id = %conflict.id, "no conflict handler, skipping");
                    return (conflict, Resolution::Skip);
                }
                let choice = answer.await.unwrap_or(Resolution::Skip);
                (conflict, choice)
            }
        });
        join_all(asks).await
    }
}

/// Answers every request with the same choice. Used for non-interactive
/// runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticResolver {
    choice: Resolution,
}

impl StaticResolver {
    pub fn new(choice: Resolution) -> Self {
        Self { choice }
    }

    pub async fn serve(self, mut rx: mpsc::Receiver<ResolutionRequest>) {
        while let Some(req) = rx.recv().await {
            req.respond(self.choice);
        }
    }
}

// ---------------------------------------------------------------------------
// Applying decisions
// ---------------------------------------------------------------------------

/// What happened to one conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConflict {
    pub id: String,
    pub resolution: Resolution,
    /// Id the server copy was saved under, for `KeepBoth`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_id: Option<String>,
    /// False when the chosen action failed and the conflict remains.
    pub applied: bool,
}

/// First free id of the form `<id>-server`, `<id>-server-2`, ...
pub fn keep_both_id(id: &str, taken: impl Fn(&str) -> bool) -> String {
    let base = format!("{id}-server");
    if !taken(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Apply decisions sequentially. `server_ids` is the listing of this pass,
/// used to keep duplicate ids unique on both sides.
pub async fn apply_resolutions(
    executor: &Executor,
    decisions: Vec<(RuleConflict, Resolution)>,
    targets: &mut SyncTargets<'_>,
    server_ids: &BTreeSet<String>,
    result: &mut SyncResult,
) -> Result<Vec<ResolvedConflict>> {
    let mut outcomes = Vec::with_capacity(decisions.len());
    for (conflict, resolution) in decisions {
        let outcome = apply_one(executor, conflict, resolution, targets, server_ids, result).await?;
        info!(
            rule_id = %outcome.id,
            resolution = %outcome.resolution,
            applied = outcome.applied,
            "conflict resolved"
        );
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

async fn apply_one(
    executor: &Executor,
    conflict: RuleConflict,
    resolution: Resolution,
    targets: &mut SyncTargets<'_>,
    server_ids: &BTreeSet<String>,
    result: &mut SyncResult,
) -> Result<ResolvedConflict> {
    let id = conflict.id.clone();
    let mut duplicate_id = None;

    let applied = match resolution {
        Resolution::KeepLocal => {
            targets.manifest.clear_conflict(&id);
            let local = current_local(&conflict, targets);
            upload_counted(executor, vec![local], targets, result).await
        }
        Resolution::KeepServer => {
            targets.manifest.clear_conflict(&id);
            let before = result.downloaded;
            executor.download(vec![conflict.server.clone()], targets, result);
            result.downloaded > before
        }
        Resolution::KeepBoth => {
            targets.manifest.clear_conflict(&id);
            let new_id = keep_both_id(&id, |c| {
                targets.store.contains(c) || server_ids.contains(c)
            });
            let copy = conflict.server.duplicate_as(&new_id)?;
            targets.store.insert(copy.clone());
            duplicate_id = Some(new_id);
            let local = current_local(&conflict, targets);
            upload_counted(executor, vec![local, copy], targets, result).await
        }
        Resolution::MarkConflict => {
            if targets.store.contains(&id) {
                targets.store.set_status(&id, SyncStatus::Conflict)?;
            }
            targets.manifest.mark_conflict(&id);
            true
        }
        Resolution::Skip => true,
    };

    Ok(ResolvedConflict {
        id,
        resolution,
        duplicate_id,
        applied,
    })
}

fn current_local(conflict: &RuleConflict, targets: &mut SyncTargets<'_>) -> Rule {
    let mut local = targets
        .store
        .get(&conflict.id)
        .cloned()
        .unwrap_or_else(|| conflict.local.clone());
    if local.metadata.sync_status == SyncStatus::Conflict {
        local.metadata.sync_status = SyncStatus::LocalOnly;
        if let Some(stored) = targets.store.get_mut(&conflict.id) {
            stored.metadata.sync_status = SyncStatus::LocalOnly;
        }
    }
    local
}

async fn upload_counted(
    executor: &Executor,
    rules: Vec<Rule>,
    targets: &mut SyncTargets<'_>,
    result: &mut SyncResult,
) -> bool {
    let wanted = rules.len();
    let before = result.uploaded;
    executor.upload(rules, targets, result).await;
    result.uploaded - before == wanted
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
