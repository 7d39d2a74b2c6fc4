pub mod config;
pub mod init;
pub mod rules;
pub mod serve;
pub mod status;
pub mod sync;
pub mod watch;

use anyhow::Context;
use rulesync_core::config::Config;
use rulesync_core::resolver::ConflictResolver;
use rulesync_core::SyncController;
use std::path::Path;

pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start tokio runtime")
}

/// Controller for commands that never see conflicts: requests go nowhere
/// and count as skipped.
pub fn open_controller(root: &Path) -> anyhow::Result<SyncController> {
    let (resolver, _) = ConflictResolver::channel(1);
    open_with_resolver(root, resolver)
}

pub fn open_with_resolver(root: &Path, resolver: ConflictResolver) -> anyhow::Result<SyncController> {
    let config = Config::load(root).context("failed to load config")?;
    SyncController::open(root, config, resolver).context("failed to load local rules")
}
