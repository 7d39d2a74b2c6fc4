use crate::cmd::{open_with_resolver, runtime};
use rulesync_core::resolver::{ConflictResolver, Resolution};
use rulesync_core::scheduler::{SchedulerSettings, SyncScheduler};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Background sync until Ctrl-C. Conflicts are marked for `rulesync resolve`
/// since nobody is at the prompt.
pub fn run(root: &Path) -> anyhow::Result<()> {
    let rt = runtime()?;
    rt.block_on(async {
        let (resolver, _handle) = ConflictResolver::fixed(Resolution::MarkConflict);
        let ctl = Arc::new(open_with_resolver(root, resolver)?);
        let settings = SchedulerSettings::from(&ctl.config().sync);

        let mut states = ctl.subscribe();
        let mut scheduler = SyncScheduler::start(ctl.clone(), settings);
        info!(
            interval_ms = settings.interval.as_millis() as u64,
            server = %ctl.config().server_url,
            "watching; press Ctrl-C to stop"
        );
        scheduler.trigger_now();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = states.borrow_and_update().clone();
                    if state.is_syncing {
                        continue;
                    }
                    match &state.error {
                        Some(e) => warn!(error = %e, "sync finished with problems"),
                        None => info!(
                            at = ?state.last_sync_time,
                            "sync complete"
                        ),
                    }
                }
            }
        }

        scheduler.stop().await;
        info!("stopped");
        Ok(())
    })
}
