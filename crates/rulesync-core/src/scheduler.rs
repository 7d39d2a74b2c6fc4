//! Background sync loop: a periodic timer, debounced change requests, and
//! immediate triggers, all funnelled into at most one pass at a time.

use crate::config::SyncSettings;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// One full sync pass. Failures are reported through the sync state; the
/// scheduler only logs them.
#[async_trait]
pub trait SyncPass: Send + Sync {
    async fn run_pass(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub debounce: Duration,
    pub initial_delay: Duration,
}

impl From<&SyncSettings> for SchedulerSettings {
    fn from(s: &SyncSettings) -> Self {
        Self {
            interval: s.interval(),
            debounce: s.debounce(),
            initial_delay: s.initial_delay(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Request,
    Trigger,
    Stop,
}

/// Handle to the scheduler task. Dropping it aborts the task.
#[derive(Debug)]
pub struct SyncScheduler {
    tx: mpsc::UnboundedSender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    pub fn start(pass: Arc<dyn SyncPass>, settings: SchedulerSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_loop(pass, settings, rx));
        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Ask for a pass after the debounce window. Each call restarts the
    /// window, so a burst of edits yields one pass.
    pub fn request_sync(&self) {
        let _ = self.tx.send(Command::Request);
    }

    /// Ask for a pass right away.
    pub fn trigger_now(&self) {
        let _ = self.tx.send(Command::Trigger);
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop scheduling. A pass already running is allowed to finish.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.tx.send(Command::Stop);
        let _ = handle.await;
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

struct LoopState {
    pass: Arc<dyn SyncPass>,
    done_tx: mpsc::UnboundedSender<()>,
    in_flight: bool,
    pending_sync: bool,
}

impl LoopState {
    fn start_or_queue(&mut self, reason: &'static str) {
        if self.in_flight {
            debug!(reason, "sync in flight, queueing another pass");
            self.pending_sync = true;
            return;
        }
        debug!(reason, "starting sync pass");
        self.in_flight = true;
        let pass = self.pass.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = pass.run_pass().await {
                warn!(error = %e, "sync pass failed");
            }
            let _ = done.send(());
        });
    }

    fn finish(&mut self) {
        self.in_flight = false;
        if std::mem::take(&mut self.pending_sync) {
            self.start_or_queue("queued");
        }
    }
}

async fn run_loop(
    pass: Arc<dyn SyncPass>,
    settings: SchedulerSettings,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let mut state = LoopState {
        pass,
        done_tx,
        in_flight: false,
        pending_sync: false,
    };

    // The first tick is the initial pass.
    let mut ticker = interval_at(
        Instant::now() + settings.initial_delay,
        settings.interval.max(Duration::from_millis(1)),
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => state.start_or_queue("interval"),
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                state.start_or_queue("debounced");
            }
            Some(()) = done_rx.recv() => state.finish(),
            cmd = rx.recv() => match cmd {
                Some(Command::Request) => deadline = Some(Instant::now() + settings.debounce),
                Some(Command::Trigger) => {
                    deadline = None;
                    state.start_or_queue("trigger");
                }
                Some(Command::Stop) | None => break,
            },
        }
    }
    debug!("sync scheduler stopped");
}
