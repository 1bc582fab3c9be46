// Outbox watcher: drains the directory whenever new actions settle

use anyhow::Result;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{Dispatch, DrainReport, Outbox};
use crate::config::Config;

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    /// Quiet period after the last event before draining
    pub settle: Duration,
    /// Directory rescan interval of the poll watcher
    pub poll_interval: Duration,
}

impl WatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            settle: config.outbox_settle(),
            poll_interval: config.outbox_poll_interval(),
        }
    }
}

/// What a watcher did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    /// Drain passes, including the one at startup
    pub drains: usize,
    pub dispatched: usize,
    pub failed: usize,
}

impl WatchSummary {
    fn add(&mut self, report: Option<DrainReport>) {
        self.drains += 1;
        if let Some(report) = report {
            self.dispatched += report.dispatched;
            self.failed += report.failed;
        }
    }
}

/// Drain once, then drain after every settled burst of new files until
/// `cancel` fires
pub async fn watch(
    outbox: Outbox,
    dispatcher: Arc<dyn Dispatch>,
    options: WatchOptions,
    cancel: CancellationToken,
) -> Result<WatchSummary> {
    outbox.ensure_dir()?;
    let mut summary = WatchSummary::default();
    summary.add(drain_logged(&outbox, dispatcher.as_ref()).await);

    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);
    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(options.poll_interval),
    )?;
    watcher.watch(outbox.dir(), RecursiveMode::NonRecursive)?;
    info!(path = %outbox.dir().display(), "Watching outbox");

    let mut deadline: Option<Instant> = None;

    loop {
        let pending = deadline;
        let settled = async move {
            match pending {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) if announces_action(&event) => {
                    // Every new event restarts the quiet period
                    deadline = Some(Instant::now() + options.settle);
                }
                Some(_) => {}
                None => break,
            },
            _ = settled => {
                deadline = None;
                summary.add(drain_logged(&outbox, dispatcher.as_ref()).await);
            }
        }
    }

    drop(watcher);
    info!(
        drains = summary.drains,
        dispatched = summary.dispatched,
        failed = summary.failed,
        "Outbox watcher stopped"
    );
    Ok(summary)
}

async fn drain_logged(outbox: &Outbox, dispatcher: &dyn Dispatch) -> Option<DrainReport> {
    match outbox.drain(dispatcher).await {
        Ok(report) => Some(report),
        Err(e) => {
            error!("Outbox drain failed: {:#}", e);
            None
        }
    }
}

/// Creates and writes of action files; removals are our own drains
fn announces_action(event: &NotifyEvent) -> bool {
    if matches!(event.kind, EventKind::Remove(_) | EventKind::Access(_)) {
        return false;
    }
    let relevant = event.paths.iter().any(|p| is_json(p));
    if !relevant {
        debug!("Ignoring outbox event {:?}", event.kind);
    }
    relevant
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}
