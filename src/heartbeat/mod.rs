// Heartbeat scheduler: runs due tasks through the AI client on a fixed interval
//
// - One timer per daemon; each fire spawns the tick as its own task
// - At most one tick runs at a time; a fire that finds one in flight is skipped
// - Tasks within a tick run sequentially in the order the store returns them
// - A failing task is recorded and the tick moves on; nothing is retried

mod activity;

pub use activity::{ActivityLog, HeartbeatEvent};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::claude::{AiClient, AskOptions};
use crate::directives::{apply_directives, AppliedDirectives, DirectiveTargets};
use crate::identity::Identity;
use crate::markers::parse_markers;
use crate::outbox::Outbox;
use crate::store::{Store, Task, TaskStatus};

/// Everything a tick touches
pub struct HeartbeatDeps {
    pub store: Arc<Store>,
    pub client: Arc<dyn AiClient>,
    pub identity: Identity,
    pub outbox: Outbox,
    pub activity: Option<ActivityLog>,
}

/// Task ids finished by one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub completed: Vec<i64>,
    pub failed: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running
    Skipped,
    Ran(TickReport),
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatStatus {
    pub running: bool,
    pub in_flight: bool,
    pub interval_secs: u64,
    pub ticks_run: u64,
    pub ticks_skipped: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

struct Inner {
    deps: HeartbeatDeps,
    interval: Duration,
    in_flight: AtomicBool,
    timer: Mutex<Option<CancellationToken>>,
    ticks_run: AtomicU64,
    ticks_skipped: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    last_tick_at: Mutex<Option<DateTime<Utc>>>,
}

/// Cheap to clone; clones share one scheduler
#[derive(Clone)]
pub struct Heartbeat {
    inner: Arc<Inner>,
}

/// Holds the in-flight flag for the lifetime of a tick
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Heartbeat {
    pub fn new(deps: HeartbeatDeps, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                interval,
                in_flight: AtomicBool::new(false),
                timer: Mutex::new(None),
                ticks_run: AtomicU64::new(0),
                ticks_skipped: AtomicU64::new(0),
                tasks_completed: AtomicU64::new(0),
                tasks_failed: AtomicU64::new(0),
                last_tick_at: Mutex::new(None),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Start the timer. Returns `false` if it was already running.
    ///
    /// The first tick fires one interval after start.
    pub fn start(&self) -> bool {
        let mut timer = match self.inner.timer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if timer.is_some() {
            debug!("Heartbeat already running");
            return false;
        }

        let cancel = CancellationToken::new();
        *timer = Some(cancel.clone());

        let heartbeat = self.clone();
        let period = self.interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => heartbeat.spawn_tick(),
                }
            }
            debug!("Heartbeat timer exited");
        });

        info!("Heartbeat started (every {}s)", period.as_secs());
        true
    }

    /// Stop the timer. A tick already running is left to finish.
    pub fn stop(&self) -> bool {
        let token = match self.inner.timer.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match token {
            Some(token) => {
                token.cancel();
                info!("Heartbeat stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        match self.inner.timer.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    pub fn status(&self) -> HeartbeatStatus {
        let inner = &self.inner;
        let last_tick_at = match inner.last_tick_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        HeartbeatStatus {
            running: self.is_running(),
            in_flight: inner.in_flight.load(Ordering::Acquire),
            interval_secs: inner.interval.as_secs(),
            ticks_run: inner.ticks_run.load(Ordering::Relaxed),
            ticks_skipped: inner.ticks_skipped.load(Ordering::Relaxed),
            tasks_completed: inner.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: inner.tasks_failed.load(Ordering::Relaxed),
            last_tick_at,
        }
    }

    /// Run one tick on its own task; errors and panics are logged
    fn spawn_tick(&self) {
        let heartbeat = self.clone();
        tokio::spawn(async move {
            let tick = tokio::spawn(async move { heartbeat.tick().await });
            match tick.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("Heartbeat tick failed: {:#}", e),
                Err(e) if e.is_panic() => error!("Heartbeat tick panicked: {}", e),
                Err(e) => warn!("Heartbeat tick cancelled: {}", e),
            }
        });
    }

    /// Run every due task once
    pub async fn tick(&self) -> Result<TickOutcome> {
        let inner = &self.inner;
        let Some(_in_flight) = InFlight::acquire(&inner.in_flight) else {
            inner.ticks_skipped.fetch_add(1, Ordering::Relaxed);
            self.record(HeartbeatEvent::TickSkipped);
            debug!("Previous tick still running, skipping");
            return Ok(TickOutcome::Skipped);
        };

        inner.ticks_run.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = inner.last_tick_at.lock() {
            *last = Some(Utc::now());
        }

        let due = inner.deps.store.get_due_tasks().await?;
        self.record(HeartbeatEvent::TickStart { due: due.len() });
        if due.is_empty() {
            debug!("No due tasks");
            return Ok(TickOutcome::Ran(TickReport::default()));
        }
        info!("{} due task(s)", due.len());

        let mut report = TickReport::default();
        for task in due {
            match inner
                .deps
                .store
                .update_task_status(task.id, TaskStatus::Active, None)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    // Cancelled or picked up since the due query
                    debug!(task_id = task.id, "Task no longer pending, skipping");
                    continue;
                }
                Err(e) => {
                    error!(task_id = task.id, "Failed to activate task: {:#}", e);
                    continue;
                }
            }

            self.record(HeartbeatEvent::TaskStart {
                id: task.id,
                title: task.title.clone(),
            });
            info!(task_id = task.id, "Running task: {}", task.title);
            let started = Instant::now();

            // The completion write is part of the task: if it fails, so does the task
            let outcome = match self.run_task(&task).await {
                Ok((clean_text, applied)) => self
                    .finish_task(task.id, TaskStatus::Completed, &clean_text)
                    .await
                    .map(|()| applied),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(applied) => {
                    inner.tasks_completed.fetch_add(1, Ordering::Relaxed);
                    report.completed.push(task.id);
                    info!(task_id = task.id, "Task completed");
                    self.record(HeartbeatEvent::TaskDone {
                        id: task.id,
                        duration_ms: elapsed_ms(started),
                        memories: applied.memories.len(),
                        tasks: applied.tasks.len(),
                        says: applied.says,
                    });
                }
                Err(e) => {
                    let reason = format!("{:#}", e);
                    error!(task_id = task.id, "Task failed: {}", reason);
                    if let Err(e) = self.finish_task(task.id, TaskStatus::Failed, &reason).await {
                        error!(task_id = task.id, "{:#}", e);
                    }
                    inner.tasks_failed.fetch_add(1, Ordering::Relaxed);
                    report.failed.push(task.id);
                    self.record(HeartbeatEvent::TaskFailed {
                        id: task.id,
                        duration_ms: elapsed_ms(started),
                        reason,
                    });
                }
            }
        }

        Ok(TickOutcome::Ran(report))
    }

    async fn run_task(&self, task: &Task) -> Result<(String, AppliedDirectives)> {
        let deps = &self.inner.deps;
        let options = AskOptions {
            cwd: task.cwd.as_deref().map(expand_home),
            no_session_persistence: true,
            ..Default::default()
        };

        let response = deps.client.ask(&task_prompt(task), &options).await?;
        if response.is_error {
            bail!("claude reported an error: {}", response.result.trim());
        }

        let parsed = parse_markers(&response.result);
        let targets = DirectiveTargets {
            store: &deps.store,
            identity: &deps.identity,
            outbox: &deps.outbox,
        };
        let applied = apply_directives(targets, &parsed, &format!("task-{}", task.id)).await?;
        Ok((parsed.clean_text, applied))
    }

    /// Write the final status of an active task
    async fn finish_task(&self, id: i64, status: TaskStatus, result: &str) -> Result<()> {
        let written = self
            .inner
            .deps
            .store
            .update_task_status(id, status, Some(result))
            .await
            .with_context(|| format!("Failed to mark task {}", status))?;
        if !written {
            bail!("Task left active state before it could be marked {}", status);
        }
        Ok(())
    }

    fn record(&self, event: HeartbeatEvent) {
        if let Some(activity) = &self.inner.deps.activity {
            activity.record(event);
        }
    }
}

/// Prompt sent for a task: the description framed by its title, or the
/// bare title when there is no description
pub fn task_prompt(task: &Task) -> String {
    if task.description.trim().is_empty() {
        task.title.clone()
    } else {
        format!("Task: {}\n\n{}", task.title, task.description)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        if path == "~" {
            return home;
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
