// Heartbeat activity log: daily JSONL at <data_dir>/logs/heartbeat_YYYY-MM-DD.jsonl

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// One entry in the heartbeat activity log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeartbeatEvent {
    /// A tick started and found this many due tasks
    TickStart { due: usize },
    /// A tick fired while the previous one was still running
    TickSkipped,
    TaskStart { id: i64, title: String },
    TaskDone {
        id: i64,
        duration_ms: u64,
        memories: usize,
        tasks: usize,
        says: usize,
    },
    TaskFailed {
        id: i64,
        duration_ms: u64,
        reason: String,
    },
}

#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a HeartbeatEvent,
}

/// Appends heartbeat events to a daily log file
#[derive(Debug, Clone)]
pub struct ActivityLog {
    dir: PathBuf,
}

impl ActivityLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn log(&self, event: HeartbeatEvent) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.today_path();

        let entry = LogEntry {
            ts: Utc::now().to_rfc3339(),
            event: &event,
        };
        let json = serde_json::to_string(&entry).context("Failed to serialize activity event")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open activity log: {}", path.display()))?;

        writeln!(file, "{}", json).context("Failed to write activity event")?;
        Ok(())
    }

    /// Like `log`, but a failure only produces a debug message
    pub fn record(&self, event: HeartbeatEvent) {
        if let Err(e) = self.log(event) {
            tracing::debug!("Activity log write failed: {:#}", e);
        }
    }

    pub fn today_path(&self) -> PathBuf {
        let date = Local::now().format("%Y-%m-%d");
        self.dir.join(format!("heartbeat_{}.jsonl", date))
    }
}
