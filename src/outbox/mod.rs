// File-based outbox for side effects that must run on the user's machine
//
// Producers drop one JSON file per action into a directory; a consumer drains
// the directory in filename order. Filenames start with zero-padded epoch
// milliseconds, so lexicographic order is chronological order.
//
// Files are written under a `.tmp` name and renamed into place, so a drain
// never observes a half-written action.

mod dispatch;
mod watch;

pub use dispatch::{Dispatch, SpeechDispatcher};
pub use watch::{watch, WatchOptions, WatchSummary};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ACTION_EXTENSION: &str = "json";

/// A queued side effect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboxAction {
    Say {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice: Option<String>,
        #[serde(default = "Utc::now")]
        created_at: DateTime<Utc>,
    },
}

impl OutboxAction {
    pub fn say(text: impl Into<String>, voice: Option<String>) -> Self {
        Self::Say {
            text: text.into(),
            voice,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub dispatched: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Outbox {
    dir: PathBuf,
}

impl Outbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create outbox {}", self.dir.display()))
    }

    /// Write one action and return its final path
    pub fn enqueue(&self, action: &OutboxAction) -> Result<PathBuf> {
        self.ensure_dir()?;

        let name = action_file_name(Utc::now().timestamp_millis());
        let path = self.dir.join(&name);
        let tmp_path = self.dir.join(format!("{}.tmp", name));

        let json = serde_json::to_vec_pretty(action).context("Failed to serialize action")?;
        fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to move {} into place", tmp_path.display()))?;

        debug!("Queued outbox action {}", path.display());
        Ok(path)
    }

    /// Visible action files, oldest first
    pub fn pending_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read outbox {}", self.dir.display()))
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_action_file(path))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Dispatch and delete every pending action
    ///
    /// Each file is deleted after its dispatch attempt, whether it
    /// succeeded or not. Failures are logged and counted.
    pub async fn drain(&self, dispatcher: &dyn Dispatch) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        for path in self.pending_files()? {
            let contents = match fs::read_to_string(&path) {
                Ok(contents) => contents,
                // Another drain got there first
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("Failed to read outbox file {}: {}", path.display(), e);
                    report.failed += 1;
                    remove_action(&path);
                    continue;
                }
            };

            match serde_json::from_str::<OutboxAction>(&contents) {
                Ok(action) => match dispatcher.dispatch(&action).await {
                    Ok(()) => report.dispatched += 1,
                    Err(e) => {
                        warn!("Failed to dispatch {}: {:#}", path.display(), e);
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    warn!("Invalid outbox file {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }

            remove_action(&path);
        }

        if report.dispatched + report.failed > 0 {
            info!(
                dispatched = report.dispatched,
                failed = report.failed,
                "Outbox drained"
            );
        }
        Ok(report)
    }
}

/// `<13-digit millis>-<8 hex>.json`
fn action_file_name(millis: i64) -> String {
    format!(
        "{:013}-{:08x}.{}",
        millis.max(0),
        rand::random::<u32>(),
        ACTION_EXTENSION
    )
}

fn is_action_file(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| !n.starts_with('.'))
        .unwrap_or(false);
    visible
        && path.is_file()
        && path.extension().and_then(|e| e.to_str()) == Some(ACTION_EXTENSION)
}

fn remove_action(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove outbox file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records spoken text, fails on anything containing "fail"
    #[derive(Default)]
    struct Recorder {
        spoken: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Dispatch for Recorder {
        async fn dispatch(&self, action: &OutboxAction) -> Result<()> {
            let OutboxAction::Say { text, .. } = action;
            if text.contains("fail") {
                bail!("speech failed");
            }
            self.spoken.lock().unwrap().push(text.clone());
            Ok(())
        }
    }

    #[test]
    fn test_file_name_format() {
        let name = action_file_name(1_700_000_000_123);
        assert_eq!(name.len(), 13 + 1 + 8 + 5);
        assert!(name.starts_with("1700000000123-"));
        assert!(name.ends_with(".json"));

        // Zero padding keeps lexicographic order chronological
        assert!(action_file_name(999) < action_file_name(1000));
        assert!(action_file_name(5).starts_with("0000000000005-"));
    }

    #[test]
    fn test_action_json_shape() {
        let action = OutboxAction::say("Hello", Some("Samantha".into()));
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "say");
        assert_eq!(value["text"], "Hello");
        assert_eq!(value["voice"], "Samantha");
        assert!(value["created_at"].is_string());

        let parsed: OutboxAction =
            serde_json::from_str(r#"{"type":"say","text":"Hi"}"#).unwrap();
        assert!(matches!(parsed, OutboxAction::Say { voice: None, .. }));
    }

    #[test]
    fn test_enqueue_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let outbox = Outbox::new(tmp.path().join("outbox"));
        let path = outbox.enqueue(&OutboxAction::say("one", None)).unwrap();
        assert!(path.exists());

        let names: Vec<_> = fs::read_dir(outbox.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].ends_with(".tmp"));
    }

    #[test]
    fn test_pending_files_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        let outbox = Outbox::new(tmp.path());
        fs::write(tmp.path().join("0000000000002-bbbbbbbb.json"), "{}").unwrap();
        fs::write(tmp.path().join("0000000000001-aaaaaaaa.json"), "{}").unwrap();
        fs::write(tmp.path().join("0000000000003-cccccccc.json.tmp"), "{}").unwrap();
        fs::write(tmp.path().join(".hidden.json"), "{}").unwrap();
        fs::write(tmp.path().join("notes.txt"), "").unwrap();

        let files = outbox.pending_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("0000000000001-aaaaaaaa.json"));
        assert!(files[1].ends_with("0000000000002-bbbbbbbb.json"));
    }

    #[test]
    fn test_pending_files_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let outbox = Outbox::new(tmp.path().join("absent"));
        assert!(outbox.pending_files().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drain_dispatches_in_order_and_deletes_everything() {
        let tmp = TempDir::new().unwrap();
        let outbox = Outbox::new(tmp.path());
        let write = |name: &str, body: &str| fs::write(tmp.path().join(name), body).unwrap();
        write("0000000000001-00000001.json", r#"{"type":"say","text":"first"}"#);
        write("0000000000002-00000002.json", r#"{"type":"say","text":"please fail"}"#);
        write("0000000000003-00000003.json", "not json");
        write("0000000000004-00000004.json", r#"{"type":"say","text":"last"}"#);

        let recorder = Recorder::default();
        let report = outbox.drain(&recorder).await.unwrap();

        assert_eq!(report, DrainReport { dispatched: 2, failed: 2 });
        assert_eq!(*recorder.spoken.lock().unwrap(), vec!["first", "last"]);
        assert!(outbox.pending_files().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drain_empty_outbox() {
        let tmp = TempDir::new().unwrap();
        let outbox = Outbox::new(tmp.path());
        let report = outbox.drain(&Recorder::default()).await.unwrap();
        assert_eq!(report, DrainReport::default());
    }
}
