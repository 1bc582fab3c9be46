// Configuration structs

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::constants::*;

/// Heartbeat scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// Run the scheduler inside the daemon
    pub enabled: bool,

    /// Seconds between ticks
    pub interval_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_HEARTBEAT_SECS,
        }
    }
}

/// How the `claude` CLI is invoked
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClaudeSettings {
    /// Binary name or path
    pub binary: String,

    /// Default model (per-call options override it)
    pub model: Option<String>,

    /// Default agentic turn cap
    pub max_turns: Option<u32>,

    /// Appended verbatim to every invocation
    pub extra_args: Vec<String>,
}

impl Default for ClaudeSettings {
    fn default() -> Self {
        Self {
            binary: DEFAULT_CLAUDE_BINARY.to_string(),
            model: None,
            max_turns: None,
            extra_args: Vec::new(),
        }
    }
}

/// Outbox location and watcher behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutboxSettings {
    /// Override for `<data_dir>/outbox`
    pub dir: Option<PathBuf>,

    /// Drain the outbox from inside the daemon (host role)
    pub watch: bool,

    pub settle_ms: u64,
    pub poll_ms: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            dir: None,
            watch: false,
            settle_ms: DEFAULT_SETTLE_MS,
            poll_ms: DEFAULT_POLL_MS,
        }
    }
}

/// Text-to-speech command used for SAY actions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeechSettings {
    pub command: String,

    /// Voice used when an action does not name one
    pub voice: Option<String>,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            command: DEFAULT_SPEECH_COMMAND.to_string(),
            voice: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Root for the database, identity files, logs and outbox.
    /// Never read from the file; set by the loader.
    #[serde(skip)]
    pub data_dir: PathBuf,

    pub heartbeat: HeartbeatSettings,
    pub claude: ClaudeSettings,
    pub outbox: OutboxSettings,
    pub speech: SpeechSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_dir(PathBuf::from(DEFAULT_DATA_DIR_NAME))
    }
}

impl Config {
    /// Defaults rooted at `data_dir`
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            heartbeat: HeartbeatSettings::default(),
            claude: ClaudeSettings::default(),
            outbox: OutboxSettings::default(),
            speech: SpeechSettings::default(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.data_dir.join(PID_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join(LOGS_DIR)
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.outbox
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join(OUTBOX_DIR))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_secs)
    }

    pub fn outbox_settle(&self) -> Duration {
        Duration::from_millis(self.outbox.settle_ms)
    }

    pub fn outbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.outbox.poll_ms)
    }

    /// Reject values that would spin or never fire
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.interval_secs == 0 {
            bail!("heartbeat.interval_secs must be greater than zero");
        }
        if self.outbox.poll_ms == 0 {
            bail!("outbox.poll_ms must be greater than zero");
        }
        if self.outbox.settle_ms == 0 {
            bail!("outbox.settle_ms must be greater than zero");
        }
        if self.claude.binary.trim().is_empty() {
            bail!("claude.binary must not be empty");
        }
        if self.speech.command.trim().is_empty() {
            bail!("speech.command must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::with_data_dir(PathBuf::from("/tmp/fryler"));
        assert!(config.heartbeat.enabled);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.claude.binary, "claude");
        assert_eq!(config.speech.command, "say");
        assert!(!config.outbox.watch);
        assert_eq!(config.outbox_dir(), PathBuf::from("/tmp/fryler/outbox"));
        assert_eq!(config.pid_path(), PathBuf::from("/tmp/fryler/fryler.pid"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [heartbeat]
            interval_secs = 15

            [claude]
            model = "sonnet"
            extra_args = ["--dangerously-skip-permissions"]

            [outbox]
            dir = "/var/tmp/outbox"
            "#,
        )
        .unwrap();

        assert!(config.heartbeat.enabled);
        assert_eq!(config.heartbeat.interval_secs, 15);
        assert_eq!(config.claude.binary, "claude");
        assert_eq!(config.claude.model.as_deref(), Some("sonnet"));
        assert_eq!(config.claude.extra_args.len(), 1);
        assert_eq!(config.outbox_dir(), PathBuf::from("/var/tmp/outbox"));
        assert_eq!(config.outbox.settle_ms, 500);
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = Config::default();
        config.heartbeat.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.outbox.poll_ms = 0;
        assert!(config.validate().is_err());
    }
}
