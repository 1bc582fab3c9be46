// Project-wide constants
//
// Default values and file names live here so the loader, the daemon and the
// CLI agree on them. Import via `use crate::config::constants::*;`.

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "FRYLER_HOME";

/// Data directory under the user's home when `FRYLER_HOME` is unset.
pub const DEFAULT_DATA_DIR_NAME: &str = ".fryler";

pub const CONFIG_FILE: &str = "config.toml";
pub const DB_FILE: &str = "fryler.db";
pub const PID_FILE: &str = "fryler.pid";
pub const LOGS_DIR: &str = "logs";
pub const OUTBOX_DIR: &str = "outbox";

/// Seconds between heartbeat ticks.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 60;

pub const DEFAULT_CLAUDE_BINARY: &str = "claude";

/// Quiet period before a burst of outbox writes is drained.
pub const DEFAULT_SETTLE_MS: u64 = 500;

/// How often the outbox poll-watcher rescans the directory.
pub const DEFAULT_POLL_MS: u64 = 250;

pub const DEFAULT_SPEECH_COMMAND: &str = "say";

/// Grace period between SIGTERM and SIGKILL when stopping the daemon.
pub const STOP_GRACE_SECS: u64 = 5;
