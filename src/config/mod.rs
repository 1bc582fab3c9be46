// Configuration module
// Public interface for configuration loading

pub mod constants;
mod loader;
mod settings;

pub use loader::{load_config, load_config_from, resolve_data_dir};
pub use settings::{ClaudeSettings, Config, HeartbeatSettings, OutboxSettings, SpeechSettings};
