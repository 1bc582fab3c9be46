// Bridge to the `claude` command-line tool
//
// Every AI call is a subprocess: single-shot calls collect one JSON document,
// streaming calls read newline-delimited JSON events as they arrive.

use anyhow::Result;
use async_trait::async_trait;

pub mod client;
pub mod stream;
pub mod types;

pub use client::{compose_system_prompt, parse_single_shot, ClaudeCli};
pub use stream::AskStream;
pub use types::{AskOptions, AskResponse, StreamEvent};

/// Failures of a single CLI invocation
#[derive(Debug, thiserror::Error)]
pub enum ClaudeError {
    #[error("failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("claude exited with status {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("failed to parse claude output: {0}")]
    Parse(String),

    #[error("claude output contained no result")]
    MissingResult,

    #[error("I/O error while talking to claude: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that can answer a prompt the way the claude CLI does
///
/// The heartbeat and the chat loop only see this trait, so tests can script
/// responses without spawning processes.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Run to completion and return the final result
    async fn ask(&self, prompt: &str, options: &AskOptions) -> Result<AskResponse>;

    /// Start an invocation whose events are delivered as they are produced
    async fn ask_streaming(&self, prompt: &str, options: &AskOptions) -> Result<AskStream>;
}
