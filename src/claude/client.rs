// Subprocess client for the `claude` CLI

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::stream::AskStream;
use super::types::{AskOptions, AskResponse, StreamEvent};
use super::{AiClient, ClaudeError};
use crate::config::ClaudeSettings;
use crate::identity::Identity;

/// Variables that make a nested CLI think it runs inside another session
const SCRUBBED_ENV: &[&str] = &["CLAUDECODE", "CLAUDE_CODE_ENTRYPOINT"];

const STREAM_CHANNEL_CAPACITY: usize = 64;

pub struct ClaudeCli {
    settings: ClaudeSettings,
    identity: Option<Identity>,
}

impl ClaudeCli {
    pub fn new(settings: ClaudeSettings, identity: Identity) -> Self {
        Self {
            settings,
            identity: Some(identity),
        }
    }

    /// Client that never injects persona or knowledge
    pub fn without_identity(settings: ClaudeSettings) -> Self {
        Self {
            settings,
            identity: None,
        }
    }

    pub fn settings(&self) -> &ClaudeSettings {
        &self.settings
    }

    fn system_prompt(&self, options: &AskOptions) -> Option<String> {
        let identity = if options.inject_identity {
            self.identity.as_ref().map(Identity::identity_context)
        } else {
            None
        };
        compose_system_prompt(identity.as_deref(), options.system_prompt.as_deref())
    }

    /// Build the full command line for one invocation
    pub fn build_command(&self, prompt: &str, options: &AskOptions, streaming: bool) -> Command {
        let mut cmd = Command::new(&self.settings.binary);
        cmd.arg("-p").arg(prompt);

        if streaming {
            cmd.args(["--output-format", "stream-json", "--verbose"]);
        } else {
            cmd.args(["--output-format", "json"]);
        }

        if let Some(session_id) = &options.session_id {
            cmd.arg("--resume").arg(session_id);
        } else if options.continue_last {
            cmd.arg("--continue");
        }

        if let Some(model) = options.model.as_ref().or(self.settings.model.as_ref()) {
            cmd.arg("--model").arg(model);
        }

        if let Some(max_turns) = options.max_turns.or(self.settings.max_turns) {
            cmd.arg("--max-turns").arg(max_turns.to_string());
        }

        if let Some(system_prompt) = self.system_prompt(options) {
            cmd.arg("--append-system-prompt").arg(system_prompt);
        }

        if options.no_session_persistence {
            cmd.arg("--no-session-persistence");
        }

        cmd.args(&self.settings.extra_args);

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for key in SCRUBBED_ENV {
            cmd.env_remove(key);
        }

        cmd.stdin(Stdio::null());
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> ClaudeError {
        ClaudeError::Spawn {
            binary: self.settings.binary.clone(),
            source,
        }
    }
}

#[async_trait]
impl AiClient for ClaudeCli {
    async fn ask(&self, prompt: &str, options: &AskOptions) -> Result<AskResponse> {
        let mut cmd = self.build_command(prompt, options, false);
        debug!(
            binary = %self.settings.binary,
            cwd = ?options.cwd,
            resume = ?options.session_id,
            "Invoking claude"
        );

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(ClaudeError::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let response = parse_single_shot(&stdout)?;

        info!(
            session_id = %response.session_id,
            duration_ms = response.duration_ms,
            cost_usd = response.cost_usd,
            is_error = response.is_error,
            "claude finished"
        );
        Ok(response)
    }

    async fn ask_streaming(&self, prompt: &str, options: &AskOptions) -> Result<AskStream> {
        let mut cmd = self.build_command(prompt, options, true);
        debug!(binary = %self.settings.binary, "Invoking claude (streaming)");

        let mut child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClaudeError::Parse("stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClaudeError::Parse("stderr was not captured".into()))?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        let exit = tokio::spawn(async move {
            // Drain stderr in a background task so it doesn't block stdout reading
            let stderr_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = BufReader::new(stderr).read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            });

            let mut receiver_gone = false;
            let mut segments = BufReader::new(stdout).split(b'\n');
            loop {
                let raw = match segments.next_segment().await {
                    Ok(Some(raw)) => raw,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Stopped reading claude output: {}", e);
                        break;
                    }
                };
                let line = match String::from_utf8(raw) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Skipping non-UTF-8 stream line: {}", e);
                        continue;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match StreamEvent::from_line(line) {
                    Ok(event) => {
                        if !receiver_gone && tx.send(event).await.is_err() {
                            debug!("Stream receiver dropped, discarding remaining events");
                            receiver_gone = true;
                        }
                    }
                    Err(e) => warn!("Skipping malformed stream line: {}", e),
                }
            }
            drop(tx);

            let stderr_buf = stderr_task.await.unwrap_or_default();
            let status = child.wait().await?;
            if !status.success() {
                return Err(ClaudeError::Exit {
                    code: status.code(),
                    stderr: stderr_buf.trim().to_string(),
                });
            }
            Ok(())
        });

        Ok(AskStream::new(rx, exit))
    }
}

/// Identity context first, then the caller's prompt
pub fn compose_system_prompt(identity: Option<&str>, caller: Option<&str>) -> Option<String> {
    let caller = caller.map(str::trim).filter(|s| !s.is_empty());
    match (identity, caller) {
        (Some(identity), Some(caller)) => Some(format!("{}\n\n{}", identity, caller)),
        (Some(identity), None) => Some(identity.to_string()),
        (None, Some(caller)) => Some(caller.to_string()),
        (None, None) => None,
    }
}

/// Parse `--output-format json` output: either the result object itself or
/// an array of events containing one `"type": "result"` element
pub fn parse_single_shot(stdout: &str) -> Result<AskResponse, ClaudeError> {
    let value: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| ClaudeError::Parse(e.to_string()))?;

    match value {
        Value::Object(_) => Ok(AskResponse::from_value(&value)),
        Value::Array(items) => items
            .iter()
            .find(|item| item.get("type").and_then(Value::as_str) == Some("result"))
            .map(AskResponse::from_value)
            .ok_or(ClaudeError::MissingResult),
        other => Err(ClaudeError::Parse(format!(
            "expected an object or array, got {}",
            other
        ))),
    }
}
