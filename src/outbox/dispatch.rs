// Executors for outbox actions

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::OutboxAction;
use crate::config::SpeechSettings;

/// Performs one outbox action on the host
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, action: &OutboxAction) -> Result<()>;
}

/// Speaks SAY actions through a text-to-speech command (`say` on macOS)
#[derive(Debug, Clone)]
pub struct SpeechDispatcher {
    command: String,
    default_voice: Option<String>,
}

impl SpeechDispatcher {
    pub fn new(command: impl Into<String>, default_voice: Option<String>) -> Self {
        Self {
            command: command.into(),
            default_voice,
        }
    }

    pub fn from_settings(settings: &SpeechSettings) -> Self {
        Self::new(settings.command.clone(), settings.voice.clone())
    }

    fn build_command(&self, text: &str, voice: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.command);
        if let Some(voice) = voice.or(self.default_voice.as_deref()) {
            cmd.arg("-v").arg(voice);
        }
        cmd.arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

#[async_trait]
impl Dispatch for SpeechDispatcher {
    async fn dispatch(&self, action: &OutboxAction) -> Result<()> {
        match action {
            OutboxAction::Say { text, voice, .. } => {
                debug!(voice = ?voice, "Speaking: {}", text);
                let status = self
                    .build_command(text, voice.as_deref())
                    .status()
                    .await
                    .with_context(|| format!("Failed to run '{}'", self.command))?;
                if !status.success() {
                    bail!("'{}' exited with {}", self.command, status);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_voice_precedence() {
        let dispatcher = SpeechDispatcher::new("say", Some("Alex".into()));
        assert_eq!(args(&dispatcher.build_command("hi", Some("Samantha"))), ["-v", "Samantha", "hi"]);
        assert_eq!(args(&dispatcher.build_command("hi", None)), ["-v", "Alex", "hi"]);

        let plain = SpeechDispatcher::new("say", None);
        assert_eq!(args(&plain.build_command("hi", None)), ["hi"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_is_checked() {
        let ok = SpeechDispatcher::new("true", None);
        assert!(ok.dispatch(&OutboxAction::say("hi", None)).await.is_ok());

        let failing = SpeechDispatcher::new("false", None);
        assert!(failing.dispatch(&OutboxAction::say("hi", None)).await.is_err());

        let missing = SpeechDispatcher::new("/nonexistent/fryler-say", None);
        assert!(missing.dispatch(&OutboxAction::say("hi", None)).await.is_err());
    }
}
