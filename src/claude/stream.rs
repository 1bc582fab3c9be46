// Incremental event stream of a running invocation

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::types::{AskResponse, StreamEvent};
use super::ClaudeError;

/// Events of one streaming invocation plus its eventual exit outcome
pub struct AskStream {
    events: mpsc::Receiver<StreamEvent>,
    exit: Option<JoinHandle<Result<(), ClaudeError>>>,
    session_id: Option<String>,
    result: Option<AskResponse>,
}

impl AskStream {
    pub fn new(
        events: mpsc::Receiver<StreamEvent>,
        exit: JoinHandle<Result<(), ClaudeError>>,
    ) -> Self {
        Self {
            events,
            exit: Some(exit),
            session_id: None,
            result: None,
        }
    }

    /// A finished stream that replays `events` (no process behind it)
    pub fn from_events(events: Vec<StreamEvent>) -> Self {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // Capacity covers every event
            let _ = tx.try_send(event);
        }
        Self {
            events: rx,
            exit: None,
            session_id: None,
            result: None,
        }
    }

    /// Next event, or `None` once the process closed its output
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.events.recv().await?;
        if self.session_id.is_none() {
            self.session_id = event.session_id().map(str::to_string);
        }
        if let Some(result) = event.as_result() {
            self.result = Some(result);
        }
        Some(event)
    }

    /// First session id seen so far
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Drain the remaining events, wait for the process to exit and return
    /// the final result
    pub async fn finish(mut self) -> Result<AskResponse, ClaudeError> {
        while self.next_event().await.is_some() {}

        if let Some(exit) = self.exit.take() {
            exit.await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))??;
        }

        let mut response = self.result.take().ok_or(ClaudeError::MissingResult)?;
        if response.session_id.is_empty() {
            if let Some(id) = self.session_id.take() {
                response.session_id = id;
            }
        }
        Ok(response)
    }
}
