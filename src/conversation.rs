// Interactive turns: `fryler ask` and `fryler chat`
//
// A turn streams the reply, shows the user the text with markers removed,
// then records the session and applies any directives the reply carried.

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::debug;

use crate::claude::{AiClient, AskOptions};
use crate::directives::{apply_directives, AppliedDirectives, DirectiveTargets};
use crate::identity::Identity;
use crate::markers::parse_markers;
use crate::outbox::Outbox;
use crate::store::Store;

/// Provenance tag for memories learned in conversation
pub const CHAT_SOURCE: &str = "chat";

#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    /// Session title recorded on first sight ("ask", "chat")
    pub title: String,
    pub resume: Option<String>,
    pub continue_last: bool,
    pub model: Option<String>,
}

#[derive(Debug)]
pub struct TurnOutcome {
    pub session_id: Option<String>,
    /// Final reply with markers removed
    pub clean_text: String,
    pub applied: AppliedDirectives,
    pub cost_usd: f64,
}

pub struct Conversation {
    client: Arc<dyn AiClient>,
    store: Arc<Store>,
    identity: Identity,
    outbox: Outbox,
}

impl Conversation {
    pub fn new(
        client: Arc<dyn AiClient>,
        store: Arc<Store>,
        identity: Identity,
        outbox: Outbox,
    ) -> Self {
        Self {
            client,
            store,
            identity,
            outbox,
        }
    }

    /// Run one turn, handing each cleaned assistant message to `on_text`
    pub async fn turn<F>(&self, prompt: &str, options: &TurnOptions, mut on_text: F) -> Result<TurnOutcome>
    where
        F: FnMut(&str) + Send,
    {
        let ask = AskOptions {
            session_id: options.resume.clone(),
            continue_last: options.continue_last,
            model: options.model.clone(),
            ..Default::default()
        };

        let mut stream = self.client.ask_streaming(prompt, &ask).await?;
        let mut assistant_texts = Vec::new();

        while let Some(event) = stream.next_event().await {
            if let Some(text) = event.assistant_text() {
                let visible = parse_markers(&text).clean_text;
                if !visible.is_empty() {
                    on_text(&visible);
                }
                assistant_texts.push(text);
            }
        }

        let response = stream.finish().await?;
        if response.is_error {
            bail!("claude reported an error: {}", response.result.trim());
        }

        let session_id = Some(response.session_id.clone()).filter(|id| !id.is_empty());
        if let Some(id) = &session_id {
            self.record_session(id, &options.title).await?;
        }

        // Markers may sit in any assistant message of a multi-step reply
        let directive_source = if assistant_texts.is_empty() {
            response.result.clone()
        } else {
            assistant_texts.join("\n\n")
        };
        let parsed = parse_markers(&directive_source);
        let targets = DirectiveTargets {
            store: &self.store,
            identity: &self.identity,
            outbox: &self.outbox,
        };
        let applied = apply_directives(targets, &parsed, CHAT_SOURCE).await?;

        Ok(TurnOutcome {
            session_id,
            clean_text: parse_markers(&response.result).clean_text,
            applied,
            cost_usd: response.cost_usd,
        })
    }

    async fn record_session(&self, id: &str, title: &str) -> Result<()> {
        if self.store.get_session(id).await?.is_some() {
            self.store.update_session(id).await?;
        } else {
            let title = Some(title).filter(|t| !t.is_empty());
            self.store.create_session(id, title).await?;
            debug!(session_id = id, "New session recorded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claude::{AskResponse, AskStream, StreamEvent};
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    /// Streams one assistant message and a result, always under session "s-1"
    struct Scripted {
        text: String,
        is_error: bool,
    }

    #[async_trait]
    impl AiClient for Scripted {
        async fn ask(&self, _prompt: &str, _options: &AskOptions) -> Result<AskResponse> {
            unreachable!("conversation turns always stream")
        }

        async fn ask_streaming(&self, _prompt: &str, _options: &AskOptions) -> Result<AskStream> {
            Ok(AskStream::from_events(vec![
                StreamEvent::from_value(json!({"type": "system", "session_id": "s-1"})),
                StreamEvent::from_value(json!({
                    "type": "assistant",
                    "session_id": "s-1",
                    "message": {"content": [{"type": "text", "text": self.text}]}
                })),
                StreamEvent::from_value(json!({
                    "type": "result",
                    "result": self.text,
                    "session_id": "s-1",
                    "is_error": self.is_error,
                    "total_cost_usd": 0.02
                })),
            ]))
        }
    }

    fn conversation(tmp: &TempDir, text: &str, is_error: bool) -> (Conversation, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let client = Arc::new(Scripted {
            text: text.to_string(),
            is_error,
        });
        let convo = Conversation::new(
            client,
            store.clone(),
            Identity::new(tmp.path()),
            Outbox::new(tmp.path().join("outbox")),
        );
        (convo, store)
    }

    fn options(title: &str) -> TurnOptions {
        TurnOptions {
            title: title.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_turn_shows_clean_text_and_applies_directives() {
        let tmp = TempDir::new().unwrap();
        let (convo, store) = conversation(
            &tmp,
            "Sure!\n<!-- FRYLER_TASK: {\"title\": \"Water plants\"} -->",
            false,
        );

        let mut shown = Vec::new();
        let outcome = convo
            .turn("remind me", &options("ask"), |t| shown.push(t.to_string()))
            .await
            .unwrap();

        assert_eq!(shown, vec!["Sure!"]);
        assert_eq!(outcome.clean_text, "Sure!");
        assert_eq!(outcome.session_id.as_deref(), Some("s-1"));
        assert_eq!(outcome.applied.tasks.len(), 1);
        assert_eq!(store.list_tasks(None).await.unwrap()[0].title, "Water plants");
    }

    #[tokio::test]
    async fn test_sessions_created_then_updated() {
        let tmp = TempDir::new().unwrap();
        let (convo, store) = conversation(&tmp, "Hi", false);

        convo.turn("a", &options("chat"), |_| {}).await.unwrap();
        let session = store.get_session("s-1").await.unwrap().unwrap();
        assert_eq!(session.title.as_deref(), Some("chat"));
        assert_eq!(session.message_count, 1);

        convo.turn("b", &options("chat"), |_| {}).await.unwrap();
        let session = store.get_session("s-1").await.unwrap().unwrap();
        assert_eq!(session.message_count, 2);
    }

    #[tokio::test]
    async fn test_error_result_applies_nothing() {
        let tmp = TempDir::new().unwrap();
        let (convo, store) = conversation(
            &tmp,
            "<!-- FRYLER_MEMORY: {\"category\": \"fact\", \"content\": \"x\"} -->",
            true,
        );

        assert!(convo.turn("x", &options("ask"), |_| {}).await.is_err());
        assert_eq!(store.count_memories().await.unwrap(), 0);
        assert!(store.get_session("s-1").await.unwrap().is_none());
    }
}
