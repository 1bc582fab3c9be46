// Request/response types for the claude CLI bridge

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Per-invocation options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskOptions {
    /// Resume this specific session
    pub session_id: Option<String>,
    /// Continue the most recent session in the working directory
    pub continue_last: bool,
    /// Model override (falls back to the configured model)
    pub model: Option<String>,
    /// Agentic turn cap
    pub max_turns: Option<u32>,
    /// Caller-supplied system prompt, appended after the identity context
    pub system_prompt: Option<String>,
    /// Working directory for the subprocess
    pub cwd: Option<PathBuf>,
    /// Don't let the CLI save this conversation
    pub no_session_persistence: bool,
    /// Prepend persona + knowledge to the system prompt
    pub inject_identity: bool,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            continue_last: false,
            model: None,
            max_turns: None,
            system_prompt: None,
            cwd: None,
            no_session_persistence: false,
            inject_identity: true,
        }
    }
}

/// Normalised result of one invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    pub session_id: String,
    pub result: String,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub num_turns: u32,
    pub is_error: bool,
}

impl AskResponse {
    /// Build from a `{"type": "result", ...}` object. Missing fields default.
    pub fn from_value(value: &Value) -> Self {
        let str_field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let cost_usd = value
            .get("total_cost_usd")
            .or_else(|| value.get("cost_usd"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        Self {
            session_id: str_field("session_id"),
            result: str_field("result"),
            cost_usd,
            duration_ms: value.get("duration_ms").and_then(Value::as_u64).unwrap_or(0),
            num_turns: value
                .get("num_turns")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            is_error: value
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

/// One line of `--output-format stream-json`
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// The event's `type` field ("system", "assistant", "user", "result", ...)
    pub kind: String,
    pub raw: Value,
}

impl StreamEvent {
    pub fn from_value(raw: Value) -> Self {
        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Self { kind, raw }
    }

    /// Parse a single NDJSON line. Non-object lines are rejected.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(line)?;
        if !raw.is_object() {
            return Err(serde::de::Error::custom("stream event is not a JSON object"));
        }
        Ok(Self::from_value(raw))
    }

    pub fn session_id(&self) -> Option<&str> {
        self.raw.get("session_id").and_then(Value::as_str)
    }

    /// Concatenated text blocks of an assistant message
    pub fn assistant_text(&self) -> Option<String> {
        if self.kind != "assistant" {
            return None;
        }
        let blocks = self.raw.pointer("/message/content")?.as_array()?;
        let text = blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        (!text.is_empty()).then_some(text)
    }

    /// The final result, if this is the terminal `result` event
    pub fn as_result(&self) -> Option<AskResponse> {
        (self.kind == "result").then(|| AskResponse::from_value(&self.raw))
    }
}
