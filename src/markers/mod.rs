// Response marker protocol
//
// The assistant embeds directives in its replies as HTML comments:
//
//   <!-- FRYLER_TASK: {"title": "...", "priority": 2, "scheduled_at": "..."} -->
//   <!-- FRYLER_MEMORY: {"category": "...", "content": "..."} -->
//   <!-- FRYLER_SAY: {"text": "...", "voice": "..."} -->
//
// parse_markers() extracts and validates them and returns the reply with
// every recognised marker removed. Bad payloads are logged and dropped,
// never surfaced to the user.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::store::normalize_priority;

/// Opening half of a marker, up to (not including) the JSON payload
static MARKER_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<!--\s*FRYLER_(TASK|MEMORY|SAY)\s*:\s*").expect("marker regex is valid")
});

/// First `}` followed by the comment close; used when the payload is not balanced
static MARKER_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\}\s*-->").expect("marker close regex is valid"));

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("newline regex is valid"));

/// Naive timestamp layouts accepted for `scheduled_at` (interpreted as local time)
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Task,
    Memory,
    Say,
}

impl MarkerKind {
    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "TASK" => Some(MarkerKind::Task),
            "MEMORY" => Some(MarkerKind::Memory),
            "SAY" => Some(MarkerKind::Say),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            MarkerKind::Task => "FRYLER_TASK",
            MarkerKind::Memory => "FRYLER_MEMORY",
            MarkerKind::Say => "FRYLER_SAY",
        }
    }
}

/// A validated request to queue a new task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDirective {
    pub title: String,
    pub description: String,
    pub priority: u8,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub cwd: Option<String>,
}

/// A validated request to remember something
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDirective {
    pub category: String,
    pub content: String,
}

/// A validated request to speak a notification aloud
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SayDirective {
    pub text: String,
    pub voice: Option<String>,
}

/// Display-safe text plus every valid directive, in order of appearance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub clean_text: String,
    pub tasks: Vec<TaskDirective>,
    pub memories: Vec<MemoryDirective>,
    pub says: Vec<SayDirective>,
}

impl ParsedResponse {
    pub fn has_directives(&self) -> bool {
        !(self.tasks.is_empty() && self.memories.is_empty() && self.says.is_empty())
    }
}

/// Extract all markers from `text`.
///
/// Text without any marker is returned verbatim. Otherwise the markers are
/// cut out, runs of three or more newlines collapse to two, and the result
/// is trimmed.
pub fn parse_markers(text: &str) -> ParsedResponse {
    let mut parsed = ParsedResponse::default();
    let mut kept = String::with_capacity(text.len());
    let mut copied_to = 0;
    let mut search_from = 0;
    let mut matched_any = false;

    while let Some(open) = MARKER_OPEN.captures_at(text, search_from) {
        let whole = open.get(0).expect("group 0 always present");
        let Some(kind) = open.get(1).and_then(|m| MarkerKind::from_keyword(m.as_str())) else {
            search_from = whole.end();
            continue;
        };

        let Some(shell) = find_shell_end(text, whole.end()) else {
            // No payload/close: plain text that happens to look like a marker
            search_from = whole.end();
            continue;
        };

        matched_any = true;
        kept.push_str(&text[copied_to..whole.start()]);
        apply_payload(kind, &text[whole.end()..shell.payload_end], &mut parsed);
        copied_to = shell.end;
        search_from = shell.end;
    }

    if !matched_any {
        parsed.clean_text = text.to_string();
        return parsed;
    }

    kept.push_str(&text[copied_to..]);
    parsed.clean_text = BLANK_RUNS.replace_all(&kept, "\n\n").trim().to_string();
    parsed
}

/// Byte offsets of a marker's payload end and of the whole marker's end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ShellBounds {
    payload_end: usize,
    end: usize,
}

/// Locate the end of the JSON object starting at `start` and the `-->` after it.
///
/// Prefers a balanced-brace scan that understands JSON strings, so a `}`
/// inside a string value does not end the payload early. Falls back to the
/// first `}` followed by `-->` when the balanced object is not directly
/// followed by the comment close.
fn find_shell_end(text: &str, start: usize) -> Option<ShellBounds> {
    if !text[start..].starts_with('{') {
        return None;
    }

    if let Some(object_end) = balanced_object_end(&text.as_bytes()[start..]).map(|n| start + n) {
        let rest = &text[object_end..];
        let trimmed = rest.trim_start();
        if trimmed.starts_with("-->") {
            let end = object_end + (rest.len() - trimmed.len()) + "-->".len();
            return Some(ShellBounds {
                payload_end: object_end,
                end,
            });
        }
    }

    MARKER_CLOSE.find_at(text, start).map(|close| ShellBounds {
        payload_end: close.start() + 1,
        end: close.end(),
    })
}

/// Length of the brace-balanced object at the start of `bytes`, if it closes
fn balanced_object_end(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn apply_payload(kind: MarkerKind, payload: &str, parsed: &mut ParsedResponse) {
    let object = match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(object)) => object,
        Ok(_) => {
            warn!(marker = kind.keyword(), "Marker payload is not a JSON object, dropping");
            return;
        }
        Err(e) => {
            warn!(marker = kind.keyword(), error = %e, "Malformed marker JSON, dropping");
            return;
        }
    };

    match kind {
        MarkerKind::Task => match task_directive(&object) {
            Some(task) => parsed.tasks.push(task),
            None => warn!("FRYLER_TASK without a title, dropping"),
        },
        MarkerKind::Memory => match memory_directive(&object) {
            Some(memory) => parsed.memories.push(memory),
            None => warn!("FRYLER_MEMORY missing category or content, dropping"),
        },
        MarkerKind::Say => match say_directive(&object) {
            Some(say) => parsed.says.push(say),
            None => warn!("FRYLER_SAY without text, dropping"),
        },
    }
}

/// Non-empty trimmed string field
fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn task_directive(object: &Map<String, Value>) -> Option<TaskDirective> {
    let title = text_field(object, "title")?;

    let description = object
        .get("description")
        .and_then(Value::as_str)
        .map(|d| d.trim().to_string())
        .unwrap_or_default();

    let priority = normalize_priority(object.get("priority").and_then(Value::as_i64));

    let scheduled_at = match object.get("scheduled_at") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                warn!(scheduled_at = %raw, "Unparseable scheduled_at, task will run next tick");
            }
            parsed
        }
        Some(other) => {
            warn!(scheduled_at = %other, "Non-string scheduled_at, task will run next tick");
            None
        }
    };

    Some(TaskDirective {
        title,
        description,
        priority,
        scheduled_at,
        cwd: text_field(object, "cwd"),
    })
}

fn memory_directive(object: &Map<String, Value>) -> Option<MemoryDirective> {
    Some(MemoryDirective {
        category: text_field(object, "category")?,
        content: text_field(object, "content")?,
    })
}

fn say_directive(object: &Map<String, Value>) -> Option<SayDirective> {
    Some(SayDirective {
        text: text_field(object, "text")?,
        voice: text_field(object, "voice"),
    })
}

/// Parse an ISO 8601 timestamp.
///
/// Offsets are honoured (RFC 3339); naive date-times are taken as local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(raw, format)
            .ok()
            .and_then(|naive| Local.from_local_datetime(&naive).earliest())
            .map(|local| local.with_timezone(&Utc))
    })
}
