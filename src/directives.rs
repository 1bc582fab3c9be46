// Applies the side effects parsed out of an AI response

use anyhow::{Context, Result};
use tracing::info;

use crate::identity::Identity;
use crate::markers::{ParsedResponse, TaskDirective};
use crate::outbox::{Outbox, OutboxAction};
use crate::store::{Memory, NewTask, Store, Task};

/// Where directives land
#[derive(Clone, Copy)]
pub struct DirectiveTargets<'a> {
    pub store: &'a Store,
    pub identity: &'a Identity,
    pub outbox: &'a Outbox,
}

/// What was actually applied
#[derive(Debug, Default)]
pub struct AppliedDirectives {
    pub memories: Vec<Memory>,
    pub tasks: Vec<Task>,
    pub says: usize,
}

impl AppliedDirectives {
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty() && self.tasks.is_empty() && self.says == 0
    }
}

impl From<&TaskDirective> for NewTask {
    fn from(directive: &TaskDirective) -> Self {
        NewTask {
            title: directive.title.clone(),
            description: directive.description.clone(),
            priority: directive.priority,
            scheduled_at: directive.scheduled_at,
            cwd: directive.cwd.clone(),
        }
    }
}

/// Store memories, create tasks, then queue speech, in that order.
///
/// Stops at the first failure; whatever was applied before it stays applied.
pub async fn apply_directives(
    targets: DirectiveTargets<'_>,
    parsed: &ParsedResponse,
    source: &str,
) -> Result<AppliedDirectives> {
    let mut applied = AppliedDirectives::default();

    for directive in &parsed.memories {
        let memory = targets
            .store
            .create_memory(&directive.category, &directive.content, Some(source))
            .await
            .context("Failed to store memory")?;
        targets
            .identity
            .append_memory(&format!("**{}**: {}", memory.category, memory.content))?;
        applied.memories.push(memory);
    }

    for directive in &parsed.tasks {
        let task = targets
            .store
            .create_task(NewTask::from(directive))
            .await
            .context("Failed to create task")?;
        info!(task_id = task.id, source, "Task scheduled: {}", task.title);
        applied.tasks.push(task);
    }

    for directive in &parsed.says {
        targets
            .outbox
            .enqueue(&OutboxAction::say(&directive.text, directive.voice.clone()))?;
        applied.says += 1;
    }

    Ok(applied)
}
