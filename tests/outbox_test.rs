// Outbox drain guarantees with a dispatcher that fails some actions

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use tempfile::TempDir;

use fryler::outbox::{Dispatch, Outbox, OutboxAction};

/// Fails every action whose text is in `failing`
struct Flaky {
    failing: HashSet<String>,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl Dispatch for Flaky {
    async fn dispatch(&self, action: &OutboxAction) -> Result<()> {
        let OutboxAction::Say { text, .. } = action;
        self.seen.lock().unwrap().push(text.clone());
        if self.failing.contains(text) {
            bail!("speaker unavailable");
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_drain_removes_every_preexisting_file() -> Result<()> {
    let tmp = TempDir::new()?;
    let outbox = Outbox::new(tmp.path().join("outbox"));

    let texts: Vec<String> = (0..8).map(|i| format!("message {}", i)).collect();
    let mut before = Vec::new();
    for text in &texts {
        before.push(outbox.enqueue(&OutboxAction::say(text.clone(), None))?);
    }

    let dispatcher = Flaky {
        failing: texts.iter().step_by(3).cloned().collect(),
        seen: Mutex::new(Vec::new()),
    };
    let report = outbox.drain(&dispatcher).await?;

    assert_eq!(report.dispatched + report.failed, texts.len());
    assert_eq!(report.failed, dispatcher.failing.len());
    for path in &before {
        assert!(!path.exists(), "{} survived the drain", path.display());
    }

    // Each action is attempted exactly once
    let mut seen = dispatcher.seen.lock().unwrap().clone();
    seen.sort();
    let mut expected = texts.clone();
    expected.sort();
    assert_eq!(seen, expected);

    // Nothing left to retry
    let again = outbox.drain(&dispatcher).await?;
    assert_eq!(again.dispatched + again.failed, 0);
    Ok(())
}
