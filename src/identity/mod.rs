// Persona and accumulated knowledge injected into every AI invocation
//
// Two markdown files live in the data directory:
// - SOUL.md: persona instructions, edited by the user
// - MEMORY.md: append-only narrative of what the assistant has learned

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PERSONA_FILE: &str = "SOUL.md";
pub const KNOWLEDGE_FILE: &str = "MEMORY.md";

/// Built-in persona, also documents the marker protocol
pub const DEFAULT_PERSONA: &str = include_str!("default_persona.md");

const KNOWLEDGE_TITLE: &str = "# Memory\n";
const EMPTY_KNOWLEDGE: &str = "(nothing recorded yet)";

#[derive(Debug, Clone)]
pub struct Identity {
    persona_path: PathBuf,
    knowledge_path: PathBuf,
}

impl Identity {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            persona_path: data_dir.join(PERSONA_FILE),
            knowledge_path: data_dir.join(KNOWLEDGE_FILE),
        }
    }

    pub fn persona_path(&self) -> &Path {
        &self.persona_path
    }

    pub fn knowledge_path(&self) -> &Path {
        &self.knowledge_path
    }

    /// Persona text, falling back to the built-in default
    pub fn persona(&self) -> String {
        read_non_empty(&self.persona_path)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_PERSONA.trim().to_string())
    }

    /// Knowledge narrative, if any has been recorded
    pub fn knowledge(&self) -> Option<String> {
        read_non_empty(&self.knowledge_path).map(|s| s.trim().to_string())
    }

    /// Combined persona + knowledge block for the system prompt
    pub fn identity_context(&self) -> String {
        let knowledge = self
            .knowledge()
            .unwrap_or_else(|| EMPTY_KNOWLEDGE.to_string());
        format!(
            "# Identity\n\n{}\n\n# Knowledge\n\n{}",
            self.persona(),
            knowledge
        )
    }

    /// Append a timestamped entry to MEMORY.md
    pub fn append_memory(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.knowledge_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let is_new = fs::metadata(&self.knowledge_path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.knowledge_path)
            .with_context(|| format!("Failed to open {}", self.knowledge_path.display()))?;

        if is_new {
            file.write_all(KNOWLEDGE_TITLE.as_bytes())?;
        }
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M");
        write!(file, "\n## {}\n\n{}\n", stamp, text)
            .with_context(|| format!("Failed to append to {}", self.knowledge_path.display()))?;

        debug!("Appended memory to {}", self.knowledge_path.display());
        Ok(())
    }

    /// Create SOUL.md and MEMORY.md if they do not exist yet
    pub fn ensure_files(&self) -> Result<()> {
        if let Some(parent) = self.persona_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        if !self.persona_path.exists() {
            fs::write(&self.persona_path, DEFAULT_PERSONA)
                .with_context(|| format!("Failed to write {}", self.persona_path.display()))?;
            info!("Created default persona at {}", self.persona_path.display());
        }
        if !self.knowledge_path.exists() {
            fs::write(&self.knowledge_path, "")
                .with_context(|| format!("Failed to write {}", self.knowledge_path.display()))?;
        }
        Ok(())
    }
}

/// Read a file and return its contents if non-empty, otherwise `None`.
fn read_non_empty(path: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => Some(content),
        Ok(_) => None,
        Err(e) => {
            debug!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_context_uses_defaults_when_files_missing() {
        let tmp = TempDir::new().unwrap();
        let identity = Identity::new(tmp.path());
        let context = identity.identity_context();

        assert!(context.starts_with("# Identity\n\n"));
        assert!(context.contains("FRYLER_TASK"));
        assert!(context.ends_with("# Knowledge\n\n(nothing recorded yet)"));
    }

    #[test]
    fn test_context_uses_files_when_present() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(PERSONA_FILE), "Be terse.\n").unwrap();
        fs::write(tmp.path().join(KNOWLEDGE_FILE), "User likes tea.\n").unwrap();

        let identity = Identity::new(tmp.path());
        assert_eq!(
            identity.identity_context(),
            "# Identity\n\nBe terse.\n\n# Knowledge\n\nUser likes tea."
        );
    }

    #[test]
    fn test_blank_persona_falls_back_to_default() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(PERSONA_FILE), "  \n").unwrap();
        let identity = Identity::new(tmp.path());
        assert_eq!(identity.persona(), DEFAULT_PERSONA.trim());
    }

    #[test]
    fn test_append_memory_creates_and_appends() {
        let tmp = TempDir::new().unwrap();
        let identity = Identity::new(&tmp.path().join("nested"));

        identity.append_memory("Prefers metric units").unwrap();
        identity.append_memory("Has a cat named Miso").unwrap();
        identity.append_memory("   ").unwrap();

        let content = fs::read_to_string(identity.knowledge_path()).unwrap();
        assert!(content.starts_with("# Memory\n"));
        assert_eq!(content.matches("\n## ").count(), 2);
        let first = content.find("Prefers metric units").unwrap();
        let second = content.find("Has a cat named Miso").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_ensure_files_does_not_overwrite() {
        let tmp = TempDir::new().unwrap();
        let identity = Identity::new(tmp.path());
        identity.ensure_files().unwrap();
        assert!(identity.persona_path().exists());
        assert!(identity.knowledge_path().exists());

        fs::write(identity.persona_path(), "Custom").unwrap();
        identity.ensure_files().unwrap();
        assert_eq!(fs::read_to_string(identity.persona_path()).unwrap(), "Custom");
        assert!(identity
            .identity_context()
            .ends_with("(nothing recorded yet)"));

        identity.append_memory("Works nights").unwrap();
        let content = fs::read_to_string(identity.knowledge_path()).unwrap();
        assert!(content.starts_with("# Memory\n"));
    }
}
