// Interactive chat loop with slash commands

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::conversation::{Conversation, TurnOptions};

const PROMPT: &str = "you> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommand {
    Help,
    Quit,
    Session,
    New,
}

impl ChatCommand {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "/help" => Some(ChatCommand::Help),
            "/quit" | "/exit" => Some(ChatCommand::Quit),
            "/session" => Some(ChatCommand::Session),
            "/new" => Some(ChatCommand::New),
            _ => None,
        }
    }
}

fn format_help() -> &'static str {
    r#"Available commands:
  /help      - Show this help message
  /session   - Show the current session id
  /new       - Start a fresh session
  /quit      - Exit the chat

Anything else is sent to fryler."#
}

/// Read-eval loop; every turn resumes the session of the previous one
pub async fn run_chat(
    conversation: &Conversation,
    resume: Option<String>,
    model: Option<String>,
) -> Result<()> {
    let mut editor = DefaultEditor::new().context("Failed to initialise line editor")?;
    let mut session = resume;

    println!("fryler chat. Type /help for commands.\n");

    loop {
        let line = match editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("Failed to read input"),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(input);

        match ChatCommand::parse(input) {
            Some(ChatCommand::Quit) => break,
            Some(ChatCommand::Help) => {
                println!("{}\n", format_help());
                continue;
            }
            Some(ChatCommand::Session) => {
                println!("{}\n", session.as_deref().unwrap_or("(no session yet)"));
                continue;
            }
            Some(ChatCommand::New) => {
                session = None;
                println!("Started a new session.\n");
                continue;
            }
            None => {}
        }

        let options = TurnOptions {
            title: "chat".to_string(),
            resume: session.clone(),
            continue_last: false,
            model: model.clone(),
        };

        match conversation
            .turn(input, &options, |text| println!("{}\n", text))
            .await
        {
            Ok(outcome) => {
                if outcome.session_id.is_some() {
                    session = outcome.session_id;
                }
                let applied = &outcome.applied;
                if !applied.is_empty() {
                    eprintln!(
                        "[{} memory, {} task, {} say]",
                        applied.memories.len(),
                        applied.tasks.len(),
                        applied.says
                    );
                }
            }
            Err(e) => eprintln!("Error: {:#}\n", e),
        }
    }

    println!("Goodbye!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ChatCommand::parse("/help"), Some(ChatCommand::Help));
        assert_eq!(ChatCommand::parse(" /exit "), Some(ChatCommand::Quit));
        assert_eq!(ChatCommand::parse("/quit"), Some(ChatCommand::Quit));
        assert_eq!(ChatCommand::parse("/session"), Some(ChatCommand::Session));
        assert_eq!(ChatCommand::parse("/new"), Some(ChatCommand::New));
        assert_eq!(ChatCommand::parse("/unknown"), None);
        assert_eq!(ChatCommand::parse("hello"), None);
    }
}
