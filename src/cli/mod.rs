// Command-line interface

mod chat;
mod commands;

pub use chat::ChatCommand;
pub use commands::run;

use clap::{Parser, Subcommand};

use crate::store::TaskStatus;

#[derive(Parser, Debug)]
#[command(
    name = "fryler",
    version,
    about = "Personal assistant daemon that works through scheduled tasks with claude"
)]
pub struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the daemon in the foreground
    Daemon,
    /// Stop a running daemon
    Stop,
    /// Show daemon state and store counts
    Status,
    /// Run one heartbeat tick now
    Tick,
    /// Ask a single question
    Ask {
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
        /// Resume a session by id
        #[arg(long)]
        resume: Option<String>,
        /// Continue the most recent session
        #[arg(short = 'c', long = "continue", conflicts_with = "resume")]
        continue_last: bool,
        #[arg(long)]
        model: Option<String>,
    },
    /// Interactive conversation
    Chat {
        /// Resume a session by id
        #[arg(long)]
        resume: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommand),
    /// Manage memories
    #[command(subcommand)]
    Memory(MemoryCommand),
    /// List recent conversation sessions
    Sessions {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Process queued side effects on this machine
    #[command(subcommand)]
    Outbox(OutboxCommand),
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// Schedule a task
    Add {
        title: String,
        /// Prompt sent to claude (defaults to the title)
        #[arg(short, long)]
        description: Option<String>,
        /// 1 (most urgent) to 5
        #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=5))]
        priority: u8,
        /// When to run: RFC 3339 or local "YYYY-MM-DD HH:MM"
        #[arg(long)]
        at: Option<String>,
        /// Working directory for the run
        #[arg(long)]
        cwd: Option<String>,
    },
    /// List tasks
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    /// Show one task with its result
    Show { id: i64 },
    /// Cancel a pending task
    Cancel { id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum MemoryCommand {
    /// Record a memory
    Add {
        category: String,
        #[arg(required = true, trailing_var_arg = true)]
        content: Vec<String>,
    },
    /// List memories, newest first
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Search memory content and categories
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum OutboxCommand {
    /// Dispatch everything queued, then exit
    Drain,
    /// Keep dispatching until Ctrl-C
    Watch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::parse_from(["fryler", "ask", "--model", "haiku", "hi"]);
        match cli.command {
            Command::Ask { prompt, model, .. } => {
                assert_eq!(prompt, vec!["hi"]);
                assert_eq!(model.as_deref(), Some("haiku"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_task_add_and_list() {
        let cli = Cli::parse_from(["fryler", "task", "add", "Water plants", "-p", "2", "--at", "2026-01-01 09:00"]);
        match cli.command {
            Command::Task(TaskCommand::Add { title, priority, at, .. }) => {
                assert_eq!(title, "Water plants");
                assert_eq!(priority, 2);
                assert_eq!(at.as_deref(), Some("2026-01-01 09:00"));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(Cli::try_parse_from(["fryler", "task", "add", "x", "-p", "9"]).is_err());

        let cli = Cli::parse_from(["fryler", "task", "list", "--status", "failed"]);
        assert!(matches!(
            cli.command,
            Command::Task(TaskCommand::List {
                status: Some(TaskStatus::Failed)
            })
        ));
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::parse_from(["fryler", "status", "-v"]);
        assert!(cli.verbose);
    }
}
