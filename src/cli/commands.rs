// Subcommand handlers

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::chat::run_chat;
use super::{Cli, Command, MemoryCommand, OutboxCommand, TaskCommand};
use crate::config::Config;
use crate::conversation::TurnOptions;
use crate::daemon::{self, DaemonLifecycle, Services, StopOutcome};
use crate::heartbeat::TickOutcome;
use crate::markers::parse_timestamp;
use crate::outbox::{self, Outbox, SpeechDispatcher, WatchOptions};
use crate::store::{Memory, NewTask, Session, Store, Task};

/// Source tag for memories entered by hand
const CLI_SOURCE: &str = "cli";

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Command::Daemon => daemon::run(config).await,
        Command::Stop => cmd_stop(&config),
        Command::Status => cmd_status(&config).await,
        Command::Tick => cmd_tick(&config).await,
        Command::Ask {
            prompt,
            resume,
            continue_last,
            model,
        } => {
            let options = TurnOptions {
                title: "ask".to_string(),
                resume,
                continue_last,
                model,
            };
            cmd_ask(&config, &prompt.join(" "), options).await
        }
        Command::Chat { resume, model } => {
            let services = Services::open(&config)?;
            run_chat(&services.conversation(), resume, model).await
        }
        Command::Task(command) => cmd_task(&config, command).await,
        Command::Memory(command) => cmd_memory(&config, command).await,
        Command::Sessions { limit } => cmd_sessions(&config, limit).await,
        Command::Outbox(command) => cmd_outbox(&config, command).await,
    }
}

fn cmd_stop(config: &Config) -> Result<()> {
    match DaemonLifecycle::new(config.pid_path()).stop_daemon()? {
        StopOutcome::NotRunning => println!("Daemon is not running"),
        StopOutcome::Stopped(pid) => println!("Stopped daemon (pid {})", pid),
        StopOutcome::Killed(pid) => println!("Killed daemon (pid {}) after it ignored SIGTERM", pid),
    }
    Ok(())
}

async fn cmd_status(config: &Config) -> Result<()> {
    let lifecycle = DaemonLifecycle::new(config.pid_path());
    match lifecycle.running_pid() {
        Some(pid) => println!("Daemon:    running (pid {})", pid),
        None => println!("Daemon:    stopped"),
    }
    println!("Data dir:  {}", config.data_dir().display());
    if config.heartbeat.enabled {
        println!("Heartbeat: every {}s", config.heartbeat.interval_secs);
    } else {
        println!("Heartbeat: disabled");
    }

    let store = Store::open(&config.db_path())?;
    let counts = store.count_by_status().await?;
    println!(
        "Tasks:     {} ({} pending, {} active, {} completed, {} failed)",
        counts.total(),
        counts.pending, counts.active, counts.completed, counts.failed
    );
    println!("Memories:  {}", store.count_memories().await?);

    let queued = Outbox::new(config.outbox_dir()).pending_files()?.len();
    println!("Outbox:    {} queued", queued);
    Ok(())
}

async fn cmd_tick(config: &Config) -> Result<()> {
    let services = Services::open(config)?;
    match services.heartbeat(config).tick().await? {
        TickOutcome::Skipped => println!("Tick skipped"),
        TickOutcome::Ran(report) => {
            if report.completed.is_empty() && report.failed.is_empty() {
                println!("No due tasks");
            } else {
                println!(
                    "Completed: {:?}  Failed: {:?}",
                    report.completed, report.failed
                );
            }
        }
    }
    Ok(())
}

async fn cmd_ask(config: &Config, prompt: &str, options: TurnOptions) -> Result<()> {
    let services = Services::open(config)?;
    let outcome = services
        .conversation()
        .turn(prompt, &options, |text| println!("{}", text))
        .await?;

    if let Some(session_id) = outcome.session_id {
        eprintln!("\nsession: {}", session_id);
    }
    Ok(())
}

async fn cmd_task(config: &Config, command: TaskCommand) -> Result<()> {
    let store = Store::open(&config.db_path())?;

    match command {
        TaskCommand::Add {
            title,
            description,
            priority,
            at,
            cwd,
        } => {
            let mut task = NewTask::new(title).with_priority(priority);
            if let Some(description) = description {
                task = task.with_description(description);
            }
            if let Some(at) = at {
                let when = parse_timestamp(&at)
                    .with_context(|| format!("Unrecognised time '{}'", at))?;
                task = task.scheduled_at(when);
            }
            if let Some(cwd) = cwd {
                task = task.with_cwd(cwd);
            }
            let task = store.create_task(task).await?;
            println!("Created task #{}", task.id);
        }
        TaskCommand::List { status } => {
            let tasks = store.list_tasks(status).await?;
            if tasks.is_empty() {
                println!("No tasks");
            }
            for task in &tasks {
                println!("{}", format_task_line(task));
            }
        }
        TaskCommand::Show { id } => {
            let task = store
                .get_task(id)
                .await?
                .with_context(|| format!("No task #{}", id))?;
            println!("{}", format_task_detail(&task));
        }
        TaskCommand::Cancel { id } => {
            if store.cancel_task(id).await? {
                println!("Cancelled task #{}", id);
            } else {
                bail!("Task #{} is not pending", id);
            }
        }
    }
    Ok(())
}

async fn cmd_memory(config: &Config, command: MemoryCommand) -> Result<()> {
    match command {
        MemoryCommand::Add { category, content } => {
            let services = Services::open(config)?;
            let memory = services
                .store
                .create_memory(&category, &content.join(" "), Some(CLI_SOURCE))
                .await?;
            services
                .identity
                .append_memory(&format!("**{}**: {}", memory.category, memory.content))?;
            println!("Stored memory #{}", memory.id);
        }
        MemoryCommand::List { category, limit } => {
            let store = Store::open(&config.db_path())?;
            print_memories(&store.list_memories(category.as_deref(), limit).await?);
        }
        MemoryCommand::Search { query, limit } => {
            let store = Store::open(&config.db_path())?;
            print_memories(&store.search_memories(&query, limit).await?);
        }
    }
    Ok(())
}

async fn cmd_sessions(config: &Config, limit: usize) -> Result<()> {
    let store = Store::open(&config.db_path())?;
    let sessions = store.list_sessions(limit).await?;
    if sessions.is_empty() {
        println!("No sessions");
    }
    for session in &sessions {
        println!("{}", format_session_line(session));
    }
    Ok(())
}

async fn cmd_outbox(config: &Config, command: OutboxCommand) -> Result<()> {
    let outbox = Outbox::new(config.outbox_dir());
    let dispatcher = Arc::new(SpeechDispatcher::from_settings(&config.speech));

    match command {
        OutboxCommand::Drain => {
            let report = outbox.drain(dispatcher.as_ref()).await?;
            println!(
                "Dispatched {}, failed {}",
                report.dispatched, report.failed
            );
        }
        OutboxCommand::Watch => {
            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                on_ctrl_c.cancel();
            });
            println!("Watching {} (Ctrl-C to stop)", outbox.dir().display());
            let summary =
                outbox::watch(outbox, dispatcher, WatchOptions::from_config(config), cancel).await?;
            println!(
                "Dispatched {}, failed {} over {} drain(s)",
                summary.dispatched, summary.failed, summary.drains
            );
        }
    }
    Ok(())
}

fn local_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn format_task_line(task: &Task) -> String {
    let mut line = format!(
        "#{:<4} {:<9} p{}  {}",
        task.id,
        task.status.as_str(),
        task.priority,
        task.title
    );
    if let Some(at) = &task.scheduled_at {
        line.push_str(&format!("  (at {})", local_time(at)));
    }
    line
}

fn format_task_detail(task: &Task) -> String {
    let mut out = format!(
        "Task #{}: {}\nStatus:   {}\nPriority: {}\nCreated:  {}\n",
        task.id,
        task.title,
        task.status,
        task.priority,
        local_time(&task.created_at)
    );
    if let Some(at) = &task.scheduled_at {
        out.push_str(&format!("Due:      {}\n", local_time(at)));
    }
    if let Some(cwd) = &task.cwd {
        out.push_str(&format!("Cwd:      {}\n", cwd));
    }
    if let Some(done) = &task.completed_at {
        out.push_str(&format!("Finished: {}\n", local_time(done)));
    }
    if !task.description.is_empty() {
        out.push_str(&format!("\n{}\n", task.description));
    }
    if let Some(result) = &task.result {
        out.push_str(&format!("\nResult:\n{}\n", result));
    }
    out
}

fn print_memories(memories: &[Memory]) {
    if memories.is_empty() {
        println!("No memories");
    }
    for memory in memories {
        println!(
            "#{:<4} [{}] {}  ({})",
            memory.id,
            memory.category,
            memory.content,
            local_time(&memory.created_at)
        );
    }
}

fn format_session_line(session: &Session) -> String {
    format!(
        "{}  {:<5} {:>3} msgs  last active {}",
        session.id,
        session.title.as_deref().unwrap_or("-"),
        session.message_count,
        local_time(&session.last_active)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TaskStatus;

    fn sample_task() -> Task {
        Task {
            id: 7,
            title: "Check weather".into(),
            description: String::new(),
            status: TaskStatus::Completed,
            priority: 2,
            scheduled_at: None,
            cwd: Some("/tmp".into()),
            result: Some("Sunny".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_task_line() {
        let line = format_task_line(&sample_task());
        assert!(line.starts_with("#7"));
        assert!(line.contains("completed"));
        assert!(line.contains("p2"));
        assert!(line.ends_with("Check weather"));
    }

    #[test]
    fn test_task_detail_includes_result() {
        let detail = format_task_detail(&sample_task());
        assert!(detail.contains("Status:   completed"));
        assert!(detail.contains("Cwd:      /tmp"));
        assert!(detail.contains("Result:\nSunny"));
    }
}
