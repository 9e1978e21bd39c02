//! Console: a stdin/stdout command surface over the task registry.

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ConsoleError, Error};
use crate::worker::events::TaskChange;
use crate::worker::registry::{SyncReport, TaskCommand, TaskRegistry};
use crate::worker::state::{Priority, TaskId, WorkloadKind};

const HELP: &str = "\
commands:
  add <name> [priority] [workload]   create a task (defaults: normal cpu_intensive)
  start|pause|resume|stop <id|all>   control one task or every task
  sync                               rendezvous all running and ready tasks
  remove <id>                        stop and remove a task
  list                               show every task
  stats                              show aggregate counts
  help                               show this text
  quit                               stop everything and exit
priorities: lowest below_normal normal above_normal highest
workloads:  cpu_intensive io_intensive mixed burst";

/// Which tasks a command applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    One(TaskId),
    All,
}

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add {
        name: String,
        priority: Priority,
        kind: WorkloadKind,
    },
    Control(TaskCommand, Target),
    Sync,
    Remove(TaskId),
    List,
    Stats,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = ConsoleError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ConsoleError::UnknownCommand(String::new()));
        };
        let verb = verb.to_ascii_lowercase();

        let command = match verb.as_str() {
            "add" => {
                let name = words.next().ok_or_else(|| missing(&verb, "name"))?;
                let priority = match words.next() {
                    Some(word) => word.parse().map_err(|reason| invalid(word, reason))?,
                    None => Priority::Normal,
                };
                let kind = match words.next() {
                    Some(word) => word.parse().map_err(|reason| invalid(word, reason))?,
                    None => WorkloadKind::CpuIntensive,
                };
                Command::Add {
                    name: name.to_string(),
                    priority,
                    kind,
                }
            }
            "start" | "pause" | "resume" | "stop" => {
                let command = match verb.as_str() {
                    "start" => TaskCommand::Start,
                    "pause" => TaskCommand::Pause,
                    "resume" => TaskCommand::Resume,
                    _ => TaskCommand::Stop,
                };
                let target = words.next().ok_or_else(|| missing(&verb, "id|all"))?;
                let target = if target.eq_ignore_ascii_case("all") {
                    Target::All
                } else {
                    Target::One(parse_id(target)?)
                };
                Command::Control(command, target)
            }
            "remove" | "rm" => {
                let id = words.next().ok_or_else(|| missing(&verb, "id"))?;
                Command::Remove(parse_id(id)?)
            }
            "sync" | "synchronize" => Command::Sync,
            "list" | "ls" => Command::List,
            "stats" => Command::Stats,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => return Err(ConsoleError::UnknownCommand(verb)),
        };
        Ok(command)
    }
}

fn missing(command: &str, argument: &str) -> ConsoleError {
    ConsoleError::MissingArgument {
        command: command.to_string(),
        argument: argument.to_string(),
    }
}

fn invalid(value: &str, reason: String) -> ConsoleError {
    ConsoleError::InvalidArgument {
        value: value.to_string(),
        reason,
    }
}

fn parse_id(value: &str) -> Result<TaskId, ConsoleError> {
    value
        .parse::<u64>()
        .map(TaskId)
        .map_err(|e| invalid(value, e.to_string()))
}

/// Parse a comma-separated `name:priority:workload` list into task definitions.
pub fn parse_task_list(
    list: &str,
) -> Result<Vec<(String, Priority, WorkloadKind)>, ConsoleError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let mut parts = entry.split(':');
            let name = parts.next().unwrap_or_default().trim();
            if name.is_empty() {
                return Err(missing("task list", "name"));
            }
            let priority = match parts.next() {
                Some(word) => word.parse().map_err(|reason| invalid(word, reason))?,
                None => Priority::Normal,
            };
            let kind = match parts.next() {
                Some(word) => word.parse().map_err(|reason| invalid(word, reason))?,
                None => WorkloadKind::CpuIntensive,
            };
            Ok((name.to_string(), priority, kind))
        })
        .collect()
}

/// What the console should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Print(String),
    Quit,
}

/// Execute one command against the registry.
pub async fn execute(registry: &TaskRegistry, command: Command) -> Result<Reply, Error> {
    let output = match command {
        Command::Add {
            name,
            priority,
            kind,
        } => {
            let id = registry.add_task(name, priority, kind).await;
            format!("added task {id}")
        }
        Command::Control(command, Target::All) => {
            registry.for_each(command).await;
            format!("{command:?} sent to all tasks")
        }
        Command::Control(command, Target::One(id)) => {
            registry.command(id, command).await?;
            format!("{command:?} sent to task {id}")
        }
        Command::Sync => match registry.synchronize_all().await {
            SyncReport::NothingToSynchronize => "no tasks to synchronize".to_string(),
            SyncReport::Started { participants, .. } => {
                format!("synchronizing {participants} tasks")
            }
        },
        Command::Remove(id) => {
            let snapshot = registry.remove_task(id).await?;
            format!("removed task {} ({})", snapshot.id, snapshot.name)
        }
        Command::List => render_table(registry).await,
        Command::Stats => {
            let summary = registry.summary().await;
            format!("active {} / total {}", summary.active, summary.total)
        }
        Command::Help => HELP.to_string(),
        Command::Quit => return Ok(Reply::Quit),
    };
    Ok(Reply::Print(output))
}

async fn render_table(registry: &TaskRegistry) -> String {
    let snapshots = registry.snapshots().await;
    if snapshots.is_empty() {
        return "no tasks".to_string();
    }

    let mut out = format!(
        "{:>4}  {:<16} {:<13} {:<13} {:<13} {:>5} {:>6}",
        "id", "name", "priority", "workload", "status", "prog", "cpu%"
    );
    for s in snapshots {
        let _ = write!(
            out,
            "\n{:>4}  {:<16} {:<13} {:<13} {:<13} {:>5} {:>6.1}",
            s.id,
            s.name,
            s.priority.to_string(),
            s.workload.to_string(),
            s.status.to_string(),
            s.progress,
            s.cpu_usage
        );
        if let Some(error) = s.error {
            let _ = write!(out, "  ({error})");
        }
    }
    out
}

/// Read commands from stdin until `quit` or EOF.
pub async fn run(registry: Arc<TaskRegistry>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("> ");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            eprint!("> ");
            continue;
        }

        match line.parse::<Command>() {
            Ok(command) => match execute(&registry, command).await {
                Ok(Reply::Print(text)) => println!("{text}"),
                Ok(Reply::Quit) => break,
                Err(e) => eprintln!("error: {e}"),
            },
            Err(e) => eprintln!("error: {e} (try 'help')"),
        }
        eprint!("> ");
    }

    Ok(())
}

/// Log notifications as they arrive.
pub fn spawn_event_logger(registry: &TaskRegistry) -> JoinHandle<()> {
    let mut rx = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match &event.change {
                    TaskChange::Status { status, error } => {
                        info!(task_id = %event.task_id, %status, error = ?error, "Status changed");
                    }
                    TaskChange::Progress { value } => {
                        debug!(task_id = %event.task_id, progress = value, "Progress");
                    }
                    TaskChange::CpuUsage { value } => {
                        debug!(task_id = %event.task_id, cpu_usage = value, "CPU estimate");
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Log active/total counts on a fixed cadence.
pub fn spawn_stats_ticker(registry: Arc<TaskRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let active = registry.active_count().await;
            let total = registry.total_count().await;
            info!(active, total, "Pool statistics");
        }
    })
}
