//! Operator console
//!
//! Local stdin and the online console feed the same [`CommandExecutor`]. It parses each line
//! into a [`ConsoleCommand`] and queues it for the agent loop, so neither reader ever blocks
//! on a long-running command.

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::net::CommandSink;

pub const HELP: &str = "\
Available commands:
  .help     Show this list
  .start    Start the server
  .stop     Send the stop command to the server
  .kill     Kill the server process
  .check    Run the update checks now
  .backup   Run a backup now
  .status   Show agent and server status
  .exit     Stop the agent
Any other line is sent to the server's console.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Start,
    Stop,
    Kill,
    Check,
    Backup,
    Status,
    Exit,
    /// Dot-prefixed line that is not a known command
    Unknown(String),
    /// Plain line for the server's stdin
    Forward(String),
}

impl ConsoleCommand {
    /// `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        if !trimmed.starts_with('.') {
            return Some(ConsoleCommand::Forward(trimmed.to_string()));
        }

        let word = trimmed.split_whitespace().next().unwrap_or(trimmed);
        let command = match word.to_ascii_lowercase().as_str() {
            ".help" | ".h" => ConsoleCommand::Help,
            ".start" => ConsoleCommand::Start,
            ".stop" => ConsoleCommand::Stop,
            ".kill" | ".k" => ConsoleCommand::Kill,
            ".check" | ".c" => ConsoleCommand::Check,
            ".backup" | ".b" => ConsoleCommand::Backup,
            ".status" | ".s" => ConsoleCommand::Status,
            ".exit" | ".e" => ConsoleCommand::Exit,
            _ => ConsoleCommand::Unknown(word.to_string()),
        };
        Some(command)
    }
}

impl fmt::Display for ConsoleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleCommand::Help => f.write_str(".help"),
            ConsoleCommand::Start => f.write_str(".start"),
            ConsoleCommand::Stop => f.write_str(".stop"),
            ConsoleCommand::Kill => f.write_str(".kill"),
            ConsoleCommand::Check => f.write_str(".check"),
            ConsoleCommand::Backup => f.write_str(".backup"),
            ConsoleCommand::Status => f.write_str(".status"),
            ConsoleCommand::Exit => f.write_str(".exit"),
            ConsoleCommand::Unknown(word) => f.write_str(word),
            ConsoleCommand::Forward(line) => f.write_str(line),
        }
    }
}

/// Queues parsed commands for the agent loop
pub struct CommandExecutor {
    commands: mpsc::UnboundedSender<ConsoleCommand>,
}

impl CommandExecutor {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConsoleCommand>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        (Self { commands }, receiver)
    }
}

impl CommandSink for CommandExecutor {
    fn submit(&self, line: String) {
        let Some(command) = ConsoleCommand::parse(&line) else {
            return;
        };
        debug!(%command, "Console command queued");
        if self.commands.send(command).is_err() {
            warn!(line = %line, "Console command dropped, agent loop has stopped");
        }
    }
}

/// Read lines from local stdin until EOF.
pub fn spawn_stdin_reader(sink: Arc<dyn CommandSink>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => sink.submit(line),
                Ok(None) => {
                    debug!("Stdin closed, local console stopped");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "Failed to read from stdin");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse(".help"), Some(ConsoleCommand::Help));
        assert_eq!(ConsoleCommand::parse("  .CHECK "), Some(ConsoleCommand::Check));
        assert_eq!(ConsoleCommand::parse(".backup now"), Some(ConsoleCommand::Backup));
        assert_eq!(
            ConsoleCommand::parse(".frobnicate"),
            Some(ConsoleCommand::Unknown(".frobnicate".to_string()))
        );
        assert_eq!(
            ConsoleCommand::parse("say hello"),
            Some(ConsoleCommand::Forward("say hello".to_string()))
        );
        assert_eq!(ConsoleCommand::parse("   "), None);
    }

    #[tokio::test]
    async fn test_executor_queues_commands() {
        let (executor, mut commands) = CommandExecutor::channel();
        executor.submit(".status".to_string());
        executor.submit(String::new());
        executor.submit("list".to_string());

        assert_eq!(commands.recv().await, Some(ConsoleCommand::Status));
        assert_eq!(commands.recv().await, Some(ConsoleCommand::Forward("list".to_string())));
        drop(executor);
        assert_eq!(commands.recv().await, None);
    }
}
