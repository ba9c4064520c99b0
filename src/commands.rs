// Operator console: reads confirmations and stop requests from a line-based input
// and prints run progress.
use std::sync::OnceLock;

use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{broadcast, mpsc};

use crate::agent_engine::event_bus::{OperatorEvent, RunEvent};
use crate::agent_engine::loop_control::AbortSignal;
use crate::agent_engine::state::LoopState;
use crate::errors::ChartPilotResult;

const HELP: &str = "commands: approve <check-id> | deny <check-id> | stop";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Confirm(OperatorEvent),
    Stop,
}

fn confirm_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(approve|allow|yes|y|deny|reject|no|n)\s+(\S+)\s*$")
            .expect("valid confirmation pattern")
    })
}

fn stop_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^\s*(stop|abort|quit)\s*$").expect("valid stop pattern"))
}

/// `None` for anything that is not a console command.
pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    if stop_pattern().is_match(line) {
        return Some(ConsoleCommand::Stop);
    }

    let caps = confirm_pattern().captures(line)?;
    let verb = caps[1].to_ascii_lowercase();
    let approved = matches!(verb.as_str(), "approve" | "allow" | "yes" | "y");
    Some(ConsoleCommand::Confirm(OperatorEvent::Confirm {
        check_id: caps[2].to_string(),
        approved,
    }))
}

/// Feeds operator input into a run until `stop`, end of input, or the run goes away.
pub async fn run_console<R>(
    reader: R,
    operator_tx: mpsc::Sender<OperatorEvent>,
    abort: AbortSignal,
) -> ChartPilotResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Some(ConsoleCommand::Stop) => {
                tracing::warn!("operator requested stop");
                abort.abort();
                return Ok(());
            }
            Some(ConsoleCommand::Confirm(event)) => {
                tracing::debug!(?event, "operator confirmation");
                if operator_tx.send(event).await.is_err() {
                    tracing::debug!("run no longer accepts confirmations; console exiting");
                    return Ok(());
                }
            }
            None => println!("{HELP}"),
        }
    }
    Ok(())
}

/// Human-readable line for a run event, if it is worth showing.
pub fn render_event(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::ConfirmationRequired { checks, timeout_secs } => {
            let mut out = format!(
                "confirmation required ({} check(s), {timeout_secs}s to answer):",
                checks.len()
            );
            for check in checks {
                out.push_str(&format!("\n  [{}] {}: {}", check.id, check.code, check.message));
            }
            out.push_str(&format!("\n{HELP}"));
            Some(out)
        }
        RunEvent::ActionCompleted {
            turn,
            kind,
            success: false,
            error,
        } => Some(format!(
            "turn {turn}: {kind} failed: {}",
            error.as_deref().unwrap_or("unknown error")
        )),
        RunEvent::ActionCompleted { .. } => None,
        RunEvent::StateChanged { state, turn } => match state {
            LoopState::Running => None,
            LoopState::Succeeded { summary } => Some(format!("succeeded after {turn} turn(s): {summary}")),
            LoopState::Failed { reason } => Some(format!("failed after {turn} turn(s): {reason}")),
            LoopState::Aborted { reason } => Some(format!("aborted after {turn} turn(s): {reason}")),
        },
    }
}

pub async fn print_events(mut rx: broadcast::Receiver<RunEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = render_event(&event) {
                    println!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "console fell behind run events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
