pub mod agent_engine;
pub mod commands;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;

use std::sync::Arc;

use tokio::io::BufReader;

use crate::agent_engine::engine::{AutomationLoop, AutomationPorts, LoopSettings};
use crate::agent_engine::event_bus::EventBus;
use crate::agent_engine::loop_control::AbortSignal;
use crate::agent_engine::state::RunReport;
use crate::errors::{ChartPilotError, ChartPilotResult};
use crate::executor::coordinator::DisplayBounds;
use crate::executor::dispatcher::DesktopActuator;
use crate::executor::input::EnigoDriver;
use crate::llm::providers::responses::ResponsesDecisionService;
use crate::llm::retry::RetryPolicy;
use crate::perception::screenshot::ScreenCapture;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Runs one supervised task on the configured display. `task` overrides `run.task`.
pub async fn run(task: Option<String>) -> ChartPilotResult<RunReport> {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let mut cfg = config::load_config()?;
    if let Some(task) = task.filter(|t| !t.trim().is_empty()) {
        cfg.run.task = task;
    }
    if cfg.run.task.trim().is_empty() {
        return Err(ChartPilotError::Config(
            "no task given: pass it as the first argument or set run.task".into(),
        ));
    }

    let capture = ScreenCapture::for_display(&cfg.display.id)?;
    let (width, height) = match cfg.display.explicit_size() {
        Some(size) => size,
        None => capture.physical_size().await?,
    };
    tracing::info!(display = %cfg.display.id, width, height, "display size resolved");
    let bounds = DisplayBounds::new(width, height);
    let decision = ResponsesDecisionService::new(&cfg.service, &cfg.run.task, bounds, RetryPolicy::from(&cfg.retry))?;
    let ports = AutomationPorts {
        perception: Arc::new(capture),
        actuation: Arc::new(DesktopActuator::new(bounds, Arc::new(EnigoDriver))),
        decision: Arc::new(decision),
    };

    let automation = AutomationLoop::new(
        LoopSettings::from_config(&cfg),
        ports,
        EventBus::new(),
        AbortSignal::new(),
    )?;
    tracing::info!(task = %cfg.run.task, "starting automation run");

    let printer = tokio::spawn(commands::print_events(automation.subscribe()));
    let console = tokio::spawn(commands::run_console(
        BufReader::new(tokio::io::stdin()),
        automation.operator_sender(),
        automation.abort_signal(),
    ));
    let abort = automation.abort_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received");
            abort.abort();
        }
    });

    let report = automation.run().await;
    console.abort();
    // the run's event bus is gone, so the printer drains and exits
    let _ = printer.await;

    tracing::info!(
        run_id = %report.run_id,
        outcome = ?report.outcome,
        turns = report.turn_count,
        transcript_entries = report.transcript.len(),
        "automation run finished"
    );
    Ok(report)
}
