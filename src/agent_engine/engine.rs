use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, mpsc};

use crate::agent_engine::display_lease::DisplayLease;
use crate::agent_engine::event_bus::{EventBus, OperatorEvent, RunEvent};
use crate::agent_engine::history::{RunTranscript, TranscriptKind};
use crate::agent_engine::loop_control::{AbortSignal, LoopController};
use crate::agent_engine::state::{
    ExecutionResult, ExecutionStatus, LoopState, PendingSafetyCheck, Proposal, RunReport, Session,
};
use crate::config::{AppConfig, SafetyConfig, SettleConfig};
use crate::errors::{ChartPilotError, ChartPilotResult};
use crate::executor::dispatcher::ActuationPort;
use crate::executor::safety::{AuthorizationResult, SafetyGate};
use crate::llm::provider::DecisionService;
use crate::perception::stability::capture_settled;
use crate::perception::traits::PerceptionPort;
use crate::perception::types::PerceptionPayload;

/// The three collaborators a run drives.
pub struct AutomationPorts {
    pub perception: Arc<dyn PerceptionPort>,
    pub actuation: Arc<dyn ActuationPort>,
    pub decision: Arc<dyn DecisionService>,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub display_id: String,
    pub max_iterations: u32,
    pub confirmation_timeout: Duration,
    pub safety: SafetyConfig,
    pub settle: SettleConfig,
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            display_id: config.display.id.clone(),
            max_iterations: config.run.max_iterations,
            confirmation_timeout: Duration::from_secs(config.run.confirmation_timeout_secs),
            safety: config.safety.clone(),
            settle: config.settle.clone(),
        }
    }
}

enum ActOutcome {
    Completed(ExecutionResult),
    /// An action failed; carries its status and how many actions ran before it.
    Interrupted(ExecutionResult),
    Cancelled,
}

/// One supervised run: perceive, propose, authorize, act, report, until a terminal
/// state. Owns its display for as long as it is `Running`.
pub struct AutomationLoop {
    perception: Arc<dyn PerceptionPort>,
    actuation: Arc<dyn ActuationPort>,
    decision: Arc<dyn DecisionService>,
    gate: SafetyGate,
    bus: EventBus,
    abort: AbortSignal,
    loop_ctrl: LoopController,
    transcript: RunTranscript,
    settle: SettleConfig,
    lease: Option<DisplayLease>,

    // ── Session context (dropped with the run) ────────────────────────────
    session: Option<Session>,
    /// Capture taken after the last turn's actions; perception for the next turn.
    fresh_payload: Option<PerceptionPayload>,
}

impl AutomationLoop {
    /// Fails with `DisplayBusy` when another run already owns the display.
    pub fn new(
        settings: LoopSettings,
        ports: AutomationPorts,
        bus: EventBus,
        abort: AbortSignal,
    ) -> ChartPilotResult<Self> {
        let lease = DisplayLease::acquire(&settings.display_id)?;
        let transcript = RunTranscript::new();
        let bounds = ports.actuation.bounds();

        tracing::info!(
            run_id = %transcript.run_id,
            display = %settings.display_id,
            width = bounds.width,
            height = bounds.height,
            service = ports.decision.name(),
            max_iterations = settings.max_iterations,
            "automation run created"
        );

        Ok(Self {
            perception: ports.perception,
            actuation: ports.actuation,
            decision: ports.decision,
            gate: SafetyGate::new(&settings.safety, settings.confirmation_timeout),
            bus,
            abort,
            loop_ctrl: LoopController::new(settings.max_iterations),
            transcript,
            settle: settings.settle,
            lease: Some(lease),
            session: None,
            fresh_payload: None,
        })
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.bus.subscribe()
    }

    pub fn operator_sender(&self) -> mpsc::Sender<OperatorEvent> {
        self.bus.operator_sender()
    }

    pub fn state(&self) -> &LoopState {
        &self.loop_ctrl.state().outcome
    }

    pub fn turn_count(&self) -> u32 {
        self.loop_ctrl.turn_count()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Drives the run to a terminal state and hands back its report.
    pub async fn run(mut self) -> RunReport {
        let _ = self.bus.send(RunEvent::StateChanged {
            state: LoopState::Running,
            turn: 0,
        });

        loop {
            if self.step().await.is_terminal() {
                break;
            }
        }

        let outcome = self.loop_ctrl.state().outcome.clone();
        let turn_count = self.loop_ctrl.turn_count();
        let session_id = self.session.as_ref().map(|s| s.session_id.clone());
        RunReport {
            run_id: self.transcript.run_id.clone(),
            outcome,
            turn_count,
            session_id,
            transcript: self.transcript.into_entries(),
        }
    }

    /// Runs a single iteration and returns the state it left the run in.
    pub async fn step(&mut self) -> LoopState {
        if self.loop_ctrl.is_terminal() {
            return self.state().clone();
        }
        let turn = self.loop_ctrl.turn_count();

        if self.abort.is_aborted() {
            return self.cancel();
        }
        if let Err(e) = self.loop_ctrl.check_budget() {
            tracing::warn!(turn, error = %e, "stopping run");
            return self.finish(LoopState::failed(&e));
        }

        // ── Perceive ──────────────────────────────────────────────────────────
        let payload = match self.fresh_payload.take() {
            Some(payload) => payload,
            None => match self.capture().await {
                Ok(payload) => payload,
                Err(ChartPilotError::Cancelled) => return self.cancel(),
                Err(e) => {
                    tracing::error!(turn, error = %e, "capture failed");
                    return self.finish(LoopState::aborted(&e));
                }
            },
        };
        if self.abort.is_aborted() {
            return self.cancel();
        }

        // ── Propose ───────────────────────────────────────────────────────────
        let proposal = match self.decision.propose(&payload, self.session.as_mut()).await {
            Ok(proposal) => proposal,
            Err(e) => {
                tracing::error!(turn, error = %e, "decision service gave no usable proposal");
                return self.finish(LoopState::failed(&e));
            }
        };
        if self.session.is_none() {
            self.session = Some(Session::start(&proposal));
        }
        tracing::info!(
            turn,
            exchange_id = %proposal.exchange_id,
            actions = ?proposal.actions.iter().map(|a| a.kind()).collect::<Vec<_>>(),
            safety_checks = proposal.safety_checks.len(),
            "proposal received"
        );
        self.transcript.record(
            turn,
            TranscriptKind::Proposal,
            json!({
                "exchange_id": &proposal.exchange_id,
                "actions": &proposal.actions,
                "safety_checks": &proposal.safety_checks,
                "message": &proposal.message,
                "reasoning": &proposal.reasoning,
            }),
        );
        if self.abort.is_aborted() {
            return self.cancel();
        }

        if proposal.is_complete() {
            let summary = proposal
                .message
                .clone()
                .unwrap_or_else(|| "decision service reported the task complete".into());
            return self.finish(LoopState::Succeeded { summary });
        }

        // ── Authorize ─────────────────────────────────────────────────────────
        let acknowledged = match self.authorize(turn, &proposal).await {
            Ok(acknowledged) => acknowledged,
            Err(state) => return self.finish(state),
        };

        let Some(call_id) = proposal.call_id.clone() else {
            let e = ChartPilotError::MalformedResponse("proposal has actions but no call id".into());
            return self.finish(LoopState::failed(&e));
        };

        // ── Act ───────────────────────────────────────────────────────────────
        let (result, failure) = match self.act(turn, &proposal).await {
            ActOutcome::Cancelled => return self.cancel(),
            ActOutcome::Completed(result) => (result, None),
            ActOutcome::Interrupted(result) => {
                let reason = match &result.status {
                    ExecutionStatus::Rejected { reason } | ExecutionStatus::Error { reason } => reason.clone(),
                    ExecutionStatus::Ok => "action failed".to_string(),
                };
                (result, Some(reason))
            }
        };

        // ── Observe ───────────────────────────────────────────────────────────
        let observed = match self.capture().await {
            Ok(observed) => observed,
            Err(ChartPilotError::Cancelled) => return self.cancel(),
            Err(e) if failure.is_some() => {
                tracing::warn!(turn, error = %e, "capture after failed action failed; reporting last frame");
                payload
            }
            Err(e) => {
                tracing::error!(turn, error = %e, "capture after actions failed");
                return self.finish(LoopState::aborted(&e));
            }
        };
        let result = result.with_payload(observed.clone());

        // ── Report ────────────────────────────────────────────────────────────
        let report = match self.session.as_ref() {
            Some(session) => {
                self.decision
                    .report(session, &call_id, &result, &acknowledged)
                    .await
            }
            None => Err(ChartPilotError::MalformedResponse("no session to report into".into())),
        };
        self.transcript.record(
            turn,
            TranscriptKind::Report,
            json!({
                "call_id": &call_id,
                "result": &result,
                "delivered": report.is_ok(),
            }),
        );

        if let Some(reason) = failure {
            match report {
                Ok(next) => self.session = Some(next),
                Err(e) => tracing::warn!(turn, error = %e, "partial result could not be reported"),
            }
            return self.finish(LoopState::Failed { reason });
        }

        match report {
            Ok(next) => self.session = Some(next),
            Err(e) => {
                tracing::error!(turn, error = %e, "execution report failed");
                return self.finish(LoopState::failed(&e));
            }
        }

        self.fresh_payload = Some(observed);
        self.loop_ctrl.record_turn();
        if self.abort.is_aborted() {
            return self.cancel();
        }

        let turn_count = self.loop_ctrl.turn_count();
        tracing::info!(turn = turn_count, "turn complete");
        let _ = self.bus.send(RunEvent::StateChanged {
            state: LoopState::Running,
            turn: turn_count,
        });
        LoopState::Running
    }

    async fn capture(&self) -> ChartPilotResult<PerceptionPayload> {
        let payload = capture_settled(self.perception.as_ref(), &self.settle, &self.abort).await?;
        let bounds = self.actuation.bounds();
        let (width, height) = (payload.meta.physical_width, payload.meta.physical_height);
        // proposed coordinates are in frame pixels and validated against the actuator's bounds
        if (width, height) != (bounds.width, bounds.height) {
            return Err(ChartPilotError::Config(format!(
                "captured frame is {width}x{height} but the display is configured as {}x{}",
                bounds.width, bounds.height
            )));
        }
        Ok(payload)
    }

    /// Returns the checks to acknowledge, or the terminal state the gate forced.
    async fn authorize(&mut self, turn: u32, proposal: &Proposal) -> Result<Vec<PendingSafetyCheck>, LoopState> {
        let decision = match self.gate.authorize(&proposal.safety_checks) {
            AuthorizationResult::Pending { checks } => {
                tracing::info!(
                    turn,
                    pending = ?checks.iter().map(|c| c.code.as_str()).collect::<Vec<_>>(),
                    "waiting for operator confirmation"
                );
                let abort = self.abort.clone();
                let confirmed = tokio::select! {
                    biased;
                    _ = abort.cancelled() => None,
                    result = self.gate.await_confirmation(checks, &mut self.bus) => Some(result),
                };
                match confirmed {
                    Some(result) => result,
                    None => return Err(LoopState::aborted(&ChartPilotError::Cancelled)),
                }
            }
            other => other,
        };

        self.transcript.record(
            turn,
            TranscriptKind::Authorization,
            serde_json::to_value(&decision).unwrap_or_default(),
        );
        if self.abort.is_aborted() {
            return Err(LoopState::aborted(&ChartPilotError::Cancelled));
        }

        match decision {
            AuthorizationResult::AllAuthorized => Ok(proposal.safety_checks.clone()),
            AuthorizationResult::Rejected { reason } => {
                Err(LoopState::failed(&ChartPilotError::SafetyRejected(reason)))
            }
            AuthorizationResult::Pending { checks } => Err(LoopState::failed(&ChartPilotError::SafetyRejected(
                format!("{} safety checks left unresolved", checks.len()),
            ))),
        }
    }

    /// Executes the proposal's actions in order, stopping at the first failure.
    async fn act(&mut self, turn: u32, proposal: &Proposal) -> ActOutcome {
        let mut executed = 0;
        for action in &proposal.actions {
            if self.abort.is_aborted() {
                return ActOutcome::Cancelled;
            }

            let result = self.actuation.execute(action).await;
            let error = match &result.status {
                ExecutionStatus::Ok => None,
                ExecutionStatus::Rejected { reason } | ExecutionStatus::Error { reason } => Some(reason.clone()),
            };
            let _ = self.bus.send(RunEvent::ActionCompleted {
                turn,
                kind: action.kind().to_string(),
                success: error.is_none(),
                error: error.clone(),
            });
            self.transcript.record(
                turn,
                TranscriptKind::Action,
                json!({ "action": action, "status": &result.status }),
            );

            if !result.is_ok() {
                tracing::warn!(
                    turn,
                    action = action.kind(),
                    executed,
                    skipped = proposal.actions.len() - executed - 1,
                    "action failed; skipping the rest of the proposal"
                );
                return ActOutcome::Interrupted(result.with_executed(executed));
            }
            executed += result.actions_executed;
        }

        if self.abort.is_aborted() {
            return ActOutcome::Cancelled;
        }
        ActOutcome::Completed(ExecutionResult::ok(executed))
    }

    fn cancel(&mut self) -> LoopState {
        self.finish(LoopState::aborted(&ChartPilotError::Cancelled))
    }

    fn finish(&mut self, outcome: LoopState) -> LoopState {
        let turn = self.loop_ctrl.turn_count();
        self.loop_ctrl.finish(outcome.clone());
        self.transcript
            .record(turn, TranscriptKind::Outcome, serde_json::to_value(&outcome).unwrap_or_default());
        let _ = self.bus.send(RunEvent::StateChanged {
            state: outcome.clone(),
            turn,
        });
        self.fresh_payload = None;
        self.lease = None;
        outcome
    }
}
