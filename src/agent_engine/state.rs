use serde::{Deserialize, Serialize};

use crate::agent_engine::history::TranscriptEntry;
use crate::errors::{ChartPilotError, ChartPilotResult};
use crate::perception::types::PerceptionPayload;

/// Lifecycle of one automation run. Everything but `Running` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    Running,
    Succeeded { summary: String },
    Failed { reason: String },
    Aborted { reason: String },
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoopState::Running)
    }

    pub fn failed(err: &ChartPilotError) -> Self {
        LoopState::Failed {
            reason: err.to_string(),
        }
    }

    pub fn aborted(err: &ChartPilotError) -> Self {
        LoopState::Aborted {
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
    Wheel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl From<(i64, i64)> for Point {
    fn from((x, y): (i64, i64)) -> Self {
        Point { x, y }
    }
}

/// One input action as proposed by the decision service. Coordinates are untrusted
/// until the actuation port has checked them against the display bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Move { x: i64, y: i64 },
    Click { button: MouseButton, x: i64, y: i64 },
    DoubleClick { x: i64, y: i64 },
    Drag { path: Vec<Point> },
    TypeText { text: String },
    KeyPress { key: String },
    Hotkey { keys: Vec<String> },
    /// Deltas are in pixels; positive `delta_y` scrolls down.
    Scroll { x: i64, y: i64, delta_x: i64, delta_y: i64 },
    Wait { ms: u64 },
    Screenshot,
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Move { .. } => "move",
            Action::Click { .. } => "click",
            Action::DoubleClick { .. } => "double_click",
            Action::Drag { .. } => "drag",
            Action::TypeText { .. } => "type_text",
            Action::KeyPress { .. } => "key_press",
            Action::Hotkey { .. } => "hotkey",
            Action::Scroll { .. } => "scroll",
            Action::Wait { .. } => "wait",
            Action::Screenshot => "screenshot",
        }
    }

    /// Every screen coordinate the action would touch.
    pub fn points(&self) -> Vec<Point> {
        match self {
            Action::Move { x, y }
            | Action::Click { x, y, .. }
            | Action::DoubleClick { x, y }
            | Action::Scroll { x, y, .. } => vec![Point { x: *x, y: *y }],
            Action::Drag { path } => path.clone(),
            _ => Vec::new(),
        }
    }
}

/// A condition the service flagged on the upcoming action. Lives only between
/// proposal and authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSafetyCheck {
    pub id: String,
    pub code: String,
    pub message: String,
}

/// The service's answer to one perception payload. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Service-assigned id of the response that carried this proposal.
    pub exchange_id: String,
    /// Correlates the eventual execution report; present whenever actions are.
    pub call_id: Option<String>,
    pub actions: Vec<Action>,
    pub safety_checks: Vec<PendingSafetyCheck>,
    /// Assistant text, if the service said anything.
    pub message: Option<String>,
    pub reasoning: Option<String>,
}

impl Proposal {
    /// No actions and no checks: the service considers the task done.
    pub fn is_complete(&self) -> bool {
        self.actions.is_empty() && self.safety_checks.is_empty()
    }
}

/// Chain of exchanges with the decision service for a single run. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub last_exchange_id: String,
    pub turn_count: u32,
    previous_exchange_ids: Vec<String>,
    /// Next proposal, when the service already answered inside a report exchange.
    #[serde(skip)]
    pending_proposal: Option<Proposal>,
}

impl Session {
    pub fn start(proposal: &Proposal) -> Self {
        Self {
            session_id: proposal.exchange_id.clone(),
            last_exchange_id: proposal.exchange_id.clone(),
            turn_count: 0,
            previous_exchange_ids: Vec::new(),
            pending_proposal: None,
        }
    }

    /// Chains a new exchange. Rejects ids already seen in this session so the chain
    /// can never step back to an earlier turn.
    pub fn advance(&self, exchange_id: &str, next: Option<Proposal>) -> ChartPilotResult<Session> {
        if exchange_id.is_empty()
            || exchange_id == self.last_exchange_id
            || self.previous_exchange_ids.iter().any(|id| id == exchange_id)
        {
            return Err(ChartPilotError::MalformedResponse(format!(
                "exchange id '{exchange_id}' does not advance session {}",
                self.session_id
            )));
        }

        let mut previous = self.previous_exchange_ids.clone();
        previous.push(self.last_exchange_id.clone());
        Ok(Session {
            session_id: self.session_id.clone(),
            last_exchange_id: exchange_id.to_string(),
            turn_count: self.turn_count + 1,
            previous_exchange_ids: previous,
            pending_proposal: next,
        })
    }

    #[cfg(test)]
    pub fn pending_proposal(&self) -> Option<&Proposal> {
        self.pending_proposal.as_ref()
    }

    /// Hands out the queued proposal once.
    pub fn take_pending_proposal(&mut self) -> Option<Proposal> {
        self.pending_proposal.take()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Ok,
    /// Refused before dispatch (e.g. out-of-bounds coordinates).
    Rejected { reason: String },
    /// The OS refused or failed the input call.
    Error { reason: String },
}

/// Outcome of running actions for one turn, plus the perception that follows them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub actions_executed: usize,
    #[serde(skip)]
    pub payload: Option<PerceptionPayload>,
}

impl ExecutionResult {
    pub fn ok(actions_executed: usize) -> Self {
        Self {
            status: ExecutionStatus::Ok,
            actions_executed,
            payload: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Rejected {
                reason: reason.into(),
            },
            actions_executed: 0,
            payload: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error {
                reason: reason.into(),
            },
            actions_executed: 0,
            payload: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, ExecutionStatus::Ok)
    }

    pub fn with_payload(mut self, payload: PerceptionPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_executed(mut self, actions_executed: usize) -> Self {
        self.actions_executed = actions_executed;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationState {
    pub turn_count: u32,
    pub max_iterations: u32,
    pub outcome: LoopState,
}

/// The sole externally observable result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: LoopState,
    pub turn_count: u32,
    pub session_id: Option<String>,
    pub transcript: Vec<TranscriptEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(id: &str) -> Proposal {
        Proposal {
            exchange_id: id.into(),
            call_id: None,
            actions: Vec::new(),
            safety_checks: Vec::new(),
            message: None,
            reasoning: None,
        }
    }

    #[test]
    fn session_chain_is_monotonic() {
        let s0 = Session::start(&proposal("resp-1"));
        assert_eq!(s0.turn_count, 0);

        let s1 = s0.advance("resp-2", None).unwrap();
        assert_eq!(s1.last_exchange_id, "resp-2");
        assert_eq!(s1.turn_count, 1);
        assert_eq!(s1.session_id, "resp-1");

        assert!(s1.advance("resp-2", None).is_err());
        assert!(s1.advance("resp-1", None).is_err());
        assert!(s1.advance("", None).is_err());

        let s2 = s1.advance("resp-3", Some(proposal("resp-3"))).unwrap();
        assert_eq!(s2.turn_count, 2);
        assert!(s2.pending_proposal().is_some());
    }

    #[test]
    fn drag_exposes_all_path_points() {
        let drag = Action::Drag {
            path: vec![Point { x: 1, y: 2 }, Point { x: 3, y: 4 }, Point { x: 5, y: 6 }],
        };
        assert_eq!(drag.points().len(), 3);
        assert!(Action::TypeText { text: "x".into() }.points().is_empty());
    }

    #[test]
    fn action_serializes_with_type_tag() {
        let click = Action::Click {
            button: MouseButton::Right,
            x: 10,
            y: 20,
        };
        let json = serde_json::to_value(&click).unwrap();
        assert_eq!(json["type"], "click");
        assert_eq!(json["button"], "right");
    }
}
