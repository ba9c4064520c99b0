use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::SendError;
use tokio::sync::{broadcast, mpsc};

use crate::agent_engine::state::{LoopState, PendingSafetyCheck};

/// Signals from the human operator into a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorEvent {
    Confirm { check_id: String, approved: bool },
}

/// Progress notifications out of a run, for consoles and other observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    StateChanged {
        state: LoopState,
        turn: u32,
    },
    ConfirmationRequired {
        checks: Vec<PendingSafetyCheck>,
        timeout_secs: u64,
    },
    ActionCompleted {
        turn: u32,
        kind: String,
        success: bool,
        error: Option<String>,
    },
}

pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
    operator_tx: mpsc::Sender<OperatorEvent>,
    operator_rx: mpsc::Receiver<OperatorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        let (operator_tx, operator_rx) = mpsc::channel(32);

        Self {
            tx,
            operator_tx,
            operator_rx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    /// Fails only when nobody is listening, which callers may ignore.
    pub fn send(&self, event: RunEvent) -> Result<(), SendError<RunEvent>> {
        self.tx.send(event).map(|_| ())
    }

    pub fn operator_sender(&self) -> mpsc::Sender<OperatorEvent> {
        self.operator_tx.clone()
    }

    pub async fn recv_operator(&mut self) -> Option<OperatorEvent> {
        self.operator_rx.recv().await
    }

    /// Throws away confirmations that arrived while nothing was pending.
    pub fn drain_stale_operator_events(&mut self) -> usize {
        let mut dropped = 0;
        while self.operator_rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operator_events_round_trip() {
        let mut bus = EventBus::new();
        let tx = bus.operator_sender();
        tx.send(OperatorEvent::Confirm {
            check_id: "sc-1".into(),
            approved: true,
        })
        .await
        .unwrap();
        assert_eq!(
            bus.recv_operator().await,
            Some(OperatorEvent::Confirm {
                check_id: "sc-1".into(),
                approved: true
            })
        );
    }

    #[tokio::test]
    async fn stale_confirmations_are_drained() {
        let mut bus = EventBus::new();
        let tx = bus.operator_sender();
        for id in ["a", "b"] {
            tx.send(OperatorEvent::Confirm {
                check_id: id.into(),
                approved: true,
            })
            .await
            .unwrap();
        }
        assert_eq!(bus.drain_stale_operator_events(), 2);
        assert_eq!(bus.drain_stale_operator_events(), 0);
    }

    #[test]
    fn run_events_reach_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.send(RunEvent::StateChanged {
            state: LoopState::Running,
            turn: 0,
        })
        .unwrap();
        assert!(matches!(rx.try_recv(), Ok(RunEvent::StateChanged { turn: 0, .. })));
    }
}
