use std::sync::Arc;

use tokio::sync::watch;

use crate::agent_engine::state::{IterationState, LoopState};
use crate::errors::{ChartPilotError, ChartPilotResult};

/// Operator-triggered cancellation, observable both by polling and by awaiting.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `abort` has been called (immediately if it already was).
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|aborted| *aborted).await;
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the iteration bookkeeping of one run; nothing else mutates it.
pub struct LoopController {
    state: IterationState,
    start_time: std::time::Instant,
}

impl LoopController {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            state: IterationState {
                turn_count: 0,
                max_iterations,
                outcome: LoopState::Running,
            },
            start_time: std::time::Instant::now(),
        }
    }

    pub fn state(&self) -> &IterationState {
        &self.state
    }

    pub fn turn_count(&self) -> u32 {
        self.state.turn_count
    }

    /// Fails once `turn_count` has reached `max_iterations`.
    pub fn check_budget(&self) -> ChartPilotResult<()> {
        if self.state.turn_count >= self.state.max_iterations {
            return Err(ChartPilotError::IterationBudgetExceeded(self.state.max_iterations));
        }
        Ok(())
    }

    pub fn record_turn(&mut self) {
        self.state.turn_count += 1;
    }

    pub fn finish(&mut self, outcome: LoopState) {
        tracing::info!(
            outcome = ?outcome,
            turns = self.state.turn_count,
            elapsed = ?self.start_time.elapsed(),
            "run reached terminal state"
        );
        self.state.outcome = outcome;
    }

    pub fn is_terminal(&self) -> bool {
        self.state.outcome.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_checked_before_each_turn() {
        let mut ctrl = LoopController::new(2);
        assert!(ctrl.check_budget().is_ok());
        ctrl.record_turn();
        assert!(ctrl.check_budget().is_ok());
        ctrl.record_turn();
        assert!(matches!(
            ctrl.check_budget(),
            Err(ChartPilotError::IterationBudgetExceeded(2))
        ));
    }

    #[tokio::test]
    async fn abort_wakes_waiters() {
        let signal = AbortSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        assert!(!signal.is_aborted());
        signal.abort();
        waiter.await.unwrap();
        assert!(signal.is_aborted());
    }
}
