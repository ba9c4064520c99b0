use async_trait::async_trait;

use crate::agent_engine::state::{ExecutionResult, PendingSafetyCheck, Proposal, Session};
use crate::errors::ChartPilotResult;
use crate::perception::types::PerceptionPayload;

/// The remote vision-and-action model, seen through its logical request/response shape.
/// Transient transport failures are retried inside implementations; callers only see
/// them once retries are exhausted.
#[async_trait]
pub trait DecisionService: Send + Sync {
    fn name(&self) -> &str;

    /// Starts a session when `session` is `None`, otherwise continues its chain.
    async fn propose(
        &self,
        payload: &PerceptionPayload,
        session: Option<&mut Session>,
    ) -> ChartPilotResult<Proposal>;

    /// Tells the service what happened to the proposal identified by `call_id`,
    /// including the fresh perception in `result.payload`, and returns the advanced
    /// session.
    async fn report(
        &self,
        session: &Session,
        call_id: &str,
        result: &ExecutionResult,
        acknowledged: &[PendingSafetyCheck],
    ) -> ChartPilotResult<Session>;
}
