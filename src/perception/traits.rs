use async_trait::async_trait;

use crate::errors::ChartPilotResult;
use crate::perception::types::PerceptionPayload;

/// Source of display snapshots. Implementations must not alter display state and
/// keep no state between calls.
#[async_trait]
pub trait PerceptionPort: Send + Sync {
    /// Returns a non-empty PNG payload or `ChartPilotError::Capture`.
    async fn capture(&self) -> ChartPilotResult<PerceptionPayload>;
}
