use std::time::{Duration, Instant};

use crate::agent_engine::loop_control::AbortSignal;
use crate::config::SettleConfig;
use crate::errors::{ChartPilotError, ChartPilotResult};
use crate::perception::traits::PerceptionPort;
use crate::perception::types::PerceptionPayload;

pub struct VisualStabilityDetector {
    min_stable_frames: usize,
    last_frame_hash: Option<u64>,
    stable_frame_count: usize,
}

impl VisualStabilityDetector {
    pub fn new(min_stable_frames: usize) -> Self {
        Self {
            min_stable_frames,
            last_frame_hash: None,
            stable_frame_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.last_frame_hash = None;
        self.stable_frame_count = 0;
    }

    /// Feeds one frame; true once `min_stable_frames` consecutive repeats were seen.
    pub fn is_stable(&mut self, frame: &PerceptionPayload) -> bool {
        let current_hash = frame.fingerprint();

        if let Some(last_hash) = self.last_frame_hash {
            if current_hash == last_hash {
                self.stable_frame_count += 1;
            } else {
                self.stable_frame_count = 0;
            }
        }

        self.last_frame_hash = Some(current_hash);
        self.stable_frame_count >= self.min_stable_frames
    }
}

/// Captures until the display stops changing or `max_wait_ms` elapses, and returns
/// the last frame. With `max_wait_ms == 0` this is a single capture.
pub async fn capture_settled(
    port: &dyn PerceptionPort,
    config: &SettleConfig,
    abort: &AbortSignal,
) -> ChartPilotResult<PerceptionPayload> {
    let mut frame = port.capture().await?;
    if config.max_wait_ms == 0 || config.min_stable_frames == 0 {
        return Ok(frame);
    }

    let mut detector = VisualStabilityDetector::new(config.min_stable_frames);
    detector.is_stable(&frame);
    let start_time = Instant::now();

    while start_time.elapsed() < Duration::from_millis(config.max_wait_ms) {
        if abort.is_aborted() {
            return Err(ChartPilotError::Cancelled);
        }
        tokio::time::sleep(Duration::from_millis(config.check_interval_ms)).await;

        frame = port.capture().await?;
        if detector.is_stable(&frame) {
            tracing::debug!(elapsed = ?start_time.elapsed(), "display settled");
            return Ok(frame);
        }
    }

    tracing::warn!(elapsed = ?start_time.elapsed(), "display did not settle; using last frame");
    Ok(frame)
}
