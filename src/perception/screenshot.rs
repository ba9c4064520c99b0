use std::io::Cursor;

use async_trait::async_trait;
use base64::Engine as _;
use image::{ImageFormat, RgbaImage};

use crate::errors::{ChartPilotError, ChartPilotResult};
use crate::perception::traits::PerceptionPort;
use crate::perception::types::{PerceptionPayload, ScreenshotMeta};

/// Captures a monitor through the OS compositor (xcap).
pub struct ScreenCapture {
    /// `None` selects the primary monitor.
    monitor_index: Option<usize>,
}

impl ScreenCapture {
    pub fn primary() -> Self {
        Self { monitor_index: None }
    }

    pub fn monitor(index: usize) -> Self {
        Self {
            monitor_index: Some(index),
        }
    }

    /// Accepts "primary", a zero-based monitor index, or "monitor-<index>".
    pub fn for_display(display_id: &str) -> ChartPilotResult<Self> {
        if display_id.eq_ignore_ascii_case("primary") {
            return Ok(Self::primary());
        }
        display_id
            .trim_start_matches("monitor-")
            .parse::<usize>()
            .map(Self::monitor)
            .map_err(|_| {
                ChartPilotError::Config(format!(
                    "unknown display '{display_id}': use \"primary\" or a monitor index"
                ))
            })
    }

    /// Size in physical pixels of the frames this monitor produces.
    pub async fn physical_size(&self) -> ChartPilotResult<(u32, u32)> {
        let wanted = self.monitor_index;
        let (_, meta) = tokio::task::spawn_blocking(move || grab_frame(wanted))
            .await
            .map_err(|e| ChartPilotError::Capture(format!("capture task panicked: {e}")))??;
        Ok((meta.physical_width, meta.physical_height))
    }
}

#[async_trait]
impl PerceptionPort for ScreenCapture {
    async fn capture(&self) -> ChartPilotResult<PerceptionPayload> {
        let wanted = self.monitor_index;
        let (frame, meta) = tokio::task::spawn_blocking(move || grab_frame(wanted))
            .await
            .map_err(|e| ChartPilotError::Capture(format!("capture task panicked: {e}")))??;

        let payload = encode_frame(&frame, meta)?;
        tracing::debug!(
            monitor = payload.meta.monitor_index,
            width = payload.meta.physical_width,
            height = payload.meta.physical_height,
            base64_len = payload.image_base64.len(),
            "screen captured"
        );
        Ok(payload)
    }
}

fn grab_frame(wanted: Option<usize>) -> ChartPilotResult<(RgbaImage, ScreenshotMeta)> {
    let monitors = xcap::Monitor::all()
        .map_err(|e| ChartPilotError::Capture(format!("cannot enumerate monitors: {e}")))?;

    let (index, monitor) = match wanted {
        Some(i) => monitors
            .into_iter()
            .enumerate()
            .nth(i)
            .ok_or_else(|| ChartPilotError::Capture(format!("monitor {i} not found")))?,
        None => monitors
            .into_iter()
            .enumerate()
            .find(|(_, m)| m.is_primary())
            .ok_or_else(|| ChartPilotError::Capture("no primary monitor".into()))?,
    };

    let shot = monitor
        .capture_image()
        .map_err(|e| ChartPilotError::Capture(format!("monitor capture failed: {e}")))?;
    let (width, height) = (shot.width(), shot.height());
    let frame = RgbaImage::from_raw(width, height, shot.into_raw())
        .ok_or_else(|| ChartPilotError::Capture("capture buffer size mismatch".into()))?;

    let meta = ScreenshotMeta {
        monitor_index: index as u32,
        scale_factor: monitor.scale_factor() as f64,
        physical_width: width,
        physical_height: height,
    };
    Ok((frame, meta))
}

/// PNG-encodes a frame into a transport-ready payload. Deterministic for equal frames.
pub fn encode_frame(frame: &RgbaImage, meta: ScreenshotMeta) -> ChartPilotResult<PerceptionPayload> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(ChartPilotError::Capture("captured frame is empty".into()));
    }

    let mut png = Vec::new();
    frame
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| ChartPilotError::Capture(format!("PNG encoding failed: {e}")))?;

    Ok(PerceptionPayload {
        image_base64: base64::engine::general_purpose::STANDARD.encode(&png),
        meta,
        captured_at: chrono::Utc::now(),
    })
}
