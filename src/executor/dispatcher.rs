use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent_engine::state::{Action, ExecutionResult, MouseButton};
use crate::errors::{ChartPilotError, ChartPilotResult};
use crate::executor::coordinator::{validate_action, DisplayBounds};
use crate::executor::input::{InputDriver, PointerButton};
use crate::executor::text_input::{parse_chord, parse_key, DriverKey, NamedKey};

/// Service-proposed waits are capped so a single action cannot stall the run.
pub const MAX_WAIT_MS: u64 = 10_000;
/// Pixels of scroll delta per wheel notch.
const PIXELS_PER_NOTCH: i64 = 100;

/// Executes one validated action against the OS input surface.
#[async_trait]
pub trait ActuationPort: Send + Sync {
    fn bounds(&self) -> DisplayBounds;

    /// Never fails outright: validation and dispatch failures are reported in the
    /// result so the caller decides what happens next.
    async fn execute(&self, action: &Action) -> ExecutionResult;
}

pub struct DesktopActuator {
    bounds: DisplayBounds,
    driver: Arc<dyn InputDriver>,
}

impl DesktopActuator {
    pub fn new(bounds: DisplayBounds, driver: Arc<dyn InputDriver>) -> Self {
        Self { bounds, driver }
    }
}

#[async_trait]
impl ActuationPort for DesktopActuator {
    fn bounds(&self) -> DisplayBounds {
        self.bounds
    }

    async fn execute(&self, action: &Action) -> ExecutionResult {
        if let Err(e) = validate_action(action, &self.bounds) {
            tracing::warn!(action = action.kind(), error = %e, "action rejected before dispatch");
            return match e {
                ChartPilotError::InvalidCoordinate { .. } => ExecutionResult::rejected(e.to_string()),
                other => ExecutionResult::error(other.to_string()),
            };
        }

        let outcome = match action {
            Action::Wait { ms } => {
                let ms = (*ms).min(MAX_WAIT_MS);
                tracing::info!(ms, "waiting");
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
            Action::Screenshot => {
                tracing::debug!("screenshot action: answered by the next capture");
                Ok(())
            }
            Action::TypeText { text } if text.is_empty() => {
                tracing::debug!("empty type_text: nothing to dispatch");
                Ok(())
            }
            _ => {
                let driver = Arc::clone(&self.driver);
                let bounds = self.bounds;
                let action = action.clone();
                tokio::task::spawn_blocking(move || perform(driver.as_ref(), &action, &bounds))
                    .await
                    .unwrap_or_else(|e| Err(ChartPilotError::Dispatch(format!("input task panicked: {e}"))))
            }
        };

        match outcome {
            Ok(()) => {
                tracing::info!(action = action.kind(), "action dispatched");
                ExecutionResult::ok(1)
            }
            Err(e @ ChartPilotError::InvalidCoordinate { .. }) => ExecutionResult::rejected(e.to_string()),
            Err(e) => {
                tracing::error!(action = action.kind(), error = %e, "action dispatch failed");
                ExecutionResult::error(e.to_string())
            }
        }
    }
}

fn notches(pixels: i64) -> i32 {
    if pixels == 0 {
        return 0;
    }
    let n = (pixels.abs() / PIXELS_PER_NOTCH).max(1).min(i32::MAX as i64) as i32;
    if pixels < 0 {
        -n
    } else {
        n
    }
}

/// Blocking translation of one action into driver primitives.
fn perform(driver: &dyn InputDriver, action: &Action, bounds: &DisplayBounds) -> ChartPilotResult<()> {
    match action {
        Action::Move { x, y } => {
            let (x, y) = bounds.check((*x, *y).into())?;
            driver.move_to(x, y)
        }
        Action::Click { button, x, y } => {
            let (x, y) = bounds.check((*x, *y).into())?;
            match button {
                MouseButton::Back => driver.chord(&[
                    DriverKey::Named(NamedKey::Alt),
                    DriverKey::Named(NamedKey::Left),
                ]),
                MouseButton::Forward => driver.chord(&[
                    DriverKey::Named(NamedKey::Alt),
                    DriverKey::Named(NamedKey::Right),
                ]),
                MouseButton::Left | MouseButton::Right | MouseButton::Middle | MouseButton::Wheel => {
                    let pointer = match button {
                        MouseButton::Right => PointerButton::Right,
                        MouseButton::Middle | MouseButton::Wheel => PointerButton::Middle,
                        _ => PointerButton::Left,
                    };
                    driver.move_to(x, y)?;
                    driver.click(pointer, 1)
                }
            }
        }
        Action::DoubleClick { x, y } => {
            let (x, y) = bounds.check((*x, *y).into())?;
            driver.move_to(x, y)?;
            driver.click(PointerButton::Left, 2)
        }
        Action::Drag { path } => {
            let points = path
                .iter()
                .map(|p| bounds.check(*p))
                .collect::<ChartPilotResult<Vec<_>>>()?;
            driver.drag(PointerButton::Left, &points)
        }
        Action::TypeText { text } => driver.type_text(text),
        Action::KeyPress { key } => {
            if key.trim().is_empty() {
                return Err(ChartPilotError::Dispatch("key_press without a key".into()));
            }
            driver.key_tap(parse_key(key)?)
        }
        Action::Hotkey { keys } => driver.chord(&parse_chord(keys)?),
        Action::Scroll { x, y, delta_x, delta_y } => {
            let (x, y) = bounds.check((*x, *y).into())?;
            driver.move_to(x, y)?;
            driver.scroll(notches(*delta_x), notches(*delta_y))
        }
        Action::Wait { .. } | Action::Screenshot => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent_engine::state::{ExecutionStatus, Point};
    use std::sync::Mutex;

    /// Records every primitive; optionally fails the n-th one.
    #[derive(Default)]
    pub(crate) struct RecordingDriver {
        pub calls: Mutex<Vec<String>>,
        pub fail_on_call: Option<usize>,
    }

    impl RecordingDriver {
        fn log(&self, call: String) -> ChartPilotResult<()> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call);
            if Some(calls.len()) == self.fail_on_call {
                return Err(ChartPilotError::Dispatch("OS refused input".into()));
            }
            Ok(())
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl InputDriver for RecordingDriver {
        fn move_to(&self, x: i32, y: i32) -> ChartPilotResult<()> {
            self.log(format!("move {x},{y}"))
        }
        fn click(&self, button: PointerButton, count: u32) -> ChartPilotResult<()> {
            self.log(format!("click {button:?} x{count}"))
        }
        fn drag(&self, button: PointerButton, path: &[(i32, i32)]) -> ChartPilotResult<()> {
            self.log(format!("drag {button:?} {path:?}"))
        }
        fn scroll(&self, horizontal: i32, vertical: i32) -> ChartPilotResult<()> {
            self.log(format!("scroll {horizontal},{vertical}"))
        }
        fn type_text(&self, text: &str) -> ChartPilotResult<()> {
            self.log(format!("type {text}"))
        }
        fn key_tap(&self, key: DriverKey) -> ChartPilotResult<()> {
            self.log(format!("tap {key:?}"))
        }
        fn chord(&self, keys: &[DriverKey]) -> ChartPilotResult<()> {
            self.log(format!("chord {keys:?}"))
        }
    }

    fn actuator(driver: Arc<RecordingDriver>) -> DesktopActuator {
        DesktopActuator::new(DisplayBounds::new(1920, 1080), driver)
    }

    #[tokio::test]
    async fn click_moves_then_clicks() {
        let driver = Arc::new(RecordingDriver::default());
        let result = actuator(driver.clone())
            .execute(&Action::Click {
                button: MouseButton::Left,
                x: 100,
                y: 50,
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(result.actions_executed, 1);
        assert_eq!(driver.calls(), vec!["move 100,50", "click Left x1"]);
    }

    #[tokio::test]
    async fn out_of_bounds_is_rejected_without_touching_the_driver() {
        let driver = Arc::new(RecordingDriver::default());
        let result = actuator(driver.clone())
            .execute(&Action::DoubleClick { x: 1920, y: 10 })
            .await;
        assert!(matches!(result.status, ExecutionStatus::Rejected { .. }));
        assert_eq!(result.actions_executed, 0);
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_text_is_a_successful_noop() {
        let driver = Arc::new(RecordingDriver::default());
        let result = actuator(driver.clone())
            .execute(&Action::TypeText { text: String::new() })
            .await;
        assert!(result.is_ok());
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_key_is_an_error() {
        let driver = Arc::new(RecordingDriver::default());
        let result = actuator(driver.clone())
            .execute(&Action::KeyPress { key: "  ".into() })
            .await;
        assert!(matches!(result.status, ExecutionStatus::Error { .. }));
    }

    #[tokio::test]
    async fn driver_failure_is_reported_as_error() {
        let driver = Arc::new(RecordingDriver {
            fail_on_call: Some(2),
            ..Default::default()
        });
        let result = actuator(driver.clone())
            .execute(&Action::Click {
                button: MouseButton::Right,
                x: 5,
                y: 5,
            })
            .await;
        match result.status {
            ExecutionStatus::Error { reason } => assert!(reason.contains("OS refused input")),
            other => panic!("expected dispatch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn back_button_becomes_alt_left() {
        let driver = Arc::new(RecordingDriver::default());
        actuator(driver.clone())
            .execute(&Action::Click {
                button: MouseButton::Back,
                x: 5,
                y: 5,
            })
            .await;
        assert_eq!(driver.calls(), vec!["chord [Named(Alt), Named(Left)]"]);
    }

    #[tokio::test]
    async fn scroll_converts_pixels_to_notches() {
        let driver = Arc::new(RecordingDriver::default());
        actuator(driver.clone())
            .execute(&Action::Scroll {
                x: 400,
                y: 300,
                delta_x: 0,
                delta_y: -350,
            })
            .await;
        assert_eq!(driver.calls(), vec!["move 400,300", "scroll 0,-3"]);
        assert_eq!(notches(40), 1);
        assert_eq!(notches(0), 0);
    }

    #[tokio::test]
    async fn hotkey_and_drag_reach_the_driver_whole() {
        let driver = Arc::new(RecordingDriver::default());
        let act = actuator(driver.clone());
        act.execute(&Action::Hotkey {
            keys: vec!["CTRL".into(), "s".into()],
        })
        .await;
        act.execute(&Action::Drag {
            path: vec![Point { x: 1, y: 1 }, Point { x: 9, y: 9 }],
        })
        .await;
        assert_eq!(
            driver.calls(),
            vec!["chord [Named(Control), Char('s')]", "drag Left [(1, 1), (9, 9)]"]
        );
    }
}
