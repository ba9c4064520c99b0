use serde::{Deserialize, Serialize};

use crate::agent_engine::state::{Action, Point};
use crate::errors::{ChartPilotError, ChartPilotResult};

/// Known size of the controlled display, in the coordinate space the service uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayBounds {
    pub width: u32,
    pub height: u32,
}

impl DisplayBounds {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= 0 && p.y >= 0 && p.x < self.width as i64 && p.y < self.height as i64
    }

    /// Out-of-bounds points are rejected, never clamped, so an action can't land
    /// somewhere the service did not ask for.
    pub fn check(&self, p: Point) -> ChartPilotResult<(i32, i32)> {
        if !self.contains(p) {
            return Err(ChartPilotError::InvalidCoordinate {
                x: p.x,
                y: p.y,
                width: self.width,
                height: self.height,
            });
        }
        // bounds are u32 and the point is inside them, so both fit in i32 for any real display
        let x = i32::try_from(p.x).map_err(|_| self.invalid(p))?;
        let y = i32::try_from(p.y).map_err(|_| self.invalid(p))?;
        Ok((x, y))
    }

    fn invalid(&self, p: Point) -> ChartPilotError {
        ChartPilotError::InvalidCoordinate {
            x: p.x,
            y: p.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// Validates every coordinate of an action before anything is dispatched.
pub fn validate_action(action: &Action, bounds: &DisplayBounds) -> ChartPilotResult<()> {
    if let Action::Drag { path } = action {
        if path.len() < 2 {
            return Err(ChartPilotError::Dispatch(format!(
                "drag needs at least two points, got {}",
                path.len()
            )));
        }
    }
    for p in action.points() {
        bounds.check(p)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::MouseButton;

    const HD: DisplayBounds = DisplayBounds {
        width: 1920,
        height: 1080,
    };

    #[test]
    fn edges_are_half_open() {
        assert!(HD.check(Point { x: 0, y: 0 }).is_ok());
        assert_eq!(HD.check(Point { x: 1919, y: 1079 }).unwrap(), (1919, 1079));
        assert!(HD.check(Point { x: 1920, y: 0 }).is_err());
        assert!(HD.check(Point { x: 0, y: 1080 }).is_err());
        assert!(HD.check(Point { x: -1, y: 5 }).is_err());
    }

    #[test]
    fn rejection_is_deterministic() {
        let p = Point { x: 5000, y: -20 };
        for _ in 0..3 {
            match HD.check(p) {
                Err(ChartPilotError::InvalidCoordinate { x, y, width, height }) => {
                    assert_eq!((x, y, width, height), (5000, -20, 1920, 1080));
                }
                other => panic!("expected rejection, got {other:?}"),
            }
        }
    }

    #[test]
    fn drag_validates_every_point() {
        let drag = Action::Drag {
            path: vec![Point { x: 10, y: 10 }, Point { x: 2500, y: 10 }],
        };
        assert!(matches!(
            validate_action(&drag, &HD),
            Err(ChartPilotError::InvalidCoordinate { x: 2500, .. })
        ));
        let short = Action::Drag {
            path: vec![Point { x: 10, y: 10 }],
        };
        assert!(matches!(validate_action(&short, &HD), Err(ChartPilotError::Dispatch(_))));
    }

    #[test]
    fn keyboard_actions_have_no_coordinates() {
        assert!(validate_action(&Action::KeyPress { key: "enter".into() }, &HD).is_ok());
        assert!(validate_action(
            &Action::Click {
                button: MouseButton::Left,
                x: 100,
                y: 50
            },
            &HD
        )
        .is_ok());
    }
}
