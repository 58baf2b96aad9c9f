use serde_json::Value;
use tracing::debug;

use crate::action::{Action, MouseButton};
use crate::desktop::{RemoteDesktop, ScrollDirection};
use crate::error::PilotResult;
use crate::scaling::Scaler;

/// Runs one model-space action against a live desktop.
///
/// Calls are real interactions and are never retried here: a repeated click
/// is a second click.
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    scaler: Scaler,
}

impl ActionExecutor {
    pub fn new(scaler: Scaler) -> Self {
        Self { scaler }
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    /// Parses the planner payload first so unsupported actions never reach the desktop.
    pub fn execute_value(&self, payload: &Value, desktop: &mut dyn RemoteDesktop) -> PilotResult<Action> {
        let action = Action::from_value(payload)?;
        self.execute(&action, desktop)?;
        Ok(action)
    }

    pub fn execute(&self, action: &Action, desktop: &mut dyn RemoteDesktop) -> PilotResult<()> {
        match action {
            Action::Click { x, y, button } => {
                let at = self.scaler.to_desktop((*x, *y).into());
                match button {
                    MouseButton::Left => desktop.left_click(at),
                    MouseButton::Right => desktop.right_click(at),
                    MouseButton::Middle => desktop.middle_click(at),
                }
            }
            Action::DoubleClick { x, y } => desktop.double_click(self.scaler.to_desktop((*x, *y).into())),
            Action::Move { x, y } => desktop.move_mouse(self.scaler.to_desktop((*x, *y).into())),
            Action::Type { text } => desktop.write(text),
            Action::Keypress { keys } => desktop.press(keys),
            Action::Scroll { scroll_y, scroll_x } => {
                if *scroll_x != 0 {
                    debug!(scroll_x, "horizontal scroll is not supported; ignoring");
                }
                match scroll_y.signum() {
                    -1 => desktop.scroll(ScrollDirection::Up, scroll_y.unsigned_abs()),
                    1 => desktop.scroll(ScrollDirection::Down, scroll_y.unsigned_abs()),
                    _ => Ok(()),
                }
            }
            Action::Drag { path } => {
                // Intermediate waypoints are not replayed.
                let (Some(first), Some(last)) = (path.first(), path.last()) else {
                    return Ok(());
                };
                if path.len() > 2 {
                    debug!(waypoints = path.len() - 2, "dropping intermediate drag waypoints");
                }
                desktop.drag(self.scaler.to_desktop(*first), self.scaler.to_desktop(*last))
            }
            Action::Screenshot | Action::Wait => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScaleBounds;
    use crate::desktop::testing::{DesktopCall, RecordingDesktop};
    use crate::error::PilotError;
    use crate::scaling::{Point, Resolution};
    use serde_json::json;

    fn executor(w: u32, h: u32) -> ActionExecutor {
        ActionExecutor::new(Scaler::new(Resolution::new(w, h), &ScaleBounds::default()).unwrap())
    }

    #[test]
    fn click_coordinates_are_scaled_to_desktop() {
        let exec = executor(3840, 2160);
        let mut desktop = RecordingDesktop::new(3840, 2160);
        exec.execute_value(&json!({"type": "click", "x": 100, "y": 50, "button": "right"}), &mut desktop)
            .unwrap();
        assert_eq!(desktop.calls, vec![DesktopCall::RightClick(Point::new(200, 100))]);
    }

    #[test]
    fn scroll_sign_selects_direction() {
        let exec = executor(1024, 768);
        let mut desktop = RecordingDesktop::new(1024, 768);
        for dy in [-5, 7, 0] {
            exec.execute(&Action::Scroll { scroll_y: dy, scroll_x: 0 }, &mut desktop)
                .unwrap();
        }
        assert_eq!(
            desktop.calls,
            vec![
                DesktopCall::Scroll(ScrollDirection::Up, 5),
                DesktopCall::Scroll(ScrollDirection::Down, 7),
            ]
        );
    }

    #[test]
    fn horizontal_scroll_is_a_no_op() {
        let exec = executor(1024, 768);
        let mut desktop = RecordingDesktop::new(1024, 768);
        exec.execute(&Action::Scroll { scroll_y: 0, scroll_x: 12 }, &mut desktop)
            .unwrap();
        assert!(desktop.calls.is_empty());
    }

    #[test]
    fn drag_uses_only_endpoints() {
        let exec = executor(1024, 768);
        let mut desktop = RecordingDesktop::new(1024, 768);
        exec.execute_value(
            &json!({"type": "drag", "path": [{"x": 10, "y": 10}, {"x": 50, "y": 50}, {"x": 90, "y": 90}]}),
            &mut desktop,
        )
        .unwrap();
        assert_eq!(
            desktop.calls,
            vec![DesktopCall::Drag(Point::new(10, 10), Point::new(90, 90))]
        );
    }

    #[test]
    fn drag_endpoints_are_scaled() {
        let exec = executor(3840, 2160);
        let mut desktop = RecordingDesktop::new(3840, 2160);
        exec.execute(
            &Action::Drag {
                path: vec![Point::new(10, 10), Point::new(50, 50), Point::new(90, 90)],
            },
            &mut desktop,
        )
        .unwrap();
        assert_eq!(
            desktop.calls,
            vec![DesktopCall::Drag(Point::new(20, 20), Point::new(180, 180))]
        );
    }

    #[test]
    fn unsupported_action_never_reaches_desktop() {
        let exec = executor(1024, 768);
        let mut desktop = RecordingDesktop::new(1024, 768);
        let err = exec
            .execute_value(&json!({"type": "teleport", "x": 1, "y": 1}), &mut desktop)
            .unwrap_err();
        assert!(matches!(err, PilotError::UnsupportedAction(_)));
        assert!(desktop.calls.is_empty());
    }

    #[test]
    fn text_and_keys_pass_through_unscaled() {
        let exec = executor(3840, 2160);
        let mut desktop = RecordingDesktop::new(3840, 2160);
        exec.execute(&Action::Type { text: "hello 42".to_string() }, &mut desktop)
            .unwrap();
        exec.execute(&Action::Keypress { keys: "CTRL+L".to_string() }, &mut desktop)
            .unwrap();
        assert_eq!(
            desktop.calls,
            vec![
                DesktopCall::Write("hello 42".to_string()),
                DesktopCall::Press("CTRL+L".to_string()),
            ]
        );
    }

    #[test]
    fn wait_and_screenshot_do_nothing() {
        let exec = executor(1024, 768);
        let mut desktop = RecordingDesktop::new(1024, 768);
        exec.execute(&Action::Wait, &mut desktop).unwrap();
        exec.execute(&Action::Screenshot, &mut desktop).unwrap();
        assert!(desktop.calls.is_empty());
    }

    #[test]
    fn remote_failures_propagate() {
        let exec = executor(1024, 768);
        let mut desktop = RecordingDesktop::new(1024, 768);
        desktop.fail_actions = true;
        let err = exec.execute(&Action::Move { x: 1, y: 1 }, &mut desktop).unwrap_err();
        assert!(matches!(err, PilotError::RemoteSession(_)));
    }
}
