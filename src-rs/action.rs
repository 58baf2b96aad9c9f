//! Actions proposed by the planner.
//!
//! Every coordinate carried here is in model space. Actions are built from the
//! planner's JSON payload, executed once, and dropped.

use serde::Serialize;
use serde_json::Value;

use crate::error::{PilotError, PilotResult};
use crate::scaling::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    fn parse(raw: Option<&str>) -> PilotResult<Self> {
        match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("left") => Ok(MouseButton::Left),
            Some("right") => Ok(MouseButton::Right),
            Some("middle") | Some("wheel") => Ok(MouseButton::Middle),
            Some(other) => Err(PilotError::UnsupportedAction(format!(
                "click with button {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click { x: i32, y: i32, button: MouseButton },
    DoubleClick { x: i32, y: i32 },
    Type { text: String },
    /// Key combination joined with `+`, e.g. `CTRL+C`.
    Keypress { keys: String },
    Move { x: i32, y: i32 },
    /// Horizontal scrolling is carried but never dispatched.
    Scroll { scroll_y: i32, scroll_x: i32 },
    /// Only the first and last points are dispatched.
    Drag { path: Vec<Point> },
    Screenshot,
    Wait,
}

impl Action {
    pub fn from_value(value: &Value) -> PilotResult<Self> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| PilotError::MalformedAction("action has no type tag".to_string()))?;

        let action = match tag {
            "click" => Action::Click {
                x: coord(value, "x", tag)?,
                y: coord(value, "y", tag)?,
                button: MouseButton::parse(value.get("button").and_then(Value::as_str))?,
            },
            "double_click" => Action::DoubleClick {
                x: coord(value, "x", tag)?,
                y: coord(value, "y", tag)?,
            },
            "type" => Action::Type {
                text: value
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PilotError::MalformedAction("type action has no text".to_string()))?
                    .to_string(),
            },
            "keypress" => Action::Keypress {
                keys: parse_keys(value.get("keys"))?,
            },
            "move" => Action::Move {
                x: coord(value, "x", tag)?,
                y: coord(value, "y", tag)?,
            },
            "scroll" => Action::Scroll {
                scroll_y: optional_int(value.get("scroll_y")).unwrap_or(0),
                scroll_x: optional_int(value.get("scroll_x")).unwrap_or(0),
            },
            "drag" => Action::Drag {
                path: parse_path(value.get("path"))?,
            },
            "screenshot" => Action::Screenshot,
            "wait" => Action::Wait,
            other => return Err(PilotError::UnsupportedAction(other.to_string())),
        };
        Ok(action)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::DoubleClick { .. } => "double_click",
            Action::Type { .. } => "type",
            Action::Keypress { .. } => "keypress",
            Action::Move { .. } => "move",
            Action::Scroll { .. } => "scroll",
            Action::Drag { .. } => "drag",
            Action::Screenshot => "screenshot",
            Action::Wait => "wait",
        }
    }

    /// One-line human description, model-space coordinates.
    pub fn describe(&self) -> String {
        match self {
            Action::Click { x, y, button } => format!("{button:?} click at ({x}, {y})").to_lowercase(),
            Action::DoubleClick { x, y } => format!("double click at ({x}, {y})"),
            Action::Type { text } => format!("type {:?}", truncate(text, 80)),
            Action::Keypress { keys } => format!("press {keys}"),
            Action::Move { x, y } => format!("move mouse to ({x}, {y})"),
            Action::Scroll { scroll_y, .. } if *scroll_y < 0 => {
                format!("scroll up by {}", scroll_y.unsigned_abs())
            }
            Action::Scroll { scroll_y, .. } => format!("scroll down by {scroll_y}"),
            Action::Drag { path } => match (path.first(), path.last()) {
                (Some(from), Some(to)) => format!("drag from {from} to {to}"),
                _ => "drag".to_string(),
            },
            Action::Screenshot => "take screenshot".to_string(),
            Action::Wait => "wait".to_string(),
        }
    }
}

fn coord(value: &Value, field: &str, tag: &str) -> PilotResult<i32> {
    optional_int(value.get(field))
        .ok_or_else(|| PilotError::MalformedAction(format!("{tag} action is missing numeric {field}")))
}

fn optional_int(value: Option<&Value>) -> Option<i32> {
    let value = value?;
    if let Some(v) = value.as_i64() {
        return i32::try_from(v).ok();
    }
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .map(|v| v.round() as i32)
}

fn parse_keys(value: Option<&Value>) -> PilotResult<String> {
    let keys = match value {
        Some(Value::String(combo)) => combo.trim().to_string(),
        Some(Value::Array(items)) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in items {
                let key = item.as_str().map(str::trim).ok_or_else(|| {
                    PilotError::MalformedAction(format!("keypress key {item} is not a string"))
                })?;
                match key {
                    "" => {
                        return Err(PilotError::MalformedAction(
                            "keypress action has an empty key".to_string(),
                        ))
                    }
                    // A literal plus would collide with the chord separator.
                    "+" => keys.push("PLUS"),
                    key => keys.push(key),
                }
            }
            keys.join("+")
        }
        _ => String::new(),
    };
    if keys.is_empty() {
        return Err(PilotError::MalformedAction(
            "keypress action has no keys".to_string(),
        ));
    }
    Ok(keys)
}

fn parse_path(value: Option<&Value>) -> PilotResult<Vec<Point>> {
    let items = value
        .and_then(Value::as_array)
        .ok_or_else(|| PilotError::MalformedAction("drag action has no path".to_string()))?;
    let path = items
        .iter()
        .map(|item| {
            Some(Point::new(
                optional_int(item.get("x"))?,
                optional_int(item.get("y"))?,
            ))
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| PilotError::MalformedAction("drag path point is missing x/y".to_string()))?;
    if path.len() < 2 {
        return Err(PilotError::MalformedAction(format!(
            "drag path needs at least two points, got {}",
            path.len()
        )));
    }
    Ok(path)
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect::<String>() + "..."
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn click_defaults_to_left_button() {
        let action = Action::from_value(&json!({"type": "click", "x": 10, "y": 20})).unwrap();
        assert_eq!(
            action,
            Action::Click {
                x: 10,
                y: 20,
                button: MouseButton::Left
            }
        );
    }

    #[test]
    fn wheel_button_is_middle() {
        let action =
            Action::from_value(&json!({"type": "click", "x": 1, "y": 2, "button": "wheel"})).unwrap();
        assert!(matches!(
            action,
            Action::Click {
                button: MouseButton::Middle,
                ..
            }
        ));
    }

    #[test]
    fn unknown_button_is_unsupported() {
        let err = Action::from_value(&json!({"type": "click", "x": 1, "y": 2, "button": "back"}))
            .unwrap_err();
        assert!(matches!(err, PilotError::UnsupportedAction(_)));
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let err = Action::from_value(&json!({"type": "teleport", "x": 1, "y": 2})).unwrap_err();
        match err {
            PilotError::UnsupportedAction(tag) => assert_eq!(tag, "teleport"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn keypress_joins_key_arrays() {
        let action = Action::from_value(&json!({"type": "keypress", "keys": ["CTRL", "SHIFT", "T"]}))
            .unwrap();
        assert_eq!(
            action,
            Action::Keypress {
                keys: "CTRL+SHIFT+T".to_string()
            }
        );
    }

    #[test]
    fn literal_plus_key_survives_joining() {
        let action = Action::from_value(&json!({"type": "keypress", "keys": ["CTRL", "+"]})).unwrap();
        assert_eq!(
            action,
            Action::Keypress {
                keys: "CTRL+PLUS".to_string()
            }
        );
    }

    #[test]
    fn non_string_keys_are_malformed() {
        let err = Action::from_value(&json!({"type": "keypress", "keys": ["CTRL", 5]})).unwrap_err();
        assert!(matches!(err, PilotError::MalformedAction(_)));
        let err = Action::from_value(&json!({"type": "keypress", "keys": ["CTRL", " "]})).unwrap_err();
        assert!(matches!(err, PilotError::MalformedAction(_)));
    }

    #[test]
    fn drag_requires_two_points() {
        let err = Action::from_value(&json!({"type": "drag", "path": [{"x": 1, "y": 1}]})).unwrap_err();
        assert!(matches!(err, PilotError::MalformedAction(_)));

        let action = Action::from_value(&json!({
            "type": "drag",
            "path": [{"x": 10, "y": 10}, {"x": 50, "y": 50}, {"x": 90, "y": 90}]
        }))
        .unwrap();
        assert_eq!(action.describe(), "drag from (10, 10) to (90, 90)");
    }

    #[test]
    fn fractional_coordinates_round() {
        let action = Action::from_value(&json!({"type": "move", "x": 10.6, "y": 3.2})).unwrap();
        assert_eq!(action, Action::Move { x: 11, y: 3 });
    }

    #[test]
    fn scroll_describes_direction() {
        let up = Action::from_value(&json!({"type": "scroll", "scroll_y": -5})).unwrap();
        let down = Action::from_value(&json!({"type": "scroll", "scroll_y": 7, "scroll_x": 0})).unwrap();
        assert_eq!(up.describe(), "scroll up by 5");
        assert_eq!(down.describe(), "scroll down by 7");
    }

    #[test]
    fn missing_tag_is_malformed() {
        let err = Action::from_value(&json!({"x": 1})).unwrap_err();
        assert!(matches!(err, PilotError::MalformedAction(_)));
    }
}
