use serde_json::Value;

use crate::agent_engine::state::{Action, MouseButton, PendingSafetyCheck, Point, Proposal};
use crate::errors::{ChartPilotError, ChartPilotResult};
use crate::llm::types::{ComputerCallWire, ResponsesResponse};

/// Default for a `wait` action that names no duration.
const DEFAULT_WAIT_MS: u64 = 1000;

fn malformed(msg: impl Into<String>) -> ChartPilotError {
    ChartPilotError::MalformedResponse(msg.into())
}

/// Decodes a raw response body into a proposal. Anything that cannot be turned into
/// well-formed actions is rejected as a whole; nothing is partially accepted.
pub fn parse_response(body: &str) -> ChartPilotResult<Proposal> {
    let response: ResponsesResponse =
        serde_json::from_str(body).map_err(|e| malformed(format!("invalid JSON: {e}")))?;
    proposal_from_response(response)
}

pub fn proposal_from_response(response: ResponsesResponse) -> ChartPilotResult<Proposal> {
    let exchange_id = response
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| malformed("response has no id"))?;

    let mut actions = Vec::new();
    let mut safety_checks: Vec<PendingSafetyCheck> = Vec::new();
    let mut call_id = None;
    let mut message: Option<String> = None;
    let mut reasoning: Option<String> = None;

    for item in response.output {
        let item_type = item["type"].as_str().map(str::to_owned);
        match item_type.as_deref() {
            Some("computer_call") => {
                let call: ComputerCallWire = serde_json::from_value(item)
                    .map_err(|e| malformed(format!("computer_call: {e}")))?;
                let id = call
                    .call_id
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| malformed("computer_call without call_id"))?;
                // a report answers exactly one call
                if let Some(first) = &call_id {
                    return Err(malformed(format!(
                        "response carries more than one computer_call ({first}, {id})"
                    )));
                }
                let action = call
                    .action
                    .ok_or_else(|| malformed(format!("computer_call {id} has no action")))?;
                actions.push(parse_action(&action)?);
                safety_checks.extend(call.pending_safety_checks.into_iter().map(Into::into));
                call_id = Some(id);
            }
            Some("message") => {
                let text = message_text(&item);
                if !text.is_empty() {
                    append_line(&mut message, &text);
                }
            }
            Some("text") => {
                if let Some(text) = item["text"].as_str() {
                    append_line(&mut message, text);
                }
            }
            Some("reasoning") => {
                if let Some(summary) = item["summary"].as_array() {
                    for part in summary {
                        if let Some(text) = part["text"].as_str() {
                            append_line(&mut reasoning, text);
                        }
                    }
                }
            }
            other => {
                tracing::debug!(item_type = ?other, "ignoring response output item");
            }
        }
    }

    Ok(Proposal {
        exchange_id,
        call_id,
        actions,
        safety_checks,
        message,
        reasoning,
    })
}

fn append_line(target: &mut Option<String>, text: &str) {
    match target {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(text);
        }
        None => *target = Some(text.to_string()),
    }
}

fn message_text(item: &Value) -> String {
    item["content"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn int_field(action: &Value, field: &str, kind: &str) -> ChartPilotResult<i64> {
    action[field]
        .as_i64()
        .or_else(|| action[field].as_f64().map(|f| f.round() as i64))
        .ok_or_else(|| malformed(format!("{kind} action missing integer '{field}'")))
}

fn point(value: &Value, kind: &str) -> ChartPilotResult<Point> {
    Ok(Point {
        x: int_field(value, "x", kind)?,
        y: int_field(value, "y", kind)?,
    })
}

pub fn parse_action(action: &Value) -> ChartPilotResult<Action> {
    let kind = action["type"]
        .as_str()
        .ok_or_else(|| malformed("action without type"))?;

    match kind {
        "click" => {
            let button = match action["button"].as_str().unwrap_or("left") {
                "left" => MouseButton::Left,
                "right" => MouseButton::Right,
                "middle" => MouseButton::Middle,
                "back" => MouseButton::Back,
                "forward" => MouseButton::Forward,
                "wheel" => MouseButton::Wheel,
                other => return Err(malformed(format!("unknown mouse button '{other}'"))),
            };
            let p = point(action, kind)?;
            Ok(Action::Click { button, x: p.x, y: p.y })
        }
        "double_click" => {
            let p = point(action, kind)?;
            Ok(Action::DoubleClick { x: p.x, y: p.y })
        }
        "move" => {
            let p = point(action, kind)?;
            Ok(Action::Move { x: p.x, y: p.y })
        }
        "drag" => {
            let path = action["path"]
                .as_array()
                .ok_or_else(|| malformed("drag action missing 'path'"))?
                .iter()
                .map(|p| point(p, kind))
                .collect::<ChartPilotResult<Vec<_>>>()?;
            Ok(Action::Drag { path })
        }
        "type" => {
            let text = action["text"]
                .as_str()
                .ok_or_else(|| malformed("type action missing 'text'"))?;
            Ok(Action::TypeText { text: text.to_string() })
        }
        "keypress" => {
            let keys = action["keys"]
                .as_array()
                .ok_or_else(|| malformed("keypress action missing 'keys'"))?
                .iter()
                .map(|k| {
                    k.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| malformed("keypress keys must be strings"))
                })
                .collect::<ChartPilotResult<Vec<_>>>()?;
            match keys.len() {
                0 => Err(malformed("keypress action with no keys")),
                1 => Ok(Action::KeyPress { key: keys[0].clone() }),
                _ => Ok(Action::Hotkey { keys }),
            }
        }
        "scroll" => {
            let p = point(action, kind)?;
            Ok(Action::Scroll {
                x: p.x,
                y: p.y,
                delta_x: action["scroll_x"].as_i64().unwrap_or(0),
                delta_y: action["scroll_y"].as_i64().unwrap_or(0),
            })
        }
        "wait" => Ok(Action::Wait {
            ms: action["ms"].as_u64().unwrap_or(DEFAULT_WAIT_MS),
        }),
        "screenshot" => Ok(Action::Screenshot),
        other => Err(malformed(format!("unknown action type '{other}'"))),
    }
}
