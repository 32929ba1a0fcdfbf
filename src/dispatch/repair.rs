// Extraction, repair and validation of free-form model output.
//
// Models wrap their JSON in markdown fences, surround it with prose, and make
// a handful of recurring syntax mistakes. Everything here is pure so the
// heuristics can be tested without a network.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use super::action::{Action, DecisionResponse};
use crate::engine::unit::Vec2;
use crate::metrics;

lazy_static! {
    /// `,` directly before a closing brace or bracket.
    static ref TRAILING_COMMA: Regex = Regex::new(r",\s*([}\]])").unwrap();
    /// Coordinate object whose second key was dropped: `{"x": 10, 20}`.
    static ref MISSING_Y_KEY: Regex = Regex::new(
        r#"\{\s*"x"\s*:\s*(-?\d+(?:\.\d+)?)\s*,\s*(-?\d+(?:\.\d+)?)\s*\}"#
    )
    .unwrap();
    /// Key with no value right before a closing brace: `, "y"}` or `, "y": }`.
    static ref DANGLING_KEY: Regex = Regex::new(r#",\s*"[A-Za-z_]+"\s*:?\s*\}"#).unwrap();
}

/// Repair, parse and validate raw model output.
///
/// Returns None when no JSON object can be recovered. Individually invalid
/// actions are dropped; the rest of the batch survives.
pub fn parse_decision_response(raw: &str) -> Option<DecisionResponse> {
    let value = extract_json_object(raw)?;
    let obj = value.as_object()?;

    let error = obj
        .get("error")
        .and_then(Value::as_u64)
        .and_then(|e| u16::try_from(e).ok());

    let actions = match obj.get("actions") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let parsed: Vec<Action> = items.iter().filter_map(parse_action).collect();
            let dropped = items.len() - parsed.len();
            if dropped > 0 {
                tracing::debug!(dropped, kept = parsed.len(), "Dropped schema-invalid actions");
                metrics::ACTIONS_DROPPED_TOTAL
                    .with_label_values(&["schema"])
                    .inc_by(dropped as u64);
            }
            parsed
        }
        Some(_) => return None,
    };

    Some(DecisionResponse { actions, error })
}

/// Strip fences, slice the outermost braces, parse; patch known mistakes
/// only if the first parse fails.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end < start {
        return None;
    }
    let slice = &cleaned[start..=end];

    if let Ok(value) = serde_json::from_str::<Value>(slice) {
        return Some(value);
    }

    let patched = apply_patches(slice);
    match serde_json::from_str::<Value>(&patched) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, "Decision content still invalid after repair");
            None
        }
    }
}

fn apply_patches(json: &str) -> String {
    let step = MISSING_Y_KEY.replace_all(json, r#"{"x": $1, "y": $2}"#);
    let step = DANGLING_KEY.replace_all(&step, "}");
    TRAILING_COMMA.replace_all(&step, "$1").into_owned()
}

fn parse_action(value: &Value) -> Option<Action> {
    let obj = value.as_object()?;
    let unit_id = id_field(obj, &["unitId", "unit_id", "id"])?;
    let kind = obj.get("type")?.as_str()?.trim().to_ascii_uppercase();
    let thought = obj
        .get("thought")
        .and_then(Value::as_str)
        .map(str::to_string);

    match kind.as_str() {
        "MOVE" => Some(Action::Move {
            unit_id,
            target: parse_point(obj.get("target")?)?,
            thought,
        }),
        "ATTACK" => Some(Action::Attack {
            unit_id,
            target_unit_id: id_field(obj, &["targetUnitId", "target_unit_id", "targetId"])?,
            damage: int_field(obj, &["damage"]),
            thought,
        }),
        "HEAL" => Some(Action::Heal {
            unit_id,
            target_unit_id: id_field(obj, &["targetUnitId", "target_unit_id", "targetId"])?,
            amount: int_field(obj, &["healAmount", "amount"]),
            thought,
        }),
        _ => None,
    }
}

/// Ids may arrive as strings or bare numbers.
fn id_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn int_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<i32> {
    keys.iter().find_map(|k| {
        let v = obj.get(*k)?;
        v.as_i64()
            .or_else(|| v.as_f64().map(|f| f.round() as i64))
            .and_then(|n| i32::try_from(n).ok())
    })
}

/// `{"x": .., "y": ..}` or `[x, y]`, both finite.
fn parse_point(value: &Value) -> Option<Vec2> {
    let (x, y) = match value {
        Value::Object(o) => (o.get("x")?.as_f64()?, o.get("y")?.as_f64()?),
        Value::Array(a) if a.len() == 2 => (a[0].as_f64()?, a[1].as_f64()?),
        _ => return None,
    };
    let p = Vec2::new(x, y);
    p.is_finite().then_some(p)
}
