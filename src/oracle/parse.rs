//! Reading oracle output as untrusted input.
//!
//! Shape is checked field by field. Anything that cannot be read degrades to
//! fewer actions, never to an error.

use crate::domain::{ActionKind, CandidateDecision, Decimal, Instrument, RequestedAction};
use serde_json::Value;
use tracing::debug;

/// Kinds that mean "do nothing" and are dropped silently.
const PASSIVE_KINDS: [&str; 4] = ["hold", "wait", "none", "no_action"];

/// Prices, sizes and protection levels above this are dropped as unreadable.
const MAX_AMOUNT: i64 = 1_000_000_000_000_000;

/// Parse free-form oracle text into a candidate decision.
///
/// Accepts a bare JSON array of actions, an object with an `actions` or
/// `decisions` array, or either of those embedded in surrounding prose.
/// Prose before the JSON becomes the rationale unless the object carries
/// its own.
pub fn parse_candidate(text: &str) -> CandidateDecision {
    let Some((prefix, value)) = extract_json(text) else {
        debug!("Oracle output contains no JSON, treating as no action");
        return CandidateDecision::no_action(text.trim());
    };

    let (items, rationale) = match &value {
        Value::Array(items) => (items.as_slice(), None),
        Value::Object(map) => {
            let rationale = ["rationale", "reasoning", "thinking"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::to_string);
            let items = ["actions", "decisions"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_array))
                .map(Vec::as_slice);
            match items {
                Some(items) => (items, rationale),
                // A single action object.
                None => (std::slice::from_ref(&value), rationale),
            }
        }
        _ => (&[][..], None),
    };

    let actions = items.iter().filter_map(parse_action).collect();
    CandidateDecision {
        actions,
        rationale: rationale.unwrap_or_else(|| prefix.trim().to_string()),
    }
}

/// Locate the outermost JSON array or object in `text`, returning the text
/// before it and the parsed value.
fn extract_json(text: &str) -> Option<(&str, Value)> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        if value.is_array() || value.is_object() {
            return Some(("", value));
        }
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        let Some(start) = text.find(open) else {
            continue;
        };
        let Some(end) = text.rfind(close) else {
            continue;
        };
        if end <= start {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
            return Some((&text[..start], value));
        }
    }
    None
}

fn parse_action(item: &Value) -> Option<RequestedAction> {
    let Some(map) = item.as_object() else {
        debug!(item = %item, "Skipping non-object oracle action");
        return None;
    };

    let raw_kind = map.get("action").or_else(|| map.get("kind"))?.as_str()?;
    let normalized = raw_kind.trim().to_ascii_lowercase();
    if PASSIVE_KINDS.contains(&normalized.as_str()) {
        return None;
    }
    let kind: ActionKind = match normalized.parse() {
        Ok(kind) => kind,
        Err(e) => {
            debug!(error = %e, "Skipping oracle action");
            return None;
        }
    };

    let symbol = map
        .get("symbol")
        .or_else(|| map.get("instrument"))
        .and_then(Value::as_str)?;
    let instrument = Instrument::normalize(symbol);
    if instrument.as_str().is_empty() {
        return None;
    }

    let decimal = |keys: &[&str]| keys.iter().find_map(|k| map.get(*k).and_then(decimal_value));
    let amount = |keys: &[&str]| decimal(keys).filter(in_range);

    let mut action = RequestedAction::new(instrument, kind);
    action.price_hint = amount(&["price", "entry_price"]);
    action.quantity = amount(&["quantity"]);
    action.notional_usd = amount(&["position_size_usd", "notional_usd"]);
    action.stop_loss = amount(&["stop_loss"]);
    action.take_profit = amount(&["take_profit"]);
    action.leverage = decimal(&["leverage"])
        .map(|d| d.to_f64().round())
        .filter(|l| *l >= 1.0 && *l <= u32::MAX as f64)
        .map_or(1, |l| l as u32);
    action.confidence = decimal(&["confidence"])
        .map(|d| d.to_f64().round().clamp(0.0, 100.0) as u32)
        .unwrap_or(0);
    action.reasoning = map
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(action)
}

fn in_range(value: &Decimal) -> bool {
    value.is_positive() && *value <= Decimal::from(MAX_AMOUNT)
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn decimal_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str_canonical(s).ok(),
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        _ => None,
    }
}
