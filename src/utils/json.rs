use serde_json::{Map, Value};

/// Presence of a key in a loosely typed payload.
///
/// Blank strings count as `Null`: form clients send `""` for untouched inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Omitted,
    Null,
    Present(&'a Value),
}

impl<'a> FieldValue<'a> {
    pub fn is_missing(&self) -> bool {
        !matches!(self, FieldValue::Present(_))
    }

    pub fn value(&self) -> Option<&'a Value> {
        match self {
            FieldValue::Present(value) => Some(value),
            _ => None,
        }
    }
}

pub fn classify<'a>(payload: &'a Map<String, Value>, key: &str) -> FieldValue<'a> {
    match payload.get(key) {
        None => FieldValue::Omitted,
        Some(Value::Null) => FieldValue::Null,
        Some(Value::String(text)) if text.trim().is_empty() => FieldValue::Null,
        Some(value) => FieldValue::Present(value),
    }
}

/// First key that carries a value.
pub fn classify_any<'a>(payload: &'a Map<String, Value>, keys: &[&str]) -> FieldValue<'a> {
    let mut seen = FieldValue::Omitted;
    for key in keys {
        match classify(payload, key) {
            FieldValue::Present(value) => return FieldValue::Present(value),
            FieldValue::Null => seen = FieldValue::Null,
            FieldValue::Omitted => {}
        }
    }
    seen
}

/// Trimmed text of a string or number; anything else is `None`.
pub fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub fn optional_text(payload: &Map<String, Value>, key: &str) -> Option<String> {
    classify(payload, key).value().and_then(text_of)
}
