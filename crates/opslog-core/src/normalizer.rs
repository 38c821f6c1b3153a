//! Turns a loosely-typed [`LogEvent`] into a flat [`CanonicalRecord`].
//!
//! Textual messages that look like JSON objects or arrays are parsed first;
//! anything that fails to parse is kept verbatim. Structured payloads are
//! flattened one object level at a time (`a.b` becomes `a_b`); arrays and
//! other non-primitive leaves are stored as their JSON text.
//!
//! Normalisation never fails. A payload nested deeper than
//! [`MAX_FLATTEN_DEPTH`] yields a record carrying a `serialization_error`
//! field instead of the payload.

use std::borrow::Cow;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::clock::Clock;
use crate::types::{CanonicalRecord, LogEvent, StreamName};

/// Deepest object nesting the flattener will descend into.
pub const MAX_FLATTEN_DEPTH: usize = 32;

/// Field that receives non-object payloads.
pub const MESSAGE_FIELD: &str = "message";

/// Field set on records whose payload could not be flattened.
pub const SERIALIZATION_ERROR_FIELD: &str = "serialization_error";

/// Fields owned by the event itself. Top-level payload keys with these names
/// are stored under [`RESERVED_PREFIX`] instead.
pub const RESERVED_FIELDS: [&str; 2] = ["timestamp", "severity"];

pub const RESERVED_PREFIX: &str = "payload_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlattenError {
    #[error("payload nesting exceeds {0} levels")]
    DepthExceeded(usize),
}

/// Output of [`normalize`]: where the record goes and what it contains.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub stream: StreamName,
    pub record: CanonicalRecord,
}

/// Normalise an event. Field order is `timestamp`, `severity`, then payload
/// fields in payload order. The event's own `timestamp` and `severity` are
/// never replaced by payload fields.
pub fn normalize(event: &LogEvent, clock: &dyn Clock) -> NormalizedEvent {
    let timestamp = event
        .timestamp
        .clone()
        .unwrap_or_else(|| clock.now_rfc3339());

    let mut record = CanonicalRecord::new();
    record.insert("timestamp", Value::String(timestamp.clone()));
    record.insert("severity", Value::String(event.severity.to_string()));

    let payload = parse_message(&event.message);
    match payload.as_ref() {
        Value::Object(map) => {
            if let Err(e) = flatten_into(&mut record, "", map, 1) {
                tracing::warn!(stream = %event.stream, error = %e, "log payload could not be flattened");
                record = CanonicalRecord::new();
                record.insert("timestamp", Value::String(timestamp));
                record.insert("severity", Value::String(event.severity.to_string()));
                record.insert(SERIALIZATION_ERROR_FIELD, Value::String(e.to_string()));
            }
        }
        other => record.insert(MESSAGE_FIELD, to_primitive(other)),
    }

    NormalizedEvent {
        stream: StreamName::sanitize(&event.stream),
        record,
    }
}

/// If `message` is a string that looks like a JSON object or array, try to
/// parse it. Returns the original value on any failure.
pub fn parse_message(message: &Value) -> Cow<'_, Value> {
    if let Value::String(text) = message {
        let trimmed = text.trim();
        let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
            || (trimmed.starts_with('[') && trimmed.ends_with(']'));
        if looks_structured {
            if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
                return Cow::Owned(parsed);
            }
        }
    }
    Cow::Borrowed(message)
}

fn flatten_into(
    record: &mut CanonicalRecord,
    prefix: &str,
    map: &Map<String, Value>,
    depth: usize,
) -> Result<(), FlattenError> {
    if depth > MAX_FLATTEN_DEPTH {
        return Err(FlattenError::DepthExceeded(MAX_FLATTEN_DEPTH));
    }
    for (key, value) in map {
        let name = if prefix.is_empty() && RESERVED_FIELDS.contains(&key.as_str()) {
            format!("{RESERVED_PREFIX}{key}")
        } else if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}_{key}")
        };
        match value {
            Value::Object(inner) => flatten_into(record, &name, inner, depth + 1)?,
            leaf => record.insert(name, to_primitive(leaf)),
        }
    }
    Ok(())
}

fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => {
            Value::String(serde_json::to_string(value).unwrap_or_default())
        }
        primitive => primitive.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
