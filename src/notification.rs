//! Parsing of remote-store updates into actuator notifications.
//!
//! The store reports changes either at a single switch (`/<id>/state`) or as
//! a whole collection keyed by id, depending on what changed and whether the
//! stream has just (re)connected. Both shapes are turned into a
//! [`NotificationKind`] here so the synchronization engine consumes them
//! uniformly.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// One actuator's desired state
    Leaf { id: u32, value: bool },
    /// Desired states for several actuators at once, keyed by id
    Snapshot(BTreeMap<u32, bool>),
}

/// How the store delivered the update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateShape {
    /// `data` replaces whatever lives at `path`
    Put,
    /// `data` is an object of relative child paths merged into `path`
    Patch,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("path `{0}` does not address a switch")]
    MalformedPath(String),
    #[error("value at `{path}` is not a switch state: {value}")]
    UnparsableValue { path: String, value: String },
}

/// Turns one store update, relative to the subscribed collection, into a
/// notification. `Ok(None)` means the update carries no switch state, such
/// as a rename of a switch.
pub fn parse_update(
    shape: UpdateShape,
    path: &str,
    data: &Value,
) -> Result<Option<NotificationKind>, NotificationError> {
    match shape {
        UpdateShape::Put => parse_put(path, data),
        UpdateShape::Patch => parse_patch(path, data),
    }
}

fn parse_put(path: &str, data: &Value) -> Result<Option<NotificationKind>, NotificationError> {
    let segments = segments(path);
    match segments.as_slice() {
        [] => parse_collection(path, data).map(|states| Some(NotificationKind::Snapshot(states))),
        [id] => {
            let id = parse_id(path, id)?;
            match data {
                // Switch removed or renamed only, nothing to drive
                Value::Null => Ok(None),
                Value::Object(fields) if !fields.contains_key("state") => Ok(None),
                _ => leaf(path, id, data),
            }
        }
        [id, "state"] => {
            let id = parse_id(path, id)?;
            leaf(path, id, data)
        }
        [id, _] => {
            parse_id(path, id)?;
            Ok(None)
        }
        _ => Err(NotificationError::MalformedPath(path.to_string())),
    }
}

/// A patch is a batch of puts at `path/<key>`; the resulting switch states
/// are merged into one snapshot. Children that do not address a switch are
/// skipped like foreign keys in a snapshot.
fn parse_patch(path: &str, data: &Value) -> Result<Option<NotificationKind>, NotificationError> {
    let Value::Object(children) = data else {
        return Err(unparsable(path, data));
    };

    let mut states = BTreeMap::new();
    for (key, value) in children {
        let child_path = format!("{}/{}", path.trim_end_matches('/'), key);
        match parse_put(&child_path, value) {
            Ok(Some(NotificationKind::Leaf { id, value })) => {
                states.insert(id, value);
            }
            Ok(Some(NotificationKind::Snapshot(snapshot))) => states.extend(snapshot),
            Ok(None) => {}
            Err(e) => debug!("Skipping patch entry: {e}"),
        }
    }

    if states.is_empty() {
        Ok(None)
    } else {
        Ok(Some(NotificationKind::Snapshot(states)))
    }
}

/// Reads a whole collection. Keys that are not ids, and values that carry
/// no switch state, are skipped.
fn parse_collection(path: &str, data: &Value) -> Result<BTreeMap<u32, bool>, NotificationError> {
    let mut states = BTreeMap::new();
    match data {
        Value::Null => {}
        Value::Object(entries) => {
            for (key, value) in entries {
                let Ok(id) = key.parse::<u32>() else {
                    continue;
                };
                if let Some(state) = switch_value(value) {
                    states.insert(id, state);
                }
            }
        }
        // Small integer keys come back from the store as an array indexed by id
        Value::Array(entries) => {
            for (index, value) in entries.iter().enumerate() {
                if let Some(state) = switch_value(value) {
                    states.insert(index as u32, state);
                }
            }
        }
        _ => return Err(unparsable(path, data)),
    }
    Ok(states)
}

fn leaf(path: &str, id: u32, data: &Value) -> Result<Option<NotificationKind>, NotificationError> {
    switch_value(data)
        .map(|value| Some(NotificationKind::Leaf { id, value }))
        .ok_or_else(|| unparsable(path, data))
}

/// Accepts a boolean, the strings "true"/"false", or a switch record with a
/// `state` field.
pub fn switch_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(state) => Some(*state),
        Value::String(text) if text.eq_ignore_ascii_case("true") => Some(true),
        Value::String(text) if text.eq_ignore_ascii_case("false") => Some(false),
        Value::Object(fields) => match fields.get("state") {
            Some(state @ (Value::Bool(_) | Value::String(_))) => switch_value(state),
            _ => None,
        },
        _ => None,
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn parse_id(path: &str, segment: &str) -> Result<u32, NotificationError> {
    segment
        .parse()
        .map_err(|_| NotificationError::MalformedPath(path.to_string()))
}

fn unparsable(path: &str, data: &Value) -> NotificationError {
    NotificationError::UnparsableValue {
        path: path.to_string(),
        value: data.to_string(),
    }
}
