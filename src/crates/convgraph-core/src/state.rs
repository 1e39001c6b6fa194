//! State, partial updates, and the reducers that merge them
//!
//! A thread's [`State`] is a JSON object whose fields are fixed by a
//! [`StateSchema`]. Every field has exactly one [`Reducer`], chosen when the
//! graph is defined:
//!
//! | Reducer | Behavior | Typical field |
//! |---------|----------|---------------|
//! | [`OverwriteReducer`] | last write wins | routing decisions, flags |
//! | [`AppendReducer`] | concatenate lists | event logs |
//! | [`AddMessagesReducer`] | append, replace by message id | `messages` |
//!
//! Nodes and callers never hand back a whole state. They produce a
//! [`StateUpdate`] naming only the fields they change, and
//! [`StateSchema::apply`] merges it.
//!
//! ```rust
//! use convgraph_core::state::{OverwriteReducer, State, StateSchema, StateUpdate};
//! use convgraph_core::messages::Message;
//!
//! let schema = StateSchema::messages().with_field("next_representative", OverwriteReducer);
//!
//! let mut state = State::new();
//! let update = StateUpdate::new()
//!     .message(Message::user("I want a refund"))
//!     .set("next_representative", "BILLING");
//! schema.apply(&mut state, &update).unwrap();
//!
//! assert_eq!(state.get_str("next_representative"), Some("BILLING"));
//! assert_eq!(state.messages().unwrap().len(), 1);
//! ```
//!
//! Accumulating fields are checked after every merge: a reducer result
//! shorter than the prior value is rejected with [`StateError::Shrunk`], and
//! the state is left as it was.

use crate::messages::{add_messages, Message};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Field holding the conversation history
pub const MESSAGES: &str = "messages";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Field '{0}' is not declared in the state schema")]
    UnknownField(String),

    /// An accumulating field would lose entries
    #[error("Accumulating field '{field}' would shrink from {before} to {after} entries")]
    Shrunk {
        field: String,
        before: usize,
        after: usize,
    },

    #[error("Reducer for field '{field}' failed: {reason}")]
    Reducer { field: String, reason: String },

    /// A node wrote a field outside its declared outputs
    #[error("Node '{node}' wrote undeclared field '{field}'")]
    UndeclaredWrite { node: String, field: String },

    #[error("Field '{field}' has an unexpected shape: {reason}")]
    Decode { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Merged values of a thread
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(Map<String, Value>);

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.0.get(field).and_then(Value::as_bool)
    }

    /// Decode a field; `Ok(None)` when it is absent or null
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>> {
        match self.0.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| StateError::Decode {
                    field: field.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// The conversation history, empty when no message was written yet
    pub fn messages(&self) -> Result<Vec<Message>> {
        Ok(self.get_as(MESSAGES)?.unwrap_or_default())
    }

    pub fn last_message(&self) -> Result<Option<Message>> {
        Ok(self.messages()?.pop())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_values(self) -> Map<String, Value> {
        self.0
    }

    pub(crate) fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.0.get_mut(field)
    }

    pub(crate) fn insert(&mut self, field: String, value: Value) {
        self.0.insert(field, value);
    }

    /// Copy of the state restricted to `fields`
    pub(crate) fn project(&self, fields: &[String]) -> State {
        let values = fields
            .iter()
            .filter_map(|f| self.0.get(f).map(|v| (f.clone(), v.clone())))
            .collect();
        State(values)
    }
}

impl From<Map<String, Value>> for State {
    fn from(values: Map<String, Value>) -> Self {
        Self(values)
    }
}

/// Partial state produced by a node or an external caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateUpdate(Map<String, Value>);

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` to `field`
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Add a message to the `messages` field of this update
    pub fn message(mut self, message: Message) -> Self {
        let entry = self
            .0
            .entry(MESSAGES.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(items) => items.push(message.to_value()),
            other => *other = Value::Array(vec![other.take(), message.to_value()]),
        }
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for StateUpdate {
    fn from(values: Map<String, Value>) -> Self {
        Self(values)
    }
}

/// Merge rule for one state field
pub trait Reducer: Send + Sync {
    /// Combine the current value (`Null` when unset) with an update
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String>;

    fn name(&self) -> &str;

    /// Accumulating fields are lists that must never lose entries
    fn accumulates(&self) -> bool {
        false
    }
}

/// Last write wins
#[derive(Debug, Clone, Copy, Default)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> std::result::Result<Value, String> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }
}

/// List concatenation; a non-list update is appended as one element
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        let mut items = match current {
            Value::Null => Vec::new(),
            Value::Array(items) => items.clone(),
            other => return Err(format!("current value is not a list: {other}")),
        };
        match update {
            Value::Array(more) => items.extend(more.iter().cloned()),
            single => items.push(single.clone()),
        }
        Ok(Value::Array(items))
    }

    fn name(&self) -> &str {
        "append"
    }

    fn accumulates(&self) -> bool {
        true
    }
}

/// Message-list merge by id, see [`add_messages`]
#[derive(Debug, Clone, Copy, Default)]
pub struct AddMessagesReducer;

impl AddMessagesReducer {
    fn decode(value: &Value) -> std::result::Result<Vec<Message>, String> {
        let decoded = match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(_) => serde_json::from_value(value.clone()),
            single => serde_json::from_value(single.clone()).map(|m| vec![m]),
        };
        decoded.map_err(|e| format!("not a message list: {e}"))
    }
}

impl Reducer for AddMessagesReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        let merged = add_messages(Self::decode(current)?, Self::decode(update)?);
        serde_json::to_value(merged).map_err(|e| e.to_string())
    }

    fn name(&self) -> &str {
        "add_messages"
    }

    fn accumulates(&self) -> bool {
        true
    }
}

fn list_len(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Null => 0,
        _ => 1,
    }
}

/// Declared fields of a graph's state and their reducers
#[derive(Clone, Default)]
pub struct StateSchema {
    fields: BTreeMap<String, Arc<dyn Reducer>>,
}

impl fmt::Debug for StateSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.fields.iter().map(|(k, r)| (k, r.name())))
            .finish()
    }
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema with a `messages` field merged by [`AddMessagesReducer`]
    pub fn messages() -> Self {
        Self::new().with_field(MESSAGES, AddMessagesReducer)
    }

    /// Declare a field; re-declaring a field replaces its reducer
    pub fn add_field(&mut self, field: impl Into<String>, reducer: impl Reducer + 'static) -> &mut Self {
        self.fields.insert(field.into(), Arc::new(reducer));
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, reducer: impl Reducer + 'static) -> Self {
        self.add_field(field, reducer);
        self
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn reducer_name(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|r| r.name())
    }

    pub fn is_accumulating(&self, field: &str) -> bool {
        self.fields.get(field).is_some_and(|r| r.accumulates())
    }

    /// Reject updates naming undeclared fields
    pub fn validate_update(&self, update: &StateUpdate) -> Result<()> {
        match update.fields().find(|f| !self.contains(f)) {
            Some(field) => Err(StateError::UnknownField(field.clone())),
            None => Ok(()),
        }
    }

    /// Merge `update` into `state`; on error `state` is unchanged
    pub fn apply(&self, state: &mut State, update: &StateUpdate) -> Result<()> {
        self.validate_update(update)?;

        let mut staged = Vec::with_capacity(update.as_map().len());
        for (field, value) in update.iter() {
            let reducer = self
                .fields
                .get(field)
                .ok_or_else(|| StateError::UnknownField(field.clone()))?;
            let current = state.get(field).cloned().unwrap_or(Value::Null);

            let merged = reducer.reduce(&current, value).map_err(|reason| StateError::Reducer {
                field: field.clone(),
                reason,
            })?;

            if reducer.accumulates() {
                let (before, after) = (list_len(&current), list_len(&merged));
                if after < before || !merged.is_array() {
                    return Err(StateError::Shrunk {
                        field: field.clone(),
                        before,
                        after,
                    });
                }
            }
            staged.push((field.clone(), merged));
        }

        for (field, value) in staged {
            state.insert(field, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn support_schema() -> StateSchema {
        StateSchema::messages()
            .with_field("next_representative", OverwriteReducer)
            .with_field("refund_authorized", OverwriteReducer)
            .with_field("log", AppendReducer)
    }

    #[test]
    fn test_overwrite_reducer() {
        let result = OverwriteReducer.reduce(&json!("BILLING"), &json!("REFUND")).unwrap();
        assert_eq!(result, json!("REFUND"));
    }

    #[test]
    fn test_append_reducer() {
        assert_eq!(AppendReducer.reduce(&json!([1, 2]), &json!([3])).unwrap(), json!([1, 2, 3]));
        assert_eq!(AppendReducer.reduce(&Value::Null, &json!("a")).unwrap(), json!(["a"]));
        assert!(AppendReducer.reduce(&json!(5), &json!([1])).is_err());
    }

    #[test]
    fn test_add_messages_reducer_accepts_single_message() {
        let current = json!([{"id": "1", "role": "user", "content": "hi"}]);
        let update = json!({"id": "2", "role": "assistant", "content": "hello"});

        let merged = AddMessagesReducer.reduce(&current, &update).unwrap();
        assert_eq!(merged.as_array().unwrap().len(), 2);
        assert_eq!(merged[1]["content"], json!("hello"));
    }

    #[test]
    fn test_apply_merges_per_field() {
        let schema = support_schema();
        let mut state = State::new();

        schema
            .apply(
                &mut state,
                &StateUpdate::new()
                    .message(Message::user("refund please"))
                    .set("next_representative", "BILLING")
                    .set("log", json!(["categorized"])),
            )
            .unwrap();
        schema
            .apply(
                &mut state,
                &StateUpdate::new()
                    .message(Message::assistant("on it"))
                    .set("next_representative", "REFUND")
                    .set("log", "routed"),
            )
            .unwrap();

        assert_eq!(state.messages().unwrap().len(), 2);
        assert_eq!(state.get_str("next_representative"), Some("REFUND"));
        assert_eq!(state.get("log"), Some(&json!(["categorized", "routed"])));
    }

    #[test]
    fn test_unknown_field_rejected_atomically() {
        let schema = support_schema();
        let mut state = State::new();
        let update = StateUpdate::new()
            .set("next_representative", "BILLING")
            .set("refundAuthorized", true);

        let err = schema.apply(&mut state, &update).unwrap_err();
        assert_eq!(err, StateError::UnknownField("refundAuthorized".into()));
        assert!(state.values().is_empty());
    }

    /// Reducer that forgets everything, to exercise the shrink guard
    struct Forgetful;

    impl Reducer for Forgetful {
        fn reduce(&self, _current: &Value, _update: &Value) -> std::result::Result<Value, String> {
            Ok(json!([]))
        }

        fn name(&self) -> &str {
            "forgetful"
        }

        fn accumulates(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_shrinking_accumulator_rejected() {
        let schema = StateSchema::new().with_field("log", Forgetful);
        let mut state = State::from(json!({"log": [1, 2]}).as_object().cloned().unwrap());

        let err = schema
            .apply(&mut state, &StateUpdate::new().set("log", json!([3])))
            .unwrap_err();
        assert!(matches!(err, StateError::Shrunk { before: 2, after: 0, .. }));
        assert_eq!(state.get("log"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_reducer_failure_names_field() {
        let schema = support_schema();
        let mut state = State::new();
        let err = schema
            .apply(&mut state, &StateUpdate::new().set(MESSAGES, 42))
            .unwrap_err();
        assert!(matches!(err, StateError::Reducer { ref field, .. } if field == MESSAGES));
    }

    #[test]
    fn test_typed_accessors() {
        let state = State::from(
            json!({"refund_authorized": true, "next_representative": null})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(state.get_bool("refund_authorized"), Some(true));
        assert_eq!(state.get_as::<String>("next_representative").unwrap(), None);
        assert!(state.get_as::<u32>("refund_authorized").is_err());
        assert!(state.messages().unwrap().is_empty());
    }

    #[test]
    fn test_schema_introspection() {
        let schema = support_schema();
        let fields: Vec<&str> = schema.fields().collect();
        assert_eq!(fields, vec!["log", "messages", "next_representative", "refund_authorized"]);
        assert_eq!(schema.reducer_name(MESSAGES), Some("add_messages"));
        assert!(schema.is_accumulating("log"));
        assert!(!schema.is_accumulating("refund_authorized"));
    }
}
