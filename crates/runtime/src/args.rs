//! Call arguments with handle substitution.
//!
//! Arguments to a remote call are plain JSON except that handles may appear
//! at any depth; on the wire each handle becomes its reference wrapper, and
//! the host substitutes the live object back before invoking.

use std::collections::HashMap;

use serde_json::Value;

use tether_protocol::HandleRef;

use crate::handle::Handle;

/// One call argument; handles may appear at any depth.
#[derive(Debug, Clone)]
pub enum EvalArg {
    /// Plain JSON payload, passed through unchanged.
    Value(Value),
    /// A previously obtained handle; resolves host-side to the object it names.
    Handle(Handle),
    /// List walked element by element.
    List(Vec<EvalArg>),
    /// Mapping walked entry by entry.
    Map(HashMap<String, EvalArg>),
}

impl EvalArg {
    /// Wire form, with every nested handle replaced by its reference wrapper.
    pub(crate) fn into_wire(self) -> Value {
        match self {
            EvalArg::Value(value) => value,
            EvalArg::Handle(handle) => {
                HandleRef { kind: handle.kind(), object_id: handle.object_id() }.to_value()
            }
            EvalArg::List(items) => {
                Value::Array(items.into_iter().map(EvalArg::into_wire).collect())
            }
            EvalArg::Map(entries) => Value::Object(
                entries.into_iter().map(|(key, value)| (key, value.into_wire())).collect(),
            ),
        }
    }
}

impl From<Value> for EvalArg {
    fn from(value: Value) -> Self {
        EvalArg::Value(value)
    }
}

impl From<&Handle> for EvalArg {
    fn from(handle: &Handle) -> Self {
        EvalArg::Handle(handle.clone())
    }
}

impl From<Handle> for EvalArg {
    fn from(handle: Handle) -> Self {
        EvalArg::Handle(handle)
    }
}

impl From<Vec<EvalArg>> for EvalArg {
    fn from(items: Vec<EvalArg>) -> Self {
        EvalArg::List(items)
    }
}

impl From<HashMap<String, EvalArg>> for EvalArg {
    fn from(entries: HashMap<String, EvalArg>) -> Self {
        EvalArg::Map(entries)
    }
}

/// Full argument list for one remote call.
#[derive(Debug, Clone, Default)]
pub struct EvalArgs(Vec<EvalArg>);

impl EvalArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<EvalArg>) -> Self {
        self.0.push(arg.into());
        self
    }

    pub(crate) fn into_wire(self) -> Vec<Value> {
        self.0.into_iter().map(EvalArg::into_wire).collect()
    }
}

impl From<()> for EvalArgs {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl From<EvalArg> for EvalArgs {
    fn from(arg: EvalArg) -> Self {
        Self(vec![arg])
    }
}

impl From<Vec<EvalArg>> for EvalArgs {
    fn from(args: Vec<EvalArg>) -> Self {
        Self(args)
    }
}

impl From<Value> for EvalArgs {
    fn from(value: Value) -> Self {
        Self(vec![EvalArg::Value(value)])
    }
}

impl From<&Handle> for EvalArgs {
    fn from(handle: &Handle) -> Self {
        Self(vec![EvalArg::from(handle)])
    }
}

impl From<Handle> for EvalArgs {
    fn from(handle: Handle) -> Self {
        Self(vec![EvalArg::Handle(handle)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_values_pass_through_unchanged() {
        let args = EvalArgs::new().arg(json!(1)).arg(json!("two")).arg(json!({"three": [4]}));
        assert_eq!(args.into_wire(), vec![json!(1), json!("two"), json!({"three": [4]})]);
    }

    #[test]
    fn nested_structures_are_walked() {
        let args = EvalArgs::from(EvalArg::List(vec![
            EvalArg::Value(json!("head")),
            EvalArg::Map(HashMap::from([("key".to_string(), EvalArg::Value(json!(true)))])),
        ]));
        assert_eq!(args.into_wire(), vec![json!(["head", {"key": true}])]);
    }
}
