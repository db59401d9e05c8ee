//! Host-side invocation strategy for shipped function descriptors.
//!
//! The protocol treats the `fn` field of an `invokeMethod` as an opaque
//! descriptor; a [`ScriptEngine`] decides how it becomes an invocable
//! function of `(context, args…)`. The bundled [`FunctionTable`] resolves
//! descriptors against named native functions registered by the embedder,
//! which keeps the host closed by construction: nothing runs that was not
//! explicitly defined.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::object::RemoteObject;

/// One substituted call argument: reference wrappers already resolved to the
/// live objects they name.
pub enum ScriptArg {
    /// Plain JSON payload.
    Value(Value),
    /// A live registered object, passed by reference.
    Object(Arc<dyn RemoteObject>),
    /// List with substitution applied element by element.
    List(Vec<ScriptArg>),
    /// Mapping with substitution applied entry by entry.
    Map(HashMap<String, ScriptArg>),
}

impl ScriptArg {
    /// Plain JSON payload, when this argument carries no object reference.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ScriptArg::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Live object, when this argument is a substituted reference.
    pub fn as_object(&self) -> Option<&Arc<dyn RemoteObject>> {
        match self {
            ScriptArg::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Downcast shortcut for reference arguments of a known concrete type.
    pub fn downcast<T: RemoteObject>(&self) -> Option<Arc<T>> {
        self.as_object().and_then(|object| Arc::clone(object).downcast_arc::<T>().ok())
    }
}

impl std::fmt::Debug for ScriptArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptArg::Value(value) => f.debug_tuple("Value").field(value).finish(),
            ScriptArg::Object(_) => f.write_str("Object(..)"),
            ScriptArg::List(items) => f.debug_tuple("List").field(items).finish(),
            ScriptArg::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
        }
    }
}

/// Result of an invocation: by-value JSON, or a live object to hand back by
/// reference.
pub enum ScriptValue {
    /// Copied back to the driver (or wrapped in a cell when a handle was
    /// requested).
    Data(Value),
    /// Registered and returned as a reference wrapper; replying by value
    /// requires the object to have a by-value projection.
    Object(Arc<dyn RemoteObject>),
}

impl From<Value> for ScriptValue {
    fn from(value: Value) -> Self {
        ScriptValue::Data(value)
    }
}

/// Future returned by an engine invocation.
pub type InvokeFuture = Pin<Box<dyn Future<Output = Result<ScriptValue>> + Send>>;

/// Strategy turning an opaque function descriptor into an invocable async
/// function.
///
/// This trait decouples the dispatcher from how shipped code runs, the same
/// way host compilation/sandboxing is left open at the protocol level.
pub trait ScriptEngine: Send + Sync {
    /// Invokes `source` with the resolved context object and substituted
    /// arguments. The invocation may suspend arbitrarily; the dispatcher
    /// awaits it without stalling other traffic.
    fn invoke(
        &self,
        source: &str,
        context: Arc<dyn RemoteObject>,
        args: Vec<ScriptArg>,
    ) -> InvokeFuture;
}

type NativeFn =
    Arc<dyn Fn(Arc<dyn RemoteObject>, Vec<ScriptArg>) -> InvokeFuture + Send + Sync>;

/// Engine resolving descriptors against registered native functions.
#[derive(Default, Clone)]
pub struct FunctionTable {
    functions: HashMap<String, NativeFn>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`; a later definition shadows an earlier one.
    pub fn define<F, Fut>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(Arc<dyn RemoteObject>, Vec<ScriptArg>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ScriptValue>> + Send + 'static,
    {
        self.functions
            .insert(name.into(), Arc::new(move |context, args| Box::pin(function(context, args))));
        self
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl ScriptEngine for FunctionTable {
    fn invoke(
        &self,
        source: &str,
        context: Arc<dyn RemoteObject>,
        args: Vec<ScriptArg>,
    ) -> InvokeFuture {
        match self.functions.get(source) {
            Some(function) => function(context, args),
            None => {
                let message = format!("Function {source:?} is not defined");
                Box::pin(async move { Err(Error::Execution { message, trace: None }) })
            }
        }
    }
}

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTable").field("functions", &self.functions.len()).finish()
    }
}
