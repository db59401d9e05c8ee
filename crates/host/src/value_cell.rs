//! Mutable JSON value as a remote object.

use parking_lot::Mutex;
use serde_json::Value;

use crate::object::RemoteObject;

/// Remote object holding one mutable JSON value.
///
/// This is the identity a plain by-value result gets when the driver asks
/// for a handle: later calls can mutate it host-side and read it back.
pub struct ValueCell {
    value: Mutex<Value>,
}

impl ValueCell {
    pub fn new(value: Value) -> Self {
        Self { value: Mutex::new(value) }
    }

    /// Current contents, cloned.
    pub fn snapshot(&self) -> Value {
        self.value.lock().clone()
    }

    /// Swaps the contents, returning the previous value.
    pub fn replace(&self, value: Value) -> Value {
        std::mem::replace(&mut *self.value.lock(), value)
    }

    /// Mutates the contents in place under the cell's lock.
    pub fn update<T>(&self, mutate: impl FnOnce(&mut Value) -> T) -> T {
        mutate(&mut *self.value.lock())
    }
}

impl RemoteObject for ValueCell {
    fn to_value(&self) -> Option<Value> {
        Some(self.snapshot())
    }
}

impl std::fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ValueCell").field(&*self.value.lock()).finish()
    }
}
