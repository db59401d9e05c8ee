//! Objects exposable through the host registry.
//!
//! Anything handed to the driver by reference implements [`RemoteObject`].
//! Optional capabilities are trait methods, not runtime type inspection: an
//! object that broadcasts events returns its [`EventSource`] surface, one
//! with driver-visible cleanup returns its [`Disposable`] surface, and one
//! that can also travel by value returns a JSON projection.

use std::sync::Arc;

use downcast_rs::{DowncastSync, impl_downcast};
use serde_json::Value;

/// Base trait for every object exposed through the registry.
pub trait RemoteObject: DowncastSync {
    /// Event-emitter capability, when the value broadcasts events.
    fn as_event_source(&self) -> Option<&dyn EventSource> {
        None
    }

    /// Dispose capability, when the value has cleanup the driver may request
    /// on release.
    fn as_disposable(&self) -> Option<&dyn Disposable> {
        None
    }

    /// By-value projection for replies that do not request a handle.
    fn to_value(&self) -> Option<Value> {
        None
    }
}

impl_downcast!(sync RemoteObject);

/// Event-emitter shape: values whose events are forwarded to the driver.
pub trait EventSource: Send + Sync {
    /// Installs `sink` to receive every fired event.
    ///
    /// Must not fire synchronously from inside this call; the registry is
    /// still wiring the subscription up.
    fn subscribe(&self, sink: EventSink) -> Subscription;
}

/// Dispose shape: cleanup invoked when the driver releases with `dispose`.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// Sink handed to an event source; forwards every fired event toward the
/// channel. Whether a forwarded event actually reaches the driver is gated
/// by the registry's listener count.
#[derive(Clone)]
pub struct EventSink(Arc<dyn Fn(Value) + Send + Sync>);

impl EventSink {
    pub fn new(forward: impl Fn(Value) + Send + Sync + 'static) -> Self {
        Self(Arc::new(forward))
    }

    /// Forwards one event.
    pub fn emit(&self, event: Value) {
        (self.0)(event)
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventSink")
    }
}

/// RAII handle that tears a subscription down when dropped.
///
/// Returned by [`EventSource::subscribe`]; the registry holds it for the
/// lifetime of the registry entry.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self { unsubscribe: Some(Box::new(unsubscribe)) }
    }

    /// Explicitly tears down, equivalent to dropping.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}
