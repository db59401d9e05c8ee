//! Host-side protocol interpreter.
//!
//! The dispatcher owns the host end of the channel: a reader task feeds the
//! inbound queue, a writer task drains the outbound queue, and the dispatch
//! loop in between interprets operations against the [`Registry`].
//!
//! Bookkeeping operations (release, listener counts) are handled inline in
//! arrival order. `invokeMethod` is spawned onto its own task, because an
//! invocation may suspend arbitrarily and must never stall the loop:
//! concurrent in-flight calls are expected, replies may complete out of
//! request order, and only the reply id correlates. A failing call becomes a
//! structured error reply; it never tears the channel down.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use tether_protocol::{
    Call, EventMessage, HandleRef, InvokeReply, InvokeRequest, ReleaseRequest, Reply, ReplyBody,
    Request,
};
use tether_runtime::transport::TransportParts;

use crate::engine::{ScriptArg, ScriptEngine, ScriptValue};
use crate::error::{Error, Result};
use crate::object::RemoteObject;
use crate::registry::Registry;
use crate::value_cell::ValueCell;

/// Host end of one channel.
pub struct Dispatcher {
    registry: Arc<Registry>,
    engine: Arc<dyn ScriptEngine>,
    parts: TransportParts,
}

impl Dispatcher {
    /// Builds a dispatcher serving `registry` through `engine` over the given
    /// transport. Takes the registry's event stream; one registry serves one
    /// channel at a time.
    pub fn new(registry: Arc<Registry>, engine: Arc<dyn ScriptEngine>, parts: TransportParts) -> Self {
        Self { registry, engine, parts }
    }

    /// Serves the channel until the driver disconnects.
    pub async fn run(self) {
        let Dispatcher { registry, engine, parts } = self;
        let TransportParts { sender: mut transport_sender, receiver: mut transport_receiver, mut message_rx } =
            parts;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Value>();
        let mut events_rx = registry.take_events();

        let reader_handle = tokio::spawn(async move {
            if let Err(e) = transport_receiver.run().await {
                tracing::error!("Transport read error: {}", e);
            }
        });

        let writer_handle = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = transport_sender.send(message).await {
                    tracing::error!("Transport write error: {}", e);
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                inbound = message_rx.recv() => {
                    let Some(message_value) = inbound else { break };
                    match serde_json::from_value::<Request>(message_value) {
                        Ok(request) => {
                            handle_request(&registry, &engine, &outbound_tx, request);
                        }
                        Err(e) => {
                            tracing::error!("Failed to parse request: {}", e);
                        }
                    }
                }
                Some(notification) = events_rx.recv() => {
                    tracing::debug!(object_id = %notification.object_id, "dispatching event");
                    send_message(&outbound_tx, &EventMessage::new(notification));
                }
            }
        }

        // In-flight invoke tasks hold clones of the outbound sender; the
        // writer drains them before exiting.
        drop(outbound_tx);
        let _ = reader_handle.await;
        let _ = writer_handle.await;
    }
}

fn handle_request(
    registry: &Arc<Registry>,
    engine: &Arc<dyn ScriptEngine>,
    outbound_tx: &mpsc::UnboundedSender<Value>,
    request: Request,
) {
    let Request { id, call } = request;
    tracing::debug!(id, op = call.op(), "handling request");

    match call {
        Call::Release(ReleaseRequest { object_id, dispose }) => {
            registry.release(object_id, dispose);
            send_message(outbound_tx, &Reply { id, body: ReplyBody::Release });
        }
        Call::RegisterEvent(target) => {
            registry.listener_added(target.object_id);
            send_message(outbound_tx, &Reply { id, body: ReplyBody::RegisterEvent });
        }
        Call::UnregisterEvent(target) => {
            registry.listener_removed(target.object_id);
            send_message(outbound_tx, &Reply { id, body: ReplyBody::UnregisterEvent });
        }
        Call::InvokeMethod(invoke) => {
            let registry = Arc::clone(registry);
            let engine = Arc::clone(engine);
            let outbound_tx = outbound_tx.clone();
            tokio::spawn(async move {
                let reply = match invoke_method(&registry, engine.as_ref(), invoke).await {
                    Ok(result) => InvokeReply { result: Some(result), error: None },
                    Err(e) => {
                        tracing::debug!(id, "invokeMethod failed: {}", e);
                        InvokeReply { result: None, error: Some(e.to_wire()) }
                    }
                };
                send_message(&outbound_tx, &Reply { id, body: ReplyBody::InvokeMethod(reply) });
            });
        }
    }
}

async fn invoke_method(
    registry: &Registry,
    engine: &dyn ScriptEngine,
    request: InvokeRequest,
) -> Result<Value> {
    let context = registry.resolve(request.object_id)?;
    let args = request
        .params
        .iter()
        .map(|param| substitute(registry, param))
        .collect::<Result<Vec<_>>>()?;

    let value = engine.invoke(&request.source, context, args).await?;

    if request.return_handle {
        let object = match value {
            ScriptValue::Object(object) => object,
            // Plain data still gets an identity so it can be mutated and
            // read back through later calls.
            ScriptValue::Data(data) => Arc::new(ValueCell::new(data)) as Arc<dyn RemoteObject>,
        };
        let (object_id, kind) = registry.register(object);
        Ok(HandleRef { kind, object_id }.to_value())
    } else {
        match value {
            ScriptValue::Data(data) => Ok(data),
            ScriptValue::Object(object) => object.to_value().ok_or(Error::NotSerializable),
        }
    }
}

/// Recursively replaces reference wrappers with the live objects they name.
/// Primitives pass through unchanged; arrays and mappings are walked.
fn substitute(registry: &Registry, param: &Value) -> Result<ScriptArg> {
    if let Some(reference) = HandleRef::from_value(param) {
        return Ok(ScriptArg::Object(registry.resolve(reference.object_id)?));
    }
    match param {
        Value::Array(items) => Ok(ScriptArg::List(
            items.iter().map(|item| substitute(registry, item)).collect::<Result<_>>()?,
        )),
        Value::Object(entries) => Ok(ScriptArg::Map(
            entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), substitute(registry, value)?)))
                .collect::<Result<HashMap<_, _>>>()?,
        )),
        primitive => Ok(ScriptArg::Value(primitive.clone())),
    }
}

fn send_message<T: serde::Serialize>(outbound_tx: &mpsc::UnboundedSender<Value>, message: &T) {
    match serde_json::to_value(message) {
        Ok(value) => {
            let _ = outbound_tx.send(value);
        }
        Err(e) => tracing::error!("Failed to serialize outbound message: {}", e),
    }
}
