//! Message envelopes exchanged over the channel.
//!
//! Requests carry `{op, id, data}` and every one of them is answered by
//! exactly one reply correlated by `id`. The single exception is
//! `dispatchEvent`, which the host emits unsolicited, with no id, and which
//! never solicits a reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handle::ObjectId;

/// Correlation id assigned by the client, monotonically increasing.
pub type RequestId = u32;

/// Client-to-host request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    #[serde(flatten)]
    pub call: Call,
}

/// Operations a client may request, discriminated by `op` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "camelCase")]
pub enum Call {
    Release(ReleaseRequest),
    RegisterEvent(EventTarget),
    UnregisterEvent(EventTarget),
    InvokeMethod(InvokeRequest),
}

impl Call {
    /// Wire name of the operation, for diagnostics.
    pub fn op(&self) -> &'static str {
        match self {
            Call::Release(_) => "release",
            Call::RegisterEvent(_) => "registerEvent",
            Call::UnregisterEvent(_) => "unregisterEvent",
            Call::InvokeMethod(_) => "invokeMethod",
        }
    }
}

/// Drops one reference to a registered object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub object_id: ObjectId,
    /// Also invoke the value's dispose capability before dropping the reference.
    #[serde(default)]
    pub dispose: bool,
}

/// Target of a listener-count adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTarget {
    pub object_id: ObjectId,
}

/// Runs a shipped function against a registered object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    /// Invocation context; 0 is the implicit root object.
    pub object_id: ObjectId,
    /// Opaque function descriptor, reconstructed and invoked host-side.
    #[serde(rename = "fn")]
    pub source: String,
    /// Call arguments; reference wrappers may appear at any depth.
    pub params: Vec<Value>,
    /// Register the result and reply with a reference wrapper instead of a copy.
    pub return_handle: bool,
}

/// Host-to-client reply envelope, echoing the request's op and id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: RequestId,
    #[serde(flatten)]
    pub body: ReplyBody,
}

/// Reply payloads per operation; bookkeeping ops are bare acknowledgements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "camelCase")]
pub enum ReplyBody {
    Release,
    RegisterEvent,
    UnregisterEvent,
    InvokeMethod(InvokeReply),
}

/// Outcome of an `invokeMethod` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// Structured failure carried in an error reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    /// Diagnostic only; never used for control flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// Host-initiated broadcast; carries no id and never solicits a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub op: DispatchEventOp,
    pub data: EventNotification,
}

impl EventMessage {
    pub fn new(data: EventNotification) -> Self {
        Self { op: DispatchEventOp::DispatchEvent, data }
    }
}

/// Marker op for event messages; exactly the string `dispatchEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchEventOp {
    #[serde(rename = "dispatchEvent")]
    DispatchEvent,
}

/// One event fired by a registered emitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNotification {
    pub object_id: ObjectId,
    pub event: Value,
}

/// Discriminated union of host-to-client messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostMessage {
    /// Correlated reply (has `id`).
    Reply(Reply),
    /// Unsolicited event broadcast.
    Event(EventMessage),
    /// Unknown message type (forward-compatible catch-all).
    Unknown(Value),
}
