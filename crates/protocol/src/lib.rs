//! Wire types for the tether remote-handle protocol.
//!
//! This crate contains the serde-serializable types exchanged between a
//! driver and a host over the duplex channel. These types represent the
//! "protocol layer" - the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **1:1 with the wire**: Field names match the JSON protocol exactly
//! - **Stable**: Changes only when the wire protocol changes
//!
//! The client runtime and the host build their behavior on top of these
//! types in `tether-runtime` and `tether-host`.

pub mod endpoint;
pub mod handle;
pub mod messages;

pub use handle::{HandleKind, HandleRef, ObjectId};
pub use messages::{
    Call, EventMessage, EventNotification, EventTarget, HostMessage, InvokeReply, InvokeRequest,
    ReleaseRequest, Reply, ReplyBody, Request, RequestId, WireError,
};
