//! Driver-side evaluator: request/reply correlation and event routing.
//!
//! This module implements the correlation layer on top of the transport. It
//! handles:
//! - Generating unique request IDs
//! - Correlating replies with pending requests
//! - Distinguishing unsolicited events from replies
//! - Routing events to locally registered listeners
//!
//! # Message Flow
//!
//! 1. A handle calls `send()` with an operation
//! 2. The evaluator assigns the next ID and creates a oneshot channel
//! 3. The request is serialized and queued for the writer task
//! 4. The caller awaits on the oneshot receiver
//! 5. The message loop receives a reply from the transport
//! 6. The reply is correlated by ID and settled via the oneshot channel
//!
//! Sending never blocks; awaiting a reply suspends only the calling code, so
//! any number of calls may be in flight and complete in any order. When the
//! channel closes, every request still pending is rejected with
//! [`Error::ChannelClosed`] rather than left unsettled.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex as ParkingLotMutex;
use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{mpsc, oneshot};

use tether_protocol::{
    Call, EventNotification, HostMessage, InvokeRequest, ObjectId, ReplyBody, Request, RequestId,
};

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::transport::{self, Transport, TransportParts, TransportReceiver};

/// Callback invoked for every event broadcast to a subscribed object.
///
/// Listener identity is the `Arc` allocation, so the same closure value
/// registered twice counts as two listeners.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Pending request callbacks keyed by request ID.
type CallbackMap = Arc<TokioMutex<HashMap<RequestId, oneshot::Sender<Result<ReplyBody>>>>>;

/// Local event listeners keyed by the remote object they subscribe to.
type ListenerMap = Arc<ParkingLotMutex<HashMap<ObjectId, Vec<Listener>>>>;

/// RAII guard ensuring callback cleanup when a request future is dropped.
struct CancelGuard {
    id: RequestId,
    callbacks: CallbackMap,
    completed: bool,
}

impl CancelGuard {
    fn new(id: RequestId, callbacks: CallbackMap) -> Self {
        Self { id, callbacks, completed: false }
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        let id = self.id;
        let callbacks = Arc::clone(&self.callbacks);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if callbacks.lock().await.remove(&id).is_some() {
                    tracing::debug!(id, "CancelGuard: removed orphaned callback");
                }
            });
        }
    }
}

/// Future returned by [`Evaluator::send`] with automatic cancellation cleanup.
struct ReplyFuture {
    rx: oneshot::Receiver<Result<ReplyBody>>,
    guard: CancelGuard,
}

impl Future for ReplyFuture {
    type Output = Result<ReplyBody>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.guard.complete();
                Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Driver-side endpoint of the channel.
///
/// Correlates requests with replies and routes unsolicited events to
/// registered listeners. Handles are created through
/// [`Evaluator::root_handle`] and
/// [`Handle::evaluate_handle`](crate::handle::Handle::evaluate_handle).
pub struct Evaluator {
    /// Sequential request ID counter.
    last_id: AtomicU32,
    /// Pending request callbacks keyed by request ID.
    callbacks: CallbackMap,
    /// Event listeners per remote object.
    listeners: ListenerMap,
    /// Channel for queuing outbound messages to the writer task.
    outbound_tx: mpsc::UnboundedSender<Value>,
    /// Set once the channel ends so later sends fail fast.
    closed: AtomicBool,
    /// Transport sender (taken by run() to start the writer task).
    transport_sender: TokioMutex<Option<Box<dyn Transport>>>,
    /// Transport receiver (taken by run() to start the reader task).
    transport_receiver: TokioMutex<Option<Box<dyn TransportReceiver>>>,
    /// Inbound messages from the transport (taken by run()).
    message_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
    /// Outbound queue receiver (taken by run() to start the writer task).
    outbound_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
}

impl Evaluator {
    /// Creates an evaluator over the given transport.
    pub fn new(parts: TransportParts) -> Self {
        let TransportParts { sender, receiver, message_rx } = parts;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Self {
            last_id: AtomicU32::new(0),
            callbacks: Arc::new(TokioMutex::new(HashMap::new())),
            listeners: Arc::new(ParkingLotMutex::new(HashMap::new())),
            outbound_tx,
            closed: AtomicBool::new(false),
            transport_sender: TokioMutex::new(Some(sender)),
            transport_receiver: TokioMutex::new(Some(receiver)),
            message_rx: TokioMutex::new(Some(message_rx)),
            outbound_rx: TokioMutex::new(Some(outbound_rx)),
        }
    }

    /// Connects to a host endpoint over WebSocket and starts the message loop.
    pub async fn connect(url: &str) -> Result<Arc<Self>> {
        let parts = transport::connect(url).await?;
        let evaluator = Arc::new(Self::new(parts));
        let run = Arc::clone(&evaluator);
        tokio::spawn(async move { run.run().await });
        Ok(evaluator)
    }

    /// Handle for the implicit root object.
    ///
    /// No wire round-trip: ObjectId 0 always resolves on the host and is
    /// never released.
    pub fn root_handle(self: &Arc<Self>) -> Handle {
        Handle::root(Arc::clone(self))
    }

    /// Sends one request and awaits its reply.
    pub(crate) async fn send(&self, call: Call) -> Result<ReplyBody> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ChannelClosed);
        }

        let id = self.last_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(id, op = call.op(), "sending request");

        let (tx, rx) = oneshot::channel();
        self.callbacks.lock().await.insert(id, tx);

        let guard = CancelGuard::new(id, Arc::clone(&self.callbacks));

        // The channel may have ended between the first check and the insert;
        // the entry would then miss the drain. The guard cleans it up.
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ChannelClosed);
        }

        let request = Request { id, call };
        let request_value = serde_json::to_value(&request)?;

        if self.outbound_tx.send(request_value).is_err() {
            tracing::error!("Failed to queue request: outbound channel closed");
            return Err(Error::ChannelClosed);
        }

        ReplyFuture { rx, guard }.await
    }

    /// Sends an `invokeMethod` request, surfacing error replies as rejections.
    pub(crate) async fn invoke(&self, request: InvokeRequest) -> Result<Value> {
        match self.send(Call::InvokeMethod(request)).await? {
            ReplyBody::InvokeMethod(reply) => {
                if let Some(error) = reply.error {
                    return Err(Error::Remote { message: error.message, trace: error.trace });
                }
                Ok(reply.result.unwrap_or(Value::Null))
            }
            other => Err(Error::Protocol(format!("unexpected reply body: {other:?}"))),
        }
    }

    /// Records a listener for `object_id`; duplicates are kept.
    pub(crate) fn add_local_listener(&self, object_id: ObjectId, listener: Listener) {
        self.listeners.lock().entry(object_id).or_default().push(listener);
    }

    /// Removes the first occurrence matching by callback identity.
    ///
    /// Returns false when no occurrence was registered.
    pub(crate) fn remove_local_listener(&self, object_id: ObjectId, listener: &Listener) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(&object_id) else {
            return false;
        };
        let Some(position) = list.iter().position(|l| Arc::ptr_eq(l, listener)) else {
            return false;
        };
        list.remove(position);
        if list.is_empty() {
            listeners.remove(&object_id);
        }
        true
    }

    /// Forgets every listener for `object_id`; the host side drops its
    /// subscription when the reference is released.
    pub(crate) fn drop_local_listeners(&self, object_id: ObjectId) {
        self.listeners.lock().remove(&object_id);
    }

    /// Runs the message dispatch loop until the channel ends.
    pub async fn run(self: &Arc<Self>) {
        let mut transport_receiver = self
            .transport_receiver
            .lock()
            .await
            .take()
            .expect("run() can only be called once - transport receiver already taken");

        let mut transport_sender = self
            .transport_sender
            .lock()
            .await
            .take()
            .expect("run() can only be called once - transport sender already taken");

        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .expect("run() can only be called once - outbound receiver already taken");

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

        let mut message_rx = self
            .message_rx
            .lock()
            .await
            .take()
            .expect("run() can only be called once - message receiver already taken");

        while let Some(message_value) = message_rx.recv().await {
            match serde_json::from_value::<HostMessage>(message_value) {
                Ok(message) => {
                    if let Err(e) = self.dispatch(message).await {
                        tracing::error!("Error dispatching message: {}", e);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to parse message: {}", e);
                }
            }
        }

        self.reject_pending().await;

        let _ = reader_handle.await;
        // The outbound sender lives for the evaluator's lifetime, so the
        // writer task is stopped rather than waited out.
        writer_handle.abort();
        let _ = writer_handle.await;
    }

    /// Dispatch an incoming message (test-only public version).
    #[cfg(test)]
    pub(crate) async fn dispatch_message(&self, message: HostMessage) -> Result<()> {
        self.dispatch(message).await
    }

    async fn dispatch(&self, message: HostMessage) -> Result<()> {
        match message {
            HostMessage::Reply(reply) => {
                tracing::debug!(id = reply.id, "processing reply");
                let callback =
                    self.callbacks.lock().await.remove(&reply.id).ok_or_else(|| {
                        Error::Protocol(format!("Cannot find request to respond: id={}", reply.id))
                    })?;
                let _ = callback.send(Ok(reply.body));
                Ok(())
            }
            HostMessage::Event(event) => {
                self.dispatch_event(event.data);
                Ok(())
            }
            HostMessage::Unknown(value) => {
                tracing::debug!("Unknown message type (forward-compatible, ignored): {}", value);
                Ok(())
            }
        }
    }

    /// Invokes every listener registered for the event's object, synchronously
    /// and in registration order. The list is snapshotted first: listeners
    /// added after the broadcast begins are not retroactively invoked, and
    /// removal mid-broadcast does not suppress delivery within it.
    fn dispatch_event(&self, notification: EventNotification) {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .get(&notification.object_id)
            .cloned()
            .unwrap_or_default();

        if snapshot.is_empty() {
            tracing::debug!(
                object_id = %notification.object_id,
                "event for object with no listeners (dropped)"
            );
            return;
        }

        for listener in &snapshot {
            listener(&notification.event);
        }
    }

    /// Rejects every request still pending once the channel has ended.
    async fn reject_pending(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut callbacks = self.callbacks.lock().await;
        if !callbacks.is_empty() {
            tracing::debug!(
                pending = callbacks.len(),
                "rejecting requests pending at channel close"
            );
        }
        for (_, tx) in callbacks.drain() {
            let _ = tx.send(Err(Error::ChannelClosed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PipeTransport;
    use serde_json::json;
    use tether_protocol::{EventMessage, InvokeReply, Reply, WireError};
    use tokio::io::duplex;

    fn create_test_evaluator() -> (Arc<Evaluator>, tokio::io::DuplexStream, tokio::io::DuplexStream)
    {
        let (outbound_read, outbound_write) = duplex(1024);
        let (inbound_read, inbound_write) = duplex(1024);

        let (transport, message_rx) = PipeTransport::new(outbound_write, inbound_read);
        let evaluator = Arc::new(Evaluator::new(transport.into_transport_parts(message_rx)));

        (evaluator, outbound_read, inbound_write)
    }

    #[test]
    fn request_ids_increment_from_zero() {
        let (evaluator, _out, _in) = create_test_evaluator();

        assert_eq!(evaluator.last_id.fetch_add(1, Ordering::SeqCst), 0);
        assert_eq!(evaluator.last_id.fetch_add(1, Ordering::SeqCst), 1);
        assert_eq!(evaluator.last_id.fetch_add(1, Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reply_settles_the_matching_pending_request() {
        let (evaluator, _out, _in) = create_test_evaluator();

        let id = evaluator.last_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        evaluator.callbacks.lock().await.insert(id, tx);

        evaluator
            .dispatch_message(HostMessage::Reply(Reply {
                id,
                body: ReplyBody::InvokeMethod(InvokeReply {
                    result: Some(json!({"status": "ok"})),
                    error: None,
                }),
            }))
            .await
            .unwrap();

        let body = rx.await.unwrap().unwrap();
        let ReplyBody::InvokeMethod(reply) = body else {
            panic!("Expected invokeMethod body");
        };
        assert_eq!(reply.result.unwrap()["status"], "ok");
    }

    #[tokio::test]
    async fn reply_for_unknown_id_is_a_protocol_error() {
        let (evaluator, _out, _in) = create_test_evaluator();

        let result = evaluator
            .dispatch_message(HostMessage::Reply(Reply { id: 41, body: ReplyBody::Release }))
            .await;

        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn error_reply_carries_message_and_trace() {
        let (evaluator, _out, _in) = create_test_evaluator();

        let id = evaluator.last_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        evaluator.callbacks.lock().await.insert(id, tx);

        evaluator
            .dispatch_message(HostMessage::Reply(Reply {
                id,
                body: ReplyBody::InvokeMethod(InvokeReply {
                    result: None,
                    error: Some(WireError {
                        message: "oops".to_string(),
                        trace: Some("at boom (remote)".to_string()),
                    }),
                }),
            }))
            .await
            .unwrap();

        // The invoke() path converts the error body into a rejection.
        let ReplyBody::InvokeMethod(reply) = rx.await.unwrap().unwrap() else {
            panic!("Expected invokeMethod body");
        };
        let error = reply.error.unwrap();
        assert_eq!(error.message, "oops");
        assert_eq!(error.trace.as_deref(), Some("at boom (remote)"));
    }

    #[tokio::test]
    async fn events_invoke_listeners_in_registration_order() {
        let (evaluator, _out, _in) = create_test_evaluator();
        let object_id = ObjectId::new(4);

        let log = Arc::new(ParkingLotMutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            evaluator.add_local_listener(
                object_id,
                Arc::new(move |event: &Value| log.lock().push(format!("{tag}:{event}"))),
            );
        }

        evaluator
            .dispatch_message(HostMessage::Event(EventMessage::new(EventNotification {
                object_id,
                event: json!(7),
            })))
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["first:7", "second:7", "third:7"]);
    }

    #[tokio::test]
    async fn removal_during_broadcast_does_not_suppress_in_flight_delivery() {
        let (evaluator, _out, _in) = create_test_evaluator();
        let object_id = ObjectId::new(9);

        let log = Arc::new(ParkingLotMutex::new(Vec::new()));

        let second: Listener = {
            let log = Arc::clone(&log);
            Arc::new(move |_: &Value| log.lock().push("second"))
        };

        // The first listener removes the second one mid-broadcast; the
        // snapshot taken at dispatch time must still deliver to it.
        let first: Listener = {
            let log = Arc::clone(&log);
            let evaluator = Arc::clone(&evaluator);
            let second = second.clone();
            Arc::new(move |_: &Value| {
                log.lock().push("first");
                evaluator.remove_local_listener(object_id, &second);
            })
        };

        evaluator.add_local_listener(object_id, first);
        evaluator.add_local_listener(object_id, second);

        let notification = || {
            HostMessage::Event(EventMessage::new(EventNotification {
                object_id,
                event: Value::Null,
            }))
        };

        evaluator.dispatch_message(notification()).await.unwrap();
        assert_eq!(*log.lock(), vec!["first", "second"]);

        // On the next broadcast the removal has taken effect.
        evaluator.dispatch_message(notification()).await.unwrap();
        assert_eq!(*log.lock(), vec!["first", "second", "first"]);
    }

    #[tokio::test]
    async fn remove_listener_drops_only_the_first_occurrence() {
        let (evaluator, _out, _in) = create_test_evaluator();
        let object_id = ObjectId::new(2);

        let count = Arc::new(ParkingLotMutex::new(0u32));
        let listener: Listener = {
            let count = Arc::clone(&count);
            Arc::new(move |_: &Value| *count.lock() += 1)
        };

        evaluator.add_local_listener(object_id, listener.clone());
        evaluator.add_local_listener(object_id, listener.clone());
        assert!(evaluator.remove_local_listener(object_id, &listener));

        evaluator
            .dispatch_message(HostMessage::Event(EventMessage::new(EventNotification {
                object_id,
                event: Value::Null,
            })))
            .await
            .unwrap();

        assert_eq!(*count.lock(), 1);
        assert!(evaluator.remove_local_listener(object_id, &listener));
        assert!(!evaluator.remove_local_listener(object_id, &listener));
    }

    #[tokio::test]
    async fn channel_close_rejects_every_pending_request() {
        let (evaluator, _outbound_read, inbound_write) = create_test_evaluator();

        let run = Arc::clone(&evaluator);
        let loop_handle = tokio::spawn(async move { run.run().await });

        let pending = {
            let evaluator = Arc::clone(&evaluator);
            tokio::spawn(async move {
                evaluator
                    .invoke(InvokeRequest {
                        object_id: ObjectId::ROOT,
                        source: "noop".to_string(),
                        params: vec![],
                        return_handle: false,
                    })
                    .await
            })
        };

        // Let the request reach the pending table, then sever the channel.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(inbound_write);

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::ChannelClosed)));

        loop_handle.await.unwrap();

        // Later sends fail fast without touching the wire.
        let result = evaluator.send(Call::Release(tether_protocol::ReleaseRequest {
            object_id: ObjectId::new(1),
            dispose: false,
        }));
        assert!(matches!(result.await, Err(Error::ChannelClosed)));
    }
}
