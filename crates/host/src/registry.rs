//! Host-side authoritative store of exposed objects.
//!
//! The registry owns id allocation, the identity-keyed reverse map that makes
//! registration idempotent, per-id reference counts, and the lazy event
//! subscriptions installed for emitter-shaped values. It is an explicit
//! object owned by the host component so it can be unit-tested in isolation;
//! there is no ambient global state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use tether_protocol::{EventNotification, HandleKind, ObjectId};

use crate::error::{Error, Result};
use crate::object::{EventSink, RemoteObject, Subscription};

/// Identity key for the reverse map: the object's data pointer.
fn identity(object: &Arc<dyn RemoteObject>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

struct Entry {
    object: Arc<dyn RemoteObject>,
    kind: HandleKind,
    /// Live references handed out for this id; the entry drops at zero.
    refcount: u32,
    /// The dispose capability already ran for this object.
    hook_fired: bool,
}

struct EmitterEntry {
    /// Driver-registered listeners; gates whether events are actually sent.
    listeners: u32,
    /// Unsubscribes from the source when the entry drops.
    _subscription: Subscription,
}

#[derive(Default)]
struct Inner {
    last_object_id: u64,
    by_id: HashMap<ObjectId, Entry>,
    id_by_identity: HashMap<usize, ObjectId>,
    emitters: HashMap<ObjectId, EmitterEntry>,
}

/// Registry of all objects exposed on the host side.
///
/// ObjectId 0 is the implicit root, seeded at construction; it always
/// resolves and is never released. All other ids are allocated monotonically
/// and never reused, so a stale id fails rather than aliasing a new object.
pub struct Registry {
    root: Arc<dyn RemoteObject>,
    inner: Arc<Mutex<Inner>>,
    events_tx: mpsc::UnboundedSender<EventNotification>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EventNotification>>>,
}

impl Registry {
    /// Creates a registry rooted at `root`.
    pub fn new(root: Arc<dyn RemoteObject>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            root,
            inner: Arc::new(Mutex::new(Inner::default())),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// The root object behind ObjectId 0.
    pub fn root(&self) -> Arc<dyn RemoteObject> {
        Arc::clone(&self.root)
    }

    /// Event stream consumed by the dispatcher.
    pub(crate) fn take_events(&self) -> mpsc::UnboundedReceiver<EventNotification> {
        self.events_rx
            .lock()
            .take()
            .expect("take_events() can only be called once - event receiver already taken")
    }

    /// Exposes `object`, returning its id and wrapper tag.
    ///
    /// Registering the same reference again returns the existing id and bumps
    /// its reference count, so aliases share one identity. A newly registered
    /// emitter-shaped value gets a single host-side subscription whose events
    /// are forwarded unconditionally; the listener count only gates whether
    /// they are sent to the driver.
    pub fn register(&self, object: Arc<dyn RemoteObject>) -> (ObjectId, HandleKind) {
        let key = identity(&object);
        let (id, kind, installed) = {
            let mut inner = self.inner.lock();
            if let Some(&id) = inner.id_by_identity.get(&key) {
                if let Some(entry) = inner.by_id.get_mut(&id) {
                    entry.refcount += 1;
                    tracing::debug!(%id, refcount = entry.refcount, "re-registered alias");
                    return (id, entry.kind);
                }
            }

            inner.last_object_id += 1;
            let id = ObjectId::new(inner.last_object_id);
            let kind = if object.as_event_source().is_some() {
                HandleKind::EventEmitter
            } else {
                HandleKind::Object
            };
            inner.by_id.insert(
                id,
                Entry { object: Arc::clone(&object), kind, refcount: 1, hook_fired: false },
            );
            inner.id_by_identity.insert(key, id);
            (id, kind, kind == HandleKind::EventEmitter)
        };

        if installed {
            // Outside the lock: subscribe runs embedder code.
            if let Some(source) = object.as_event_source() {
                let subscription = source.subscribe(self.event_sink(id));
                self.inner
                    .lock()
                    .emitters
                    .insert(id, EmitterEntry { listeners: 0, _subscription: subscription });
            }
        }

        tracing::debug!(%id, ?kind, "registered object");
        (id, kind)
    }

    /// Sink forwarding fired events toward the channel.
    ///
    /// Events fired while nobody is listening are dropped, never buffered.
    fn event_sink(&self, object_id: ObjectId) -> EventSink {
        let inner = Arc::downgrade(&self.inner);
        let events_tx = self.events_tx.clone();
        EventSink::new(move |event| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let listening =
                inner.lock().emitters.get(&object_id).is_some_and(|entry| entry.listeners > 0);
            if !listening {
                tracing::debug!(%object_id, "event dropped: no registered listeners");
                return;
            }
            let _ = events_tx.send(EventNotification { object_id, event });
        })
    }

    /// Resolves `id` to its live object.
    ///
    /// ObjectId 0 always resolves to the root; any other unknown id is a
    /// reference-not-found error.
    pub fn resolve(&self, id: ObjectId) -> Result<Arc<dyn RemoteObject>> {
        if id.is_root() {
            return Ok(self.root());
        }
        self.inner
            .lock()
            .by_id
            .get(&id)
            .map(|entry| Arc::clone(&entry.object))
            .ok_or(Error::ReferenceNotFound(id))
    }

    /// Drops one reference to `id`; unknown ids and the root are no-ops.
    ///
    /// With `dispose`, the value's dispose capability runs first - at most
    /// once per object across all releases. When the last reference goes,
    /// both mappings and the event subscription are removed.
    pub fn release(&self, id: ObjectId, dispose: bool) {
        if id.is_root() {
            return;
        }

        let (hook_object, dropped_emitter) = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.by_id.get_mut(&id) else {
                tracing::debug!(%id, "release of unknown id (ignored)");
                return;
            };

            let run_hook = dispose && !entry.hook_fired;
            if run_hook {
                entry.hook_fired = true;
            }
            let hook_object = run_hook.then(|| Arc::clone(&entry.object));

            entry.refcount = entry.refcount.saturating_sub(1);
            let key = identity(&entry.object);
            let dropped_emitter = if entry.refcount == 0 {
                inner.by_id.remove(&id);
                inner.id_by_identity.remove(&key);
                tracing::debug!(%id, "released last reference");
                inner.emitters.remove(&id)
            } else {
                None
            };
            (hook_object, dropped_emitter)
        };

        // Both run embedder code; keep them outside the registry lock.
        drop(dropped_emitter);
        if let Some(object) = hook_object {
            if let Some(disposable) = object.as_disposable() {
                disposable.dispose();
            }
        }
    }

    /// Bumps the listener count for an emitter id; other ids are ignored.
    pub fn listener_added(&self, id: ObjectId) {
        if let Some(entry) = self.inner.lock().emitters.get_mut(&id) {
            entry.listeners += 1;
        }
    }

    /// Drops one listener, floored at zero.
    pub fn listener_removed(&self, id: ObjectId) {
        if let Some(entry) = self.inner.lock().emitters.get_mut(&id) {
            entry.listeners = entry.listeners.saturating_sub(1);
        }
    }

    /// Whether `id` currently resolves.
    pub fn contains(&self, id: ObjectId) -> bool {
        id.is_root() || self.inner.lock().by_id.contains_key(&id)
    }

    /// Listener count for an emitter id, if it is one.
    pub fn listener_count(&self, id: ObjectId) -> Option<u32> {
        self.inner.lock().emitters.get(&id).map(|entry| entry.listeners)
    }
}
