//! Fire-able event emitter as a remote object.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::object::{EventSink, EventSource, RemoteObject, Subscription};

type SinkList = Arc<Mutex<Vec<(u64, EventSink)>>>;

/// Remote object that host-side code fires events through.
///
/// When registered, the registry installs a single sink; the driver's
/// listeners fan out on its side of the channel.
pub struct Emitter {
    sinks: SinkList,
    next_token: AtomicU64,
}

impl Emitter {
    pub fn new() -> Self {
        Self { sinks: Arc::new(Mutex::new(Vec::new())), next_token: AtomicU64::new(0) }
    }

    /// Broadcasts `event` to every installed sink.
    pub fn fire(&self, event: Value) {
        let snapshot: Vec<EventSink> =
            self.sinks.lock().iter().map(|(_, sink)| sink.clone()).collect();
        for sink in snapshot {
            sink.emit(event.clone());
        }
    }

    /// Number of installed sinks; for tests and diagnostics.
    pub fn sink_count(&self) -> usize {
        self.sinks.lock().len()
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for Emitter {
    fn subscribe(&self, sink: EventSink) -> Subscription {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.sinks.lock().push((token, sink));

        // Weak so an outstanding guard does not keep the emitter alive.
        let sinks = Arc::downgrade(&self.sinks);
        Subscription::new(move || {
            if let Some(sinks) = sinks.upgrade() {
                sinks.lock().retain(|(t, _)| *t != token);
            }
        })
    }
}

impl RemoteObject for Emitter {
    fn as_event_source(&self) -> Option<&dyn EventSource> {
        Some(self)
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter").field("sinks", &self.sink_count()).finish()
    }
}
