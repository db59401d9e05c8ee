//! Driver-side proxies for remote objects.
//!
//! A [`Handle`] names exactly one object in the host registry. All remote
//! work goes through [`Handle::evaluate`] and [`Handle::evaluate_handle`];
//! once a handle is disposed or released, every further operation fails
//! locally, before any wire traffic.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use tether_protocol::{
    Call, EventTarget, HandleKind, HandleRef, InvokeRequest, ObjectId, ReleaseRequest,
};

use crate::args::EvalArgs;
use crate::error::{Error, Result};
use crate::evaluator::{Evaluator, Listener};

/// Terminal states a handle can reach. They are functionally identical but
/// surface distinct error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Live,
    Disposed,
    Released,
}

struct HandleInner {
    object_id: ObjectId,
    kind: HandleKind,
    state: Mutex<HandleState>,
    evaluator: Arc<Evaluator>,
}

/// Local proxy for one remote object.
///
/// Clones share the same terminal state: disposing any clone fails them all.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

/// Options for [`Handle::release`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReleaseOptions {
    /// Also invoke the remote value's dispose capability, when it has one.
    pub dispose: bool,
}

impl Handle {
    pub(crate) fn root(evaluator: Arc<Evaluator>) -> Self {
        Self::new(evaluator, HandleRef::object(ObjectId::ROOT))
    }

    pub(crate) fn new(evaluator: Arc<Evaluator>, reference: HandleRef) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                object_id: reference.object_id,
                kind: reference.kind,
                state: Mutex::new(HandleState::Live),
                evaluator,
            }),
        }
    }

    /// Identifier of the remote object this handle names.
    pub fn object_id(&self) -> ObjectId {
        self.inner.object_id
    }

    /// Wrapper tag this handle was created from.
    pub fn kind(&self) -> HandleKind {
        self.inner.kind
    }

    /// Emitter view of this handle, when the remote value is tagged as an
    /// event emitter. Plain handles have no listener operations.
    pub fn emitter(&self) -> Option<EmitterHandle> {
        (self.inner.kind == HandleKind::EventEmitter)
            .then(|| EmitterHandle { handle: self.clone() })
    }

    fn ensure_live(&self) -> Result<()> {
        match *self.inner.state.lock() {
            HandleState::Live => Ok(()),
            HandleState::Disposed => Err(Error::HandleDisposed),
            HandleState::Released => Err(Error::HandleReleased),
        }
    }

    /// Enters `state` if still live. The root handle never leaves `Live`.
    fn mark(&self, state: HandleState) -> bool {
        if self.inner.object_id.is_root() {
            return false;
        }
        let mut current = self.inner.state.lock();
        if *current != HandleState::Live {
            return false;
        }
        *current = state;
        true
    }

    /// Runs the shipped function against the remote object and returns its
    /// result by value. Nested handles in `args` arrive host-side as the live
    /// objects they name.
    pub async fn evaluate(&self, fn_source: &str, args: impl Into<EvalArgs>) -> Result<Value> {
        self.ensure_live()?;
        let params = args.into().into_wire();
        self.inner
            .evaluator
            .invoke(InvokeRequest {
                object_id: self.inner.object_id,
                source: fn_source.to_string(),
                params,
                return_handle: false,
            })
            .await
    }

    /// Same as [`evaluate`](Self::evaluate), but the result stays on the host
    /// and a new handle to it is returned.
    pub async fn evaluate_handle(
        &self,
        fn_source: &str,
        args: impl Into<EvalArgs>,
    ) -> Result<Handle> {
        self.ensure_live()?;
        let params = args.into().into_wire();
        let result = self
            .inner
            .evaluator
            .invoke(InvokeRequest {
                object_id: self.inner.object_id,
                source: fn_source.to_string(),
                params,
                return_handle: true,
            })
            .await?;
        let reference = HandleRef::from_value(&result).ok_or_else(|| {
            Error::Protocol(format!("invokeMethod reply is not a reference wrapper: {result}"))
        })?;
        Ok(Handle::new(Arc::clone(&self.inner.evaluator), reference))
    }

    /// Marks this handle disposed immediately; the remote reference is
    /// dropped asynchronously. Disposing twice is a no-op.
    pub fn dispose(&self) {
        if !self.mark(HandleState::Disposed) {
            return;
        }
        self.inner.evaluator.drop_local_listeners(self.inner.object_id);

        let evaluator = Arc::clone(&self.inner.evaluator);
        let object_id = self.inner.object_id;
        tokio::spawn(async move {
            if let Err(e) =
                evaluator.send(Call::Release(ReleaseRequest { object_id, dispose: false })).await
            {
                tracing::debug!(%object_id, "release after dispose failed: {e}");
            }
        });
    }

    /// Releases the remote reference and awaits the host's acknowledgement.
    ///
    /// With [`ReleaseOptions::dispose`], the host invokes the value's dispose
    /// capability before dropping its reference. Releasing twice, or after
    /// `dispose()`, is a no-op.
    pub async fn release(&self, options: ReleaseOptions) -> Result<()> {
        if !self.mark(HandleState::Released) {
            return Ok(());
        }
        self.inner.evaluator.drop_local_listeners(self.inner.object_id);
        self.inner
            .evaluator
            .send(Call::Release(ReleaseRequest {
                object_id: self.inner.object_id,
                dispose: options.dispose,
            }))
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("object_id", &self.inner.object_id)
            .field("kind", &self.inner.kind)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

/// Handle to a remote event emitter.
///
/// Created through [`Handle::emitter`]; adds listener operations on top of
/// the plain handle surface.
#[derive(Clone)]
pub struct EmitterHandle {
    handle: Handle,
}

impl EmitterHandle {
    /// Subscribes `listener` to the remote emitter's events.
    ///
    /// Every call registers once more - no deduplication, so the same
    /// listener added twice fires twice per event.
    pub async fn add_listener(&self, listener: Listener) -> Result<()> {
        self.handle.ensure_live()?;
        self.handle
            .inner
            .evaluator
            .add_local_listener(self.handle.inner.object_id, listener);
        self.handle
            .inner
            .evaluator
            .send(Call::RegisterEvent(EventTarget { object_id: self.handle.inner.object_id }))
            .await?;
        Ok(())
    }

    /// Drops the first registration matching `listener` by identity.
    ///
    /// A broadcast already in flight still delivers to it; later broadcasts
    /// do not. Removing a listener that was never added is a local no-op.
    pub async fn remove_listener(&self, listener: &Listener) -> Result<()> {
        self.handle.ensure_live()?;
        if !self
            .handle
            .inner
            .evaluator
            .remove_local_listener(self.handle.inner.object_id, listener)
        {
            return Ok(());
        }
        self.handle
            .inner
            .evaluator
            .send(Call::UnregisterEvent(EventTarget { object_id: self.handle.inner.object_id }))
            .await?;
        Ok(())
    }
}

impl std::ops::Deref for EmitterHandle {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.handle
    }
}

impl std::fmt::Debug for EmitterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EmitterHandle").field(&self.handle).finish()
    }
}
