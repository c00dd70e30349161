//! Close-once ownership of one engine handle

use crate::engine::{Engine, EngineHandle};
use crate::{CodecError, CodecType, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Encoder,
    Decoder,
}

struct SessionInner<S> {
    handle: Option<EngineHandle>,
    state: S,
}

/// One engine handle plus per-instance state `S`, guarded by a single lock.
///
/// The closed flag is checked before taking the lock and again once it is
/// held, so a call racing with [`close`](Self::close) never reaches the
/// engine after the handle is destroyed.
pub(crate) struct EngineSession<S = ()> {
    engine: Arc<dyn Engine>,
    codec: CodecType,
    role: Role,
    closed: AtomicBool,
    inner: Mutex<SessionInner<S>>,
}

impl<S> EngineSession<S> {
    pub(crate) fn new(
        engine: Arc<dyn Engine>,
        codec: CodecType,
        role: Role,
        handle: EngineHandle,
        state: S,
    ) -> Self {
        Self {
            engine,
            codec,
            role,
            closed: AtomicBool::new(false),
            inner: Mutex::new(SessionInner {
                handle: Some(handle),
                state,
            }),
        }
    }

    pub(crate) fn codec(&self) -> CodecType {
        self.codec
    }

    fn closed_error(&self) -> CodecError {
        match self.role {
            Role::Encoder => CodecError::EncoderClosed,
            Role::Decoder => CodecError::DecoderClosed,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fast rejection for calls on a closed instance.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    /// Run `f` against the live handle under the instance lock.
    pub(crate) fn with_engine<T>(
        &self,
        f: impl FnOnce(&dyn Engine, EngineHandle, &mut S) -> Result<T>,
    ) -> Result<T> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let SessionInner { handle, state } = &mut *inner;
        let handle = handle.ok_or_else(|| self.closed_error())?;
        f(self.engine.as_ref(), handle, state)
    }

    /// Destroy the engine handle. Only the first call does anything.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let handle = self.inner.lock().handle.take();
        if let Some(handle) = handle {
            self.engine.destroy(handle);
            tracing::debug!(
                codec = %self.codec,
                role = ?self.role,
                handle = %handle,
                engine = self.engine.name(),
                "Closed codec instance"
            );
        }
    }
}

impl<S> Drop for EngineSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}
