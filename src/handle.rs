//! Owning slots for backend handles.
//!
//! Each native object a wrapper creates lives in exactly one
//! [`OwnedHandle`].  Releasing is idempotent and also happens on drop, so
//! an early return in the middle of a multi-step creation releases
//! whatever was already made.

use thiserror::Error;

use crate::backend::{ComputeBackend, RawHandle};

/// Sole owner of one backend object.
///
/// The handle is released through the backend it came from, at most
/// once: an explicit [`OwnedHandle::release`] empties the slot, and drop
/// releases whatever is still in it.  Wrappers hold one of these per
/// native object, directly or inside an optional slot, so a creation
/// sequence that bails out half way cleans up by simply returning.
///
/// The borrow of the backend ties the handle to it; a handle can never
/// outlive the device it would have to be released on.
pub struct OwnedHandle<'ctx, B: ComputeBackend + ?Sized> {
    backend: &'ctx B,
    raw: Option<RawHandle>,
}

impl<'ctx, B: ComputeBackend + ?Sized> OwnedHandle<'ctx, B> {
    pub(crate) fn new(backend: &'ctx B, raw: RawHandle) -> Self {
        Self {
            backend,
            raw: Some(raw),
        }
    }

    /// The handle, or `None` once released.
    pub fn get(&self) -> Option<RawHandle> {
        self.raw
    }

    /// Release the object now.  Later calls, and the eventual drop, do
    /// nothing.
    pub fn release(&mut self) {
        if let Some(raw) = self.raw.take() {
            log::debug!("{}: releasing object {}", self.backend.name(), raw.as_raw());
            self.backend.release(raw);
        }
    }
}

impl<B: ComputeBackend + ?Sized> Drop for OwnedHandle<'_, B> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<B: ComputeBackend + ?Sized> std::fmt::Debug for OwnedHandle<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OwnedHandle").field(&self.raw).finish()
    }
}

/// Whether an optional sub-resource (view or staging copy) is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Request {
    /// Do not create it.
    #[default]
    Skip,
    /// Create it; failure fails the whole creation.
    Require,
    /// Create it if possible; failure is recorded and creation goes on.
    Prefer,
}

impl Request {
    pub fn wanted(self) -> bool {
        !matches!(self, Request::Skip)
    }
}

impl From<bool> for Request {
    fn from(wanted: bool) -> Self {
        if wanted {
            Request::Require
        } else {
            Request::Skip
        }
    }
}

/// Why an optional sub-resource is not available.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Absent {
    #[error("not requested")]
    NotRequested,
    #[error("creation failed: {0}")]
    Failed(String),
    #[error("released")]
    Released,
}

pub(crate) enum Slot<'ctx, B: ComputeBackend + ?Sized> {
    NotRequested,
    Failed(String),
    Present(OwnedHandle<'ctx, B>),
}

impl<B: ComputeBackend + ?Sized> Slot<'_, B> {
    pub(crate) fn get(&self) -> Result<RawHandle, Absent> {
        match self {
            Slot::NotRequested => Err(Absent::NotRequested),
            Slot::Failed(reason) => Err(Absent::Failed(reason.clone())),
            Slot::Present(handle) => handle.get().ok_or(Absent::Released),
        }
    }

    pub(crate) fn release(&mut self) {
        if let Slot::Present(handle) = self {
            handle.release();
        }
    }
}
