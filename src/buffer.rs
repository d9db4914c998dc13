//! GPU buffers with optional views and CPU readback.
//!
//! A [`ComputeBuffer`] owns one device buffer together with the views a
//! compute shader needs to see it and, optionally, a staging copy that
//! the CPU can map.  Reading results back is always the same three steps:
//!
//! 1. [`ComputeBuffer::copy_to_staging`] queues a device-side copy;
//! 2. [`ComputeBuffer::map`] waits until the copy is readable and returns
//!    a typed guard;
//! 3. dropping the guard unmaps the staging copy.
//!
//! Buffers are only created through [`crate::ComputeWrap`].

use bytemuck::Pod;

use crate::backend::{BufferRole, ComputeBackend, RawHandle};
use crate::error::{ComputeError, Result};
use crate::handle::{Absent, OwnedHandle, Request};
use crate::mapped::Mapped;
use crate::resource::ResourceParts;

/// Shader-visible layout of a [`ComputeBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// `count` elements of `element_size` bytes each.
    Structured { element_size: u32, count: u32 },
    /// Untyped bytes addressed in 32-bit words; `size` must be a multiple of 4.
    Raw { size: u32 },
}

impl BufferKind {
    pub fn size_bytes(self) -> u64 {
        match self {
            BufferKind::Structured {
                element_size,
                count,
            } => u64::from(element_size) * u64::from(count),
            BufferKind::Raw { size } => u64::from(size),
        }
    }

    pub(crate) fn role(self) -> BufferRole {
        match self {
            BufferKind::Structured { element_size, .. } => BufferRole::Structured { element_size },
            BufferKind::Raw { .. } => BufferRole::Raw,
        }
    }

    pub(crate) fn validate(self) -> Result<()> {
        match self {
            BufferKind::Structured {
                element_size,
                count,
            } if element_size == 0 || count == 0 => Err(ComputeError::InvalidDescriptor(
                "structured buffer needs a non-zero element size and count".into(),
            )),
            BufferKind::Raw { size } if size == 0 || size % 4 != 0 => {
                Err(ComputeError::InvalidDescriptor(format!(
                    "raw buffer size {size} is not a non-zero multiple of 4"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Creation parameters for [`crate::ComputeWrap::create_buffer`].
#[derive(Debug, Clone, Copy)]
pub struct BufferRequest<'a> {
    pub kind: BufferKind,
    pub read_view: Request,
    pub write_view: Request,
    pub staging: Request,
    pub contents: Option<&'a [u8]>,
    pub debug_name: Option<&'a str>,
}

impl<'a> BufferRequest<'a> {
    pub fn new(kind: BufferKind) -> Self {
        Self {
            kind,
            read_view: Request::Skip,
            write_view: Request::Skip,
            staging: Request::Skip,
            contents: None,
            debug_name: None,
        }
    }

    pub fn structured(element_size: u32, count: u32) -> Self {
        Self::new(BufferKind::Structured {
            element_size,
            count,
        })
    }

    /// A structured buffer sized and filled from `data`.
    pub fn from_slice<T: Pod>(data: &'a [T]) -> Self {
        let mut request = Self::structured(std::mem::size_of::<T>() as u32, data.len() as u32);
        request.contents = Some(bytemuck::cast_slice(data));
        request
    }

    pub fn raw(size: u32) -> Self {
        Self::new(BufferKind::Raw { size })
    }

    pub fn read_view(mut self, request: impl Into<Request>) -> Self {
        self.read_view = request.into();
        self
    }

    pub fn write_view(mut self, request: impl Into<Request>) -> Self {
        self.write_view = request.into();
        self
    }

    pub fn staging(mut self, request: impl Into<Request>) -> Self {
        self.staging = request.into();
        self
    }

    pub fn contents(mut self, contents: &'a [u8]) -> Self {
        self.contents = Some(contents);
        self
    }

    pub fn debug_name(mut self, name: &'a str) -> Self {
        self.debug_name = Some(name);
        self
    }
}

/// A device buffer plus its optional views and staging copy.
pub struct ComputeBuffer<'ctx, B: ComputeBackend + ?Sized> {
    pub(crate) parts: ResourceParts<'ctx, B>,
    pub(crate) kind: BufferKind,
}

impl<'ctx, B: ComputeBackend + ?Sized> ComputeBuffer<'ctx, B> {
    /// Layout the buffer was created with.
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn size_bytes(&self) -> u64 {
        self.kind.size_bytes()
    }

    /// The buffer itself, for copies and for binding as a whole.
    ///
    /// Fails with [`ComputeError::Released`] after [`Self::release`].
    pub fn resource(&self) -> Result<RawHandle> {
        self.parts.resource()
    }

    pub fn read_view(&self) -> std::result::Result<RawHandle, Absent> {
        self.parts.read_view.get()
    }

    pub fn write_view(&self) -> std::result::Result<RawHandle, Absent> {
        self.parts.write_view.get()
    }

    pub fn staging(&self) -> std::result::Result<RawHandle, Absent> {
        self.parts.staging.get()
    }

    /// Queue a device-side copy of the buffer into its staging copy.
    ///
    /// The copy is ordered after earlier commands on the same context
    /// and nothing else; no fence is inserted.
    pub fn copy_to_staging(&mut self) -> Result<()> {
        self.parts.copy_to_staging()
    }

    /// Map the staging copy as a slice of `T`.
    pub fn map<T: Pod>(&mut self) -> Result<Mapped<'_, B, T>> {
        self.parts.map()
    }

    /// Release every owned handle.  Safe to call more than once.
    pub fn release(&mut self) {
        self.parts.release();
    }

    pub fn is_released(&self) -> bool {
        self.parts.is_released()
    }
}

/// A small uniform buffer with no views or staging copy.
pub struct ConstantBuffer<'ctx, B: ComputeBackend + ?Sized> {
    pub(crate) handle: OwnedHandle<'ctx, B>,
    pub(crate) size: u32,
}

impl<'ctx, B: ComputeBackend + ?Sized> ConstantBuffer<'ctx, B> {
    pub fn resource(&self) -> Result<RawHandle> {
        self.handle.get().ok_or(ComputeError::Released)
    }

    /// Allocated size, rounded up to a multiple of 16 bytes.
    pub fn size_bytes(&self) -> u32 {
        self.size
    }

    /// Release the buffer.  Safe to call more than once; dropping the
    /// wrapper does the same.
    pub fn release(&mut self) {
        self.handle.release();
    }
}
