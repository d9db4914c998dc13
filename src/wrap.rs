//! The factory every wrapper is created through.
//!
//! [`ComputeWrap`] borrows a backend and turns one creation request into
//! the sequence of backend calls needed for a complete wrapper: the
//! resource, then its read view, write view and staging copy, then one
//! debug-name call per created object.  Every sub-object is held by an
//! owning slot as soon as it exists, so a failed step releases the ones
//! made before it and no partial wrapper is ever returned.

use crate::backend::{
    Binding, BufferDesc, BufferRole, ComputeBackend, RawHandle, ResourceUsage, ShaderCode,
    TextureDesc,
};
use crate::buffer::{BufferRequest, ComputeBuffer, ConstantBuffer};
use crate::error::{ComputeError, Result};
use crate::handle::{OwnedHandle, Request, Slot};
use crate::resource::ResourceParts;
use crate::shader::{self, ComputeShader, ShaderDesc, ShaderInput};
use crate::texture::{ComputeTexture, TextureRequest};

/// Calculate an (x, y) workgroup grid that covers `total_groups`
/// workgroups without exceeding the per-dimension limit.
fn split_workgroups(total_groups: u32, limit: u32) -> (u32, u32) {
    if total_groups <= limit {
        (total_groups, 1)
    } else {
        let x = limit;
        let y = total_groups.div_ceil(limit);
        (x, y)
    }
}

/// Entry point for creating shaders, buffers and textures on a backend.
///
/// The factory owns nothing; wrappers it returns borrow the backend for
/// `'ctx` and therefore cannot outlive it.
pub struct ComputeWrap<'ctx, B: ComputeBackend + ?Sized> {
    backend: &'ctx B,
}

impl<B: ComputeBackend + ?Sized> Clone for ComputeWrap<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: ComputeBackend + ?Sized> Copy for ComputeWrap<'_, B> {}

impl<'ctx, B: ComputeBackend + ?Sized> ComputeWrap<'ctx, B> {
    pub fn new(backend: &'ctx B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &'ctx B {
        self.backend
    }

    /// Load, preprocess and compile a compute shader.
    ///
    /// A cached blob that the backend rejects is discarded and the shader
    /// is rebuilt from source.
    pub fn create_compute_shader(&self, desc: &ShaderDesc) -> Result<ComputeShader<'ctx, B>> {
        let label = desc.label();
        let compiled = match shader::load(desc)? {
            ShaderInput::Blob(bytes) => {
                let code = ShaderCode::Blob {
                    label: &label,
                    bytes: &bytes,
                    entry_point: &desc.entry_point,
                };
                match self.backend.compile_shader(&code) {
                    Ok(compiled) => compiled,
                    Err(err) => {
                        log::warn!("{label}: cached blob rejected ({err}), recompiling");
                        self.compile_source(desc, &label)?
                    }
                }
            }
            ShaderInput::Source(text) => self.compile_text(desc, &label, &text)?,
        };
        log::debug!(
            "{}: compiled shader {label} as {}",
            self.backend.name(),
            compiled.handle.as_raw()
        );
        Ok(ComputeShader {
            backend: self.backend,
            handle: OwnedHandle::new(self.backend, compiled.handle),
            entry_point: desc.entry_point.clone(),
        })
    }

    fn compile_source(&self, desc: &ShaderDesc, label: &str) -> Result<crate::CompiledShader> {
        let text = shader::read_source(desc)?;
        self.compile_text(desc, label, &text)
    }

    fn compile_text(
        &self,
        desc: &ShaderDesc,
        label: &str,
        text: &str,
    ) -> Result<crate::CompiledShader> {
        let code = ShaderCode::Source {
            label,
            text,
            entry_point: &desc.entry_point,
        };
        let compiled = self.backend.compile_shader(&code)?;
        if let Some(blob) = &compiled.blob {
            shader::store_blob(desc, blob);
        }
        Ok(compiled)
    }

    /// Create a uniform buffer of at least `size` bytes.
    ///
    /// The size is rounded up to a multiple of 16 bytes; `contents`, if
    /// given, must be exactly `size` bytes and is zero-padded.
    pub fn create_constant_buffer(
        &self,
        size: u32,
        contents: Option<&[u8]>,
        debug_name: Option<&str>,
    ) -> Result<ConstantBuffer<'ctx, B>> {
        if size == 0 {
            return Err(ComputeError::InvalidDescriptor(
                "constant buffer size must be non-zero".into(),
            ));
        }
        let padded = size.div_ceil(16).checked_mul(16).ok_or_else(|| {
            ComputeError::InvalidDescriptor(format!("constant buffer size {size} is too large"))
        })?;
        let mut staged_contents = None;
        if let Some(data) = contents {
            if data.len() != size as usize {
                return Err(ComputeError::InvalidDescriptor(format!(
                    "constant buffer contents are {} bytes, expected {size}",
                    data.len()
                )));
            }
            let mut padded_data = data.to_vec();
            padded_data.resize(padded as usize, 0);
            staged_contents = Some(padded_data);
        }
        let raw = self.backend.create_buffer(&BufferDesc {
            role: BufferRole::Constant,
            size: u64::from(padded),
            usage: ResourceUsage::default(),
            contents: staged_contents.as_deref(),
        })?;
        let handle = OwnedHandle::new(self.backend, raw);
        if let Some(name) = debug_name {
            self.backend.set_debug_name(raw, name);
        }
        log::debug!(
            "{}: created constant buffer {} ({padded} bytes)",
            self.backend.name(),
            raw.as_raw()
        );
        Ok(ConstantBuffer {
            handle,
            size: padded,
        })
    }

    /// Create a buffer and the views and staging copy `request` asks for.
    pub fn create_buffer(&self, request: &BufferRequest<'_>) -> Result<ComputeBuffer<'ctx, B>> {
        request.kind.validate()?;
        let size = request.kind.size_bytes();
        if let Some(contents) = request.contents {
            if contents.len() as u64 != size {
                return Err(ComputeError::InvalidDescriptor(format!(
                    "buffer contents are {} bytes, expected {size}",
                    contents.len()
                )));
            }
        }
        let raw = self.backend.create_buffer(&BufferDesc {
            role: request.kind.role(),
            size,
            usage: usage_of(request.read_view, request.write_view, request.staging),
            contents: request.contents,
        })?;
        let parts = self.complete(
            OwnedHandle::new(self.backend, raw),
            [request.read_view, request.write_view, request.staging],
            request.debug_name,
        )?;
        log::debug!(
            "{}: created buffer {} ({size} bytes)",
            self.backend.name(),
            raw.as_raw()
        );
        Ok(ComputeBuffer {
            parts,
            kind: request.kind,
        })
    }

    /// Create a 2-D texture and the views and staging copy `request`
    /// asks for.
    pub fn create_texture(&self, request: &TextureRequest<'_>) -> Result<ComputeTexture<'ctx, B>> {
        request.validate()?;
        let mut usage = usage_of(request.read_view, request.write_view, request.staging);
        // A preferred write view on a sample-only format fails on its own
        // below instead of taking the whole texture with it.
        usage.write &= request.format.supports_storage();
        let raw = self.backend.create_texture(&TextureDesc {
            format: request.format,
            width: request.width,
            height: request.height,
            row_pitch: request.row_pitch,
            usage,
            contents: request.contents,
        })?;
        let parts = self.complete(
            OwnedHandle::new(self.backend, raw),
            [request.read_view, request.write_view, request.staging],
            request.debug_name,
        )?;
        log::debug!(
            "{}: created {:?} texture {} ({}x{})",
            self.backend.name(),
            request.format,
            raw.as_raw(),
            request.width,
            request.height
        );
        Ok(ComputeTexture {
            parts,
            format: request.format,
            width: request.width,
            height: request.height,
        })
    }

    /// Create the optional sub-objects of `resource`, then tag everything.
    fn complete(
        &self,
        resource: OwnedHandle<'ctx, B>,
        [read, write, staging]: [Request; 3],
        debug_name: Option<&str>,
    ) -> Result<ResourceParts<'ctx, B>> {
        let raw = resource.get().ok_or(ComputeError::Released)?;
        let read_view = self.sub_object(read, "read view", || self.backend.create_read_view(raw))?;
        let write_view =
            self.sub_object(write, "write view", || self.backend.create_write_view(raw))?;
        let staging =
            self.sub_object(staging, "staging copy", || self.backend.create_staging(raw))?;

        if let Some(name) = debug_name {
            self.backend.set_debug_name(raw, name);
            let views = [(&read_view, "srv"), (&write_view, "uav"), (&staging, "staging")];
            for (slot, suffix) in views {
                if let Ok(handle) = slot.get() {
                    self.backend.set_debug_name(handle, &format!("{name}.{suffix}"));
                }
            }
        }

        Ok(ResourceParts {
            backend: self.backend,
            resource,
            read_view,
            write_view,
            staging,
            staged: false,
        })
    }

    fn sub_object(
        &self,
        request: Request,
        what: &str,
        create: impl FnOnce() -> std::result::Result<RawHandle, crate::BackendError>,
    ) -> Result<Slot<'ctx, B>> {
        match request {
            Request::Skip => Ok(Slot::NotRequested),
            Request::Require => Ok(Slot::Present(OwnedHandle::new(self.backend, create()?))),
            Request::Prefer => match create() {
                Ok(raw) => Ok(Slot::Present(OwnedHandle::new(self.backend, raw))),
                Err(err) => {
                    log::warn!("{}: optional {what} not created: {err}", self.backend.name());
                    Ok(Slot::Failed(err.message))
                }
            },
        }
    }

    /// Dispatch the currently bound shader.
    pub fn dispatch(&self, groups: [u32; 3], bindings: &[Binding]) -> Result<()> {
        if self.backend.current_shader().is_none() {
            return Err(ComputeError::InvalidDescriptor(
                "dispatch without a bound compute shader".into(),
            ));
        }
        self.backend.dispatch(groups, bindings)?;
        Ok(())
    }

    /// Workgroup grid covering `count` invocations in groups of
    /// `workgroup_size`, folded into y when x would exceed the device
    /// limit.
    pub fn groups_for(&self, count: u32, workgroup_size: u32) -> [u32; 3] {
        let total_groups = count.div_ceil(workgroup_size.max(1));
        let (x, y) = split_workgroups(total_groups, self.backend.max_workgroups_per_dimension());
        [x, y, 1]
    }
}

fn usage_of(read: Request, write: Request, staging: Request) -> ResourceUsage {
    ResourceUsage {
        read: read.wanted(),
        write: write.wanted(),
        staging: staging.wanted(),
    }
}
