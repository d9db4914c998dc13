//! [`ComputeBackend`] on top of wgpu.
//!
//! wgpu has no immediate context with a current compute shader, so this
//! backend keeps one: `set_shader` records a pipeline and `dispatch`
//! builds a bind group for it and submits a single compute pass.
//!
//! Textures cannot be mapped in wgpu.  A texture's staging copy is a
//! buffer with rows padded to `COPY_BYTES_PER_ROW_ALIGNMENT`; mapping it
//! strips the padding again.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::mpsc;

use wgpu::util::DeviceExt;

use crate::backend::{
    pack_rows, Binding, BufferDesc, BufferRole, CompiledShader, ComputeBackend, PixelFormat,
    RawHandle, ShaderCode, TextureDesc,
};
use crate::context::{ContextOptions, GpuContext};
use crate::error::{BackendError, BackendOp, Result};

type BackendResult<T> = std::result::Result<T, BackendError>;

impl PixelFormat {
    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            PixelFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            PixelFormat::R32Float => wgpu::TextureFormat::R32Float,
            PixelFormat::R32Uint => wgpu::TextureFormat::R32Uint,
            PixelFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
            PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            PixelFormat::Rgba32Uint => wgpu::TextureFormat::Rgba32Uint,
        }
    }
}

fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

enum Object {
    Shader(wgpu::ComputePipeline),
    Buffer {
        buffer: wgpu::Buffer,
        size: u64,
    },
    Texture {
        texture: wgpu::Texture,
        width: u32,
        height: u32,
        row_bytes: u32,
    },
    BufferView {
        parent: RawHandle,
    },
    TextureView(wgpu::TextureView),
    Staging {
        buffer: wgpu::Buffer,
        layout: StagingLayout,
        mapped: bool,
    },
}

impl Object {
    fn describe(&self) -> &'static str {
        match self {
            Object::Shader(_) => "shader",
            Object::Buffer { .. } => "buffer",
            Object::Texture { .. } => "texture",
            Object::BufferView { .. } => "buffer view",
            Object::TextureView(_) => "texture view",
            Object::Staging { .. } => "staging copy",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum StagingLayout {
    /// `size` meaningful bytes, `padded` allocated.
    Linear { size: u64, padded: u64 },
    /// Texture rows `padded_row` apart.
    Rows {
        width: u32,
        height: u32,
        row_bytes: u32,
        padded_row: u32,
    },
}

/// Compute backend driving a real GPU through wgpu.
pub struct WgpuBackend {
    context: GpuContext,
    objects: RefCell<HashMap<RawHandle, Object>>,
    names: RefCell<HashMap<RawHandle, String>>,
    next: Cell<u64>,
    current: Cell<Option<RawHandle>>,
}

impl WgpuBackend {
    pub fn new(context: GpuContext) -> Self {
        Self {
            context,
            objects: RefCell::new(HashMap::new()),
            names: RefCell::new(HashMap::new()),
            next: Cell::new(1),
            current: Cell::new(None),
        }
    }

    /// Pick an adapter and open a device with `options`.
    pub fn new_blocking(options: &ContextOptions) -> Result<Self> {
        Ok(Self::new(GpuContext::new_blocking(options)?))
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Name given through `set_debug_name`, if any.
    pub fn debug_name(&self, object: RawHandle) -> Option<String> {
        self.names.borrow().get(&object).cloned()
    }

    fn insert(&self, object: Object) -> RawHandle {
        let handle = RawHandle::from_raw(self.next.get());
        self.next.set(self.next.get() + 1);
        log::debug!("wgpu: created {} {}", object.describe(), handle.as_raw());
        self.objects.borrow_mut().insert(handle, object);
        handle
    }

    /// Run `f` inside validation and out-of-memory error scopes and turn
    /// any captured error into a [`BackendError`].
    fn scoped<T>(&self, op: BackendOp, f: impl FnOnce(&wgpu::Device) -> T) -> BackendResult<T> {
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(device);
        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        match validation.or(out_of_memory) {
            Some(err) => Err(BackendError::new(op, err.to_string())),
            None => Ok(value),
        }
    }

    fn wait(&self, op: BackendOp) -> BackendResult<()> {
        self.context
            .device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| BackendError::new(op, format!("device polling failed: {e}")))
    }

    fn texture_copy_info(texture: &wgpu::Texture) -> wgpu::TexelCopyTextureInfo<'_> {
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        }
    }
}

impl ComputeBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn compile_shader(&self, code: &ShaderCode<'_>) -> BackendResult<CompiledShader> {
        let (label, text) = match code {
            ShaderCode::Source { label, text, .. } => (*label, Cow::Borrowed(*text)),
            ShaderCode::Blob { label, bytes, .. } => {
                // Blobs written by this backend are preprocessed WGSL.
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    BackendError::new(BackendOp::CompileShader, format!("blob is not WGSL: {e}"))
                })?;
                (*label, Cow::Borrowed(text))
            }
        };
        let entry_point = code.entry_point();
        let pipeline = self.scoped(BackendOp::CompileShader, |device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(text.clone()),
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: None,
                module: &module,
                entry_point: Some(entry_point),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        })?;
        let blob = match code {
            ShaderCode::Source { text, .. } => Some(text.as_bytes().to_vec()),
            ShaderCode::Blob { .. } => None,
        };
        Ok(CompiledShader {
            handle: self.insert(Object::Shader(pipeline)),
            blob,
        })
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> BackendResult<RawHandle> {
        let mut usage = wgpu::BufferUsages::COPY_DST;
        match desc.role {
            BufferRole::Constant => usage |= wgpu::BufferUsages::UNIFORM,
            BufferRole::Structured { .. } | BufferRole::Raw => usage |= wgpu::BufferUsages::STORAGE,
        }
        if desc.usage.staging {
            usage |= wgpu::BufferUsages::COPY_SRC;
        }
        // Copies and queue writes work in 4-byte units.
        let padded = align_to(desc.size, wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.scoped(BackendOp::CreateBuffer, |device| match desc.contents {
            Some(data) => {
                let mut contents = data.to_vec();
                contents.resize(padded as usize, 0);
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: None,
                    contents: &contents,
                    usage,
                })
            }
            None => device.create_buffer(&wgpu::BufferDescriptor {
                label: None,
                size: padded,
                usage,
                mapped_at_creation: false,
            }),
        })?;
        Ok(self.insert(Object::Buffer {
            buffer,
            size: desc.size,
        }))
    }

    fn create_texture(&self, desc: &TextureDesc<'_>) -> BackendResult<RawHandle> {
        let mut usage = wgpu::TextureUsages::COPY_DST;
        if desc.usage.read {
            usage |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if desc.usage.write {
            if !desc.format.supports_storage() {
                return Err(BackendError::new(
                    BackendOp::CreateTexture,
                    format!("{:?} does not support storage usage", desc.format),
                ));
            }
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        if desc.usage.staging {
            usage |= wgpu::TextureUsages::COPY_SRC;
        }
        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        };
        let texture = self.scoped(BackendOp::CreateTexture, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: None,
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: desc.format.to_wgpu(),
                usage,
                view_formats: &[],
            })
        })?;
        if let Some(data) = desc.contents {
            self.context.queue.write_texture(
                Self::texture_copy_info(&texture),
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(desc.row_pitch),
                    rows_per_image: Some(desc.height),
                },
                size,
            );
        }
        Ok(self.insert(Object::Texture {
            texture,
            width: desc.width,
            height: desc.height,
            row_bytes: desc.width * desc.format.bytes_per_pixel(),
        }))
    }

    fn create_read_view(&self, resource: RawHandle) -> BackendResult<RawHandle> {
        let view = match self.objects.borrow().get(&resource) {
            Some(Object::Buffer { .. }) => Object::BufferView { parent: resource },
            Some(Object::Texture { texture, .. }) => {
                Object::TextureView(texture.create_view(&wgpu::TextureViewDescriptor::default()))
            }
            _ => {
                return Err(BackendError::new(
                    BackendOp::CreateReadView,
                    "not a buffer or texture",
                ))
            }
        };
        Ok(self.insert(view))
    }

    fn create_write_view(&self, resource: RawHandle) -> BackendResult<RawHandle> {
        let view = match self.objects.borrow().get(&resource) {
            Some(Object::Buffer { .. }) => Object::BufferView { parent: resource },
            Some(Object::Texture { texture, .. }) => {
                if !texture.usage().contains(wgpu::TextureUsages::STORAGE_BINDING) {
                    return Err(BackendError::new(
                        BackendOp::CreateWriteView,
                        "texture was created without storage usage",
                    ));
                }
                Object::TextureView(texture.create_view(&wgpu::TextureViewDescriptor::default()))
            }
            _ => {
                return Err(BackendError::new(
                    BackendOp::CreateWriteView,
                    "not a buffer or texture",
                ))
            }
        };
        Ok(self.insert(view))
    }

    fn create_staging(&self, resource: RawHandle) -> BackendResult<RawHandle> {
        let layout = match self.objects.borrow().get(&resource) {
            Some(Object::Buffer { size, .. }) => StagingLayout::Linear {
                size: *size,
                padded: align_to(*size, wgpu::COPY_BUFFER_ALIGNMENT),
            },
            Some(Object::Texture {
                width,
                height,
                row_bytes,
                ..
            }) => StagingLayout::Rows {
                width: *width,
                height: *height,
                row_bytes: *row_bytes,
                padded_row: align_to(
                    u64::from(*row_bytes),
                    u64::from(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
                ) as u32,
            },
            _ => return Err(BackendError::new(BackendOp::CreateStaging, "not a buffer or texture")),
        };
        let size = match layout {
            StagingLayout::Linear { padded, .. } => padded,
            StagingLayout::Rows {
                height, padded_row, ..
            } => u64::from(padded_row) * u64::from(height),
        };
        let buffer = self.scoped(BackendOp::CreateStaging, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: None,
                size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        })?;
        Ok(self.insert(Object::Staging {
            buffer,
            layout,
            mapped: false,
        }))
    }

    fn set_debug_name(&self, object: RawHandle, name: &str) {
        // wgpu labels are fixed at creation; keep the name for diagnostics.
        log::debug!("wgpu: object {} is `{name}`", object.as_raw());
        self.names.borrow_mut().insert(object, name.to_owned());
    }

    fn copy_resource(&self, dst: RawHandle, src: RawHandle) {
        let objects = self.objects.borrow();
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("copy_to_staging"),
            });
        match (objects.get(&src), objects.get(&dst)) {
            (
                Some(Object::Buffer { buffer: source, .. }),
                Some(Object::Staging {
                    buffer: staging,
                    layout: StagingLayout::Linear { padded, .. },
                    mapped: false,
                }),
            ) => encoder.copy_buffer_to_buffer(source, 0, staging, 0, *padded),
            (
                Some(Object::Texture { texture, .. }),
                Some(Object::Staging {
                    buffer: staging,
                    layout:
                        StagingLayout::Rows {
                            width,
                            height,
                            padded_row,
                            ..
                        },
                    mapped: false,
                }),
            ) => encoder.copy_texture_to_buffer(
                Self::texture_copy_info(texture),
                wgpu::TexelCopyBufferInfo {
                    buffer: staging,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(*padded_row),
                        rows_per_image: Some(*height),
                    },
                },
                wgpu::Extent3d {
                    width: *width,
                    height: *height,
                    depth_or_array_layers: 1,
                },
            ),
            _ => {
                log::error!(
                    "wgpu: cannot copy object {} into {}",
                    src.as_raw(),
                    dst.as_raw()
                );
                return;
            }
        }
        self.context.queue.submit([encoder.finish()]);
    }

    fn map_read(&self, staging: RawHandle, read: &mut dyn FnMut(&[u8])) -> BackendResult<()> {
        let mut objects = self.objects.borrow_mut();
        let Some(Object::Staging {
            buffer,
            layout,
            mapped,
        }) = objects.get_mut(&staging)
        else {
            return Err(BackendError::new(BackendOp::Map, "not a staging copy"));
        };
        if *mapped {
            return Err(BackendError::new(BackendOp::Map, "already mapped"));
        }
        let slice = buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.wait(BackendOp::Map)?;
        receiver
            .recv()
            .map_err(|_| BackendError::new(BackendOp::Map, "map callback dropped"))?
            .map_err(|e| BackendError::new(BackendOp::Map, e.to_string()))?;
        *mapped = true;

        let data = slice.get_mapped_range();
        match *layout {
            StagingLayout::Linear { size, .. } => read(&data[..size as usize]),
            StagingLayout::Rows {
                height,
                row_bytes,
                padded_row,
                ..
            } if padded_row == row_bytes => {
                read(&data[..row_bytes as usize * height as usize]);
            }
            StagingLayout::Rows {
                height,
                row_bytes,
                padded_row,
                ..
            } => read(&pack_rows(
                &data,
                padded_row as usize,
                row_bytes as usize,
                height as usize,
            )),
        }
        Ok(())
    }

    fn unmap(&self, staging: RawHandle) {
        let mut objects = self.objects.borrow_mut();
        if let Some(Object::Staging { buffer, mapped, .. }) = objects.get_mut(&staging) {
            if *mapped {
                buffer.unmap();
                *mapped = false;
            }
        }
    }

    fn set_shader(&self, shader: Option<RawHandle>) {
        self.current.set(shader);
    }

    fn current_shader(&self) -> Option<RawHandle> {
        self.current.get()
    }

    fn dispatch(&self, groups: [u32; 3], bindings: &[Binding]) -> BackendResult<()> {
        let objects = self.objects.borrow();
        let pipeline = match self.current.get().and_then(|h| objects.get(&h)) {
            Some(Object::Shader(pipeline)) => pipeline,
            _ => return Err(BackendError::new(BackendOp::Dispatch, "no shader bound")),
        };
        let mut entries = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let target = match objects.get(&binding.view) {
                Some(Object::BufferView { parent }) => objects.get(parent),
                other => other,
            };
            let resource = match target {
                Some(Object::Buffer { buffer, .. }) => buffer.as_entire_binding(),
                Some(Object::TextureView(view)) => wgpu::BindingResource::TextureView(view),
                _ => {
                    return Err(BackendError::new(
                        BackendOp::Dispatch,
                        format!("slot {} is not bindable", binding.slot),
                    ))
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: binding.slot,
                resource,
            });
        }
        self.scoped(BackendOp::Dispatch, |device| {
            let layout = pipeline.get_bind_group_layout(0);
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("compute_bind_group"),
                layout: &layout,
                entries: &entries,
            });
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("compute_encoder"),
            });
            {
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("compute_pass"),
                    timestamp_writes: None,
                });
                cpass.set_pipeline(pipeline);
                cpass.set_bind_group(0, &bind_group, &[]);
                cpass.dispatch_workgroups(groups[0], groups[1], groups[2]);
            }
            self.context.queue.submit([encoder.finish()]);
        })
    }

    fn max_workgroups_per_dimension(&self) -> u32 {
        self.context.device.limits().max_compute_workgroups_per_dimension
    }

    fn release(&self, object: RawHandle) {
        self.names.borrow_mut().remove(&object);
        if self.current.get() == Some(object) {
            self.current.set(None);
        }
        match self.objects.borrow_mut().remove(&object) {
            Some(Object::Staging {
                buffer,
                mapped: true,
                ..
            }) => buffer.unmap(),
            Some(_) => {}
            None => log::warn!("wgpu: release of unknown object {}", object.as_raw()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_pad_to_copy_alignment() {
        assert_eq!(align_to(4 * 3, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(6, wgpu::COPY_BUFFER_ALIGNMENT), 8);
    }
}
