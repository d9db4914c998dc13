//! Small owning wrappers for GPU compute resources.
//!
//! The crate removes the boilerplate of creating compute shaders,
//! buffers, textures and the staging copies needed to read results back
//! on the CPU.  Everything is created through a [`ComputeWrap`] factory
//! that borrows a [`ComputeBackend`]:
//!
//! ```no_run
//! use compute_wrap::{BufferRequest, ComputeWrap, ContextOptions, ShaderDesc, WgpuBackend};
//!
//! # fn main() -> compute_wrap::Result<()> {
//! let backend = WgpuBackend::new_blocking(&ContextOptions::default())?;
//! let wrap = ComputeWrap::new(&backend);
//! let shader = wrap.create_compute_shader(&ShaderDesc::new("shaders/dct.wgsl", "main"))?;
//! let mut output = wrap.create_buffer(
//!     &BufferRequest::structured(4, 1024).write_view(true).staging(true),
//! )?;
//! shader.bind();
//! # let uav = output.write_view().expect("requested");
//! wrap.dispatch(wrap.groups_for(1024, 64), &[compute_wrap::Binding::new(0, uav)])?;
//! shader.unbind();
//! output.copy_to_staging()?;
//! let values = output.map::<f32>()?;
//! println!("first value: {}", values[0]);
//! # Ok(())
//! # }
//! ```
//!
//! Every wrapper owns the native objects it created and releases them
//! exactly once, on [`ComputeBuffer::release`] or on drop.  Wrappers
//! borrow the backend, so they cannot outlive it, and backends are
//! `!Sync`: all work goes through one immediate context on one thread.
//!
//! Reads are not fenced.  A staging copy is only as fresh as the last
//! `copy_to_staging` that completed before `map`.

pub mod backend;
pub mod buffer;
pub mod context;
pub mod error;
pub mod handle;
pub mod mapped;
pub mod mock;
mod resource;
pub mod shader;
pub mod texture;
pub mod wgpu_backend;
pub mod wrap;

pub use backend::{
    Binding, BufferDesc, BufferRole, CompiledShader, ComputeBackend, PixelFormat, RawHandle,
    ResourceUsage, ShaderCode, TextureDesc,
};
pub use buffer::{BufferKind, BufferRequest, ComputeBuffer, ConstantBuffer};
pub use context::{ContextOptions, GpuContext};
pub use error::{BackendError, BackendOp, ComputeError, Result};
pub use handle::{Absent, OwnedHandle, Request};
pub use mapped::Mapped;
pub use shader::{ComputeShader, Define, ShaderDesc};
pub use texture::{ComputeTexture, TextureRequest};
pub use wgpu_backend::WgpuBackend;
pub use wrap::ComputeWrap;
