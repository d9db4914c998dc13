//! The device seam.
//!
//! Every wrapper in this crate talks to the GPU through a
//! [`ComputeBackend`].  A backend owns the native objects and hands out
//! opaque [`RawHandle`]s for them; the wrappers own the handles and
//! decide when they are released.  Two backends ship with the crate:
//! [`crate::WgpuBackend`] drives a real device through wgpu, and
//! [`crate::mock::MockBackend`] records calls so lifecycle rules can be
//! tested without a GPU.
//!
//! Backends are expected to use `Cell`/`RefCell` for their bookkeeping,
//! which keeps them `!Sync`.  All commands go to one immediate context,
//! so a shared backend must only be driven from one thread at a time.

use crate::error::BackendError;

/// Opaque identifier of a backend object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(u64);

impl RawHandle {
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Texel formats the wrappers can allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8Unorm,
    R32Float,
    R32Uint,
    Rg32Float,
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    Rgba32Uint,
}

impl PixelFormat {
    /// Whether shaders can write the format through a read/write view on
    /// every adapter.
    ///
    /// `R8Unorm` is sample-only unless the device enables adapter-specific
    /// format features, so textures in that format get no write view.
    pub fn supports_storage(self) -> bool {
        !matches!(self, PixelFormat::R8Unorm)
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::R8Unorm => 1,
            PixelFormat::R32Float | PixelFormat::R32Uint | PixelFormat::Rgba8Unorm => 4,
            PixelFormat::Rg32Float | PixelFormat::Rgba16Float => 8,
            PixelFormat::Rgba32Float | PixelFormat::Rgba32Uint => 16,
        }
    }
}

/// How a resource is going to be used.  Backends need to know this when
/// the resource is allocated, before any view or staging copy exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub read: bool,
    pub write: bool,
    pub staging: bool,
}

/// Layout of a buffer as seen by shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    Structured { element_size: u32 },
    Raw,
    Constant,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub role: BufferRole,
    pub size: u64,
    pub usage: ResourceUsage,
    pub contents: Option<&'a [u8]>,
}

#[derive(Debug, Clone, Copy)]
pub struct TextureDesc<'a> {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Distance in bytes between the starts of two rows of `contents`.
    pub row_pitch: u32,
    pub usage: ResourceUsage,
    pub contents: Option<&'a [u8]>,
}

/// Shader code handed to [`ComputeBackend::compile_shader`].
#[derive(Debug, Clone, Copy)]
pub enum ShaderCode<'a> {
    /// Preprocessed source text.
    Source {
        label: &'a str,
        text: &'a str,
        entry_point: &'a str,
    },
    /// A blob previously returned in [`CompiledShader::blob`].
    Blob {
        label: &'a str,
        bytes: &'a [u8],
        entry_point: &'a str,
    },
}

impl ShaderCode<'_> {
    pub fn entry_point(&self) -> &str {
        match self {
            ShaderCode::Source { entry_point, .. } | ShaderCode::Blob { entry_point, .. } => {
                entry_point
            }
        }
    }
}

#[derive(Debug)]
pub struct CompiledShader {
    pub handle: RawHandle,
    /// Bytes worth caching on disk, if the backend has a compiled form.
    pub blob: Option<Vec<u8>>,
}

/// A view (or a constant buffer) bound to a shader slot for one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub slot: u32,
    pub view: RawHandle,
}

impl Binding {
    pub fn new(slot: u32, view: RawHandle) -> Self {
        Self { slot, view }
    }
}

/// Native device operations used by the wrappers.
pub trait ComputeBackend {
    /// Human readable backend name for diagnostics.
    fn name(&self) -> &str;

    fn compile_shader(&self, code: &ShaderCode<'_>) -> Result<CompiledShader, BackendError>;

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<RawHandle, BackendError>;

    fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<RawHandle, BackendError>;

    /// Shader-readable view of a buffer or texture.
    fn create_read_view(&self, resource: RawHandle) -> Result<RawHandle, BackendError>;

    /// Shader read/write view of a buffer or texture.
    fn create_write_view(&self, resource: RawHandle) -> Result<RawHandle, BackendError>;

    /// CPU-readable mirror of `resource`, filled by [`Self::copy_resource`].
    fn create_staging(&self, resource: RawHandle) -> Result<RawHandle, BackendError>;

    /// Attach a name for graphics debuggers.  Has no behavioural effect.
    fn set_debug_name(&self, object: RawHandle, name: &str);

    /// Queue a device-side copy of `src` into the staging object `dst`.
    fn copy_resource(&self, dst: RawHandle, src: RawHandle);

    /// Map a staging object for reading, blocking until the bytes are
    /// visible to the CPU, then pass them to `read` exactly once.
    ///
    /// The slice borrows the mapping itself where the backend can, so the
    /// caller's copy out of it is the only one.  Texture rows arrive
    /// tightly packed; a backend that pads rows internally strips the
    /// padding into a temporary first.  The object stays mapped until
    /// [`Self::unmap`].  `read` must not call back into the backend.
    fn map_read(&self, staging: RawHandle, read: &mut dyn FnMut(&[u8])) -> Result<(), BackendError>;

    fn unmap(&self, staging: RawHandle);

    /// Set (or clear, with `None`) the context's current compute shader.
    fn set_shader(&self, shader: Option<RawHandle>);

    fn current_shader(&self) -> Option<RawHandle>;

    /// Dispatch the current compute shader.
    fn dispatch(&self, groups: [u32; 3], bindings: &[Binding]) -> Result<(), BackendError>;

    fn max_workgroups_per_dimension(&self) -> u32;

    /// Destroy an object.  Called at most once per handle by the wrappers.
    fn release(&self, object: RawHandle);
}

/// Copy `height` rows of `row_bytes` out of `data`, whose rows start
/// every `pitch` bytes, into a tightly packed vector.
pub(crate) fn pack_rows(data: &[u8], pitch: usize, row_bytes: usize, height: usize) -> Vec<u8> {
    let mut tight = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * pitch;
        tight.extend_from_slice(&data[start..start + row_bytes]);
    }
    tight
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_rows_drops_row_padding() {
        let data = [1u8, 2, 0, 0, 3, 4, 0, 0, 5, 6];
        assert_eq!(pack_rows(&data, 4, 2, 3), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn pixel_sizes() {
        assert_eq!(PixelFormat::R8Unorm.bytes_per_pixel(), 1);
        assert_eq!(PixelFormat::Rgba8Unorm.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgba32Float.bytes_per_pixel(), 16);
    }

    #[test]
    fn only_r8_lacks_storage() {
        assert!(!PixelFormat::R8Unorm.supports_storage());
        assert!(PixelFormat::R32Float.supports_storage());
        assert!(PixelFormat::Rgba8Unorm.supports_storage());
        assert!(PixelFormat::Rgba32Uint.supports_storage());
    }
}
