//! 2-D textures with optional views and CPU readback.
//!
//! Same shape as [`crate::ComputeBuffer`], for images.  Mapped texture
//! data is tightly packed: `width * bytes_per_pixel` bytes per row,
//! whatever row pitch the device used internally.

use bytemuck::Pod;

use crate::backend::{ComputeBackend, PixelFormat, RawHandle};
use crate::error::{ComputeError, Result};
use crate::handle::{Absent, Request};
use crate::mapped::Mapped;
use crate::resource::ResourceParts;

/// Creation parameters for [`crate::ComputeWrap::create_texture`].
#[derive(Debug, Clone, Copy)]
pub struct TextureRequest<'a> {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Row pitch of `contents` in bytes.
    pub row_pitch: u32,
    pub read_view: Request,
    pub write_view: Request,
    pub staging: Request,
    pub contents: Option<&'a [u8]>,
    pub debug_name: Option<&'a str>,
}

impl<'a> TextureRequest<'a> {
    /// A texture with tightly packed rows and no staging copy.
    ///
    /// The read view is required.  The write view is required too when
    /// the format [supports storage](PixelFormat::supports_storage) and
    /// skipped otherwise.
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        let write_view = if format.supports_storage() {
            Request::Require
        } else {
            Request::Skip
        };
        Self {
            format,
            width,
            height,
            row_pitch: width.saturating_mul(format.bytes_per_pixel()),
            read_view: Request::Require,
            write_view,
            staging: Request::Skip,
            contents: None,
            debug_name: None,
        }
    }

    pub fn row_pitch(mut self, row_pitch: u32) -> Self {
        self.row_pitch = row_pitch;
        self
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

    /// Bytes in one tightly packed row.
    pub fn row_bytes(&self) -> u64 {
        u64::from(self.width) * u64::from(self.format.bytes_per_pixel())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ComputeError::InvalidDescriptor(format!(
                "texture size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.write_view == Request::Require && !self.format.supports_storage() {
            return Err(ComputeError::InvalidDescriptor(format!(
                "{:?} textures cannot have a write view",
                self.format
            )));
        }
        let row_bytes = self.row_bytes();
        if u64::from(self.row_pitch) < row_bytes {
            return Err(ComputeError::InvalidDescriptor(format!(
                "row pitch {} is smaller than a row of {row_bytes} bytes",
                self.row_pitch
            )));
        }
        if let Some(contents) = self.contents {
            let needed = u64::from(self.row_pitch) * u64::from(self.height - 1) + row_bytes;
            if (contents.len() as u64) < needed {
                return Err(ComputeError::InvalidDescriptor(format!(
                    "texture contents hold {} bytes, {needed} needed",
                    contents.len()
                )));
            }
        }
        Ok(())
    }
}

/// A 2-D texture plus its optional views and staging copy.
pub struct ComputeTexture<'ctx, B: ComputeBackend + ?Sized> {
    pub(crate) parts: ResourceParts<'ctx, B>,
    pub(crate) format: PixelFormat,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

impl<'ctx, B: ComputeBackend + ?Sized> ComputeTexture<'ctx, B> {
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels, i.e. the number of rows a mapping holds.
    pub fn height(&self) -> u32 {
        self.height
    }

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

    pub fn copy_to_staging(&mut self) -> Result<()> {
        self.parts.copy_to_staging()
    }

    /// Map the staging copy as `width * height` pixels of `T`, row by row.
    pub fn map<T: Pod>(&mut self) -> Result<Mapped<'_, B, T>> {
        self.parts.map()
    }

    pub fn release(&mut self) {
        self.parts.release();
    }

    pub fn is_released(&self) -> bool {
        self.parts.is_released()
    }
}
