//! State shared by the buffer and texture wrappers: the resource itself,
//! its two optional views and its optional staging copy.

use bytemuck::Pod;

use crate::backend::{ComputeBackend, RawHandle};
use crate::error::{ComputeError, Result};
use crate::handle::{Absent, OwnedHandle, Slot};
use crate::mapped::{cast_mapped, Mapped};

pub(crate) struct ResourceParts<'ctx, B: ComputeBackend + ?Sized> {
    pub(crate) backend: &'ctx B,
    pub(crate) resource: OwnedHandle<'ctx, B>,
    pub(crate) read_view: Slot<'ctx, B>,
    pub(crate) write_view: Slot<'ctx, B>,
    pub(crate) staging: Slot<'ctx, B>,
    pub(crate) staged: bool,
}

impl<'ctx, B: ComputeBackend + ?Sized> ResourceParts<'ctx, B> {
    pub(crate) fn resource(&self) -> Result<RawHandle> {
        self.resource.get().ok_or(ComputeError::Released)
    }

    fn staging_handle(&self) -> Result<RawHandle> {
        self.staging.get().map_err(|absent| match absent {
            Absent::Released => ComputeError::Released,
            _ => ComputeError::MissingStaging,
        })
    }

    pub(crate) fn copy_to_staging(&mut self) -> Result<()> {
        let dst = self.staging_handle()?;
        let src = self.resource()?;
        self.backend.copy_resource(dst, src);
        self.staged = true;
        Ok(())
    }

    pub(crate) fn map<T: Pod>(&mut self) -> Result<Mapped<'_, B, T>> {
        let staging = self.staging_handle()?;
        if !self.staged {
            return Err(ComputeError::StagingNotPopulated);
        }
        let mut len = 0;
        let mut data = None;
        self.backend.map_read(staging, &mut |bytes| {
            len = bytes.len();
            data = cast_mapped::<T>(bytes);
        })?;
        match data {
            Some(data) => Ok(Mapped::new(self.backend, staging, data)),
            None => {
                self.backend.unmap(staging);
                Err(ComputeError::Map {
                    len,
                    elem: std::mem::size_of::<T>(),
                })
            }
        }
    }

    pub(crate) fn release(&mut self) {
        self.resource.release();
        self.read_view.release();
        self.write_view.release();
        self.staging.release();
        self.staged = false;
    }

    pub(crate) fn is_released(&self) -> bool {
        self.resource.get().is_none()
    }
}
