//! Scoped CPU access to a staging copy.

use std::ops::Deref;

use bytemuck::Pod;

use crate::backend::{ComputeBackend, RawHandle};

/// Typed read access to a mapped staging copy.
///
/// The guard mutably borrows the wrapper it came from, so the wrapper
/// cannot copy into its staging copy or be released while the mapping is
/// alive.  Dropping the guard unmaps the staging copy exactly once.
pub struct Mapped<'a, B: ComputeBackend + ?Sized, T: Pod> {
    backend: &'a B,
    staging: RawHandle,
    data: Vec<T>,
}

impl<'a, B: ComputeBackend + ?Sized, T: Pod> Mapped<'a, B, T> {
    pub(crate) fn new(backend: &'a B, staging: RawHandle, data: Vec<T>) -> Self {
        Self {
            backend,
            staging,
            data,
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Copy the contents out before the mapping ends.
    pub fn to_vec(&self) -> Vec<T> {
        self.data.clone()
    }

    /// End the mapping now.  Equivalent to dropping the guard.
    pub fn unmap(self) {}
}

impl<B: ComputeBackend + ?Sized, T: Pod> Deref for Mapped<'_, B, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<B: ComputeBackend + ?Sized, T: Pod> Drop for Mapped<'_, B, T> {
    fn drop(&mut self) {
        self.backend.unmap(self.staging);
    }
}

/// Reinterpret mapped bytes as `T`s.
///
/// This is the one copy out of the mapping.  It lands in a `Vec<T>`, so
/// `bytes` needs no particular alignment.
pub(crate) fn cast_mapped<T: Pod>(bytes: &[u8]) -> Option<Vec<T>> {
    let elem = std::mem::size_of::<T>();
    if elem == 0 || bytes.len() % elem != 0 {
        return None;
    }
    let mut out = vec![<T as bytemuck::Zeroable>::zeroed(); bytes.len() / elem];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_mapped_reads_little_endian_words() {
        let bytes = [1u8, 0, 0, 0, 2, 0, 0, 0];
        assert_eq!(cast_mapped::<u32>(&bytes), Some(vec![1, 2]));
    }

    #[test]
    fn cast_mapped_rejects_partial_elements() {
        assert_eq!(cast_mapped::<u32>(&[0u8; 6]), None);
    }
}
