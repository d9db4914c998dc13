//! Error types.
//!
//! Backends report failures as a [`BackendError`] tagged with the
//! operation that failed.  Everything the public API returns is a
//! [`ComputeError`]; a failure is fatal to the single call that produced
//! it and never to the process.

use std::path::PathBuf;

use thiserror::Error;

/// Backend operation a [`BackendError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOp {
    /// Building a shader from source text or a cached blob.
    CompileShader,
    /// Allocating a buffer, constant buffers included.
    CreateBuffer,
    /// Allocating a 2-D texture and uploading its initial contents.
    CreateTexture,
    /// Making a shader-readable view of a buffer or texture.
    CreateReadView,
    /// Making a read/write view of a buffer or texture.
    CreateWriteView,
    /// Allocating the CPU-readable mirror of a resource.
    CreateStaging,
    /// Mapping a staging copy for reading.
    Map,
    /// Recording and submitting a compute dispatch.
    Dispatch,
}

/// Failure reported by a [`crate::ComputeBackend`].
#[derive(Debug, Clone, Error)]
#[error("{op:?} failed: {message}")]
pub struct BackendError {
    pub op: BackendOp,
    pub message: String,
}

impl BackendError {
    pub fn new(op: BackendOp, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
        }
    }
}

/// Errors returned by the wrappers and the factory.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to access shader file {path}: {source}")]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid shader define `{name}`: {reason}")]
    InvalidDefine { name: String, reason: &'static str },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("resource was created without a staging copy")]
    MissingStaging,

    #[error("staging copy has not been populated; call copy_to_staging first")]
    StagingNotPopulated,

    #[error("mapped staging data of {len} bytes is not a whole number of {elem}-byte elements")]
    Map { len: usize, elem: usize },

    #[error("resource has been released")]
    Released,

    #[error("no suitable GPU adapter: {0}")]
    NoAdapter(String),
}

pub type Result<T> = std::result::Result<T, ComputeError>;
