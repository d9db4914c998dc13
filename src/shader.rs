//! Compute shaders: loading, defines, blob cache, bind/unbind.
//!
//! A shader is described by a source file, an entry point and a list of
//! [`Define`]s.  WGSL has no preprocessor, so each define becomes a
//! `const NAME = VALUE;` declaration prepended to the source.
//!
//! When a blob suffix is given, the compiled form the backend returns is
//! cached next to the source as `<file>.<suffix>` and reused while it is
//! at least as new as the source.  The defines are baked into the blob, so
//! the suffix has to identify the define set: two descriptors with the
//! same file and suffix but different defines share one cache entry.

use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::{ComputeBackend, RawHandle};
use crate::error::{ComputeError, Result};
use crate::handle::OwnedHandle;

/// A named value injected into the shader source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Define {
    pub name: String,
    /// WGSL expression.  Empty means `true`.
    pub value: String,
}

impl Define {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// A define with no value, i.e. a boolean flag.
    pub fn flag(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }
}

/// Everything needed to build a [`ComputeShader`].
#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub path: PathBuf,
    pub blob_suffix: Option<String>,
    pub entry_point: String,
    pub defines: Vec<Define>,
}

impl ShaderDesc {
    pub fn new(path: impl Into<PathBuf>, entry_point: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            blob_suffix: None,
            entry_point: entry_point.into(),
            defines: Vec::new(),
        }
    }

    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.push(Define::new(name, value));
        self
    }

    /// Cache the compiled shader as `<path>.<suffix>`.
    ///
    /// Use a different suffix for every define set compiled from the same
    /// file; a fresh blob is loaded without looking at the defines.
    pub fn blob_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.blob_suffix = Some(suffix.into());
        self
    }

    /// Location of the compiled blob, if caching is enabled.
    pub fn cache_path(&self) -> Option<PathBuf> {
        let suffix = self.blob_suffix.as_deref()?;
        let mut name = self.path.clone().into_os_string();
        name.push(".");
        name.push(suffix);
        Some(PathBuf::from(name))
    }

    pub(crate) fn label(&self) -> String {
        let file = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{file}:{}", self.entry_point)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name != "_" && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check that every define can be emitted as a WGSL constant.
pub fn check_defines(defines: &[Define]) -> Result<()> {
    for (i, define) in defines.iter().enumerate() {
        if !is_identifier(&define.name) {
            return Err(ComputeError::InvalidDefine {
                name: define.name.clone(),
                reason: "not an identifier",
            });
        }
        if defines[..i].iter().any(|d| d.name == define.name) {
            return Err(ComputeError::InvalidDefine {
                name: define.name.clone(),
                reason: "defined twice",
            });
        }
        if define.value.contains([';', '\n', '\r']) {
            return Err(ComputeError::InvalidDefine {
                name: define.name.clone(),
                reason: "value must be a single expression",
            });
        }
    }
    Ok(())
}

/// Prepend one constant declaration per define to `source`.
pub fn preprocess(source: &str, defines: &[Define]) -> Result<String> {
    check_defines(defines)?;
    let mut header = String::new();
    for define in defines {
        let value = match define.value.trim() {
            "" => "true",
            value => value,
        };
        header.push_str(&format!("const {} = {};\n", define.name, value));
    }
    if header.is_empty() {
        return Ok(source.to_owned());
    }
    header.push('\n');
    header.push_str(source);
    Ok(header)
}

/// What the loader found on disk.
#[derive(Debug)]
pub(crate) enum ShaderInput {
    Blob(Vec<u8>),
    Source(String),
}

fn modified(path: &Path) -> Option<std::time::SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Use the cached blob when it is fresh, otherwise read and preprocess
/// the source.  Defines are checked either way.
pub(crate) fn load(desc: &ShaderDesc) -> Result<ShaderInput> {
    check_defines(&desc.defines)?;
    if let Some(cache) = desc.cache_path() {
        if let Some(cached_at) = modified(&cache) {
            let fresh = match modified(&desc.path) {
                Some(source_at) => cached_at >= source_at,
                None => !desc.path.exists(),
            };
            if fresh {
                match fs::read(&cache) {
                    Ok(bytes) => {
                        log::debug!("loading shader blob {}", cache.display());
                        return Ok(ShaderInput::Blob(bytes));
                    }
                    Err(err) => log::warn!("ignoring shader blob {}: {err}", cache.display()),
                }
            }
        }
    }
    Ok(ShaderInput::Source(read_source(desc)?))
}

pub(crate) fn read_source(desc: &ShaderDesc) -> Result<String> {
    let source = fs::read_to_string(&desc.path).map_err(|source| ComputeError::ShaderIo {
        path: desc.path.clone(),
        source,
    })?;
    preprocess(&source, &desc.defines)
}

pub(crate) fn store_blob(desc: &ShaderDesc, blob: &[u8]) {
    if let Some(cache) = desc.cache_path() {
        match fs::write(&cache, blob) {
            Ok(()) => log::debug!("wrote shader blob {}", cache.display()),
            Err(err) => log::warn!("could not write shader blob {}: {err}", cache.display()),
        }
    }
}

/// A compiled compute shader.
///
/// Binding makes it the context's current compute shader.  The context
/// is shared by every shader made from the same backend, so only one of
/// them is current at a time.
pub struct ComputeShader<'ctx, B: ComputeBackend + ?Sized> {
    pub(crate) backend: &'ctx B,
    pub(crate) handle: OwnedHandle<'ctx, B>,
    pub(crate) entry_point: String,
}

impl<'ctx, B: ComputeBackend + ?Sized> ComputeShader<'ctx, B> {
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn raw(&self) -> Option<RawHandle> {
        self.handle.get()
    }

    pub fn is_bound(&self) -> bool {
        self.handle.get().is_some() && self.backend.current_shader() == self.handle.get()
    }

    /// Make this the current compute shader.  Binding twice is harmless.
    pub fn bind(&self) {
        if let Some(raw) = self.handle.get() {
            if self.backend.current_shader() != Some(raw) {
                self.backend.set_shader(Some(raw));
            }
        }
    }

    /// Clear the current compute shader if it is this one.
    pub fn unbind(&self) {
        if self.is_bound() {
            self.backend.set_shader(None);
        }
    }
}

impl<B: ComputeBackend + ?Sized> Drop for ComputeShader<'_, B> {
    fn drop(&mut self) {
        self.unbind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_become_constants() {
        let defines = [Define::new("BLOCK", "8u"), Define::flag("USE_FAST_DCT")];
        let out = preprocess("fn main() {}", &defines).unwrap();
        assert_eq!(
            out,
            "const BLOCK = 8u;\nconst USE_FAST_DCT = true;\n\nfn main() {}"
        );
    }

    #[test]
    fn no_defines_leaves_source_alone() {
        assert_eq!(preprocess("fn main() {}", &[]).unwrap(), "fn main() {}");
    }

    #[test]
    fn bad_defines_are_rejected() {
        let bad_name = [Define::new("1ST", "1")];
        assert!(matches!(
            preprocess("", &bad_name),
            Err(ComputeError::InvalidDefine { .. })
        ));

        let twice = [Define::new("A", "1"), Define::new("A", "2")];
        assert!(matches!(
            preprocess("", &twice),
            Err(ComputeError::InvalidDefine { reason: "defined twice", .. })
        ));

        let injected = [Define::new("A", "1; const B = 2")];
        assert!(preprocess("", &injected).is_err());
    }

    #[test]
    fn cache_path_appends_suffix() {
        let desc = ShaderDesc::new("shaders/dct.wgsl", "main").blob_suffix("cso");
        assert_eq!(desc.cache_path(), Some(PathBuf::from("shaders/dct.wgsl.cso")));
        assert_eq!(ShaderDesc::new("a.wgsl", "main").cache_path(), None);
        assert_eq!(desc.label(), "dct.wgsl:main");
    }

    #[test]
    fn missing_source_is_an_io_error() {
        let desc = ShaderDesc::new("definitely/not/here.wgsl", "main");
        assert!(matches!(load(&desc), Err(ComputeError::ShaderIo { .. })));
    }
}
