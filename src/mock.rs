//! An in-memory backend for tests.
//!
//! [`MockBackend`] keeps the bytes of every buffer, texture and staging
//! copy on the heap, executes copies immediately and records each call in
//! order.  Failures can be injected per operation to exercise the
//! rollback paths of the factory.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};

use crate::backend::{
    pack_rows, Binding, BufferDesc, CompiledShader, ComputeBackend, RawHandle, ShaderCode,
    TextureDesc,
};
use crate::error::{BackendError, BackendOp};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CompileShader { entry_point: String, from_blob: bool },
    CreateBuffer { size: u64 },
    CreateTexture { width: u32, height: u32 },
    CreateReadView(RawHandle),
    CreateWriteView(RawHandle),
    CreateStaging(RawHandle),
    SetDebugName(RawHandle, String),
    Copy { dst: RawHandle, src: RawHandle },
    Map(RawHandle),
    Unmap(RawHandle),
    SetShader(Option<RawHandle>),
    Dispatch { groups: [u32; 3], bindings: Vec<Binding> },
    Release(RawHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Shader,
    Buffer,
    Texture,
    ReadView,
    WriteView,
    Staging,
}

#[derive(Debug)]
struct MockObject {
    kind: ObjectKind,
    bytes: Vec<u8>,
    name: Option<String>,
    mapped: bool,
    /// Whether a write view may be made of it.
    writable: bool,
}

pub struct MockBackend {
    objects: RefCell<BTreeMap<RawHandle, MockObject>>,
    calls: RefCell<Vec<Call>>,
    failures: RefCell<VecDeque<BackendOp>>,
    next: Cell<u64>,
    current: Cell<Option<RawHandle>>,
    stale_releases: Cell<usize>,
    max_workgroups: u32,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_max_workgroups(65_535)
    }

    pub fn with_max_workgroups(max_workgroups: u32) -> Self {
        Self {
            objects: RefCell::new(BTreeMap::new()),
            calls: RefCell::new(Vec::new()),
            failures: RefCell::new(VecDeque::new()),
            next: Cell::new(1),
            current: Cell::new(None),
            stale_releases: Cell::new(0),
            max_workgroups,
        }
    }

    /// Make the next `op` fail.  Queued failures are consumed in order of
    /// the operations they match.
    pub fn fail_next(&self, op: BackendOp) {
        self.failures.borrow_mut().push_back(op);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    /// Number of objects created and not yet released.
    pub fn live(&self) -> usize {
        self.objects.borrow().len()
    }

    pub fn live_of(&self, kind: ObjectKind) -> usize {
        self.objects
            .borrow()
            .values()
            .filter(|o| o.kind == kind)
            .count()
    }

    pub fn is_live(&self, handle: RawHandle) -> bool {
        self.objects.borrow().contains_key(&handle)
    }

    pub fn kind_of(&self, handle: RawHandle) -> Option<ObjectKind> {
        self.objects.borrow().get(&handle).map(|o| o.kind)
    }

    pub fn debug_name(&self, handle: RawHandle) -> Option<String> {
        self.objects.borrow().get(&handle).and_then(|o| o.name.clone())
    }

    /// Releases of handles that were never live or already released.
    pub fn stale_releases(&self) -> usize {
        self.stale_releases.get()
    }

    /// Overwrite the contents of a buffer or texture, as a shader would.
    pub fn write(&self, resource: RawHandle, bytes: &[u8]) {
        if let Some(object) = self.objects.borrow_mut().get_mut(&resource) {
            object.bytes = bytes.to_vec();
        }
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn injected(&self, op: BackendOp) -> Result<(), BackendError> {
        let mut failures = self.failures.borrow_mut();
        match failures.iter().position(|&f| f == op) {
            Some(i) => {
                failures.remove(i);
                Err(BackendError::new(op, "injected failure"))
            }
            None => Ok(()),
        }
    }

    fn insert(&self, kind: ObjectKind, bytes: Vec<u8>) -> RawHandle {
        self.insert_with(kind, bytes, kind == ObjectKind::Buffer)
    }

    fn insert_with(&self, kind: ObjectKind, bytes: Vec<u8>, writable: bool) -> RawHandle {
        let handle = RawHandle::from_raw(self.next.get());
        self.next.set(self.next.get() + 1);
        self.objects.borrow_mut().insert(
            handle,
            MockObject {
                kind,
                bytes,
                name: None,
                mapped: false,
                writable,
            },
        );
        handle
    }

    fn view_of(
        &self,
        resource: RawHandle,
        op: BackendOp,
        kind: ObjectKind,
    ) -> Result<RawHandle, BackendError> {
        self.injected(op)?;
        let bytes = match self.objects.borrow().get(&resource) {
            Some(o)
                if o.kind == ObjectKind::Texture && kind == ObjectKind::WriteView && !o.writable =>
            {
                return Err(BackendError::new(op, "texture was created without storage usage"));
            }
            Some(o) if matches!(o.kind, ObjectKind::Buffer | ObjectKind::Texture) => {
                if kind == ObjectKind::Staging {
                    vec![0; o.bytes.len()]
                } else {
                    Vec::new()
                }
            }
            _ => return Err(BackendError::new(op, "not a buffer or texture")),
        };
        Ok(self.insert(kind, bytes))
    }
}

impl ComputeBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn compile_shader(&self, code: &ShaderCode<'_>) -> Result<CompiledShader, BackendError> {
        let (text, from_blob) = match code {
            ShaderCode::Source { text, .. } => (text.to_string(), false),
            ShaderCode::Blob { bytes, .. } => (String::from_utf8_lossy(bytes).into_owned(), true),
        };
        self.record(Call::CompileShader {
            entry_point: code.entry_point().to_owned(),
            from_blob,
        });
        self.injected(BackendOp::CompileShader)?;
        if !text.contains(&format!("fn {}(", code.entry_point())) {
            return Err(BackendError::new(
                BackendOp::CompileShader,
                format!("entry point `{}` not found", code.entry_point()),
            ));
        }
        let handle = self.insert(ObjectKind::Shader, Vec::new());
        Ok(CompiledShader {
            handle,
            blob: Some(text.into_bytes()),
        })
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<RawHandle, BackendError> {
        self.record(Call::CreateBuffer { size: desc.size });
        self.injected(BackendOp::CreateBuffer)?;
        let bytes = match desc.contents {
            Some(data) => data.to_vec(),
            None => vec![0; desc.size as usize],
        };
        Ok(self.insert(ObjectKind::Buffer, bytes))
    }

    fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<RawHandle, BackendError> {
        self.record(Call::CreateTexture {
            width: desc.width,
            height: desc.height,
        });
        self.injected(BackendOp::CreateTexture)?;
        if desc.usage.write && !desc.format.supports_storage() {
            return Err(BackendError::new(
                BackendOp::CreateTexture,
                format!("{:?} does not support storage usage", desc.format),
            ));
        }
        let row_bytes = (desc.width * desc.format.bytes_per_pixel()) as usize;
        let bytes = match desc.contents {
            Some(data) => {
                pack_rows(data, desc.row_pitch as usize, row_bytes, desc.height as usize)
            }
            None => vec![0; row_bytes * desc.height as usize],
        };
        Ok(self.insert_with(ObjectKind::Texture, bytes, desc.usage.write))
    }

    fn create_read_view(&self, resource: RawHandle) -> Result<RawHandle, BackendError> {
        self.record(Call::CreateReadView(resource));
        self.view_of(resource, BackendOp::CreateReadView, ObjectKind::ReadView)
    }

    fn create_write_view(&self, resource: RawHandle) -> Result<RawHandle, BackendError> {
        self.record(Call::CreateWriteView(resource));
        self.view_of(resource, BackendOp::CreateWriteView, ObjectKind::WriteView)
    }

    fn create_staging(&self, resource: RawHandle) -> Result<RawHandle, BackendError> {
        self.record(Call::CreateStaging(resource));
        self.view_of(resource, BackendOp::CreateStaging, ObjectKind::Staging)
    }

    fn set_debug_name(&self, object: RawHandle, name: &str) {
        self.record(Call::SetDebugName(object, name.to_owned()));
        if let Some(o) = self.objects.borrow_mut().get_mut(&object) {
            o.name = Some(name.to_owned());
        }
    }

    fn copy_resource(&self, dst: RawHandle, src: RawHandle) {
        self.record(Call::Copy { dst, src });
        let mut objects = self.objects.borrow_mut();
        let Some(bytes) = objects.get(&src).map(|o| o.bytes.clone()) else {
            return;
        };
        if let Some(staging) = objects.get_mut(&dst) {
            if staging.kind == ObjectKind::Staging && !staging.mapped {
                staging.bytes = bytes;
            }
        }
    }

    fn map_read(
        &self,
        staging: RawHandle,
        read: &mut dyn FnMut(&[u8]),
    ) -> Result<(), BackendError> {
        self.record(Call::Map(staging));
        self.injected(BackendOp::Map)?;
        let mut objects = self.objects.borrow_mut();
        match objects.get_mut(&staging) {
            Some(o) if o.kind == ObjectKind::Staging => {
                if o.mapped {
                    return Err(BackendError::new(BackendOp::Map, "already mapped"));
                }
                o.mapped = true;
                read(&o.bytes);
                Ok(())
            }
            _ => Err(BackendError::new(BackendOp::Map, "not a staging copy")),
        }
    }

    fn unmap(&self, staging: RawHandle) {
        self.record(Call::Unmap(staging));
        if let Some(o) = self.objects.borrow_mut().get_mut(&staging) {
            o.mapped = false;
        }
    }

    fn set_shader(&self, shader: Option<RawHandle>) {
        self.record(Call::SetShader(shader));
        self.current.set(shader);
    }

    fn current_shader(&self) -> Option<RawHandle> {
        self.current.get()
    }

    fn dispatch(&self, groups: [u32; 3], bindings: &[Binding]) -> Result<(), BackendError> {
        self.record(Call::Dispatch {
            groups,
            bindings: bindings.to_vec(),
        });
        self.injected(BackendOp::Dispatch)?;
        if self.current.get().is_none() {
            return Err(BackendError::new(BackendOp::Dispatch, "no shader bound"));
        }
        let objects = self.objects.borrow();
        for binding in bindings {
            match objects.get(&binding.view).map(|o| o.kind) {
                Some(ObjectKind::ReadView | ObjectKind::WriteView | ObjectKind::Buffer) => {}
                _ => {
                    return Err(BackendError::new(
                        BackendOp::Dispatch,
                        format!("slot {} is not bindable", binding.slot),
                    ))
                }
            }
        }
        Ok(())
    }

    fn max_workgroups_per_dimension(&self) -> u32 {
        self.max_workgroups
    }

    fn release(&self, object: RawHandle) {
        self.record(Call::Release(object));
        if self.objects.borrow_mut().remove(&object).is_none() {
            self.stale_releases.set(self.stale_releases.get() + 1);
        }
        if self.current.get() == Some(object) {
            self.current.set(None);
        }
    }
}
