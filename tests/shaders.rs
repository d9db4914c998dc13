//! Shader loading, blob caching, binding and dispatch against the mock
//! backend.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use compute_wrap::mock::{Call, MockBackend};
use compute_wrap::{BackendOp, Binding, BufferRequest, ComputeError, ComputeWrap, ShaderDesc};

const SHADER: &str = r#"
@group(0) @binding(0)
var<storage, read_write> out: array<f32>;

@compute @workgroup_size(64)
fn quantize(@builtin(global_invocation_id) id: vec3<u32>) {
    out[id.x] = out[id.x] / QUALITY;
}
"#;

/// A fresh directory holding `quantize.wgsl`.
fn shader_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("compute_wrap_{}_{test}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("quantize.wgsl"), SHADER).unwrap();
    dir
}

#[test]
fn compiles_from_source_with_defines() {
    let dir = shader_dir("defines");
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let desc = ShaderDesc::new(dir.join("quantize.wgsl"), "quantize").define("QUALITY", "50.0");
    let shader = wrap.create_compute_shader(&desc).unwrap();
    assert_eq!(shader.entry_point(), "quantize");
    assert!(shader.raw().is_some());
    assert_eq!(
        backend.calls(),
        vec![Call::CompileShader {
            entry_point: "quantize".into(),
            from_blob: false
        }]
    );
    // No suffix, no cache file.
    assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
}

#[test]
fn missing_file_is_reported_not_panicked() {
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let desc = ShaderDesc::new("no/such/shader.wgsl", "main");
    assert!(matches!(
        wrap.create_compute_shader(&desc),
        Err(ComputeError::ShaderIo { .. })
    ));
    assert!(backend.calls().is_empty());
}

#[test]
fn compile_failure_yields_no_shader() {
    let dir = shader_dir("compile_failure");
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    backend.fail_next(BackendOp::CompileShader);
    let desc = ShaderDesc::new(dir.join("quantize.wgsl"), "quantize");
    assert!(matches!(
        wrap.create_compute_shader(&desc),
        Err(ComputeError::Backend(ref e)) if e.op == BackendOp::CompileShader
    ));
    assert_eq!(backend.live(), 0);
    assert_eq!(backend.count(|c| matches!(c, Call::SetShader(_))), 0);
}

#[test]
fn missing_entry_point_is_a_compile_error() {
    let dir = shader_dir("entry_point");
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let desc = ShaderDesc::new(dir.join("quantize.wgsl"), "dequantize");
    let err = wrap.create_compute_shader(&desc).err().unwrap();
    assert!(err.to_string().contains("dequantize"));
}

#[test]
fn invalid_define_is_rejected_before_compiling() {
    let dir = shader_dir("bad_define");
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let desc = ShaderDesc::new(dir.join("quantize.wgsl"), "quantize").define("QUALITY-2", "1.0");
    assert!(matches!(
        wrap.create_compute_shader(&desc),
        Err(ComputeError::InvalidDefine { .. })
    ));
    assert!(backend.calls().is_empty());
}

#[test]
fn blob_is_cached_and_reused() {
    let dir = shader_dir("blob_cache");
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let desc = ShaderDesc::new(dir.join("quantize.wgsl"), "quantize")
        .define("QUALITY", "75.0")
        .blob_suffix("blob");
    let cache = desc.cache_path().unwrap();

    drop(wrap.create_compute_shader(&desc).unwrap());
    let cached = fs::read_to_string(&cache).unwrap();
    assert!(cached.starts_with("const QUALITY = 75.0;"));

    drop(wrap.create_compute_shader(&desc).unwrap());
    let compiles: Vec<Call> = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::CompileShader { .. }))
        .collect();
    assert_eq!(
        compiles,
        vec![
            Call::CompileShader {
                entry_point: "quantize".into(),
                from_blob: false
            },
            Call::CompileShader {
                entry_point: "quantize".into(),
                from_blob: true
            },
        ]
    );
}

#[test]
fn fresh_blob_does_not_skip_define_checks() {
    let dir = shader_dir("blob_bad_define");
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let source = dir.join("quantize.wgsl");
    let good = ShaderDesc::new(&source, "quantize")
        .define("QUALITY", "1.0")
        .blob_suffix("blob");
    drop(wrap.create_compute_shader(&good).unwrap());
    assert!(good.cache_path().unwrap().exists());
    backend.clear_calls();

    let bad = ShaderDesc::new(&source, "quantize")
        .define("1-bad", "x;y")
        .blob_suffix("blob");
    assert!(matches!(
        wrap.create_compute_shader(&bad),
        Err(ComputeError::InvalidDefine { .. })
    ));
    assert!(backend.calls().is_empty());
}

#[test]
fn stale_blob_is_ignored() {
    let dir = shader_dir("stale_blob");
    let source = dir.join("quantize.wgsl");
    let desc = ShaderDesc::new(&source, "quantize")
        .define("QUALITY", "1.0")
        .blob_suffix("blob");
    let cache = desc.cache_path().unwrap();
    fs::write(&cache, "old").unwrap();
    // Make the source strictly newer than the cache.
    let old = SystemTime::now() - Duration::from_secs(3600);
    fs::File::options()
        .write(true)
        .open(&cache)
        .unwrap()
        .set_modified(old)
        .unwrap();

    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let _shader = wrap.create_compute_shader(&desc).unwrap();
    assert_eq!(
        backend.calls(),
        vec![Call::CompileShader {
            entry_point: "quantize".into(),
            from_blob: false
        }]
    );
    assert!(fs::read_to_string(&cache).unwrap().contains("fn quantize("));
}

#[test]
fn rejected_blob_falls_back_to_source() {
    let dir = shader_dir("bad_blob");
    let desc = ShaderDesc::new(dir.join("quantize.wgsl"), "quantize")
        .define("QUALITY", "1.0")
        .blob_suffix("blob");
    // Newer than the source, but not a shader the backend accepts.
    fs::write(desc.cache_path().unwrap(), "garbage").unwrap();

    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let shader = wrap.create_compute_shader(&desc).unwrap();
    assert!(shader.raw().is_some());
    let from_blob: Vec<bool> = backend
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::CompileShader { from_blob, .. } => Some(from_blob),
            _ => None,
        })
        .collect();
    assert_eq!(from_blob, vec![true, false]);
}

#[test]
fn bind_is_idempotent_and_unbind_of_unbound_is_a_no_op() {
    let dir = shader_dir("bind");
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let desc = ShaderDesc::new(dir.join("quantize.wgsl"), "quantize").define("QUALITY", "2.0");
    let shader = wrap.create_compute_shader(&desc).unwrap();
    backend.clear_calls();

    shader.unbind();
    assert!(backend.calls().is_empty());

    shader.bind();
    shader.bind();
    assert!(shader.is_bound());
    shader.unbind();
    shader.unbind();
    assert!(!shader.is_bound());
    assert_eq!(
        backend.calls(),
        vec![
            Call::SetShader(shader.raw()),
            Call::SetShader(None)
        ]
    );
}

#[test]
fn unbind_leaves_another_shader_bound() {
    let dir = shader_dir("two_shaders");
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let desc = ShaderDesc::new(dir.join("quantize.wgsl"), "quantize").define("QUALITY", "2.0");
    let first = wrap.create_compute_shader(&desc).unwrap();
    let second = wrap.create_compute_shader(&desc).unwrap();
    first.bind();
    second.bind();
    first.unbind();
    assert!(second.is_bound());
    drop(first);
    assert!(second.is_bound());
}

#[test]
fn dropping_a_bound_shader_unbinds_then_releases() {
    let dir = shader_dir("drop_bound");
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let desc = ShaderDesc::new(dir.join("quantize.wgsl"), "quantize").define("QUALITY", "2.0");
    let shader = wrap.create_compute_shader(&desc).unwrap();
    let raw = shader.raw().unwrap();
    shader.bind();
    backend.clear_calls();
    drop(shader);
    assert_eq!(backend.calls(), vec![Call::SetShader(None), Call::Release(raw)]);
    assert_eq!(backend.live(), 0);
}

#[test]
fn dispatch_needs_a_bound_shader() {
    let dir = shader_dir("dispatch");
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let output = wrap
        .create_buffer(&BufferRequest::structured(4, 256).write_view(true))
        .unwrap();
    let uav = output.write_view().unwrap();
    let groups = wrap.groups_for(256, 64);
    assert_eq!(groups, [4, 1, 1]);

    assert!(matches!(
        wrap.dispatch(groups, &[Binding::new(0, uav)]),
        Err(ComputeError::InvalidDescriptor(_))
    ));

    let desc = ShaderDesc::new(dir.join("quantize.wgsl"), "quantize").define("QUALITY", "2.0");
    let shader = wrap.create_compute_shader(&desc).unwrap();
    shader.bind();
    wrap.dispatch(groups, &[Binding::new(0, uav)]).unwrap();
    shader.unbind();
    assert_eq!(
        backend.count(|c| matches!(c, Call::Dispatch { groups: [4, 1, 1], .. })),
        1
    );
}

#[test]
fn groups_fold_into_y_past_the_device_limit() {
    let backend = MockBackend::with_max_workgroups(100);
    let wrap = ComputeWrap::new(&backend);
    assert_eq!(wrap.groups_for(64 * 250, 64), [100, 3, 1]);
    assert_eq!(wrap.groups_for(1, 64), [1, 1, 1]);
    assert_eq!(wrap.groups_for(0, 64), [0, 1, 1]);
}
