//! Staging copies and typed mapping, checked against the mock backend.

use compute_wrap::mock::{Call, MockBackend};
use compute_wrap::{
    BackendOp, BufferRequest, ComputeBackend, ComputeError, ComputeWrap, PixelFormat,
    TextureRequest,
};

#[test]
fn copy_map_unmap_happen_in_order() {
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let data = [1u32, 2, 3, 4];
    let mut buffer = wrap
        .create_buffer(&BufferRequest::from_slice(&data).write_view(true).staging(true))
        .unwrap();
    let resource = buffer.resource().unwrap();
    let staging = buffer.staging().unwrap();
    backend.clear_calls();

    buffer.copy_to_staging().unwrap();
    {
        let mapped = buffer.map::<u32>().unwrap();
        assert_eq!(&*mapped, &data);
    }
    assert_eq!(
        backend.calls(),
        vec![
            Call::Copy {
                dst: staging,
                src: resource
            },
            Call::Map(staging),
            Call::Unmap(staging),
        ]
    );
}

#[test]
fn map_read_hands_over_the_staging_bytes_once() {
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let data = [9u16, 8, 7, 6];
    let mut buffer = wrap
        .create_buffer(&BufferRequest::from_slice(&data).staging(true))
        .unwrap();
    buffer.copy_to_staging().unwrap();
    let staging = buffer.staging().unwrap();

    let mut seen = Vec::new();
    backend
        .map_read(staging, &mut |bytes| seen.push(bytes.to_vec()))
        .unwrap();
    assert_eq!(seen, vec![bytemuck::cast_slice::<u16, u8>(&data).to_vec()]);
    // Still mapped until unmap.
    assert!(backend.map_read(staging, &mut |_| {}).is_err());
    backend.unmap(staging);
}

#[test]
fn explicit_unmap_unmaps_once() {
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let data = [7.5f32; 8];
    let mut buffer = wrap
        .create_buffer(&BufferRequest::from_slice(&data).staging(true))
        .unwrap();
    buffer.copy_to_staging().unwrap();
    let mapped = buffer.map::<f32>().unwrap();
    let values = mapped.to_vec();
    mapped.unmap();
    assert_eq!(values, data);
    assert_eq!(backend.count(|c| matches!(c, Call::Unmap(_))), 1);
}

#[test]
fn map_without_staging_copy_fails() {
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let mut buffer = wrap
        .create_buffer(&BufferRequest::structured(4, 4).read_view(true))
        .unwrap();
    assert!(matches!(buffer.map::<u32>(), Err(ComputeError::MissingStaging)));
    assert!(matches!(buffer.copy_to_staging(), Err(ComputeError::MissingStaging)));
    assert_eq!(backend.count(|c| matches!(c, Call::Map(_) | Call::Copy { .. })), 0);
}

#[test]
fn map_before_first_copy_fails() {
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let mut buffer = wrap
        .create_buffer(&BufferRequest::structured(4, 4).staging(true))
        .unwrap();
    assert!(matches!(
        buffer.map::<u32>(),
        Err(ComputeError::StagingNotPopulated)
    ));
    assert_eq!(backend.count(|c| matches!(c, Call::Map(_))), 0);
}

#[test]
fn map_after_release_reports_released() {
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let mut buffer = wrap
        .create_buffer(&BufferRequest::structured(4, 4).staging(true))
        .unwrap();
    buffer.copy_to_staging().unwrap();
    buffer.release();
    assert!(matches!(buffer.map::<u32>(), Err(ComputeError::Released)));
    assert!(matches!(buffer.copy_to_staging(), Err(ComputeError::Released)));
}

#[test]
fn staging_only_sees_data_as_of_the_last_copy() {
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let mut buffer = wrap
        .create_buffer(&BufferRequest::from_slice(&[0u32; 2]).write_view(true).staging(true))
        .unwrap();
    let resource = buffer.resource().unwrap();

    buffer.copy_to_staging().unwrap();
    backend.write(resource, bytemuck::cast_slice(&[5u32, 6]));
    assert_eq!(buffer.map::<u32>().unwrap().to_vec(), vec![0, 0]);

    buffer.copy_to_staging().unwrap();
    assert_eq!(buffer.map::<u32>().unwrap().to_vec(), vec![5, 6]);
}

#[test]
fn backend_map_failure_is_an_error_without_unmap() {
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let mut buffer = wrap
        .create_buffer(&BufferRequest::structured(4, 4).staging(true))
        .unwrap();
    buffer.copy_to_staging().unwrap();
    backend.fail_next(BackendOp::Map);
    assert!(matches!(
        buffer.map::<u32>(),
        Err(ComputeError::Backend(ref e)) if e.op == BackendOp::Map
    ));
    assert_eq!(backend.count(|c| matches!(c, Call::Unmap(_))), 0);

    // The staging copy is still usable afterwards.
    assert_eq!(buffer.map::<u32>().unwrap().len(), 4);
}

#[test]
fn element_size_mismatch_unmaps_and_fails() {
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let mut buffer = wrap
        .create_buffer(&BufferRequest::structured(2, 3).staging(true))
        .unwrap();
    buffer.copy_to_staging().unwrap();
    assert!(matches!(
        buffer.map::<u32>(),
        Err(ComputeError::Map { len: 6, elem: 4 })
    ));
    assert_eq!(backend.count(|c| matches!(c, Call::Unmap(_))), 1);
    assert_eq!(buffer.map::<u16>().unwrap().len(), 3);
}

#[test]
fn texture_readback_is_tightly_packed() {
    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    // 2x2 R32Uint with an 8-byte gap after each row.
    let mut pixels = Vec::new();
    for row in [[1u32, 2], [3, 4]] {
        pixels.extend_from_slice(bytemuck::cast_slice(&row));
        pixels.extend_from_slice(&[0xff; 8]);
    }
    let mut texture = wrap
        .create_texture(
            &TextureRequest::new(PixelFormat::R32Uint, 2, 2)
                .row_pitch(16)
                .contents(&pixels)
                .staging(true),
        )
        .unwrap();
    assert_eq!((texture.width(), texture.height()), (2, 2));
    assert_eq!(texture.format(), PixelFormat::R32Uint);

    texture.copy_to_staging().unwrap();
    let mapped = texture.map::<u32>().unwrap();
    assert_eq!(mapped.as_slice(), &[1, 2, 3, 4]);
    assert_eq!(mapped.as_bytes().len(), 16);
}

#[test]
fn rgba_texture_maps_as_pixel_structs() {
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    struct Rgba {
        r: u8,
        g: u8,
        b: u8,
        a: u8,
    }

    let backend = MockBackend::new();
    let wrap = ComputeWrap::new(&backend);
    let pixels: Vec<u8> = (0..16u8).collect();
    let mut texture = wrap
        .create_texture(
            &TextureRequest::new(PixelFormat::Rgba8Unorm, 2, 2)
                .contents(&pixels)
                .staging(true),
        )
        .unwrap();
    texture.copy_to_staging().unwrap();
    let mapped = texture.map::<Rgba>().unwrap();
    assert_eq!(mapped.len(), 4);
    assert_eq!(
        mapped[3],
        Rgba {
            r: 12,
            g: 13,
            b: 14,
            a: 15
        }
    );
}
