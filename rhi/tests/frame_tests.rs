//! Frame pipelining and resource lifetime tests.
//!
//! The pacing tests pause the software queue to hold submissions in
//! flight, so they only run on the software backend. The rest run on every
//! backend compiled into the crate.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use rstest::rstest;

use common::{Backend, CLEAR, TestContext, assert_pixel, clear_rgba8, test_config};
use ember_rhi::{
    BufferDescriptor, BufferHandle, BufferUsage, ClearColor, ColorAttachment, CommandListHandle,
    Handle, LoadOp, RenderingInfo, Renderer, RendererConfig, RhiError, SwapchainDescriptor,
    TextureFormat,
};

/// Record one frame whose command list copies `data` into `buffer`.
fn submit_upload_frame(renderer: &mut Renderer, buffer: BufferHandle, data: &[u8]) -> u64 {
    renderer.begin_frame().unwrap();
    let cmd = renderer.begin_commands().unwrap();
    renderer.update_buffer(buffer, 0, data).unwrap();
    renderer.end_commands(cmd).unwrap();
    let fence = renderer.submit(cmd).unwrap();
    renderer.end_frame().unwrap();
    fence
}

fn uniform_buffer(renderer: &mut Renderer, size: u64) -> BufferHandle {
    renderer
        .create_buffer(
            &BufferDescriptor::new(size, BufferUsage::UNIFORM).with_label("test constants"),
            None,
        )
        .unwrap()
}

// ============================================================================
// Frame Pacing
// ============================================================================

/// Reusing a frame slot waits for the GPU to finish that slot's previous
/// submission.
#[test]
fn test_begin_frame_waits_for_slot_fence() {
    let mut ctx = TestContext::new(Backend::Software).expect("software backend");
    let buffer = uniform_buffer(&mut ctx.renderer, 256);
    let control = ctx.control().clone();

    control.pause();
    let first = submit_upload_frame(&mut ctx.renderer, buffer, &[1; 64]);
    let second = submit_upload_frame(&mut ctx.renderer, buffer, &[2; 64]);
    assert!(second > first);
    assert!(control.completed_value() < first);

    let resumer = {
        let control = control.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            control.resume();
        })
    };

    let start = Instant::now();
    ctx.renderer.begin_frame().unwrap();
    let waited = start.elapsed();
    resumer.join().unwrap();

    assert!(waited >= Duration::from_millis(80), "begin_frame returned after {waited:?}");
    assert!(control.completed_value() >= first);
    assert_eq!(ctx.renderer.frame_index(), 0);
    ctx.renderer.end_frame().unwrap();

    ctx.renderer.wait_idle().unwrap();
    let contents = ctx.renderer.read_buffer(buffer, 0, 64).unwrap();
    assert_eq!(contents, vec![2; 64]);
    ctx.assert_no_validation_errors();
}

#[test]
fn test_fence_timeout_reports_error() {
    let config = RendererConfig::default()
        .with_frame_count(1)
        .with_upload_ring_size(64 * 1024)
        .with_fence_timeout(Duration::from_millis(50));
    let mut ctx = TestContext::with_config(Backend::Software, config).expect("software backend");
    let buffer = uniform_buffer(&mut ctx.renderer, 256);

    ctx.control().pause();
    let fence = submit_upload_frame(&mut ctx.renderer, buffer, &[3; 16]);

    let result = ctx.renderer.begin_frame();
    assert!(
        matches!(result, Err(RhiError::FenceTimeout { value, .. }) if value == fence),
        "unexpected result: {result:?}"
    );
    assert!(!ctx.renderer.is_frame_open());

    ctx.control().resume();
    ctx.renderer.begin_frame().unwrap();
    ctx.renderer.end_frame().unwrap();
}

// ============================================================================
// Handles
// ============================================================================

#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_destroyed_handles_are_never_reused(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let first = uniform_buffer(&mut ctx.renderer, 256);
    ctx.renderer.destroy_buffer(first).unwrap();
    let second = uniform_buffer(&mut ctx.renderer, 256);
    assert_ne!(first, second);

    assert!(matches!(
        ctx.renderer.buffer_size(first),
        Err(RhiError::StaleHandle { .. })
    ));
    assert!(matches!(
        ctx.renderer.destroy_buffer(first),
        Err(RhiError::StaleHandle { .. })
    ));
    assert!(matches!(
        ctx.renderer.buffer_size(BufferHandle::NULL),
        Err(RhiError::InvalidHandle { .. })
    ));
    assert!(matches!(
        ctx.renderer.buffer_size(BufferHandle::from_raw(second.raw() + 100)),
        Err(RhiError::InvalidHandle { .. })
    ));
    assert_eq!(ctx.renderer.buffer_size(second).unwrap(), 256);

    let fallback = ctx.renderer.fallback_constant_buffer();
    assert!(matches!(
        ctx.renderer.destroy_buffer(fallback),
        Err(RhiError::InvalidOperation(_))
    ));
}

/// A command list handle is only valid for the frame that issued it.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_command_list_handle_expires_with_frame(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    ctx.renderer.begin_frame().unwrap();
    let old = ctx.renderer.begin_commands().unwrap();
    assert_eq!(ctx.renderer.begin_commands().unwrap(), old);
    ctx.renderer.end_commands(old).unwrap();
    ctx.renderer.submit(old).unwrap();
    assert!(matches!(
        ctx.renderer.submit(old),
        Err(RhiError::InvalidOperation(_))
    ));
    ctx.renderer.end_frame().unwrap();

    assert!(matches!(
        ctx.renderer.end_commands(old),
        Err(RhiError::InvalidOperation(_))
    ));

    ctx.renderer.begin_frame().unwrap();
    let current = ctx.renderer.begin_commands().unwrap();
    assert_ne!(current, old);
    assert!(matches!(
        ctx.renderer.end_commands(old),
        Err(RhiError::StaleHandle { .. })
    ));
    assert!(matches!(
        ctx.renderer.end_commands(CommandListHandle::from_raw(current.raw() + 5)),
        Err(RhiError::InvalidHandle { .. })
    ));
    assert!(matches!(
        ctx.renderer.end_commands(CommandListHandle::NULL),
        Err(RhiError::InvalidHandle { .. })
    ));
    ctx.renderer.end_commands(current).unwrap();
    ctx.renderer.end_frame().unwrap();
}

// ============================================================================
// Uploads
// ============================================================================

/// A payload larger than the upload ring is rejected without recording a
/// copy; the immediate path still handles it.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_upload_overflow_records_nothing(#[case] backend: Backend) {
    let config = test_config().with_upload_ring_size(4096);
    let Some(mut ctx) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let buffer = uniform_buffer(&mut ctx.renderer, 8192);
    let payload: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();

    ctx.renderer.begin_frame().unwrap();
    let cmd = ctx.renderer.begin_commands().unwrap();
    let slot = ctx.renderer.frame_index();
    let recorded = ctx.renderer.frame(slot).unwrap().commands.len();
    let before = ctx.renderer.stats();
    let copies_before = ctx.control.as_ref().map(|c| c.stats().buffer_copies);

    let result = ctx.renderer.update_buffer(buffer, 0, &payload);
    assert!(
        matches!(result, Err(RhiError::UploadOverflow { requested: 8192, capacity: 4096 })),
        "unexpected result: {result:?}"
    );
    assert_eq!(ctx.renderer.frame(slot).unwrap().commands.len(), recorded);
    assert_eq!(ctx.renderer.stats().staged_uploads, before.staged_uploads);

    ctx.renderer.end_commands(cmd).unwrap();
    ctx.renderer.end_frame().unwrap();
    ctx.renderer.wait_idle().unwrap();
    if let Some(control) = &ctx.control {
        assert_eq!(Some(control.stats().buffer_copies), copies_before);
    }

    ctx.renderer.update_buffer_immediate(buffer, 0, &payload).unwrap();
    assert_eq!(ctx.renderer.stats().immediate_uploads, before.immediate_uploads + 1);
    assert_eq!(ctx.renderer.read_buffer(buffer, 0, 8192).unwrap(), payload);
    ctx.assert_no_validation_errors();
}

/// Uploads staged inside a frame land before the frame's later commands.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_staged_upload_lands(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let buffer = uniform_buffer(&mut ctx.renderer, 256);

    submit_upload_frame(&mut ctx.renderer, buffer, &[7; 128]);
    ctx.renderer.update_buffer(buffer, 128, &[9; 128]).unwrap();

    let contents = ctx.renderer.read_buffer(buffer, 0, 256).unwrap();
    assert_eq!(&contents[..128], &[7; 128][..]);
    assert_eq!(&contents[128..], &[9; 128][..]);

    let stats = ctx.renderer.stats();
    assert_eq!(stats.staged_uploads, 1);
    assert_eq!(stats.staged_bytes, 128);
    assert_eq!(stats.immediate_uploads, 1);
    ctx.assert_no_validation_errors();
}

/// An immediate update inside a frame lands after the writes staged before
/// it, so the last write wins.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_immediate_update_keeps_program_order(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let buffer = uniform_buffer(&mut ctx.renderer, 256);

    ctx.renderer.begin_frame().unwrap();
    let cmd = ctx.renderer.begin_commands().unwrap();
    ctx.renderer.update_buffer(buffer, 0, &[1; 16]).unwrap();
    ctx.renderer.update_buffer_immediate(buffer, 0, &[2; 16]).unwrap();
    ctx.renderer.update_buffer(buffer, 8, &[3; 4]).unwrap();
    ctx.renderer.end_commands(cmd).unwrap();
    ctx.renderer.submit(cmd).unwrap();
    ctx.renderer.end_frame().unwrap();

    let contents = ctx.renderer.read_buffer(buffer, 0, 16).unwrap();
    assert_eq!(contents, [2, 2, 2, 2, 2, 2, 2, 2, 3, 3, 3, 3, 2, 2, 2, 2]);
    assert_eq!(ctx.renderer.stats().immediate_uploads, 1);
    ctx.assert_no_validation_errors();
}

/// Staging small updates, overflowing the ring, then falling back to the
/// immediate path leaves the fallback's bytes in the buffer.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_overflow_fallback_overwrites_staged_bytes(#[case] backend: Backend) {
    let config = test_config().with_upload_ring_size(4096);
    let Some(mut ctx) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let buffer = uniform_buffer(&mut ctx.renderer, 8192);
    let payload: Vec<u8> = (0..8192u32).map(|i| (i % 253) as u8).collect();

    ctx.renderer.begin_frame().unwrap();
    let cmd = ctx.renderer.begin_commands().unwrap();
    ctx.renderer.update_buffer(buffer, 0, &[0xee; 256]).unwrap();
    let overflow = ctx.renderer.update_buffer(buffer, 0, &payload);
    assert!(matches!(overflow, Err(RhiError::UploadOverflow { .. })));
    ctx.renderer.update_buffer_immediate(buffer, 0, &payload).unwrap();
    ctx.renderer.end_commands(cmd).unwrap();
    ctx.renderer.submit(cmd).unwrap();
    ctx.renderer.end_frame().unwrap();

    assert_eq!(ctx.renderer.read_buffer(buffer, 0, 8192).unwrap(), payload);
    ctx.assert_no_validation_errors();
}

/// Initial data too large for the ring is copied in program order when the
/// buffer is created inside a frame.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_create_buffer_in_frame_with_large_data(#[case] backend: Backend) {
    let config = test_config().with_upload_ring_size(4096);
    let Some(mut ctx) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let payload = vec![0x42u8; 6000];

    ctx.renderer.begin_frame().unwrap();
    let cmd = ctx.renderer.begin_commands().unwrap();
    let buffer = ctx
        .renderer
        .create_buffer(
            &BufferDescriptor::new(8192, BufferUsage::UNIFORM),
            Some(&payload),
        )
        .unwrap();
    ctx.renderer.update_buffer(buffer, 0, &[0x11; 64]).unwrap();
    ctx.renderer.end_commands(cmd).unwrap();
    ctx.renderer.submit(cmd).unwrap();
    ctx.renderer.end_frame().unwrap();

    let contents = ctx.renderer.read_buffer(buffer, 0, 6000).unwrap();
    assert_eq!(&contents[..64], &[0x11; 64][..]);
    assert_eq!(&contents[64..], &payload[64..]);
    ctx.assert_no_validation_errors();
}

// ============================================================================
// Swapchain Resize
// ============================================================================

/// Resizing inside a frame reopens it on slot 0 with a fresh command list.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_resize_inside_frame(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let swapchain = ctx
        .renderer
        .create_swapchain(&SwapchainDescriptor::new(128, 128, TextureFormat::Rgba8Unorm))
        .unwrap();
    let old_backbuffer = ctx.renderer.current_backbuffer(swapchain).unwrap();

    ctx.renderer.begin_frame().unwrap();
    let old = ctx.renderer.begin_commands().unwrap();
    ctx.renderer.resize_swapchain(swapchain, 64, 32).unwrap();

    assert!(ctx.renderer.is_frame_open());
    assert_eq!(ctx.renderer.frame_index(), 0);
    assert!(matches!(
        ctx.renderer.end_commands(old),
        Err(RhiError::StaleHandle { .. })
    ));
    assert!(matches!(
        ctx.renderer.texture_descriptor(old_backbuffer),
        Err(RhiError::StaleHandle { .. })
    ));

    let backbuffer = ctx.renderer.current_backbuffer(swapchain).unwrap();
    let size = ctx.renderer.texture_descriptor(backbuffer).unwrap().size;
    assert_eq!((size.width, size.height), (64, 32));
    let depth = ctx.renderer.depth_buffer(swapchain).unwrap().expect("depth buffer");
    let depth_size = ctx.renderer.texture_descriptor(depth).unwrap().size;
    assert_eq!((depth_size.width, depth_size.height), (64, 32));

    let cmd = ctx.renderer.begin_commands().unwrap();
    assert_ne!(cmd, old);
    let info = RenderingInfo::new().with_color(ColorAttachment {
        texture: backbuffer,
        load_op: LoadOp::Clear,
        clear: ClearColor::from(CLEAR),
    });
    ctx.renderer.cmd_begin_rendering(cmd, &info).unwrap();
    ctx.renderer.cmd_end_rendering(cmd).unwrap();
    ctx.renderer.end_commands(cmd).unwrap();
    ctx.renderer.submit(cmd).unwrap();
    ctx.renderer.present(swapchain).unwrap();
    ctx.renderer.end_frame().unwrap();

    let pixels = ctx.renderer.read_texture(backbuffer).unwrap();
    assert_eq!(pixels.len(), 64 * 32 * 4);
    assert_pixel(&pixels, 64, 63, 31, clear_rgba8(CLEAR), 1);
    assert_eq!(ctx.renderer.stats().frames, 1);
    ctx.assert_no_validation_errors();
}

#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_resize_rejects_empty_extent(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let swapchain = ctx
        .renderer
        .create_swapchain(
            &SwapchainDescriptor::new(32, 32, TextureFormat::Rgba8Unorm).with_depth_format(None),
        )
        .unwrap();
    let backbuffer = ctx.renderer.current_backbuffer(swapchain).unwrap();

    assert!(matches!(
        ctx.renderer.resize_swapchain(swapchain, 0, 32),
        Err(RhiError::InvalidArgument(_))
    ));
    assert!(ctx.renderer.texture_descriptor(backbuffer).is_ok());
    assert!(ctx.renderer.depth_buffer(swapchain).unwrap().is_none());
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_invalid_config_is_rejected() {
    let config = RendererConfig::default().with_frame_count(0);
    let backend = ember_rhi::backend::software::SoftwareBackend::new().unwrap();
    let result = Renderer::with_backend(std::sync::Arc::new(backend), config);
    assert!(matches!(result, Err(RhiError::Config(_))));
}
