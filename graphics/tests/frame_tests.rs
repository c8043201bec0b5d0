//! Frame-level integration tests for the renderer.
//!
//! These tests drive the public API the way an engine does: resources are
//! created, uploaded and released across fences, and whole frames are
//! rendered through [`Renderer`] on the headless backend.
//!
//! # Test Categories
//!
//! - **Lifetime Tests**: Deferred release waits for the fence of in-flight work
//! - **Descriptor Tests**: Stable shader-visible indices across repoints and resizes
//! - **Staging Tests**: Partition limits and slot rotation
//! - **Frame Tests**: Multi-view LOD, eviction and slot throttling
//!
//! ```bash
//! cargo test -p oxygen-graphics --test frame_tests
//! ```

mod common;

use std::sync::Arc;

use rstest::rstest;

use common::{TestContext, Timeline, cube_geometry, spawn_cube};
use oxygen_core::frame::FrameIdentity;
use oxygen_core::math::Vec3;
use oxygen_core::{ResourceKey, Slot};
use oxygen_graphics::backend::ExecutedCommand;
use oxygen_graphics::binders::{GeometryState, TextureData};
use oxygen_graphics::queue::QueueExecution;
use oxygen_graphics::upload::{AtlasBuffer, EnsureCapacity};
use oxygen_graphics::{
    BufferDescriptor, BufferUsage, GraphicsConfig, GraphicsDevice, GraphicsError, HeadlessBackend,
    MemoryTextureSource, NoTextureSource, Renderer, RendererConfig, RingBufferStaging, StagingConfig,
    QueueRole, StagingProvider, TextureBinder, ViewId, ViewRequest,
};
use oxygen_scene::{DistancePolicy, LodPolicy, PerspectiveCamera, RenderableComponent, Scene};

// ============================================================================
// Lifetime Tests
// ============================================================================

/// A deferred buffer stays alive until the submission it was released
/// behind has completed.
#[rstest]
#[case::immediate(Timeline::Immediate, 1)]
#[case::deferred(Timeline::Deferred, 0)]
fn test_deferred_release_waits_for_fence(#[case] timeline: Timeline, #[case] released_before_signal: usize) {
    let ctx = TestContext::new(timeline);
    let baseline = ctx.device.buffer_count();
    let buffer = ctx
        .device
        .create_buffer(&BufferDescriptor::new(256, BufferUsage::STORAGE).with_label("doomed"))
        .unwrap();
    let id = buffer.id();
    let fence = ctx.submit_empty("in_flight");

    let reclaimer = ctx.device.reclaimer();
    assert!(reclaimer.defer_release_resource(buffer));
    assert!(reclaimer.was_released(id));
    assert_eq!(reclaimer.process(), released_before_signal);
    assert_eq!(ctx.device.buffer_count(), baseline + 1 - released_before_signal);

    ctx.device.graphics_queue().signal_value(fence);
    ctx.device.on_begin_frame();
    assert_eq!(reclaimer.pending_count(), 0);
    assert_eq!(ctx.device.buffer_count(), baseline);
}

/// Shutdown drops deferred objects even when their fences never signaled.
#[test]
fn test_shutdown_releases_pending_objects() {
    let ctx = TestContext::new(Timeline::Deferred);
    let baseline = ctx.device.buffer_count();
    for _ in 0..3 {
        let buffer = ctx
            .device
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::STORAGE))
            .unwrap();
        ctx.submit_empty("pending");
        ctx.device.reclaimer().defer_release_resource(buffer);
    }
    assert_eq!(ctx.device.reclaimer().pending_count(), 3);

    ctx.device.shutdown();
    assert_eq!(ctx.device.reclaimer().pending_count(), 0);
    assert_eq!(ctx.device.buffer_count(), baseline);
}

// ============================================================================
// Descriptor Tests
// ============================================================================

/// A texture keeps its shader-visible index while its descriptor moves from
/// the placeholder to the loaded (or error) texture.
#[rstest]
#[case::loaded(true)]
#[case::failed(false)]
fn test_texture_index_is_stable_across_repoint(#[case] loads: bool) {
    let mut ctx = TestContext::new(Timeline::Deferred);
    let key = ResourceKey::new(11);
    let mut source = MemoryTextureSource::new();
    if loads {
        source.insert(key, TextureData::rgba8(1, 1, vec![10, 20, 30, 255]));
    } else {
        source.insert_failure(key, "missing file");
    }
    let device = ctx.device.clone();
    let mut binder = TextureBinder::new(device, &mut ctx.uploads, Box::new(source)).unwrap();

    let index = binder.get_or_allocate(key);
    let heap = binder.heap_index(key).unwrap();
    assert_eq!(
        ctx.backend.descriptor(heap).unwrap().resource,
        binder.placeholder_texture().id()
    );

    binder.ensure_frame_resources(&mut ctx.uploads).unwrap();
    ctx.uploads.flush().unwrap();
    let contents = ctx.backend.descriptor(heap).unwrap();
    if loads {
        assert_ne!(contents.resource, binder.placeholder_texture().id());
        assert_ne!(contents.resource, binder.error_texture().id());
        // The copy has not executed yet.
        assert!(!binder.is_resident(key));
        ctx.device.flush_all();
        binder.ensure_frame_resources(&mut ctx.uploads).unwrap();
        assert!(binder.is_resident(key));
    } else {
        assert_eq!(contents.resource, binder.error_texture().id());
    }
    assert_eq!(binder.get_or_allocate(key), index);
    assert_eq!(binder.heap_index(key), Some(heap));
}

/// Growing an atlas replaces its buffer behind the same SRV.
#[rstest]
#[case::small(5)]
#[case::medium(40)]
#[case::large(300)]
fn test_atlas_srv_survives_growth(#[case] elements: u32) {
    let ctx = TestContext::new(Timeline::Immediate);
    let mut atlas = AtlasBuffer::new(ctx.device.clone(), "worlds", 64, 4);
    atlas.allocate();
    assert!(matches!(atlas.ensure_capacity(1).unwrap(), EnsureCapacity::Created { .. }));
    let srv = atlas.srv_index();
    let first = atlas.buffer().unwrap().id();

    for _ in 1..elements {
        atlas.allocate();
    }
    let outcome = atlas.ensure_capacity(elements).unwrap();
    assert_eq!(outcome.needs_full_upload(), elements > 4);
    assert!(atlas.capacity() >= elements);
    assert_eq!(atlas.srv_index(), srv);

    let current = atlas.buffer().unwrap().id();
    let view = ctx.device.registry().views_of(current);
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].shader_visible_index, srv);
    if elements > 4 {
        assert_ne!(current, first);
        assert!(ctx.device.reclaimer().was_released(first));
        assert!(!ctx.device.registry().contains(first));
    }
}

// ============================================================================
// Staging Tests
// ============================================================================

#[rstest]
#[case::exact_fit(1024, true)]
#[case::one_over(1025, false)]
#[case::empty(0, false)]
fn test_staging_partition_boundaries(#[case] size: u64, #[case] fits: bool) {
    let ctx = TestContext::new(Timeline::Immediate);
    let config = StagingConfig::default().with_partition_size(1024).with_alignment(256);
    let mut staging = RingBufferStaging::new(ctx.device.clone(), 3, &config).unwrap();
    staging.on_frame_start(Slot::new(0));
    let result = staging.allocate(size, "boundary");
    assert_eq!(result.is_ok(), fits);
    if let Err(err) = result
        && size > 0
    {
        assert!(matches!(err, GraphicsError::OutOfCapacity { .. }));
    }
}

/// A full partition refuses more work until its slot comes round again.
#[test]
fn test_staging_rotation_frees_partition() {
    let ctx = TestContext::new(Timeline::Immediate);
    let config = StagingConfig::default().with_partition_size(1024).with_alignment(256);
    let mut staging = RingBufferStaging::new(ctx.device.clone(), 2, &config).unwrap();

    staging.on_frame_start(Slot::new(0));
    for _ in 0..4 {
        staging.allocate(200, "chunk").unwrap();
    }
    assert!(staging.allocate(200, "overflow").is_err());

    staging.on_frame_start(Slot::new(1));
    let allocation = staging.allocate(200, "next_frame").unwrap();
    assert_eq!(allocation.offset(), 1024);

    staging.on_frame_start(Slot::new(0));
    assert_eq!(staging.allocate(1024, "reset").unwrap().offset(), 0);
    assert_eq!(staging.stats().allocations, 6);
}

// ============================================================================
// Frame Tests
// ============================================================================

fn renderer(config: GraphicsConfig, renderer_config: RendererConfig) -> Renderer {
    common::init_logging();
    let device = GraphicsDevice::new(Arc::new(HeadlessBackend::new()), config).unwrap();
    Renderer::new(device, renderer_config, Box::new(NoTextureSource)).unwrap()
}

fn view_at(id: u32, position: Vec3) -> ViewRequest {
    ViewRequest::new(
        ViewId::new(id),
        PerspectiveCamera::looking_at(position, Vec3::zeros()),
        96,
        64,
    )
}

/// Two cameras at different distances see different LODs of one node.
#[test]
fn test_two_views_select_their_own_lod() {
    let mut renderer = renderer(GraphicsConfig::default(), RendererConfig::default());
    let mut scene = Scene::new("lod");
    let geometry = cube_geometry(21, 2, 2.0);
    let node = spawn_cube(&mut scene, "cube", &geometry, Vec3::zeros());
    let policy = LodPolicy::Distance(DistancePolicy::new(vec![10.0], 0.0));
    if let Some(renderable) = scene.node_mut(node).and_then(|n| n.get_mut::<RenderableComponent>()) {
        renderable.set_policy(policy);
    }
    scene.update_transforms();

    let views = [view_at(0, Vec3::new(0.0, 0.0, 3.0)), view_at(1, Vec3::new(0.0, 0.0, 500.0))];
    let mut frame = FrameIdentity::initial(3);
    frame.advance();
    let report = renderer.render_frame(&scene, frame, 0.016, &views).unwrap();

    assert_eq!(report.views, 2);
    let prep = renderer.scene_prep();
    assert_eq!(prep.selected_lod(ViewId::new(0), node), Some(0));
    assert_eq!(prep.selected_lod(ViewId::new(1), node), Some(1));
    assert!(prep.geometry().lookup(geometry.key(), 0).is_some());
    assert!(prep.geometry().lookup(geometry.key(), 1).is_some());
}

/// Evicted geometry keeps its handle and is uploaded again on next use.
#[test]
fn test_evicted_geometry_is_requeued() {
    let mut renderer = renderer(GraphicsConfig::default(), RendererConfig::default());
    let mut scene = Scene::new("evict");
    let geometry = cube_geometry(22, 1, 1.0);
    spawn_cube(&mut scene, "cube", &geometry, Vec3::zeros());
    scene.update_transforms();
    let views = [view_at(0, Vec3::new(0.0, 0.0, 5.0))];

    let mut frame = FrameIdentity::initial(3);
    frame.advance();
    renderer.render_frame(&scene, frame, 0.016, &views).unwrap();
    let handle = renderer.scene_prep().geometry().lookup(geometry.key(), 0).unwrap();

    renderer.scene_prep_mut().geometry_mut().evict(geometry.key());
    frame.advance();
    let report = renderer.render_frame(&scene, frame, 0.016, &views).unwrap();
    let uploader = renderer.scene_prep().geometry();
    assert_eq!(uploader.lookup(geometry.key(), 0), Some(handle));
    assert_eq!(uploader.stats().evictions, 1);
    assert_ne!(uploader.state(handle), Some(GeometryState::Evicted));
    assert_eq!(report.prep.draws, 1);
}

/// With the GPU timeline stalled, reusing a frame slot times out instead of
/// overwriting resources still in use.
#[test]
fn test_slot_reuse_waits_for_previous_frame() {
    let mut renderer = renderer(
        GraphicsConfig::default().with_queue_execution(QueueExecution::Deferred),
        RendererConfig::default().with_slot_wait_timeout_ms(10),
    );
    let mut scene = Scene::new("throttle");
    let geometry = cube_geometry(23, 1, 1.0);
    spawn_cube(&mut scene, "cube", &geometry, Vec3::zeros());
    scene.update_transforms();
    let views = [view_at(0, Vec3::new(0.0, 0.0, 5.0))];

    let mut frame = FrameIdentity::initial(3);
    for _ in 0..3 {
        frame.advance();
        renderer.render_frame(&scene, frame, 0.016, &views).unwrap();
    }
    frame.advance();
    let err = renderer.render_frame(&scene, frame, 0.016, &views).unwrap_err();
    assert!(matches!(err, GraphicsError::Timeout { .. }));

    renderer.device().flush_all();
    let report = renderer.render_frame(&scene, frame, 0.016, &views).unwrap();
    assert_eq!(report.views, 1);
    assert_eq!(renderer.frames_rendered(), 4);
}

/// Draws of a frame run only after the copies the frame uploaded.
#[test]
fn test_frame_draws_follow_their_uploads() {
    common::init_logging();
    let backend = Arc::new(HeadlessBackend::new());
    let device = GraphicsDevice::new(
        backend.clone(),
        GraphicsConfig::default().with_queue_execution(QueueExecution::Deferred),
    )
    .unwrap();
    let mut renderer = Renderer::new(device.clone(), RendererConfig::default(), Box::new(NoTextureSource)).unwrap();
    let mut scene = Scene::new("ordering");
    let geometry = cube_geometry(24, 1, 1.0);
    spawn_cube(&mut scene, "cube", &geometry, Vec3::zeros());
    scene.update_transforms();
    backend.take_log();

    let mut frame = FrameIdentity::initial(3);
    frame.advance();
    let report = renderer
        .render_frame(&scene, frame, 0.016, &[view_at(0, Vec3::new(0.0, 0.0, 5.0))])
        .unwrap();
    let transfer = device.queue(QueueRole::Transfer);
    let uploaded = transfer.current_value();
    assert!(!transfer.is_complete(uploaded));

    // Only the graphics queue is signaled.
    device.graphics_queue().signal_value(report.fence);
    assert!(transfer.is_complete(uploaded));
    let log = backend.take_log();
    let last_copy = log
        .iter()
        .rposition(|c| matches!(c, ExecutedCommand::CopyBuffer { queue: QueueRole::Transfer, .. }))
        .unwrap();
    let first_draw = log
        .iter()
        .position(|c| matches!(c, ExecutedCommand::Draw { queue: QueueRole::Graphics, .. }))
        .unwrap();
    assert!(last_copy < first_draw);
}
