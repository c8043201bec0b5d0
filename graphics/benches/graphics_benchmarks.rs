use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use oxygen_core::AssetKey;
use oxygen_core::frame::FrameIdentity;
use oxygen_core::math::{Mat4, Vec3};
use oxygen_graphics::lights::{ClusterGrid, PositionalLightData, build_cluster_lists};
use oxygen_graphics::{
    DescriptorDomain, GraphicsConfig, GraphicsDevice, HeadlessBackend, LightCullingConfig, NoTextureSource,
    Renderer, RendererConfig, TransformUploader, ViewId, ViewRequest,
};
use oxygen_scene::{GeometryAsset, Mesh, PerspectiveCamera, RenderableComponent, Scene, TransformComponent};

fn device() -> Arc<GraphicsDevice> {
    GraphicsDevice::new(Arc::new(HeadlessBackend::new()), GraphicsConfig::default()).unwrap()
}

// ---------------------------------------------------------------------------
// Descriptors and transforms
// ---------------------------------------------------------------------------

fn bench_descriptor_allocate_free(c: &mut Criterion) {
    let device = device();
    let allocator = device.descriptor_allocator().clone();
    c.bench_function("descriptor_allocate_free_256", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..256)
                .map(|_| allocator.allocate(DescriptorDomain::SRV).unwrap())
                .collect();
            black_box(&handles);
        });
    });
}

fn bench_transform_dedup(c: &mut Criterion) {
    let device = device();
    let matrices: Vec<Mat4> = (0..1024)
        .map(|i| Mat4::new_translation(&Vec3::new((i % 64) as f32, (i / 64) as f32, 0.0)))
        .collect();
    c.bench_function("transform_dedup_1024_half_unique", |b| {
        b.iter(|| {
            let mut uploader = TransformUploader::new(device.clone());
            for m in matrices.iter().chain(matrices.iter().take(512)) {
                black_box(uploader.get_or_allocate(m));
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Light culling
// ---------------------------------------------------------------------------

fn bench_cluster_lists(c: &mut Criterion) {
    let config = LightCullingConfig::default();
    let grid = ClusterGrid::new(&config, 1920, 1080).unwrap();
    let camera = PerspectiveCamera::looking_at(Vec3::new(0.0, 5.0, 30.0), Vec3::zeros());
    let view = camera.view_matrix();
    let projection = camera.projection_matrix(16.0 / 9.0);
    let lights: Vec<PositionalLightData> = (0..256)
        .map(|i| {
            let mut light: PositionalLightData = bytemuck::Zeroable::zeroed();
            light.inner_cone_cos = 1.0;
            light.outer_cone_cos = -1.0;
            light.position = [(i % 16) as f32 * 2.0 - 16.0, 0.0, (i / 16) as f32 * -2.0];
            light.range = 3.0;
            light
        })
        .collect();
    c.bench_function("cluster_lists_256_lights_1080p", |b| {
        b.iter(|| black_box(build_cluster_lists(&grid, &config, &view, &projection, &lights)));
    });
}

// ---------------------------------------------------------------------------
// Whole frames
// ---------------------------------------------------------------------------

fn bench_render_frame(c: &mut Criterion) {
    let mut renderer = Renderer::new(device(), RendererConfig::default(), Box::new(NoTextureSource)).unwrap();
    let mut scene = Scene::new("bench");
    let geometry = Arc::new(GeometryAsset::new(
        AssetKey::from_u64(1),
        "cube",
        vec![Arc::new(Mesh::cube("cube", 1.0, None))],
    ));
    for i in 0..256 {
        let node = scene.create_node(format!("cube{i}"));
        scene
            .add_component(node, RenderableComponent::new(geometry.clone()))
            .unwrap();
        if let Some(node) = scene.node_mut(node) {
            *node.transform_mut() =
                TransformComponent::from_position(Vec3::new((i % 16) as f32 * 2.0, 0.0, (i / 16) as f32 * -2.0));
        }
    }
    scene.update_transforms();
    let views = [ViewRequest::new(
        ViewId::new(0),
        PerspectiveCamera::looking_at(Vec3::new(16.0, 10.0, 10.0), Vec3::new(16.0, 0.0, -16.0)),
        1280,
        720,
    )];
    let mut frame = FrameIdentity::initial(3);

    c.bench_function("render_frame_256_cubes", |b| {
        b.iter(|| {
            frame.advance();
            black_box(renderer.render_frame(&scene, frame, 0.016, &views).unwrap());
        });
    });
}

criterion_group!(descriptors, bench_descriptor_allocate_free, bench_transform_dedup);
criterion_group!(lighting, bench_cluster_lists);
criterion_group!(frames, bench_render_frame);
criterion_main!(descriptors, lighting, frames);
