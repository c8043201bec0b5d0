//! Common utilities for renderer integration tests.
//!
//! Every test runs on the headless backend. [`TestContext`] builds a device
//! with either queue execution mode so fence-gated behavior can be observed
//! step by step.

#![allow(dead_code)]

use std::sync::Arc;

use oxygen_core::AssetKey;
use oxygen_core::math::Vec3;
use oxygen_scene::{GeometryAsset, Mesh, NodeHandle, RenderableComponent, Scene, TransformComponent};

use oxygen_graphics::queue::QueueExecution;
use oxygen_graphics::{
    GraphicsConfig, GraphicsDevice, HeadlessBackend, RingBufferStaging, StagingConfig, UploadCoordinator,
};

/// Queue execution modes exercised by the parameterized tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeline {
    Immediate,
    Deferred,
}

impl From<Timeline> for QueueExecution {
    fn from(timeline: Timeline) -> Self {
        match timeline {
            Timeline::Immediate => QueueExecution::Immediate,
            Timeline::Deferred => QueueExecution::Deferred,
        }
    }
}

/// Device, backend handle and upload coordinator of one test.
pub struct TestContext {
    pub backend: Arc<HeadlessBackend>,
    pub device: Arc<GraphicsDevice>,
    pub uploads: UploadCoordinator,
}

impl TestContext {
    pub fn new(timeline: Timeline) -> Self {
        Self::with_config(GraphicsConfig::default().with_queue_execution(timeline.into()))
    }

    pub fn with_config(config: GraphicsConfig) -> Self {
        init_logging();
        let backend = Arc::new(HeadlessBackend::new());
        let device = GraphicsDevice::new(backend.clone(), config).expect("device creation");
        let staging = RingBufferStaging::new(device.clone(), 3, &StagingConfig::default()).expect("staging");
        let uploads = UploadCoordinator::new(device.clone(), Box::new(staging));
        Self {
            backend,
            device,
            uploads,
        }
    }

    /// Submits an empty command list on the graphics queue.
    pub fn submit_empty(&self, name: &str) -> oxygen_graphics::FenceValue {
        let mut list = self.device.create_recorder(name).finish();
        self.device
            .graphics_queue()
            .submit(std::slice::from_mut(&mut list))
            .expect("submit")
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A geometry asset with `lods` cube meshes of edge `size`.
pub fn cube_geometry(key: u64, lods: usize, size: f32) -> Arc<GeometryAsset> {
    let meshes = (0..lods)
        .map(|lod| Arc::new(Mesh::cube(format!("cube_lod{lod}"), size, None)))
        .collect();
    Arc::new(GeometryAsset::new(AssetKey::from_u64(key), "cube", meshes))
}

/// Adds a renderable cube node at `position`.
pub fn spawn_cube(scene: &mut Scene, name: &str, geometry: &Arc<GeometryAsset>, position: Vec3) -> NodeHandle {
    let node = scene.create_node(name);
    scene
        .add_component(node, RenderableComponent::new(geometry.clone()))
        .expect("renderable");
    if let Some(scene_node) = scene.node_mut(node) {
        *scene_node.transform_mut() = TransformComponent::from_position(position);
    }
    node
}
