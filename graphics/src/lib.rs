//! # Oxygen Graphics
//!
//! Bindless-first renderer for the Oxygen engine.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GraphicsDevice`] - Resource creation, queues and the descriptor registry
//! - [`UploadCoordinator`] - Staged CPU to GPU transfers with fence tickets
//! - [`ScenePrepState`] - Scene collection, culling, LOD and draw metadata
//! - [`RenderGraph`] - Ordered coroutine passes sharing one [`RenderContext`]
//! - [`Renderer`] - The per-frame driver tying all of the above together
//!
//! Backends implement [`GpuBackend`]. The crate ships a headless backend that
//! executes recorded command streams on the CPU, which is what the tests use.
//!
//! ## Example
//!
//! ```ignore
//! use oxygen_graphics::{GraphicsDevice, HeadlessBackend, Renderer, RendererConfig, ViewRequest};
//!
//! let device = GraphicsDevice::new(Arc::new(HeadlessBackend::new()), Default::default())?;
//! let mut renderer = Renderer::new(device, RendererConfig::default(), Box::new(NoTextureSource))?;
//! let report = renderer.render_frame(&scene, frame, dt, &[ViewRequest::new(view, camera, 1280, 720)])?;
//! ```

pub mod backend;
pub mod binders;
pub mod bindless;
pub mod commands;
pub mod config;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod graph;
pub mod lights;
pub mod passes;
pub mod pipeline;
pub mod prep;
pub mod queue;
pub mod reclaimer;
pub mod registry;
pub mod renderer;
pub mod resources;
pub mod types;
pub mod upload;

// Re-export main types for convenience
pub use backend::{BackendError, GpuBackend, HeadlessBackend, create_backend};
pub use binders::{
    DrawMetadata, GeometryHandle, GeometryUploader, MaterialBinder, MaterialHandle, MemoryTextureSource,
    NoTextureSource, PassMask, TextureBinder, TextureSource, TransformHandle, TransformUploader, ViewId,
};
pub use commands::CommandRecorder;
pub use config::{DescriptorHeapConfig, GraphicsConfig, StagingConfig};
pub use descriptors::{DescriptorAllocator, DescriptorHandle};
pub use device::{DeviceCapabilities, GraphicsDevice};
pub use error::GraphicsError;
pub use framebuffer::Framebuffer;
pub use graph::{PassHandle, RenderContext, RenderGraph, RenderView, SceneConstants, ViewTargets};
pub use lights::{LightCullingConfig, LightManager};
pub use passes::{
    AutoExposureConfig, AutoExposurePass, DepthPrePass, LightCullingPass, RenderPass, ShaderPass, ToneMapPass,
    TransparentPass,
};
pub use pipeline::{PipelineCache, PipelineStateDesc};
pub use prep::{CollectionConfig, FinalizationConfig, PrepView, PreparedSceneFrame, ScenePrepState};
pub use queue::{CommandQueue, QueueRole};
pub use reclaimer::DeferredReclaimer;
pub use registry::{NativeView, ResourceRegistry};
pub use renderer::{FrameReport, Renderer, RendererConfig, ViewRequest};
pub use resources::{Buffer, ResourceId, Texture};
pub use types::{
    BufferDescriptor, BufferUsage, ClearValue, DescriptorDomain, Extent3d, FenceValue, ShaderVisibleIndex,
    TextureDescriptor, TextureFormat, TextureUsage, ViewDescription,
};
pub use upload::{RingBufferStaging, StagingProvider, UploadCoordinator, UploadRequest, UploadTicket};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);
static_assertions::assert_impl_all!(ResourceRegistry: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_render_graph_creation() {
        let graph = RenderGraph::new();
        assert_eq!(graph.pass_count(), 0);
    }

    #[test]
    fn test_headless_backend_is_default() {
        let backend = create_backend().unwrap();
        assert_eq!(backend.name(), "Headless");
    }
}
