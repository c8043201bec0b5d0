//! Graphics device.
//!
//! The [`GraphicsDevice`] owns the backend and every device-wide service:
//! the descriptor allocator, the resource registry, the deferred reclaimer,
//! one command queue per [`QueueRole`] and the pipeline cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::backend::GpuBackend;
use crate::commands::CommandRecorder;
use crate::config::GraphicsConfig;
use crate::descriptors::DescriptorAllocator;
use crate::error::GraphicsError;
use crate::pipeline::PipelineCache;
use crate::queue::{CommandQueue, QueueRole};
use crate::reclaimer::DeferredReclaimer;
use crate::registry::ResourceRegistry;
use crate::resources::{Buffer, GpuResource, ResourceId, Texture};
use crate::types::{BufferDescriptor, TextureDescriptor};

/// Capabilities of a graphics device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceCapabilities {
    /// Maximum texture dimension.
    pub max_texture_dimension: u32,
    /// Maximum buffer size.
    pub max_buffer_size: u64,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_texture_dimension: 16384,
            max_buffer_size: 1 << 30, // 1 GB
        }
    }
}

/// A graphics device for creating GPU resources.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync` and can be safely shared across threads.
/// All resource creation methods use interior mutability where needed.
///
/// # Example
///
/// ```ignore
/// let device = GraphicsDevice::new(create_backend()?, GraphicsConfig::default())?;
/// let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))?;
/// let mut recorder = device.create_recorder("frame");
/// recorder.copy_buffer(&staging, 0, &buffer, 0, 1024);
/// device.graphics_queue().submit(&mut [recorder.finish()])?;
/// ```
pub struct GraphicsDevice {
    config: GraphicsConfig,
    capabilities: DeviceCapabilities,
    backend: Arc<dyn GpuBackend>,
    allocator: Arc<DescriptorAllocator>,
    registry: Arc<ResourceRegistry>,
    reclaimer: Arc<DeferredReclaimer>,
    pipelines: Arc<PipelineCache>,
    queues: Vec<Arc<CommandQueue>>,
    next_resource_id: AtomicU64,
    // Weak references for live counts and debugging.
    buffers: RwLock<Vec<Weak<Buffer>>>,
    textures: RwLock<Vec<Weak<Texture>>>,
}

impl GraphicsDevice {
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        config: GraphicsConfig,
    ) -> Result<Arc<Self>, GraphicsError> {
        config.validate()?;
        let allocator = Arc::new(DescriptorAllocator::with_layout(
            Arc::clone(&backend),
            &config.descriptor_heap.layout(),
        )?);
        let registry = Arc::new(ResourceRegistry::new(Arc::clone(&allocator)));
        let reclaimer = Arc::new(DeferredReclaimer::new());
        let queues: Vec<Arc<CommandQueue>> = [QueueRole::Graphics, QueueRole::Compute, QueueRole::Transfer]
            .into_iter()
            .map(|role| {
                Arc::new(CommandQueue::new(
                    role,
                    config.queue_execution,
                    Arc::clone(&backend),
                ))
            })
            .collect();
        for queue in &queues {
            reclaimer.track_queue(queue);
        }

        log::info!(
            "GraphicsDevice: created on {} backend ({:?} queues)",
            backend.name(),
            config.queue_execution
        );
        Ok(Arc::new(Self {
            config,
            capabilities: DeviceCapabilities::default(),
            backend,
            allocator,
            registry,
            reclaimer,
            pipelines: Arc::new(PipelineCache::new()),
            queues,
            next_resource_id: AtomicU64::new(1),
            buffers: RwLock::new(Vec::new()),
            textures: RwLock::new(Vec::new()),
        }))
    }

    pub fn config(&self) -> &GraphicsConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn descriptor_allocator(&self) -> &Arc<DescriptorAllocator> {
        &self.allocator
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn reclaimer(&self) -> &Arc<DeferredReclaimer> {
        &self.reclaimer
    }

    pub fn pipeline_cache(&self) -> &Arc<PipelineCache> {
        &self.pipelines
    }

    pub fn queue(&self, role: QueueRole) -> &Arc<CommandQueue> {
        match role {
            QueueRole::Graphics => &self.queues[0],
            QueueRole::Compute => &self.queues[1],
            QueueRole::Transfer => &self.queues[2],
        }
    }

    pub fn graphics_queue(&self) -> &Arc<CommandQueue> {
        self.queue(QueueRole::Graphics)
    }

    pub fn create_recorder(&self, name: impl Into<String>) -> CommandRecorder {
        CommandRecorder::new(name, Arc::clone(&self.pipelines))
    }

    fn allocate_id(&self) -> ResourceId {
        ResourceId::new(self.next_resource_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a GPU buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer size is zero or exceeds device limits,
    /// or if the backend refuses the allocation.
    pub fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<Arc<Buffer>, GraphicsError> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidArgument(
                "buffer size cannot be zero".to_string(),
            ));
        }
        if descriptor.size > self.capabilities.max_buffer_size {
            return Err(GraphicsError::InvalidArgument(format!(
                "buffer size {} exceeds maximum {}",
                descriptor.size, self.capabilities.max_buffer_size
            )));
        }

        let id = self.allocate_id();
        let gpu = self.backend.create_buffer(id, descriptor)?;
        let buffer = Arc::new(Buffer::new(
            id,
            descriptor.clone(),
            gpu,
            Arc::clone(&self.backend),
        ));
        self.buffers.write().push(Arc::downgrade(&buffer));

        log::trace!(
            "GraphicsDevice: created buffer {id} {:?}, size={}",
            descriptor.label,
            descriptor.size
        );
        Ok(buffer)
    }

    /// Create a GPU texture.
    pub fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<Arc<Texture>, GraphicsError> {
        let size = descriptor.size;
        if size.width == 0 || size.height == 0 {
            return Err(GraphicsError::InvalidArgument(
                "texture dimensions cannot be zero".to_string(),
            ));
        }
        let max_dim = self.capabilities.max_texture_dimension;
        if size.width > max_dim || size.height > max_dim {
            return Err(GraphicsError::InvalidArgument(format!(
                "texture dimensions {}x{} exceed maximum {max_dim}",
                size.width, size.height
            )));
        }

        let id = self.allocate_id();
        let gpu = self.backend.create_texture(id, descriptor)?;
        let texture = Arc::new(Texture::new(id, descriptor.clone(), gpu));
        self.textures.write().push(Arc::downgrade(&texture));

        log::trace!(
            "GraphicsDevice: created texture {id} {:?}, {}x{}",
            descriptor.label,
            size.width,
            size.height
        );
        Ok(texture)
    }

    /// Get the number of live buffers created by this device.
    pub fn buffer_count(&self) -> usize {
        self.buffers
            .read()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Get the number of live textures created by this device.
    pub fn texture_count(&self) -> usize {
        self.textures
            .read()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Drops bookkeeping of resources that no longer exist.
    pub fn cleanup_dead_resources(&self) {
        self.buffers.write().retain(|w| w.strong_count() > 0);
        self.textures.write().retain(|w| w.strong_count() > 0);
    }

    /// Unregisters a registered resource and defers its release.
    ///
    /// Its view slots are gated on the graphics queue, which records every
    /// draw and dispatch that reads bindless descriptors. The resource is
    /// handed to the reclaimer even when unregistering fails, so it never
    /// dies while submitted work may reference it.
    pub fn retire_resource(&self, resource: impl Into<GpuResource>) -> Result<usize, GraphicsError> {
        let resource = resource.into();
        let result = self.registry.unregister_resource(resource.id(), self.graphics_queue());
        self.reclaimer.defer_release_resource(resource);
        result
    }

    /// Reclaims deferred objects and view slots whose fences completed.
    ///
    /// Returns how many objects and slots were released.
    pub fn process_deferred(&self) -> usize {
        self.reclaimer.process() + self.registry.process_released_views()
    }

    /// Runs deferred releases whose fences completed.
    pub fn on_begin_frame(&self) {
        self.process_deferred();
        self.cleanup_dead_resources();
    }

    /// Completes all queued GPU work.
    pub fn flush_all(&self) {
        for queue in &self.queues {
            queue.flush();
        }
    }

    /// Flushes every queue and drops all deferred objects.
    pub fn shutdown(&self) {
        self.flush_all();
        let released = self.reclaimer.release_all();
        let slots = self.registry.process_released_views();
        log::info!("GraphicsDevice: shut down ({released} deferred objects, {slots} view slots released)");
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("backend", &self.backend.name())
            .field("buffers", &self.buffer_count())
            .field("textures", &self.texture_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::types::{BufferUsage, TextureFormat, TextureUsage};

    fn create_test_device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(Arc::new(HeadlessBackend::new()), GraphicsConfig::default()).unwrap()
    }

    #[test]
    fn test_create_buffer() {
        let device = create_test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX).with_label("vb"))
            .unwrap();
        assert_eq!(buffer.size(), 1024);
        assert_eq!(buffer.label(), Some("vb"));
        assert_eq!(device.buffer_count(), 1);
    }

    #[test]
    fn test_create_buffer_zero_size() {
        let device = create_test_device();
        let result = device.create_buffer(&BufferDescriptor::new(0, BufferUsage::VERTEX));
        assert!(result.is_err());
    }

    #[test]
    fn test_create_texture_zero_size() {
        let device = create_test_device();
        let desc = TextureDescriptor::new_2d(0, 4, TextureFormat::Rgba8Unorm, TextureUsage::COPY_DST);
        assert!(device.create_texture(&desc).is_err());
    }

    #[test]
    fn test_resource_ids_are_unique() {
        let device = create_test_device();
        let a = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::STORAGE))
            .unwrap();
        let b = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::STORAGE))
            .unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_refused_creation() {
        let backend = Arc::new(HeadlessBackend::new());
        let device = GraphicsDevice::new(backend.clone(), GraphicsConfig::default()).unwrap();
        backend.set_refuse_creation(true);
        let err = device
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::STORAGE))
            .unwrap_err();
        assert_eq!(err.kind(), oxygen_core::ErrorKind::ResourceCreationFailed);
    }

    #[test]
    fn test_resource_cleanup() {
        let device = create_test_device();
        {
            let _buffer = device
                .create_buffer(&BufferDescriptor::new(16, BufferUsage::STORAGE))
                .unwrap();
            assert_eq!(device.buffer_count(), 1);
        }
        assert_eq!(device.buffer_count(), 0);
        device.cleanup_dead_resources();
    }
}
