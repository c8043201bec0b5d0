//! GPU backend abstraction layer.
//!
//! Each backend implements the [`GpuBackend`] trait, which provides:
//! - Resource creation (buffers, textures)
//! - CPU access to mapped memory
//! - Descriptor writes into the global bindless heap
//! - Execution of recorded command streams
//!
//! # Available Backends
//!
//! - `headless` (default): in-memory backend; copies move real bytes and an
//!   execution log records everything else
//!
//! A D3D12 backend plugs in behind the same trait: resources map to
//! committed resources, descriptor writes to `CreateShaderResourceView` and
//! friends on the shader-visible heap, and `execute` to a command list
//! translation plus `ExecuteCommandLists`.

mod error;
pub mod headless;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::commands::Command;
use crate::descriptors::DescriptorContents;
use crate::error::GraphicsError;
use crate::queue::QueueRole;
use crate::resources::ResourceId;
use crate::types::{BufferDescriptor, HeapIndex, TextureDescriptor};

pub use error::BackendError;
pub use headless::{ExecutedCommand, HeadlessBackend};

/// Byte storage of a headless resource.
pub type HeadlessMemory = Arc<Mutex<Vec<u8>>>;

/// Handle to a GPU buffer allocation.
#[derive(Clone)]
pub enum GpuBuffer {
    /// Headless backend byte storage.
    Headless(HeadlessMemory),
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Headless(memory) => f
                .debug_struct("GpuBuffer::Headless")
                .field("len", &memory.lock().len())
                .finish(),
        }
    }
}

/// Handle to a GPU texture allocation.
#[derive(Clone)]
pub enum GpuTexture {
    /// Headless backend byte storage (top mip, tightly packed).
    Headless(HeadlessMemory),
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Headless(memory) => f
                .debug_struct("GpuTexture::Headless")
                .field("len", &memory.lock().len())
                .finish(),
        }
    }
}

/// GPU backend trait for abstracting different GPU APIs.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Create a buffer resource.
    fn create_buffer(
        &self,
        id: ResourceId,
        descriptor: &BufferDescriptor,
    ) -> Result<GpuBuffer, GraphicsError>;

    /// Create a texture resource.
    fn create_texture(
        &self,
        id: ResourceId,
        descriptor: &TextureDescriptor,
    ) -> Result<GpuTexture, GraphicsError>;

    /// Write through a buffer's CPU mapping.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8])
    -> Result<(), GraphicsError>;

    /// Read through a buffer's CPU mapping.
    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64)
    -> Result<Vec<u8>, GraphicsError>;

    /// Point a heap slot at a view, or clear it with `None`.
    fn write_descriptor(&self, index: HeapIndex, contents: Option<DescriptorContents>);

    /// Execute one submission on a queue. Commands run in order.
    fn execute(&self, queue: QueueRole, commands: &[Command]) -> Result<(), GraphicsError>;
}

/// Creates the default backend for this build.
pub fn create_backend() -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    #[cfg(feature = "headless")]
    {
        log::info!("Using headless backend");
        Ok(Arc::new(HeadlessBackend::new()))
    }
    #[cfg(not(feature = "headless"))]
    {
        Err(GraphicsError::ResourceCreationFailed(
            "no GPU backend compiled in".to_string(),
        ))
    }
}
