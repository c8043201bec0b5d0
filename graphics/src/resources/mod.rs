//! GPU resources.
//!
//! This module contains the GPU resource types created by [`GraphicsDevice`]:
//! - [`Buffer`] - GPU memory buffer
//! - [`Texture`] - GPU texture/image
//! - [`GpuResource`] - either of the above, as stored by the registry
//!
//! Resources are reference-counted with [`Arc`] and can be shared across
//! threads. Every resource carries a process-unique [`ResourceId`] that is
//! never reused.
//!
//! [`GraphicsDevice`]: crate::GraphicsDevice

mod buffer;
mod texture;

use std::sync::Arc;

use oxygen_core::strong_type;

pub use buffer::Buffer;
pub use texture::Texture;

strong_type!(
    /// Process-unique id of a GPU resource.
    pub struct ResourceId(u64);
);

/// A buffer or texture.
#[derive(Debug, Clone)]
pub enum GpuResource {
    Buffer(Arc<Buffer>),
    Texture(Arc<Texture>),
}

impl GpuResource {
    pub fn id(&self) -> ResourceId {
        match self {
            Self::Buffer(b) => b.id(),
            Self::Texture(t) => t.id(),
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Buffer(b) => b.label(),
            Self::Texture(t) => t.label(),
        }
    }

    pub fn as_buffer(&self) -> Option<&Arc<Buffer>> {
        match self {
            Self::Buffer(b) => Some(b),
            Self::Texture(_) => None,
        }
    }

    pub fn as_texture(&self) -> Option<&Arc<Texture>> {
        match self {
            Self::Texture(t) => Some(t),
            Self::Buffer(_) => None,
        }
    }
}

impl From<Arc<Buffer>> for GpuResource {
    fn from(buffer: Arc<Buffer>) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<Arc<Texture>> for GpuResource {
    fn from(texture: Arc<Texture>) -> Self {
        Self::Texture(texture)
    }
}

impl From<&Arc<Buffer>> for GpuResource {
    fn from(buffer: &Arc<Buffer>) -> Self {
        Self::Buffer(buffer.clone())
    }
}

impl From<&Arc<Texture>> for GpuResource {
    fn from(texture: &Arc<Texture>) -> Self {
        Self::Texture(texture.clone())
    }
}
