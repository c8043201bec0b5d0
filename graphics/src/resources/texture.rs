//! GPU texture resource.

use crate::backend::GpuTexture;
use crate::resources::ResourceId;
use crate::types::{Extent3d, TextureDescriptor, TextureFormat, TextureUsage};

/// A GPU texture resource.
///
/// Textures are created by [`GraphicsDevice::create_texture`](crate::GraphicsDevice::create_texture)
/// and are reference-counted.
pub struct Texture {
    id: ResourceId,
    descriptor: TextureDescriptor,
    gpu: GpuTexture,
}

impl Texture {
    pub(crate) fn new(id: ResourceId, descriptor: TextureDescriptor, gpu: GpuTexture) -> Self {
        Self {
            id,
            descriptor,
            gpu,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn size(&self) -> Extent3d {
        self.descriptor.size
    }

    pub fn width(&self) -> u32 {
        self.descriptor.size.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.size.height
    }

    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    pub fn usage(&self) -> TextureUsage {
        self.descriptor.usage
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn gpu(&self) -> &GpuTexture {
        &self.gpu
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.id)
            .field("size", &self.descriptor.size)
            .field("format", &self.descriptor.format)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);
