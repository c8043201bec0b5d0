//! Texture types and descriptors.

use bitflags::bitflags;

use super::{Extent3d, ResourceState};

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,
    /// 32-bit red channel, float.
    R32Float,
    /// 32-bit red channel, unsigned integer.
    R32Uint,
    /// 32-bit RG channels, unsigned integer.
    Rg32Uint,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RGBA channels, float.
    Rgba32Float,
    /// 32-bit depth, float.
    Depth32Float,
    /// 24-bit depth with 8-bit stencil.
    Depth24UnormStencil8,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24UnormStencil8)
    }

    /// Returns the size in bytes per pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::R32Float
            | Self::R32Uint
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Depth32Float
            | Self::Depth24UnormStencil8 => 4,
            Self::Rg32Uint | Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be copied from.
        const COPY_SRC = 1 << 0;
        /// Texture can be copied to.
        const COPY_DST = 1 << 1;
        /// Texture can be sampled in a shader.
        const SHADER_RESOURCE = 1 << 2;
        /// Texture can be written from compute shaders.
        const UNORDERED_ACCESS = 1 << 3;
        /// Texture can be a color attachment.
        const RENDER_TARGET = 1 << 4;
        /// Texture can be a depth/stencil attachment.
        const DEPTH_STENCIL = 1 << 5;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    /// Size of the texture.
    pub size: Extent3d,
    /// Mip level count.
    pub mip_level_count: u32,
    /// Texture format.
    pub format: TextureFormat,
    /// Usage flags.
    pub usage: TextureUsage,
    /// State the texture is in right after creation.
    pub initial_state: ResourceState,
}

impl TextureDescriptor {
    /// Create a new 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            size: Extent3d::new_2d(width, height),
            mip_level_count: 1,
            format,
            usage,
            initial_state: ResourceState::Common,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count.max(1);
        self
    }

    /// Set the state after creation.
    pub fn with_initial_state(mut self, state: ResourceState) -> Self {
        self.initial_state = state;
        self
    }

    /// Size in bytes of the top mip level.
    pub fn byte_size(&self) -> u64 {
        u64::from(self.size.width)
            * u64::from(self.size.height)
            * u64::from(self.size.depth.max(1))
            * u64::from(self.format.block_size())
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: Extent3d::default(),
            mip_level_count: 1,
            format: TextureFormat::default(),
            usage: TextureUsage::empty(),
            initial_state: ResourceState::Common,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size() {
        let desc = TextureDescriptor::new_2d(4, 2, TextureFormat::Rgba16Float, TextureUsage::SHADER_RESOURCE);
        assert_eq!(desc.byte_size(), 64);
        assert!(TextureFormat::Depth32Float.is_depth_stencil());
        assert!(!TextureFormat::Rgba8Unorm.is_depth_stencil());
    }
}
