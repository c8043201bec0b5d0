//! Common types shared across the graphics system.

// ============================================================================
// Resource states
// ============================================================================

/// Closed set of GPU resource states tracked by the command recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    #[default]
    Common,
    VertexBuffer,
    IndexBuffer,
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthWrite,
    DepthRead,
    CopySource,
    CopyDest,
    Present,
}

impl ResourceState {
    /// States in which the GPU may write the resource.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::UnorderedAccess | Self::RenderTarget | Self::DepthWrite | Self::CopyDest
        )
    }
}

/// Heap a resource is allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryType {
    /// GPU-only memory; written through copies.
    #[default]
    DeviceLocal,
    /// CPU-visible, persistently mapped, write-combined.
    Upload,
    /// CPU-readable copy destination.
    Readback,
}

impl MemoryType {
    pub fn is_cpu_visible(self) -> bool {
        !matches!(self, Self::DeviceLocal)
    }
}

// ============================================================================
// Viewport
// ============================================================================

/// Viewport with `[0, 1]` depth range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Viewport from dimensions with origin at (0, 0).
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }
}

// ============================================================================
// Extent3d
// ============================================================================

/// 3D extent for textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Depth in pixels (1 for 2D textures).
    pub depth: u32,
}

impl Extent3d {
    /// Create a new 2D extent.
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }
}

/// Clear value for render targets.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ClearValue {
    /// No clear operation.
    #[default]
    None,
    /// Clear color attachment with RGBA values.
    Color([f32; 4]),
    /// Clear depth attachment.
    Depth(f32),
}

impl ClearValue {
    /// Create a color clear value.
    pub fn color(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::Color([r, g, b, a])
    }

    /// Create a depth clear value.
    pub fn depth(value: f32) -> Self {
        Self::Depth(value)
    }
}
