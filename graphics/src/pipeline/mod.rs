//! Pipeline state descriptions and the device pipeline cache.
//!
//! Pipeline states are described by value and identified by a content hash.
//! The backend compiles each distinct description once; recorders bind by
//! hash.
//!
//! # Root signature
//!
//! Every pipeline shares one fixed root layout:
//!
//! | Slot | Binding | Notes |
//! |------|---------|-------|
//! | 0 | Bindless SRV table (t0, multi-space) | Single global table |
//! | 1 | Scene constants CBV (b1, space0) | Direct GPU VA |
//! | 2 | `draw_index` 32-bit root constant | Selects per-draw record |

mod cache;

pub use cache::{PipelineCache, PipelineCacheStats, PipelineKind};

use oxygen_core::hash::stable_hash;

use crate::types::TextureFormat;

/// One parameter of the fixed root signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootParameter {
    DescriptorTable { register: u32 },
    ConstantBufferView { register: u32, space: u32 },
    Constants { register: u32, num_values: u32 },
}

/// Root layout shared by every pipeline.
pub const ROOT_SIGNATURE: [RootParameter; 3] = [
    RootParameter::DescriptorTable { register: 0 },
    RootParameter::ConstantBufferView {
        register: 1,
        space: 0,
    },
    RootParameter::Constants {
        register: 2,
        num_values: 1,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

/// Reference to a compiled shader by source path and entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderRef {
    pub stage: ShaderStage,
    pub path: String,
    pub entry_point: String,
}

impl ShaderRef {
    pub fn new(stage: ShaderStage, path: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            stage,
            path: path.into(),
            entry_point: entry_point.into(),
        }
    }

    pub fn vertex(path: impl Into<String>) -> Self {
        Self::new(ShaderStage::Vertex, path, "VS")
    }

    pub fn pixel(path: impl Into<String>) -> Self {
        Self::new(ShaderStage::Pixel, path, "PS")
    }

    pub fn compute(path: impl Into<String>) -> Self {
        Self::new(ShaderStage::Compute, path, "CS")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RasterizerDesc {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    /// Premultiplied-free `src.a * src + (1 - src.a) * dst`.
    AlphaBlend,
    Additive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareOp {
    Never,
    Less,
    #[default]
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare: CompareOp,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            compare: CompareOp::LessEqual,
        }
    }
}

impl DepthStencilDesc {
    /// Test against existing depth without writing it.
    pub fn read_only() -> Self {
        Self {
            depth_write: false,
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            compare: CompareOp::Always,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

/// Full description of a graphics pipeline state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsPipelineDesc {
    pub vertex: ShaderRef,
    pub pixel: Option<ShaderRef>,
    pub rasterizer: RasterizerDesc,
    pub blend: BlendMode,
    pub depth_stencil: DepthStencilDesc,
    pub topology: PrimitiveTopology,
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    /// Debug name; not part of the content hash.
    pub name: String,
}

impl GraphicsPipelineDesc {
    pub fn new(name: impl Into<String>, vertex: ShaderRef) -> Self {
        Self {
            vertex,
            pixel: None,
            rasterizer: RasterizerDesc::default(),
            blend: BlendMode::default(),
            depth_stencil: DepthStencilDesc::default(),
            topology: PrimitiveTopology::default(),
            color_formats: Vec::new(),
            depth_format: None,
            name: name.into(),
        }
    }

    pub fn with_pixel(mut self, pixel: ShaderRef) -> Self {
        self.pixel = Some(pixel);
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: RasterizerDesc) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_depth_stencil(mut self, depth_stencil: DepthStencilDesc) -> Self {
        self.depth_stencil = depth_stencil;
        self
    }

    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_color_format(mut self, format: TextureFormat) -> Self {
        self.color_formats.push(format);
        self
    }

    pub fn with_depth_format(mut self, format: TextureFormat) -> Self {
        self.depth_format = Some(format);
        self
    }

    /// Hash over everything that affects the compiled state.
    pub fn content_hash(&self) -> u64 {
        stable_hash(&(
            &ROOT_SIGNATURE,
            &self.vertex,
            &self.pixel,
            self.rasterizer,
            self.blend,
            self.depth_stencil,
            self.topology,
            &self.color_formats,
            self.depth_format,
        ))
    }
}

/// Description of a compute pipeline state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputePipelineDesc {
    pub shader: ShaderRef,
    pub name: String,
}

impl ComputePipelineDesc {
    pub fn new(name: impl Into<String>, shader: ShaderRef) -> Self {
        Self {
            shader,
            name: name.into(),
        }
    }

    pub fn content_hash(&self) -> u64 {
        stable_hash(&(&ROOT_SIGNATURE, &self.shader))
    }
}

/// Pipeline state of either kind, as kept by a render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStateDesc {
    Graphics(GraphicsPipelineDesc),
    Compute(ComputePipelineDesc),
}

impl PipelineStateDesc {
    pub fn name(&self) -> &str {
        match self {
            Self::Graphics(d) => &d.name,
            Self::Compute(d) => &d.name,
        }
    }

    pub fn content_hash(&self) -> u64 {
        match self {
            Self::Graphics(d) => d.content_hash(),
            Self::Compute(d) => d.content_hash(),
        }
    }

    pub fn kind(&self) -> PipelineKind {
        match self {
            Self::Graphics(_) => PipelineKind::Graphics,
            Self::Compute(_) => PipelineKind::Compute,
        }
    }
}

impl From<GraphicsPipelineDesc> for PipelineStateDesc {
    fn from(desc: GraphicsPipelineDesc) -> Self {
        Self::Graphics(desc)
    }
}

impl From<ComputePipelineDesc> for PipelineStateDesc {
    fn from(desc: ComputePipelineDesc) -> Self {
        Self::Compute(desc)
    }
}
