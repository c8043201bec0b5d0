//! Geometry and material assets referenced by renderables.
//!
//! Assets are immutable once built and shared through `Arc`. Vertex and
//! index streams are `Arc<[T]>` so several meshes can view one external
//! buffer.

use std::sync::{Arc, OnceLock};

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use oxygen_core::math::{Aabb, Vec3};
use oxygen_core::{AssetKey, ResourceKey};

// ============================================================================
// Geometry
// ============================================================================

/// Interleaved vertex as laid out in GPU vertex buffers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub texcoord: [f32; 2],
    pub tangent: [f32; 4],
    pub color: [f32; 4],
}

impl Vertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], texcoord: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            texcoord,
            tangent: [1.0, 0.0, 0.0, 1.0],
            color: [1.0; 4],
        }
    }
}

/// Draw range within a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshView {
    pub first_index: u32,
    pub index_count: u32,
    pub first_vertex: u32,
    pub vertex_count: u32,
}

/// A material-homogeneous part of a mesh.
#[derive(Debug, Clone)]
pub struct Submesh {
    pub name: String,
    pub material: Option<Arc<MaterialAsset>>,
    pub views: Vec<MeshView>,
    pub bounds: Aabb,
}

/// One LOD of a geometry asset.
#[derive(Debug, Clone)]
pub struct Mesh {
    name: String,
    vertices: Arc<[Vertex]>,
    indices: Option<Arc<[u32]>>,
    submeshes: Vec<Submesh>,
    bounds: Aabb,
}

impl Mesh {
    /// Builds a mesh with a single submesh covering all vertices/indices.
    pub fn new(
        name: impl Into<String>,
        vertices: Arc<[Vertex]>,
        indices: Option<Arc<[u32]>>,
        material: Option<Arc<MaterialAsset>>,
    ) -> Self {
        let mut bounds = Aabb::empty();
        for v in vertices.iter() {
            bounds.grow(&Vec3::from(v.position));
        }
        let view = MeshView {
            first_index: 0,
            index_count: indices.as_ref().map_or(0, |i| i.len() as u32),
            first_vertex: 0,
            vertex_count: vertices.len() as u32,
        };
        let submesh = Submesh {
            name: "default".into(),
            material,
            views: vec![view],
            bounds,
        };
        Self {
            name: name.into(),
            vertices,
            indices,
            submeshes: vec![submesh],
            bounds,
        }
    }

    /// Builds a mesh from explicit submeshes over shared streams.
    pub fn with_submeshes(
        name: impl Into<String>,
        vertices: Arc<[Vertex]>,
        indices: Option<Arc<[u32]>>,
        submeshes: Vec<Submesh>,
    ) -> Self {
        let bounds = submeshes
            .iter()
            .fold(Aabb::empty(), |acc, s| acc.merge(&s.bounds));
        Self {
            name: name.into(),
            vertices,
            indices,
            submeshes,
            bounds,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertices(&self) -> &Arc<[Vertex]> {
        &self.vertices
    }

    pub fn indices(&self) -> Option<&Arc<[u32]>> {
        self.indices.as_ref()
    }

    pub fn is_indexed(&self) -> bool {
        self.indices.is_some()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.as_ref().map_or(0, |i| i.len())
    }

    pub fn submeshes(&self) -> &[Submesh] {
        &self.submeshes
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// Axis-aligned cube of edge `size` centred at the origin (24 vertices, 36 indices).
    pub fn cube(name: impl Into<String>, size: f32, material: Option<Arc<MaterialAsset>>) -> Self {
        let h = size * 0.5;
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]),
            ([-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 1.0, 0.0], [0.0, 0.0, -1.0], [1.0, 0.0, 0.0]),
            ([0.0, -1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
            ([0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
            ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [-1.0, 0.0, 0.0]),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (n, up, right) in faces {
            let n = Vec3::from(n);
            let up = Vec3::from(up);
            let right = Vec3::from(right);
            let base = vertices.len() as u32;
            for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
                let p = (n + right * (u * 2.0 - 1.0) + up * (v * 2.0 - 1.0)) * h;
                vertices.push(Vertex::new([p.x, p.y, p.z], [n.x, n.y, n.z], [u, v]));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new(name, vertices.into(), Some(indices.into()), material)
    }
}

/// Geometry with a fixed number of LODs; LOD 0 is the most detailed.
#[derive(Debug)]
pub struct GeometryAsset {
    key: AssetKey,
    name: String,
    lods: Vec<Arc<Mesh>>,
    bounds: Aabb,
}

impl GeometryAsset {
    pub fn new(key: AssetKey, name: impl Into<String>, lods: Vec<Arc<Mesh>>) -> Self {
        let bounds = lods.iter().fold(Aabb::empty(), |acc, m| acc.merge(m.bounds()));
        Self {
            key,
            name: name.into(),
            lods,
            bounds,
        }
    }

    pub fn key(&self) -> AssetKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lod_count(&self) -> usize {
        self.lods.len()
    }

    pub fn mesh(&self, lod: usize) -> Option<&Arc<Mesh>> {
        self.lods.get(lod)
    }

    pub fn meshes(&self) -> &[Arc<Mesh>] {
        &self.lods
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }
}

// ============================================================================
// Materials
// ============================================================================

/// Rendering domain of a material; selects the pass that draws it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaterialDomain {
    #[default]
    Opaque,
    AlphaMasked,
    Transparent,
    Decal,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MaterialFlags: u32 {
        const DOUBLE_SIDED = 1 << 0;
        /// Shaders ignore all texture slots and use scalars only.
        const NO_TEXTURE_SAMPLING = 1 << 1;
        const UNLIT = 1 << 2;
    }
}

/// Texture slot keys. Unused slots hold [`ResourceKey::FALLBACK`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialTextures {
    pub base_color: ResourceKey,
    pub normal: ResourceKey,
    pub metallic: ResourceKey,
    pub roughness: ResourceKey,
    pub ambient_occlusion: ResourceKey,
    pub emissive: ResourceKey,
}

impl Default for MaterialTextures {
    fn default() -> Self {
        Self {
            base_color: ResourceKey::FALLBACK,
            normal: ResourceKey::FALLBACK,
            metallic: ResourceKey::FALLBACK,
            roughness: ResourceKey::FALLBACK,
            ambient_occlusion: ResourceKey::FALLBACK,
            emissive: ResourceKey::FALLBACK,
        }
    }
}

impl MaterialTextures {
    pub fn as_array(&self) -> [ResourceKey; 6] {
        [
            self.base_color,
            self.normal,
            self.metallic,
            self.roughness,
            self.ambient_occlusion,
            self.emissive,
        ]
    }
}

/// PBR material description.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialAsset {
    pub key: AssetKey,
    pub name: String,
    pub domain: MaterialDomain,
    pub base_color: [f32; 4],
    pub metalness: f32,
    pub roughness: f32,
    pub normal_scale: f32,
    pub ambient_occlusion: f32,
    pub emissive: [f32; 3],
    pub alpha_cutoff: f32,
    pub textures: MaterialTextures,
    /// Texture indices as authored in the source file; not used for binding.
    pub author_texture_indices: [u32; 6],
    pub flags: MaterialFlags,
}

impl Default for MaterialAsset {
    fn default() -> Self {
        Self {
            key: AssetKey::NONE,
            name: "material".into(),
            domain: MaterialDomain::Opaque,
            base_color: [1.0, 1.0, 1.0, 1.0],
            metalness: 0.0,
            roughness: 0.5,
            normal_scale: 1.0,
            ambient_occlusion: 1.0,
            emissive: [0.0; 3],
            alpha_cutoff: 0.5,
            textures: MaterialTextures::default(),
            author_texture_indices: [u32::MAX; 6],
            flags: MaterialFlags::empty(),
        }
    }
}

impl MaterialAsset {
    /// Procedural material used when nothing else resolves.
    pub fn default_material() -> Arc<MaterialAsset> {
        static DEFAULT: OnceLock<Arc<MaterialAsset>> = OnceLock::new();
        DEFAULT
            .get_or_init(|| {
                Arc::new(MaterialAsset {
                    name: "default".into(),
                    base_color: [0.8, 0.8, 0.8, 1.0],
                    roughness: 0.8,
                    flags: MaterialFlags::NO_TEXTURE_SAMPLING,
                    ..MaterialAsset::default()
                })
            })
            .clone()
    }

    pub fn with_domain(mut self, domain: MaterialDomain) -> Self {
        self.domain = domain;
        self
    }

    pub fn with_base_color(mut self, color: [f32; 4]) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_base_color_texture(mut self, key: ResourceKey) -> Self {
        self.textures.base_color = key;
        self
    }

    pub fn is_transparent(&self) -> bool {
        self.domain == MaterialDomain::Transparent
    }
}
