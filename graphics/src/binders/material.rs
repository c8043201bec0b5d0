//! Material constants atlas with content deduplication.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use oxygen_core::{ResourceKey, strong_type};
use oxygen_scene::{MaterialAsset, MaterialDomain, MaterialFlags};

use super::TextureBinder;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::ShaderVisibleIndex;
use crate::upload::{AtlasBuffer, UploadCoordinator, UploadRequest};

strong_type!(
    /// Index of a material's constants in the material atlas.
    pub struct MaterialHandle(u32);
);

/// Texture slots in the order of [`MaterialTextures::as_array`](oxygen_scene::asset::MaterialTextures::as_array).
const TEXTURE_SLOTS: usize = 6;

/// GPU layout of one material, read by shaders as `StructuredBuffer<MaterialConstants>`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub base_color: [f32; 4],
    pub emissive: [f32; 3],
    pub metalness: f32,
    pub roughness: f32,
    pub normal_scale: f32,
    pub ambient_occlusion: f32,
    pub alpha_cutoff: f32,
    pub flags: u32,
    pub base_color_texture_index: u32,
    pub normal_texture_index: u32,
    pub metallic_texture_index: u32,
    pub roughness_texture_index: u32,
    pub ambient_occlusion_texture_index: u32,
    pub emissive_texture_index: u32,
    pub domain: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<MaterialConstants>(), 80);

impl MaterialConstants {
    fn from_asset(material: &MaterialAsset, texture_indices: [u32; TEXTURE_SLOTS]) -> Self {
        let mut constants = Self {
            base_color: material.base_color,
            emissive: material.emissive,
            metalness: material.metalness,
            roughness: material.roughness,
            normal_scale: material.normal_scale,
            ambient_occlusion: material.ambient_occlusion,
            alpha_cutoff: material.alpha_cutoff,
            flags: material.flags.bits(),
            domain: domain_code(material.domain),
            ..Self::zeroed()
        };
        constants.set_texture_indices(texture_indices);
        constants
    }

    pub fn texture_indices(&self) -> [u32; TEXTURE_SLOTS] {
        [
            self.base_color_texture_index,
            self.normal_texture_index,
            self.metallic_texture_index,
            self.roughness_texture_index,
            self.ambient_occlusion_texture_index,
            self.emissive_texture_index,
        ]
    }

    fn set_texture_indices(&mut self, indices: [u32; TEXTURE_SLOTS]) {
        [
            self.base_color_texture_index,
            self.normal_texture_index,
            self.metallic_texture_index,
            self.roughness_texture_index,
            self.ambient_occlusion_texture_index,
            self.emissive_texture_index,
        ] = indices;
    }

    pub fn has_flag(&self, flag: MaterialFlags) -> bool {
        MaterialFlags::from_bits_truncate(self.flags).contains(flag)
    }
}

fn domain_code(domain: MaterialDomain) -> u32 {
    match domain {
        MaterialDomain::Opaque => 0,
        MaterialDomain::AlphaMasked => 1,
        MaterialDomain::Transparent => 2,
        MaterialDomain::Decal => 3,
    }
}

/// Identity of a material for deduplication.
///
/// Texture keys, scalar bit patterns, domain and flags. Names, asset keys
/// and authored texture indices do not participate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ContentKey {
    textures: [ResourceKey; TEXTURE_SLOTS],
    scalars: [u32; 14],
    domain: MaterialDomain,
    flags: u32,
}

impl ContentKey {
    fn of(material: &MaterialAsset) -> Self {
        let [r, g, b, a] = material.base_color;
        let [er, eg, eb] = material.emissive;
        let scalars = [
            r,
            g,
            b,
            a,
            er,
            eg,
            eb,
            material.metalness,
            material.roughness,
            material.normal_scale,
            material.ambient_occlusion,
            material.alpha_cutoff,
            0.0,
            0.0,
        ]
        .map(f32::to_bits);
        Self {
            textures: material.textures.as_array(),
            scalars,
            domain: material.domain,
            flags: material.flags.bits(),
        }
    }
}

struct Entry {
    constants: MaterialConstants,
    texture_keys: [ResourceKey; TEXTURE_SLOTS],
    /// Slots still showing the placeholder while their texture has no
    /// descriptor yet.
    unresolved: [bool; TEXTURE_SLOTS],
    domain: MaterialDomain,
}

/// Counters of the material binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaterialBinderStats {
    pub materials: u32,
    pub dedup_hits: u64,
    pub repointed_slots: u64,
    pub uploaded_entries: u64,
    pub full_reuploads: u32,
}

/// Material constants uploader.
///
/// Materials with equal content share one [`MaterialHandle`]. Texture slots
/// whose texture has no descriptor yet are written with the placeholder
/// index and repointed during a later
/// [`ensure_frame_resources`](Self::ensure_frame_resources).
pub struct MaterialBinder {
    atlas: AtlasBuffer,
    entries: Vec<Entry>,
    by_content: HashMap<ContentKey, MaterialHandle>,
    dirty: BTreeSet<u32>,
    stats: MaterialBinderStats,
}

impl MaterialBinder {
    pub const INITIAL_CAPACITY: u32 = 64;

    pub fn new(device: Arc<GraphicsDevice>) -> Self {
        Self {
            atlas: AtlasBuffer::new(
                device,
                "material_constants",
                std::mem::size_of::<MaterialConstants>() as u32,
                Self::INITIAL_CAPACITY,
            ),
            entries: Vec::new(),
            by_content: HashMap::new(),
            dirty: BTreeSet::new(),
            stats: MaterialBinderStats::default(),
        }
    }

    /// Handle for the content of `material`, allocating on first sight.
    pub fn get_or_allocate(
        &mut self,
        material: &MaterialAsset,
        textures: &mut TextureBinder,
    ) -> MaterialHandle {
        let content = ContentKey::of(material);
        if let Some(&handle) = self.by_content.get(&content) {
            self.stats.dedup_hits += 1;
            return handle;
        }

        let texture_keys = material.textures.as_array();
        let placeholder = textures.placeholder_index().get();
        let mut indices = [placeholder; TEXTURE_SLOTS];
        let mut unresolved = [false; TEXTURE_SLOTS];
        for (slot, key) in texture_keys.iter().enumerate() {
            if key.is_reserved() {
                continue;
            }
            match textures.lookup(*key) {
                Some(index) => indices[slot] = index.get(),
                None => {
                    unresolved[slot] = true;
                    textures.request(*key);
                }
            }
        }

        let index = self.atlas.allocate();
        let handle = MaterialHandle::new(index);
        let entry = Entry {
            constants: MaterialConstants::from_asset(material, indices),
            texture_keys,
            unresolved,
            domain: material.domain,
        };
        match self.entries.get_mut(index as usize) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
        self.by_content.insert(content, handle);
        self.dirty.insert(index);
        self.stats.materials += 1;
        log::trace!("MaterialBinder: '{}' -> handle {handle}", material.name);
        handle
    }

    pub fn constants(&self, handle: MaterialHandle) -> Option<&MaterialConstants> {
        self.entries.get(handle.get() as usize).map(|e| &e.constants)
    }

    pub fn domain(&self, handle: MaterialHandle) -> Option<MaterialDomain> {
        self.entries.get(handle.get() as usize).map(|e| e.domain)
    }

    /// Bindless index of the constants atlas; stable across growth.
    pub fn srv_index(&self) -> ShaderVisibleIndex {
        self.atlas.srv_index()
    }

    pub fn atlas(&self) -> &AtlasBuffer {
        &self.atlas
    }

    pub fn material_count(&self) -> usize {
        self.entries.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn stats(&self) -> MaterialBinderStats {
        self.stats
    }

    /// Repoints resolved texture slots, sizes the atlas and uploads dirty
    /// entries as contiguous runs.
    ///
    /// When staging is exhausted the remaining entries stay dirty and are
    /// retried next frame.
    pub fn ensure_frame_resources(
        &mut self,
        uploads: &mut UploadCoordinator,
        textures: &mut TextureBinder,
    ) -> Result<(), GraphicsError> {
        oxygen_core::profile_scope!("material_binder_ensure");
        self.repoint(textures);

        let outcome = self.atlas.ensure_capacity(self.atlas.high_water())?;
        if outcome.needs_full_upload() && !self.entries.is_empty() {
            if let crate::upload::EnsureCapacity::Resized { .. } = outcome {
                self.stats.full_reuploads += 1;
            }
            self.dirty.extend(0..self.entries.len() as u32);
        }
        if self.dirty.is_empty() {
            return Ok(());
        }
        let Some(buffer) = self.atlas.buffer().cloned() else {
            return Ok(());
        };

        let dirty: Vec<u32> = self.dirty.iter().copied().collect();
        for run in contiguous_runs(&dirty) {
            let (first, last) = (run[0], run[run.len() - 1]);
            let entries = &self.entries[first as usize..=last as usize];
            let constants: Vec<MaterialConstants> = entries.iter().map(|e| e.constants).collect();
            let request = UploadRequest::buffer(
                &buffer,
                self.atlas.element_offset(first),
                bytemuck::cast_slice::<MaterialConstants, u8>(&constants).to_vec(),
            )
            .with_name("material_constants");
            match uploads.submit(request) {
                Ok(_) => {
                    for index in first..=last {
                        self.dirty.remove(&index);
                    }
                    self.stats.uploaded_entries += run.len() as u64;
                }
                Err(err) if err.kind() == oxygen_core::ErrorKind::OutOfCapacity => {
                    log::warn!(
                        "MaterialBinder: staging exhausted, {} entries deferred",
                        self.dirty.len()
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn repoint(&mut self, textures: &mut TextureBinder) {
        let placeholder = textures.placeholder_index();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if !entry.unresolved.contains(&true) {
                continue;
            }
            let mut indices = entry.constants.texture_indices();
            let mut changed = false;
            for slot in 0..TEXTURE_SLOTS {
                if !entry.unresolved[slot] {
                    continue;
                }
                let resolved = textures.get_or_allocate(entry.texture_keys[slot]);
                if resolved == placeholder {
                    continue;
                }
                indices[slot] = resolved.get();
                entry.unresolved[slot] = false;
                changed = true;
                self.stats.repointed_slots += 1;
            }
            if changed {
                entry.constants.set_texture_indices(indices);
                self.dirty.insert(index as u32);
            }
        }
    }
}

/// Splits sorted indices into runs of consecutive values.
fn contiguous_runs(sorted: &[u32]) -> impl Iterator<Item = &[u32]> {
    sorted.chunk_by(|a, b| b == &(a + 1))
}

impl std::fmt::Debug for MaterialBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialBinder")
            .field("materials", &self.entries.len())
            .field("dirty", &self.dirty.len())
            .field("srv", &self.srv_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::binders::NoTextureSource;
    use crate::config::{GraphicsConfig, StagingConfig};
    use crate::upload::RingBufferStaging;

    fn setup() -> (UploadCoordinator, TextureBinder, MaterialBinder) {
        let device =
            GraphicsDevice::new(Arc::new(HeadlessBackend::new()), GraphicsConfig::default()).unwrap();
        let staging = RingBufferStaging::new(device.clone(), 3, &StagingConfig::default()).unwrap();
        let mut uploads = UploadCoordinator::new(device.clone(), Box::new(staging));
        let textures =
            TextureBinder::new(device.clone(), &mut uploads, Box::new(NoTextureSource)).unwrap();
        (uploads, textures, MaterialBinder::new(device))
    }

    #[test]
    fn test_content_equal_materials_share_handle() {
        let (_uploads, mut textures, mut binder) = setup();
        let a = MaterialAsset {
            name: "a".into(),
            author_texture_indices: [1, 2, 3, 4, 5, 6],
            ..MaterialAsset::default()
        };
        let b = MaterialAsset {
            name: "b".into(),
            ..MaterialAsset::default()
        };
        let c = MaterialAsset::default().with_base_color([1.0, 0.0, 0.0, 1.0]);

        let ha = binder.get_or_allocate(&a, &mut textures);
        assert_eq!(binder.get_or_allocate(&b, &mut textures), ha);
        assert_ne!(binder.get_or_allocate(&c, &mut textures), ha);
        assert_eq!(binder.material_count(), 2);
        assert_eq!(binder.stats().dedup_hits, 1);
    }

    #[test]
    fn test_reserved_texture_keys_bind_placeholder() {
        let (_uploads, mut textures, mut binder) = setup();
        let material = MaterialAsset::default().with_base_color_texture(ResourceKey::PLACEHOLDER);
        let handle = binder.get_or_allocate(&material, &mut textures);
        let constants = binder.constants(handle).unwrap();
        let placeholder = textures.placeholder_index().get();
        assert!(constants.texture_indices().iter().all(|&i| i == placeholder));
        assert_ne!(placeholder, textures.error_index().get());
        assert_eq!(textures.stats().entries, 0);
    }

    #[test]
    fn test_constants_layout() {
        let material = MaterialAsset {
            metalness: 0.25,
            flags: MaterialFlags::DOUBLE_SIDED,
            domain: MaterialDomain::AlphaMasked,
            ..MaterialAsset::default()
        };
        let constants = MaterialConstants::from_asset(&material, [9; TEXTURE_SLOTS]);
        let bytes = bytemuck::bytes_of(&constants);
        assert_eq!(&bytes[28..32], &0.25f32.to_le_bytes());
        assert_eq!(&bytes[52..56], &9u32.to_le_bytes());
        assert_eq!(&bytes[76..80], &1u32.to_le_bytes());
        assert!(constants.has_flag(MaterialFlags::DOUBLE_SIDED));
    }

    #[test]
    fn test_runs() {
        let runs: Vec<&[u32]> = contiguous_runs(&[0, 1, 2, 5, 7, 8]).collect();
        assert_eq!(runs, vec![&[0, 1, 2][..], &[5][..], &[7, 8][..]]);
    }
}
