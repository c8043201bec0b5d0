//! Texture binder: one stable SRV per texture key.
//!
//! A new key immediately gets its own descriptor pointing at the shared
//! placeholder texture. Once the [`TextureSource`] delivers pixels the
//! texture is created, uploaded, and the same descriptor is repointed at
//! it. A load failure repoints the descriptor at the shared magenta error
//! texture. Reserved keys never get their own descriptor and resolve to
//! the placeholder.

use std::collections::HashMap;
use std::sync::Arc;

use oxygen_core::ResourceKey;

use crate::descriptors::{DescriptorContents, DescriptorHandle};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::Texture;
use crate::types::{
    DescriptorDomain, HeapIndex, ResourceState, ShaderVisibleIndex, TextureDescriptor, TextureFormat,
    TextureUsage, ViewDescription,
};
use crate::upload::{UploadCoordinator, UploadRequest, UploadTicket};

/// Decoded top-mip pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub bytes: Vec<u8>,
}

impl TextureData {
    pub fn rgba8(width: u32, height: u32, bytes: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            bytes,
        }
    }

    /// 1x1 RGBA8 texel.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self::rgba8(1, 1, rgba.to_vec())
    }
}

/// State of a texture load as reported by a [`TextureSource`].
#[derive(Debug, Clone)]
pub enum TextureLoad {
    Pending,
    Ready(TextureData),
    Failed(String),
}

/// Supplies pixels for texture keys. Polled once per frame per pending key.
pub trait TextureSource: Send {
    fn poll(&mut self, key: ResourceKey) -> TextureLoad;
}

/// Source that never delivers; every texture stays on the placeholder.
#[derive(Debug, Default)]
pub struct NoTextureSource;

impl TextureSource for NoTextureSource {
    fn poll(&mut self, _key: ResourceKey) -> TextureLoad {
        TextureLoad::Pending
    }
}

/// In-memory source keyed by resource key. Unknown keys stay pending.
#[derive(Debug, Default)]
pub struct MemoryTextureSource {
    textures: HashMap<ResourceKey, TextureLoad>,
}

impl MemoryTextureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ResourceKey, data: TextureData) {
        self.textures.insert(key, TextureLoad::Ready(data));
    }

    pub fn insert_failure(&mut self, key: ResourceKey, reason: impl Into<String>) {
        self.textures.insert(key, TextureLoad::Failed(reason.into()));
    }
}

impl TextureSource for MemoryTextureSource {
    fn poll(&mut self, key: ResourceKey) -> TextureLoad {
        self.textures.get(&key).cloned().unwrap_or(TextureLoad::Pending)
    }
}

enum EntryState {
    /// Descriptor points at the placeholder.
    Pending(DescriptorHandle),
    /// Texture created, upload in flight; the registry owns the descriptor.
    Uploading(Arc<Texture>, UploadTicket),
    Resident(Arc<Texture>),
    /// Descriptor points at the error texture.
    Failed(DescriptorHandle),
}

struct Entry {
    heap: HeapIndex,
    index: ShaderVisibleIndex,
    state: EntryState,
}

/// Counters of the texture binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureBinderStats {
    pub entries: usize,
    pub pending: usize,
    pub resident: usize,
    pub failed: usize,
}

pub struct TextureBinder {
    device: Arc<GraphicsDevice>,
    source: Box<dyn TextureSource>,
    placeholder: Arc<Texture>,
    placeholder_index: ShaderVisibleIndex,
    error: Arc<Texture>,
    error_index: ShaderVisibleIndex,
    entries: HashMap<ResourceKey, Entry>,
    requested: Vec<ResourceKey>,
}

/// Neutral grey.
const PLACEHOLDER_TEXEL: [u8; 4] = [128, 128, 128, 255];
/// Bright magenta.
const ERROR_TEXEL: [u8; 4] = [255, 0, 255, 255];

impl TextureBinder {
    /// Creates the shared placeholder and error textures and queues their
    /// uploads on `uploads`.
    pub fn new(
        device: Arc<GraphicsDevice>,
        uploads: &mut UploadCoordinator,
        source: Box<dyn TextureSource>,
    ) -> Result<Self, GraphicsError> {
        let (placeholder, placeholder_index) =
            Self::create_shared(&device, uploads, "placeholder_texture", PLACEHOLDER_TEXEL)?;
        let (error, error_index) =
            Self::create_shared(&device, uploads, "error_texture", ERROR_TEXEL)?;
        log::debug!(
            "TextureBinder: placeholder SRV {placeholder_index}, error SRV {error_index}"
        );
        Ok(Self {
            device,
            source,
            placeholder,
            placeholder_index,
            error,
            error_index,
            entries: HashMap::new(),
            requested: Vec::new(),
        })
    }

    fn create_shared(
        device: &Arc<GraphicsDevice>,
        uploads: &mut UploadCoordinator,
        name: &str,
        texel: [u8; 4],
    ) -> Result<(Arc<Texture>, ShaderVisibleIndex), GraphicsError> {
        let data = TextureData::solid(texel);
        let texture = Self::create_texture(device, name, &data)?;
        uploads.submit(UploadRequest::texture(&texture, data.bytes).with_name(name))?;
        let registry = device.registry();
        registry.register(&texture)?;
        let handle = registry.allocator().allocate(DescriptorDomain::SRV)?;
        let view = registry.register_view(
            texture.id(),
            handle,
            ViewDescription::texture_srv(texture.format()),
        )?;
        Ok((texture, view.shader_visible_index))
    }

    fn create_texture(
        device: &GraphicsDevice,
        name: &str,
        data: &TextureData,
    ) -> Result<Arc<Texture>, GraphicsError> {
        device.create_texture(
            &TextureDescriptor::new_2d(
                data.width,
                data.height,
                data.format,
                TextureUsage::SHADER_RESOURCE | TextureUsage::COPY_DST,
            )
            .with_label(name)
            .with_initial_state(ResourceState::Common),
        )
    }

    pub fn placeholder_index(&self) -> ShaderVisibleIndex {
        self.placeholder_index
    }

    pub fn error_index(&self) -> ShaderVisibleIndex {
        self.error_index
    }

    pub fn placeholder_texture(&self) -> &Arc<Texture> {
        &self.placeholder
    }

    pub fn error_texture(&self) -> &Arc<Texture> {
        &self.error
    }

    /// SRV of `key`, allocating its descriptor on first use.
    ///
    /// Reserved keys return the placeholder index. If the descriptor heap
    /// is exhausted the key also falls back to the placeholder and the
    /// allocation is retried on the next call.
    pub fn get_or_allocate(&mut self, key: ResourceKey) -> ShaderVisibleIndex {
        if key.is_reserved() {
            return self.placeholder_index;
        }
        if let Some(entry) = self.entries.get(&key) {
            return entry.index;
        }
        match self.allocate_entry(key) {
            Ok(index) => index,
            Err(err) => {
                log::warn!("TextureBinder: cannot allocate SRV for {key}: {err}");
                self.placeholder_index
            }
        }
    }

    fn allocate_entry(&mut self, key: ResourceKey) -> Result<ShaderVisibleIndex, GraphicsError> {
        let handle = self
            .device
            .descriptor_allocator()
            .allocate(DescriptorDomain::SRV)?;
        self.device.descriptor_allocator().write(
            handle.index(),
            Some(DescriptorContents::new(
                self.placeholder.id(),
                ViewDescription::texture_srv(self.placeholder.format()),
            )),
        );
        let index = handle.shader_visible_index();
        log::trace!("TextureBinder: {key} -> SRV {index} (placeholder)");
        self.entries.insert(
            key,
            Entry {
                heap: handle.index(),
                index,
                state: EntryState::Pending(handle),
            },
        );
        Ok(index)
    }

    /// SRV of a key that already has a descriptor.
    pub fn lookup(&self, key: ResourceKey) -> Option<ShaderVisibleIndex> {
        self.entries.get(&key).map(|e| e.index)
    }

    /// Heap slot behind the SRV of `key`.
    pub fn heap_index(&self, key: ResourceKey) -> Option<HeapIndex> {
        self.entries.get(&key).map(|e| e.heap)
    }

    /// Asks for `key` to be allocated during the next
    /// [`ensure_frame_resources`](Self::ensure_frame_resources).
    pub fn request(&mut self, key: ResourceKey) {
        if !key.is_reserved() && !self.entries.contains_key(&key) && !self.requested.contains(&key) {
            self.requested.push(key);
        }
    }

    pub fn is_resident(&self, key: ResourceKey) -> bool {
        self.entries
            .get(&key)
            .is_some_and(|e| matches!(e.state, EntryState::Resident(_)))
    }

    /// Allocates requested keys, polls the source for pending ones and
    /// repoints descriptors of textures that finished loading.
    pub fn ensure_frame_resources(&mut self, uploads: &mut UploadCoordinator) -> Result<(), GraphicsError> {
        oxygen_core::profile_scope!("texture_binder_ensure");
        for key in std::mem::take(&mut self.requested) {
            self.get_or_allocate(key);
        }

        let keys: Vec<ResourceKey> = self.entries.keys().copied().collect();
        for key in keys {
            self.advance(key, uploads)?;
        }
        Ok(())
    }

    fn advance(&mut self, key: ResourceKey, uploads: &mut UploadCoordinator) -> Result<(), GraphicsError> {
        let Some(entry) = self.entries.get_mut(&key) else {
            return Ok(());
        };
        match &entry.state {
            EntryState::Pending(_) => {}
            EntryState::Uploading(texture, ticket) => {
                if ticket.is_complete() {
                    entry.state = EntryState::Resident(Arc::clone(texture));
                }
                return Ok(());
            }
            EntryState::Resident(_) | EntryState::Failed(_) => return Ok(()),
        }

        match self.source.poll(key) {
            TextureLoad::Pending => Ok(()),
            TextureLoad::Failed(reason) => {
                log::warn!("TextureBinder: {key} failed to load ({reason}), using error texture");
                self.source_failed(key);
                Ok(())
            }
            TextureLoad::Ready(data) => {
                let expected = TextureDescriptor::new_2d(
                    data.width,
                    data.height,
                    data.format,
                    TextureUsage::empty(),
                )
                .byte_size();
                if data.bytes.len() as u64 != expected {
                    log::warn!(
                        "TextureBinder: {key} delivered {} bytes, expected {expected}",
                        data.bytes.len()
                    );
                    self.source_failed(key);
                    return Ok(());
                }
                let name = format!("texture_{key}");
                let texture = Self::create_texture(&self.device, &name, &data)?;
                let ticket = match uploads.submit(UploadRequest::texture(&texture, data.bytes).with_name(&name)) {
                    Ok(ticket) => ticket,
                    Err(err) if err.kind() == oxygen_core::ErrorKind::OutOfCapacity => {
                        // Retry next frame once staging has rotated.
                        log::debug!("TextureBinder: staging full, deferring {key}");
                        return Ok(());
                    }
                    Err(err) => return Err(err),
                };
                let Some(entry) = self.entries.get_mut(&key) else {
                    return Ok(());
                };
                let EntryState::Pending(handle) =
                    std::mem::replace(&mut entry.state, EntryState::Uploading(Arc::clone(&texture), ticket))
                else {
                    return Ok(());
                };
                let registry = self.device.registry();
                registry.register(&texture)?;
                registry.register_view(
                    texture.id(),
                    handle,
                    ViewDescription::texture_srv(texture.format()),
                )?;
                log::trace!("TextureBinder: {key} repointed to {}", texture.id());
                Ok(())
            }
        }
    }

    fn source_failed(&mut self, key: ResourceKey) {
        let error_id = self.error.id();
        let error_format = self.error.format();
        let allocator = Arc::clone(self.device.descriptor_allocator());
        if let Some(entry) = self.entries.get_mut(&key)
            && let EntryState::Pending(handle) =
                std::mem::replace(&mut entry.state, EntryState::Resident(Arc::clone(&self.error)))
        {
            allocator.write(
                handle.index(),
                Some(DescriptorContents::new(error_id, ViewDescription::texture_srv(error_format))),
            );
            entry.state = EntryState::Failed(handle);
        }
    }

    /// Drops the texture of `key`; its descriptor is released after
    /// in-flight work completes.
    pub fn evict(&mut self, key: ResourceKey) -> Result<bool, GraphicsError> {
        let Some(entry) = self.entries.remove(&key) else {
            return Ok(false);
        };
        match entry.state {
            EntryState::Pending(handle) | EntryState::Failed(handle) => {
                self.device
                    .reclaimer()
                    .defer_release(handle, format!("texture_srv_{key}"));
            }
            EntryState::Uploading(texture, _) | EntryState::Resident(texture) => {
                self.device.retire_resource(texture)?;
            }
        }
        Ok(true)
    }

    pub fn stats(&self) -> TextureBinderStats {
        let mut stats = TextureBinderStats {
            entries: self.entries.len(),
            ..TextureBinderStats::default()
        };
        for entry in self.entries.values() {
            match entry.state {
                EntryState::Pending(_) | EntryState::Uploading(..) => stats.pending += 1,
                EntryState::Resident(_) => stats.resident += 1,
                EntryState::Failed(_) => stats.failed += 1,
            }
        }
        stats
    }
}

impl std::fmt::Debug for TextureBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureBinder")
            .field("placeholder_index", &self.placeholder_index)
            .field("error_index", &self.error_index)
            .field("stats", &self.stats())
            .finish()
    }
}
