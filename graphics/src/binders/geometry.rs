//! Geometry uploader: vertex and index buffers per `(asset, lod)`.
//!
//! Entries move through
//!
//! ```text
//! Pending --ensure--> Uploading --tickets done--> Resident
//!    ^                    |                          |
//!    +---get_or_allocate--+------ Evicted <----------+
//! ```
//!
//! Buffers are published to shaders as soon as their views exist; the
//! renderer orders graphics work after the upload fence. Eviction takes
//! effect at [`GeometryUploader::on_frame_start`]; requests are tracked per
//! `(asset, lod)`, so asking for one LOD again only cancels that LOD's
//! pending eviction.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use oxygen_core::{AssetKey, strong_type};
use oxygen_scene::{GeometryAsset, Mesh, Vertex};

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::registry::NativeView;
use crate::resources::Buffer;
use crate::types::{
    BufferDescriptor, BufferUsage, DescriptorDomain, ShaderVisibleIndex, TextureFormat,
    ViewDescription,
};
use crate::upload::{UploadCoordinator, UploadRequest, UploadTicket};

strong_type!(
    /// Stable handle of one `(asset, lod)` geometry entry.
    pub struct GeometryHandle(u32);
);

/// Bindless indices of an entry's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryIndices {
    pub vertex_buffer: ShaderVisibleIndex,
    /// Invalid for non-indexed meshes.
    pub index_buffer: ShaderVisibleIndex,
}

impl GeometryIndices {
    pub const INVALID: Self = Self {
        vertex_buffer: ShaderVisibleIndex::INVALID,
        index_buffer: ShaderVisibleIndex::INVALID,
    };

    pub fn is_valid(&self) -> bool {
        self.vertex_buffer.is_valid()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryState {
    Pending,
    Uploading,
    Resident,
    Evicted,
}

struct GpuGeometry {
    vertex: Arc<Buffer>,
    vertex_view: NativeView,
    index: Option<(Arc<Buffer>, NativeView)>,
}

struct Entry {
    key: (AssetKey, u32),
    asset: Weak<GeometryAsset>,
    critical: bool,
    state: GeometryState,
    gpu: Option<GpuGeometry>,
    tickets: Vec<UploadTicket>,
}

/// Counters of the geometry uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeometryUploaderStats {
    pub entries: u32,
    pub resident: u32,
    pub uploads_submitted: u64,
    pub bytes_submitted: u64,
    pub evictions: u64,
}

pub struct GeometryUploader {
    device: Arc<GraphicsDevice>,
    entries: Vec<Entry>,
    by_key: HashMap<(AssetKey, u32), GeometryHandle>,
    /// Handles waiting for their first upload, in request order.
    pending: Vec<GeometryHandle>,
    evictions: HashSet<(AssetKey, u32)>,
    frame_budget_bytes: u64,
    stats: GeometryUploaderStats,
}

impl GeometryUploader {
    /// Bytes of non-critical geometry uploaded per frame.
    pub const DEFAULT_FRAME_BUDGET: u64 = 16 * 1024 * 1024;

    pub fn new(device: Arc<GraphicsDevice>) -> Self {
        Self {
            device,
            entries: Vec::new(),
            by_key: HashMap::new(),
            pending: Vec::new(),
            evictions: HashSet::new(),
            frame_budget_bytes: Self::DEFAULT_FRAME_BUDGET,
            stats: GeometryUploaderStats::default(),
        }
    }

    pub fn with_frame_budget(mut self, bytes: u64) -> Self {
        self.frame_budget_bytes = bytes;
        self
    }

    /// Handle of `asset` at `lod`.
    ///
    /// Critical entries upload first and ignore the frame budget. Raising
    /// an entry to critical is sticky and neither changes its handle nor
    /// uploads it again. A handle evicted earlier is reused and its
    /// upload requeued.
    pub fn get_or_allocate(
        &mut self,
        asset: &Arc<GeometryAsset>,
        lod: usize,
        critical: bool,
    ) -> Result<GeometryHandle, GraphicsError> {
        if asset.mesh(lod).is_none() {
            return Err(GraphicsError::InvalidArgument(format!(
                "geometry '{}' has no LOD {lod} ({} LODs)",
                asset.name(),
                asset.lod_count()
            )));
        }
        let key = (asset.key(), lod as u32);
        if let Some(&handle) = self.by_key.get(&key) {
            let entry = &mut self.entries[handle.get() as usize];
            if critical && !entry.critical {
                log::trace!("GeometryUploader: {} lod {lod} raised to critical", asset.key());
                entry.critical = true;
            }
            if entry.state == GeometryState::Evicted {
                entry.asset = Arc::downgrade(asset);
                entry.state = GeometryState::Pending;
                self.evictions.remove(&key);
                self.pending.push(handle);
                log::debug!("GeometryUploader: {} lod {lod} requeued after eviction", asset.key());
            }
            return Ok(handle);
        }

        let handle = GeometryHandle::new(self.entries.len() as u32);
        self.entries.push(Entry {
            key,
            asset: Arc::downgrade(asset),
            critical,
            state: GeometryState::Pending,
            gpu: None,
            tickets: Vec::new(),
        });
        self.by_key.insert(key, handle);
        self.pending.push(handle);
        self.stats.entries += 1;
        Ok(handle)
    }

    pub fn lookup(&self, asset: AssetKey, lod: usize) -> Option<GeometryHandle> {
        self.by_key.get(&(asset, lod as u32)).copied()
    }

    pub fn state(&self, handle: GeometryHandle) -> Option<GeometryState> {
        self.entries.get(handle.get() as usize).map(|e| e.state)
    }

    pub fn is_critical(&self, handle: GeometryHandle) -> bool {
        self.entries
            .get(handle.get() as usize)
            .is_some_and(|e| e.critical)
    }

    /// Published indices, or [`GeometryIndices::INVALID`] when the entry
    /// has no buffers (pending or evicted).
    pub fn get_shader_visible_indices(&self, handle: GeometryHandle) -> GeometryIndices {
        let Some(entry) = self.entries.get(handle.get() as usize) else {
            return GeometryIndices::INVALID;
        };
        match (&entry.state, &entry.gpu) {
            (GeometryState::Uploading | GeometryState::Resident, Some(gpu)) => GeometryIndices {
                vertex_buffer: gpu.vertex_view.shader_visible_index,
                index_buffer: gpu
                    .index
                    .as_ref()
                    .map_or(ShaderVisibleIndex::INVALID, |(_, view)| view.shader_visible_index),
            },
            _ => GeometryIndices::INVALID,
        }
    }

    /// Requests eviction of every LOD of `asset` at the next frame start.
    pub fn evict(&mut self, asset: AssetKey) {
        self.evictions
            .extend(self.by_key.keys().filter(|(key, _)| *key == asset).copied());
    }

    /// Applies requested evictions and evicts entries whose asset was
    /// dropped.
    ///
    /// Every requested entry is evicted even when retiring one of them
    /// fails; the first failure is returned.
    pub fn on_frame_start(&mut self) -> Result<(), GraphicsError> {
        for entry in &self.entries {
            if entry.state != GeometryState::Evicted && entry.asset.strong_count() == 0 {
                self.evictions.insert(entry.key);
            }
        }
        if self.evictions.is_empty() {
            return Ok(());
        }
        let evictions = std::mem::take(&mut self.evictions);
        let mut result = Ok(());
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if !evictions.contains(&entry.key) || entry.state == GeometryState::Evicted {
                continue;
            }
            if let Some(gpu) = entry.gpu.take()
                && let Err(err) = retire_buffers(&self.device, gpu.vertex, gpu.index.map(|(buffer, _)| buffer))
                && result.is_ok()
            {
                result = Err(err);
            }
            // Completions arriving after this point are ignored.
            entry.tickets.clear();
            if entry.state == GeometryState::Resident {
                self.stats.resident -= 1;
            }
            entry.state = GeometryState::Evicted;
            self.stats.evictions += 1;
            let handle = GeometryHandle::new(index as u32);
            self.pending.retain(|h| *h != handle);
            log::debug!("GeometryUploader: evicted {} lod {}", entry.key.0, entry.key.1);
        }
        result
    }

    /// Uploads pending entries and promotes finished ones to resident.
    ///
    /// Critical entries go first regardless of budget; the rest upload in
    /// request order while the frame budget lasts. The first entry of a
    /// frame always goes through so oversize meshes cannot stall forever.
    pub fn ensure_frame_resources(&mut self, uploads: &mut UploadCoordinator) -> Result<(), GraphicsError> {
        oxygen_core::profile_scope!("geometry_uploader_ensure");
        for entry in &mut self.entries {
            if entry.state == GeometryState::Uploading && entry.tickets.iter().all(UploadTicket::is_complete) {
                entry.tickets.clear();
                entry.state = GeometryState::Resident;
                self.stats.resident += 1;
            }
        }

        let mut order = std::mem::take(&mut self.pending);
        order.sort_by_key(|h| !self.entries[h.get() as usize].critical);
        let mut spent = 0u64;
        let mut uploaded_any = false;
        let mut deferred = Vec::new();
        for handle in order {
            let entry = &self.entries[handle.get() as usize];
            let Some(asset) = entry.asset.upgrade() else {
                // Dropped asset; on_frame_start evicts it.
                continue;
            };
            let Some(mesh) = asset.mesh(entry.key.1 as usize) else {
                continue;
            };
            let bytes = (mesh.vertices().len() * std::mem::size_of::<Vertex>()
                + mesh.indices().map_or(0, |i| i.len() * 4)) as u64;
            if !entry.critical && uploaded_any && spent + bytes > self.frame_budget_bytes {
                deferred.push(handle);
                continue;
            }
            match self.upload(handle, &asset, uploads) {
                Ok(()) => {
                    spent += bytes;
                    uploaded_any = true;
                }
                Err(err) if err.kind() == oxygen_core::ErrorKind::OutOfCapacity => {
                    log::debug!("GeometryUploader: staging full, deferring {handle}");
                    deferred.push(handle);
                }
                Err(err) => {
                    self.pending = deferred;
                    return Err(err);
                }
            }
        }
        self.pending.extend(deferred);
        Ok(())
    }

    fn upload(
        &mut self,
        handle: GeometryHandle,
        asset: &GeometryAsset,
        uploads: &mut UploadCoordinator,
    ) -> Result<(), GraphicsError> {
        let entry = &self.entries[handle.get() as usize];
        let lod = entry.key.1;
        let Some(mesh) = asset.mesh(lod as usize) else {
            return Ok(());
        };
        let name = format!("{}_lod{lod}", asset.name());
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices()[..]);
        if vertex_bytes.is_empty() {
            return Err(GraphicsError::InvalidArgument(format!("geometry '{name}' has no vertices")));
        }

        let vertex = self.device.create_buffer(
            &BufferDescriptor::new(
                vertex_bytes.len() as u64,
                BufferUsage::VERTEX | BufferUsage::STORAGE | BufferUsage::COPY_DST,
            )
            .with_label(format!("{name}_vertices")),
        )?;
        let index = match mesh.indices() {
            Some(indices) if !indices.is_empty() => Some((
                self.device.create_buffer(
                    &BufferDescriptor::new(
                        (indices.len() * 4) as u64,
                        BufferUsage::INDEX | BufferUsage::STORAGE | BufferUsage::COPY_DST,
                    )
                    .with_label(format!("{name}_indices")),
                )?,
                indices,
            )),
            _ => None,
        };

        // Registration and staging either both succeed or leave nothing
        // registered behind; copies already queued land in buffers that are
        // released after the transfer completes.
        let staged = stage_buffers(&self.device, &name, mesh, &vertex, index.as_ref(), uploads);
        let (vertex_view, index, tickets) = match staged {
            Ok((vertex_view, index_view, tickets)) => (
                vertex_view,
                index.zip(index_view).map(|((buffer, _), view)| (buffer, view)),
                tickets,
            ),
            Err(err) => {
                if let Err(retire_err) = retire_buffers(&self.device, vertex, index.map(|(buffer, _)| buffer)) {
                    log::warn!("GeometryUploader: cleanup of '{name}' failed: {retire_err}");
                }
                return Err(err);
            }
        };

        let bytes: u64 = tickets.iter().map(UploadTicket::bytes).sum();
        self.stats.uploads_submitted += 1;
        self.stats.bytes_submitted += bytes;
        log::trace!(
            "GeometryUploader: {handle} '{name}' uploading {bytes} bytes (vertex SRV {})",
            vertex_view.shader_visible_index
        );
        let entry = &mut self.entries[handle.get() as usize];
        entry.gpu = Some(GpuGeometry {
            vertex,
            vertex_view,
            index,
        });
        entry.tickets = tickets;
        entry.state = GeometryState::Uploading;
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> GeometryUploaderStats {
        self.stats
    }
}

/// Registers the buffers of one mesh, creates their views and queues their
/// copies. On failure, already registered buffers stay registered and the
/// caller retires them.
fn stage_buffers(
    device: &GraphicsDevice,
    name: &str,
    mesh: &Mesh,
    vertex: &Arc<Buffer>,
    index: Option<&(Arc<Buffer>, &Arc<[u32]>)>,
    uploads: &mut UploadCoordinator,
) -> Result<(NativeView, Option<NativeView>, Vec<UploadTicket>), GraphicsError> {
    let registry = device.registry();
    let allocator = registry.allocator();
    registry.register(vertex)?;
    let vertex_view = registry.register_view(
        vertex.id(),
        allocator.allocate(DescriptorDomain::SRV)?,
        ViewDescription::structured_srv(mesh.vertices().len() as u64, std::mem::size_of::<Vertex>() as u32),
    )?;
    let index_view = match index {
        Some((buffer, indices)) => {
            registry.register(buffer)?;
            Some(registry.register_view(
                buffer.id(),
                allocator.allocate(DescriptorDomain::SRV)?,
                ViewDescription::typed_srv(TextureFormat::R32Uint, indices.len() as u64),
            )?)
        }
        None => None,
    };

    let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices()[..]);
    let mut tickets = vec![uploads.submit(
        UploadRequest::buffer(vertex, 0, vertex_bytes).with_name(format!("{name}_vertices")),
    )?];
    if let Some((buffer, indices)) = index {
        tickets.push(uploads.submit(
            UploadRequest::buffer(buffer, 0, bytemuck::cast_slice::<u32, u8>(&indices[..]))
                .with_name(format!("{name}_indices")),
        )?);
    }
    Ok((vertex_view, index_view, tickets))
}

/// Retires both buffers of an entry, returning the first failure.
///
/// A buffer that never got registered is still released behind the fence.
fn retire_buffers(
    device: &GraphicsDevice,
    vertex: Arc<Buffer>,
    index: Option<Arc<Buffer>>,
) -> Result<(), GraphicsError> {
    let vertex_result = retire_if_registered(device, vertex);
    let index_result = index.map_or(Ok(()), |buffer| retire_if_registered(device, buffer));
    vertex_result.and(index_result)
}

fn retire_if_registered(device: &GraphicsDevice, buffer: Arc<Buffer>) -> Result<(), GraphicsError> {
    if device.registry().contains(buffer.id()) {
        device.retire_resource(buffer).map(|_| ())
    } else {
        device.reclaimer().defer_release_resource(buffer);
        Ok(())
    }
}

impl Drop for GeometryUploader {
    fn drop(&mut self) {
        for entry in &mut self.entries {
            if let Some(gpu) = entry.gpu.take()
                && let Err(err) = retire_buffers(&self.device, gpu.vertex, gpu.index.map(|(buffer, _)| buffer))
            {
                log::warn!(
                    "GeometryUploader: failed to retire {} lod {}: {err}",
                    entry.key.0,
                    entry.key.1
                );
            }
        }
    }
}

impl std::fmt::Debug for GeometryUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryUploader")
            .field("entries", &self.entries.len())
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::config::{DescriptorHeapConfig, GraphicsConfig, StagingConfig};
    use crate::upload::RingBufferStaging;

    fn setup() -> (Arc<GraphicsDevice>, UploadCoordinator, GeometryUploader) {
        setup_with(GraphicsConfig::default())
    }

    fn setup_with(config: GraphicsConfig) -> (Arc<GraphicsDevice>, UploadCoordinator, GeometryUploader) {
        let device = GraphicsDevice::new(Arc::new(HeadlessBackend::new()), config).unwrap();
        let staging = RingBufferStaging::new(device.clone(), 3, &StagingConfig::default()).unwrap();
        let uploads = UploadCoordinator::new(device.clone(), Box::new(staging));
        (device.clone(), uploads, GeometryUploader::new(device))
    }

    fn cube_asset(key: u64) -> Arc<GeometryAsset> {
        Arc::new(GeometryAsset::new(
            AssetKey::from_u64(key),
            "cube",
            vec![Arc::new(Mesh::cube("lod0", 1.0, None)), Arc::new(Mesh::cube("lod1", 1.0, None))],
        ))
    }

    #[test]
    fn test_upload_publishes_indices() {
        let (_device, mut uploads, mut geometry) = setup();
        let asset = cube_asset(1);
        let handle = geometry.get_or_allocate(&asset, 0, false).unwrap();
        assert_eq!(geometry.get_shader_visible_indices(handle), GeometryIndices::INVALID);

        geometry.ensure_frame_resources(&mut uploads).unwrap();
        let indices = geometry.get_shader_visible_indices(handle);
        assert!(indices.vertex_buffer.is_valid());
        assert!(indices.index_buffer.is_valid());

        uploads.flush().unwrap();
        geometry.ensure_frame_resources(&mut uploads).unwrap();
        assert_eq!(geometry.state(handle), Some(GeometryState::Resident));
    }

    #[test]
    fn test_lods_are_separate_entries() {
        let (_device, _uploads, mut geometry) = setup();
        let asset = cube_asset(1);
        let lod0 = geometry.get_or_allocate(&asset, 0, false).unwrap();
        let lod1 = geometry.get_or_allocate(&asset, 1, false).unwrap();
        assert_ne!(lod0, lod1);
        assert!(geometry.get_or_allocate(&asset, 2, false).is_err());
    }

    #[test]
    fn test_critical_entries_bypass_budget() {
        let (_device, mut uploads, geometry) = setup();
        let mut geometry = geometry.with_frame_budget(1);
        let assets: Vec<_> = (10..13).map(cube_asset).collect();
        let a = geometry.get_or_allocate(&assets[0], 0, false).unwrap();
        let b = geometry.get_or_allocate(&assets[1], 0, false).unwrap();
        let c = geometry.get_or_allocate(&assets[2], 0, true).unwrap();

        geometry.ensure_frame_resources(&mut uploads).unwrap();
        assert_eq!(geometry.state(c), Some(GeometryState::Uploading));
        assert_eq!(geometry.state(a), Some(GeometryState::Pending));
        assert_eq!(geometry.state(b), Some(GeometryState::Pending));
        assert_eq!(geometry.pending_count(), 2);
    }

    #[test]
    fn test_dropped_asset_is_evicted() {
        let (_device, mut uploads, mut geometry) = setup();
        let asset = cube_asset(5);
        let handle = geometry.get_or_allocate(&asset, 0, false).unwrap();
        geometry.ensure_frame_resources(&mut uploads).unwrap();
        drop(asset);
        geometry.on_frame_start().unwrap();
        assert_eq!(geometry.state(handle), Some(GeometryState::Evicted));
        assert!(!geometry.get_shader_visible_indices(handle).is_valid());
    }

    #[test]
    fn test_rerequest_cancels_only_its_own_lod_eviction() {
        let (_device, mut uploads, mut geometry) = setup();
        let asset = cube_asset(7);
        let lod0 = geometry.get_or_allocate(&asset, 0, false).unwrap();
        let lod1 = geometry.get_or_allocate(&asset, 1, false).unwrap();
        geometry.ensure_frame_resources(&mut uploads).unwrap();
        geometry.evict(asset.key());
        geometry.on_frame_start().unwrap();
        assert_eq!(geometry.state(lod0), Some(GeometryState::Evicted));

        // lod1 comes back and uploads; lod0 is asked for again right after
        // a new eviction request for the whole asset.
        geometry.get_or_allocate(&asset, 1, false).unwrap();
        geometry.ensure_frame_resources(&mut uploads).unwrap();
        assert_eq!(geometry.state(lod1), Some(GeometryState::Uploading));
        geometry.evict(asset.key());
        geometry.get_or_allocate(&asset, 0, false).unwrap();
        geometry.on_frame_start().unwrap();

        assert_eq!(geometry.state(lod1), Some(GeometryState::Evicted));
        assert_eq!(geometry.state(lod0), Some(GeometryState::Pending));
        assert_eq!(geometry.stats().evictions, 3);
    }

    #[test]
    fn test_failed_index_view_leaves_nothing_registered() {
        let heap = DescriptorHeapConfig {
            srv: 1,
            ..DescriptorHeapConfig::default()
        };
        let (device, mut uploads, mut geometry) =
            setup_with(GraphicsConfig::default().with_descriptor_heap(heap));
        let asset = cube_asset(9);
        let handle = geometry.get_or_allocate(&asset, 0, false).unwrap();

        let err = geometry.ensure_frame_resources(&mut uploads).unwrap_err();
        assert_eq!(err.kind(), oxygen_core::ErrorKind::DescriptorAllocationFailed);
        assert!(device.registry().is_empty());
        assert_eq!(geometry.state(handle), Some(GeometryState::Pending));

        // Immediate queues: the vertex SRV comes back on the next sweep.
        device.process_deferred();
        assert_eq!(device.descriptor_allocator().remaining(DescriptorDomain::SRV), 1);
    }
}
