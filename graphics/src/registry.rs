//! Resource registry: resources, their views and the descriptors behind them.
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`register`](ResourceRegistry::register) | Adds a resource, once |
//! | [`register_view`](ResourceRegistry::register_view) | Binds a descriptor slot to a view of a registered resource |
//! | [`replace`](ResourceRegistry::replace) | Swaps the resource, rewriting every view in place |
//! | [`unregister_resource`](ResourceRegistry::unregister_resource) | Drops the resource and releases its views behind a fence |
//!
//! Replacement keeps every descriptor slot, so shader-visible indices handed
//! out before the swap stay valid and now reach the new resource.
//!
//! Slots of an unregistered resource go through [`TimelineGatedSlotReuse`]:
//! the allocator only sees them again once the queue that may still read
//! them has completed the release fence.

use std::collections::HashMap;
use std::sync::Arc;

use oxygen_core::contract_violation;
use parking_lot::RwLock;

use crate::bindless::TimelineGatedSlotReuse;
use crate::descriptors::{DescriptorAllocator, DescriptorContents, DescriptorHandle};
use crate::error::GraphicsError;
use crate::queue::CommandQueue;
use crate::resources::{GpuResource, ResourceId};
use crate::types::{HeapIndex, ShaderVisibleIndex, ViewDescription};

/// A registered view. Valid while its resource stays registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeView {
    pub resource: ResourceId,
    pub heap_index: HeapIndex,
    pub shader_visible_index: ShaderVisibleIndex,
    pub description: ViewDescription,
}

struct ViewEntry {
    handle: DescriptorHandle,
    description: ViewDescription,
}

struct Entry {
    resource: GpuResource,
    views: Vec<ViewEntry>,
}

/// Internally locked map of registered resources.
pub struct ResourceRegistry {
    allocator: Arc<DescriptorAllocator>,
    slot_reuse: Arc<TimelineGatedSlotReuse>,
    entries: RwLock<HashMap<ResourceId, Entry>>,
}

fn check_view_fits(resource: &GpuResource, view: &ViewDescription) -> Result<(), GraphicsError> {
    match (resource, view) {
        (GpuResource::Buffer(buffer), ViewDescription::Buffer {
            first_element,
            element_count,
            stride,
            format,
            ..
        }) => {
            let element_size = match (stride, format) {
                (0, Some(format)) => u64::from(format.block_size()),
                (stride, _) => u64::from(*stride),
            };
            let end = (first_element + element_count) * element_size;
            if end > buffer.size() {
                return Err(GraphicsError::InvalidArgument(format!(
                    "view of {end} bytes exceeds buffer {} of {} bytes",
                    buffer.id(),
                    buffer.size()
                )));
            }
            Ok(())
        }
        (GpuResource::Buffer(buffer), ViewDescription::Constant { offset, size }) => {
            if offset + u64::from(*size) > buffer.size() {
                return Err(GraphicsError::InvalidArgument(format!(
                    "constant view exceeds buffer {}",
                    buffer.id()
                )));
            }
            Ok(())
        }
        (GpuResource::Texture(_), ViewDescription::Texture { .. }) => Ok(()),
        (resource, view) => Err(GraphicsError::InvalidArgument(format!(
            "view {view:?} does not apply to resource {}",
            resource.id()
        ))),
    }
}

impl ResourceRegistry {
    pub fn new(allocator: Arc<DescriptorAllocator>) -> Self {
        let slot_reuse = Arc::new(TimelineGatedSlotReuse::from_allocator(Arc::clone(&allocator)));
        Self {
            allocator,
            slot_reuse,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn allocator(&self) -> &Arc<DescriptorAllocator> {
        &self.allocator
    }

    /// Gate holding the slots of unregistered resources.
    pub fn slot_reuse(&self) -> &Arc<TimelineGatedSlotReuse> {
        &self.slot_reuse
    }

    /// Registers a resource. Registering twice is a contract violation.
    pub fn register(&self, resource: impl Into<GpuResource>) -> Result<(), GraphicsError> {
        let resource = resource.into();
        let id = resource.id();
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            contract_violation!(
                GraphicsError::ResourceRegistrationFailed(format!("resource {id} already registered")),
                "resource {id} ({:?}) registered twice",
                resource.label()
            );
        }
        log::trace!("ResourceRegistry: registered {id} {:?}", resource.label());
        entries.insert(
            id,
            Entry {
                resource,
                views: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.entries.read().contains_key(&id)
    }

    pub fn resource(&self, id: ResourceId) -> Option<GpuResource> {
        self.entries.read().get(&id).map(|e| e.resource.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Binds `handle` to a view of a registered resource and writes the
    /// descriptor.
    pub fn register_view(
        &self,
        resource: ResourceId,
        handle: DescriptorHandle,
        description: ViewDescription,
    ) -> Result<NativeView, GraphicsError> {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&resource) else {
            contract_violation!(
                GraphicsError::ResourceRegistrationFailed(format!(
                    "resource {resource} is not registered"
                )),
                "view registered against unregistered resource {resource}"
            );
        };
        check_view_fits(&entry.resource, &description)?;

        self.allocator.write(
            handle.index(),
            Some(DescriptorContents::new(resource, description)),
        );
        let view = NativeView {
            resource,
            heap_index: handle.index(),
            shader_visible_index: handle.shader_visible_index(),
            description,
        };
        entry.views.push(ViewEntry {
            handle,
            description,
        });
        Ok(view)
    }

    /// First view of `resource` matching `description`.
    pub fn find_view(&self, resource: ResourceId, description: &ViewDescription) -> Option<NativeView> {
        let entries = self.entries.read();
        let entry = entries.get(&resource)?;
        entry
            .views
            .iter()
            .find(|v| v.description == *description)
            .map(|v| NativeView {
                resource,
                heap_index: v.handle.index(),
                shader_visible_index: v.handle.shader_visible_index(),
                description: v.description,
            })
    }

    pub fn views_of(&self, resource: ResourceId) -> Vec<NativeView> {
        self.entries
            .read()
            .get(&resource)
            .map(|entry| {
                entry
                    .views
                    .iter()
                    .map(|v| NativeView {
                        resource,
                        heap_index: v.handle.index(),
                        shader_visible_index: v.handle.shader_visible_index(),
                        description: v.description,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Swaps `old` for `new`, keeping every descriptor slot.
    ///
    /// `recreate` is called once per view of `old` and may return a new
    /// description for the new resource; `None` keeps the old one. Returns
    /// the replaced resource so the caller can defer its release.
    pub fn replace<F>(
        &self,
        old: ResourceId,
        new: impl Into<GpuResource>,
        mut recreate: F,
    ) -> Result<GpuResource, GraphicsError>
    where
        F: FnMut(&ViewDescription) -> Option<ViewDescription>,
    {
        let new = new.into();
        let new_id = new.id();
        let mut entries = self.entries.write();
        if entries.contains_key(&new_id) {
            contract_violation!(
                GraphicsError::ResourceRegistrationFailed(format!(
                    "replacement {new_id} is already registered"
                )),
                "replacement resource {new_id} registered before replace"
            );
        }
        let Some(mut entry) = entries.remove(&old) else {
            return Err(GraphicsError::NotFound(format!("resource {old}")));
        };

        // Validate everything before touching descriptors so a failure leaves
        // the old entry intact.
        let descriptions: Vec<ViewDescription> = entry
            .views
            .iter()
            .map(|v| recreate(&v.description).unwrap_or(v.description))
            .collect();
        if let Some(err) = descriptions
            .iter()
            .find_map(|d| check_view_fits(&new, d).err())
        {
            entries.insert(old, entry);
            return Err(err);
        }

        for (view, description) in entry.views.iter_mut().zip(descriptions) {
            view.description = description;
            self.allocator.write(
                view.handle.index(),
                Some(DescriptorContents::new(new_id, description)),
            );
        }
        log::debug!(
            "ResourceRegistry: replaced {old} with {new_id} ({} views kept)",
            entry.views.len()
        );
        let replaced = std::mem::replace(&mut entry.resource, new);
        entries.insert(new_id, entry);
        Ok(replaced)
    }

    /// Removes a resource and releases all of its views.
    ///
    /// The view slots return to the allocator once `queue` completes the
    /// value it has submitted so far; until then they are never reissued.
    /// Returns the number of views released.
    pub fn unregister_resource(&self, id: ResourceId, queue: &Arc<CommandQueue>) -> Result<usize, GraphicsError> {
        let entry = self
            .entries
            .write()
            .remove(&id)
            .ok_or_else(|| GraphicsError::NotFound(format!("resource {id}")))?;
        let fence = queue.current_value();
        let items: Vec<_> = entry
            .views
            .into_iter()
            .map(|view| {
                let domain = view.handle.domain();
                (domain, self.slot_reuse.adopt(view.handle.into_raw()))
            })
            .collect();
        let count = items.len();
        log::trace!(
            "ResourceRegistry: unregistered {id}, {count} views released at {} fence {fence}",
            queue.role().name()
        );
        self.slot_reuse.release_batch(queue, fence, &items)?;
        Ok(count)
    }

    /// Returns released slots whose fences completed. Returns how many.
    pub fn process_released_views(&self) -> usize {
        self.slot_reuse.process()
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resources", &self.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(ResourceRegistry: Send, Sync);
