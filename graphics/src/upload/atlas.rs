//! Growable structured buffer with stable element indices.

use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::registry::NativeView;
use crate::resources::Buffer;
use crate::types::{BufferDescriptor, BufferUsage, DescriptorDomain, ShaderVisibleIndex, ViewDescription};

/// Outcome of [`AtlasBuffer::ensure_capacity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureCapacity {
    Unchanged,
    /// First backing buffer created.
    Created { capacity: u32 },
    /// Backing buffer replaced. Existing contents are gone and every live
    /// element must be uploaded again.
    Resized { old_capacity: u32, new_capacity: u32 },
}

impl EnsureCapacity {
    /// Whether the caller must re-upload every live element.
    pub fn needs_full_upload(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Device-local structured buffer addressed by element index.
///
/// Element indices are logical: [`allocate`](Self::allocate) never fails and
/// the backing buffer is sized once per frame by
/// [`ensure_capacity`](Self::ensure_capacity). The SRV index is allocated
/// with the first buffer and survives every resize through
/// [`ResourceRegistry::replace`](crate::ResourceRegistry::replace).
pub struct AtlasBuffer {
    device: Arc<GraphicsDevice>,
    name: String,
    stride: u32,
    initial_capacity: u32,
    slack_factor: f32,
    buffer: Option<Arc<Buffer>>,
    view: Option<NativeView>,
    capacity: u32,
    next: u32,
    free: Vec<u32>,
    live: u32,
    resize_count: u32,
}

impl AtlasBuffer {
    pub fn new(
        device: Arc<GraphicsDevice>,
        name: impl Into<String>,
        stride: u32,
        initial_capacity: u32,
    ) -> Self {
        Self {
            device,
            name: name.into(),
            stride,
            initial_capacity: initial_capacity.max(1),
            slack_factor: 1.5,
            buffer: None,
            view: None,
            capacity: 0,
            next: 0,
            free: Vec::new(),
            live: 0,
            resize_count: 0,
        }
    }

    pub fn with_slack_factor(mut self, slack_factor: f32) -> Self {
        self.slack_factor = slack_factor.max(1.0);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Elements the current backing buffer holds.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of element indices ever handed out (the high-water mark).
    pub fn high_water(&self) -> u32 {
        self.next
    }

    pub fn live_count(&self) -> u32 {
        self.live
    }

    pub fn resize_count(&self) -> u32 {
        self.resize_count
    }

    pub fn buffer(&self) -> Option<&Arc<Buffer>> {
        self.buffer.as_ref()
    }

    pub fn srv_index(&self) -> ShaderVisibleIndex {
        self.view
            .map_or(ShaderVisibleIndex::INVALID, |v| v.shader_visible_index)
    }

    /// Byte offset of an element.
    pub fn element_offset(&self, index: u32) -> u64 {
        u64::from(index) * u64::from(self.stride)
    }

    /// Reserves an element index, reusing released ones first.
    pub fn allocate(&mut self) -> u32 {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            return index;
        }
        let index = self.next;
        self.next += 1;
        index
    }

    pub fn release(&mut self, index: u32) {
        debug_assert!(index < self.next, "element {index} was never allocated");
        debug_assert!(!self.free.contains(&index), "element {index} released twice");
        self.free.push(index);
        self.live -= 1;
    }

    /// Makes the backing buffer hold at least `required` elements.
    pub fn ensure_capacity(&mut self, required: u32) -> Result<EnsureCapacity, GraphicsError> {
        let required = required.max(self.next);
        if self.buffer.is_some() && required <= self.capacity {
            return Ok(EnsureCapacity::Unchanged);
        }
        let grown = (f64::from(required) * f64::from(self.slack_factor)).ceil() as u32;
        let capacity = grown
            .max(required)
            .max(self.initial_capacity)
            .max(self.capacity.saturating_mul(2));
        let buffer = self.device.create_buffer(
            &BufferDescriptor::new(
                u64::from(capacity) * u64::from(self.stride),
                BufferUsage::STORAGE | BufferUsage::COPY_DST,
            )
            .with_label(self.name.clone()),
        )?;
        let registry = self.device.registry();

        let outcome = match (&self.buffer, self.view) {
            (Some(old), Some(view)) => {
                let old_capacity = self.capacity;
                let replaced = registry.replace(old.id(), &buffer, |desc| {
                    Some(desc.with_element_count(u64::from(capacity)))
                })?;
                self.device.reclaimer().defer_release_resource(replaced);
                self.view = Some(NativeView {
                    resource: buffer.id(),
                    description: view.description.with_element_count(u64::from(capacity)),
                    ..view
                });
                self.resize_count += 1;
                log::info!(
                    "AtlasBuffer[{}]: resized {old_capacity} -> {capacity} elements",
                    self.name
                );
                EnsureCapacity::Resized {
                    old_capacity,
                    new_capacity: capacity,
                }
            }
            _ => {
                registry.register(&buffer)?;
                let handle = registry.allocator().allocate(DescriptorDomain::SRV)?;
                let view = registry.register_view(
                    buffer.id(),
                    handle,
                    ViewDescription::structured_srv(u64::from(capacity), self.stride),
                )?;
                self.view = Some(view);
                log::debug!(
                    "AtlasBuffer[{}]: created with {capacity} elements at SRV {}",
                    self.name,
                    view.shader_visible_index
                );
                EnsureCapacity::Created { capacity }
            }
        };
        self.buffer = Some(buffer);
        self.capacity = capacity;
        Ok(outcome)
    }
}

impl Drop for AtlasBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take()
            && let Err(err) = self.device.retire_resource(buffer)
        {
            log::warn!("AtlasBuffer[{}]: failed to retire buffer: {err}", self.name);
        }
    }
}

impl std::fmt::Debug for AtlasBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtlasBuffer")
            .field("name", &self.name)
            .field("stride", &self.stride)
            .field("capacity", &self.capacity)
            .field("live", &self.live)
            .field("srv", &self.srv_index())
            .finish()
    }
}
