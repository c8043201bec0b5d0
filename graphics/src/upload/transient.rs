//! Per-slot CPU-visible structured buffers.

use std::sync::Arc;

use oxygen_core::Slot;
use oxygen_core::frame::MAX_FRAMES_IN_FLIGHT;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::registry::NativeView;
use crate::resources::Buffer;
use crate::types::{BufferDescriptor, BufferUsage, DescriptorDomain, ShaderVisibleIndex, ViewDescription};

#[derive(Default)]
struct SlotBuffer {
    buffer: Option<Arc<Buffer>>,
    view: Option<NativeView>,
    capacity: u32,
    count: u32,
}

/// Structured buffer rewritten every frame, one backing buffer per slot.
///
/// Each slot keeps its SRV index for the lifetime of the object; growing a
/// slot swaps the buffer under the same descriptor. The CPU writes directly
/// into upload memory, so no copy is recorded.
pub struct TransientStructuredBuffer {
    device: Arc<GraphicsDevice>,
    name: String,
    stride: u32,
    slots: Vec<SlotBuffer>,
}

impl TransientStructuredBuffer {
    pub fn new(device: Arc<GraphicsDevice>, name: impl Into<String>, stride: u32) -> Self {
        Self {
            device,
            name: name.into(),
            stride,
            slots: (0..MAX_FRAMES_IN_FLIGHT).map(|_| SlotBuffer::default()).collect(),
        }
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    fn slot_mut(&mut self, slot: Slot) -> Result<&mut SlotBuffer, GraphicsError> {
        self.slots.get_mut(slot.index()).ok_or_else(|| {
            GraphicsError::InvalidArgument(format!("slot {slot} exceeds frames in flight"))
        })
    }

    /// Writes `bytes` (a whole number of elements) into the buffer of `slot`.
    ///
    /// Returns the slot's SRV index. An empty write keeps the previous
    /// buffer and reports zero elements.
    pub fn write(&mut self, slot: Slot, bytes: &[u8]) -> Result<ShaderVisibleIndex, GraphicsError> {
        let stride = self.stride as usize;
        if stride == 0 || bytes.len() % stride != 0 {
            return Err(GraphicsError::InvalidArgument(format!(
                "{} bytes are not a multiple of stride {stride} in '{}'",
                bytes.len(),
                self.name
            )));
        }
        let count = (bytes.len() / stride) as u32;
        self.ensure_slot_capacity(slot, count)?;
        let entry = self.slot_mut(slot)?;
        entry.count = count;
        if let Some(buffer) = &entry.buffer
            && !bytes.is_empty()
        {
            buffer.write(0, bytes)?;
        }
        Ok(entry
            .view
            .map_or(ShaderVisibleIndex::INVALID, |v| v.shader_visible_index))
    }

    /// Typed convenience over [`write`](Self::write).
    pub fn write_elements<T: bytemuck::Pod>(
        &mut self,
        slot: Slot,
        elements: &[T],
    ) -> Result<ShaderVisibleIndex, GraphicsError> {
        debug_assert_eq!(std::mem::size_of::<T>(), self.stride as usize);
        self.write(slot, bytemuck::cast_slice(elements))
    }

    fn ensure_slot_capacity(&mut self, slot: Slot, count: u32) -> Result<(), GraphicsError> {
        let device = Arc::clone(&self.device);
        let name = format!("{}[{}]", self.name, slot);
        let stride = self.stride;
        let entry = self.slot_mut(slot)?;
        if entry.buffer.is_some() && count <= entry.capacity {
            return Ok(());
        }
        let capacity = count.max(16).next_power_of_two();
        let buffer = device.create_buffer(
            &BufferDescriptor::upload(u64::from(capacity) * u64::from(stride), BufferUsage::STORAGE)
                .with_label(name.clone()),
        )?;
        let registry = device.registry();
        match (&entry.buffer, entry.view) {
            (Some(old), Some(view)) => {
                let replaced = registry.replace(old.id(), &buffer, |desc| {
                    Some(desc.with_element_count(u64::from(capacity)))
                })?;
                device.reclaimer().defer_release_resource(replaced);
                entry.view = Some(NativeView {
                    resource: buffer.id(),
                    description: view.description.with_element_count(u64::from(capacity)),
                    ..view
                });
                log::debug!("TransientStructuredBuffer[{name}]: grew to {capacity} elements");
            }
            _ => {
                registry.register(&buffer)?;
                let handle = registry.allocator().allocate(DescriptorDomain::SRV)?;
                entry.view = Some(registry.register_view(
                    buffer.id(),
                    handle,
                    ViewDescription::structured_srv(u64::from(capacity), stride),
                )?);
            }
        }
        entry.buffer = Some(buffer);
        entry.capacity = capacity;
        Ok(())
    }

    pub fn srv_index(&self, slot: Slot) -> ShaderVisibleIndex {
        self.slots
            .get(slot.index())
            .and_then(|s| s.view)
            .map_or(ShaderVisibleIndex::INVALID, |v| v.shader_visible_index)
    }

    pub fn buffer(&self, slot: Slot) -> Option<&Arc<Buffer>> {
        self.slots.get(slot.index()).and_then(|s| s.buffer.as_ref())
    }

    /// Elements written to `slot` by the last write.
    pub fn count(&self, slot: Slot) -> u32 {
        self.slots.get(slot.index()).map_or(0, |s| s.count)
    }
}

impl Drop for TransientStructuredBuffer {
    fn drop(&mut self) {
        for entry in &mut self.slots {
            if let Some(buffer) = entry.buffer.take()
                && let Err(err) = self.device.retire_resource(buffer)
            {
                log::warn!("TransientStructuredBuffer[{}]: failed to retire slot buffer: {err}", self.name);
            }
        }
    }
}

impl std::fmt::Debug for TransientStructuredBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientStructuredBuffer")
            .field("name", &self.name)
            .field("stride", &self.stride)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::commands::CommandList;
    use crate::config::GraphicsConfig;
    use crate::queue::QueueExecution;

    #[test]
    fn test_slot_srv_is_stable_across_growth() {
        let device =
            GraphicsDevice::new(Arc::new(HeadlessBackend::new()), GraphicsConfig::default()).unwrap();
        let mut transient = TransientStructuredBuffer::new(device, "draws", 4);
        let slot = Slot::new(1);

        let srv = transient.write_elements(slot, &[1u32, 2, 3]).unwrap();
        assert!(srv.is_valid());
        assert_eq!(transient.count(slot), 3);

        let big: Vec<u32> = (0..100).collect();
        assert_eq!(transient.write_elements(slot, &big).unwrap(), srv);
        let bytes = transient.buffer(slot).unwrap().read(4, 4).unwrap();
        assert_eq!(bytes, 1u32.to_le_bytes());

        let other = transient.write_elements(Slot::new(0), &[5u32]).unwrap();
        assert_ne!(other, srv);
    }

    #[test]
    fn test_rejects_partial_elements() {
        let device =
            GraphicsDevice::new(Arc::new(HeadlessBackend::new()), GraphicsConfig::default()).unwrap();
        let mut transient = TransientStructuredBuffer::new(device, "draws", 4);
        assert!(transient.write(Slot::new(0), &[0u8; 6]).is_err());
        assert!(transient.write(Slot::new(7), &[0u8; 4]).is_err());
    }

    #[test]
    fn test_dropped_slot_is_not_reissued_before_fence() {
        let config = GraphicsConfig::default().with_queue_execution(QueueExecution::Deferred);
        let device = GraphicsDevice::new(Arc::new(HeadlessBackend::new()), config).unwrap();
        let mut transient = TransientStructuredBuffer::new(device.clone(), "draws", 4);
        let old_srv = transient.write_elements(Slot::new(0), &[1u32]).unwrap();
        let fence = device
            .graphics_queue()
            .submit(&mut [CommandList::new("reads_draws")])
            .unwrap();
        drop(transient);

        let mut next = TransientStructuredBuffer::new(device.clone(), "draws_next", 4);
        assert_ne!(next.write_elements(Slot::new(0), &[2u32]).unwrap(), old_srv);

        device.graphics_queue().signal_value(fence);
        device.process_deferred();
        let mut last = TransientStructuredBuffer::new(device, "draws_last", 4);
        assert_eq!(last.write_elements(Slot::new(0), &[3u32]).unwrap(), old_srv);
    }
}
