//! GPU buffer resource.

use std::sync::Arc;

use crate::backend::{GpuBackend, GpuBuffer};
use crate::error::GraphicsError;
use crate::resources::ResourceId;
use crate::types::{BufferDescriptor, BufferUsage, MemoryType};

/// A GPU buffer resource.
///
/// Buffers are created by [`GraphicsDevice::create_buffer`](crate::GraphicsDevice::create_buffer)
/// and are reference-counted. CPU-visible buffers ([`MemoryType::Upload`],
/// [`MemoryType::Readback`]) are persistently mapped and can be written or
/// read directly.
pub struct Buffer {
    id: ResourceId,
    descriptor: BufferDescriptor,
    gpu: GpuBuffer,
    backend: Arc<dyn GpuBackend>,
}

impl Buffer {
    pub(crate) fn new(
        id: ResourceId,
        descriptor: BufferDescriptor,
        gpu: GpuBuffer,
        backend: Arc<dyn GpuBackend>,
    ) -> Self {
        Self {
            id,
            descriptor,
            gpu,
            backend,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.descriptor.usage
    }

    pub fn memory(&self) -> MemoryType {
        self.descriptor.memory
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn gpu(&self) -> &GpuBuffer {
        &self.gpu
    }

    /// Writes through the CPU mapping.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        self.check_mapped_range(offset, data.len() as u64)?;
        self.backend.write_buffer(&self.gpu, offset, data)
    }

    /// Reads through the CPU mapping.
    pub fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>, GraphicsError> {
        self.check_mapped_range(offset, size)?;
        self.backend.read_buffer(&self.gpu, offset, size)
    }

    fn check_mapped_range(&self, offset: u64, size: u64) -> Result<(), GraphicsError> {
        if !self.descriptor.memory.is_cpu_visible() {
            return Err(GraphicsError::InvalidArgument(format!(
                "buffer {:?} is not CPU visible",
                self.label()
            )));
        }
        if offset.checked_add(size).is_none_or(|end| end > self.descriptor.size) {
            return Err(GraphicsError::InvalidArgument(format!(
                "range {offset}+{size} exceeds buffer size {}",
                self.descriptor.size
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("memory", &self.descriptor.memory)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    fn buffer(desc: BufferDescriptor) -> Buffer {
        let backend = Arc::new(HeadlessBackend::new());
        let gpu = backend.create_buffer(ResourceId::new(1), &desc).unwrap();
        Buffer::new(ResourceId::new(1), desc, gpu, backend)
    }

    #[test]
    fn test_buffer_debug() {
        let buffer = buffer(BufferDescriptor::new(1024, BufferUsage::VERTEX));
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("Buffer"));
        assert!(debug.contains("1024"));
    }

    #[test]
    fn test_mapped_write_read() {
        let buffer = buffer(BufferDescriptor::upload(16, BufferUsage::empty()));
        buffer.write(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.read(4, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(buffer.write(14, &[0; 4]).is_err());
    }

    #[test]
    fn test_device_local_is_not_mapped() {
        let buffer = buffer(BufferDescriptor::new(16, BufferUsage::STORAGE));
        assert!(matches!(
            buffer.write(0, &[0]),
            Err(GraphicsError::InvalidArgument(_))
        ));
    }
}
