//! Buffer types and descriptors.

use bitflags::bitflags;

use super::MemoryType;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be bound as a constant buffer.
        const CONSTANT = 1 << 2;
        /// Buffer can be read or written as a structured/raw buffer.
        const STORAGE = 1 << 3;
        /// Buffer can hold indirect arguments.
        const INDIRECT = 1 << 4;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 5;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 6;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
    /// Heap the buffer lives in.
    pub memory: MemoryType,
}

impl BufferDescriptor {
    /// Create a new device-local buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
            memory: MemoryType::DeviceLocal,
        }
    }

    /// Create a persistently mapped, CPU-writable buffer descriptor.
    pub fn upload(size: u64, usage: BufferUsage) -> Self {
        Self {
            memory: MemoryType::Upload,
            ..Self::new(size, usage | BufferUsage::COPY_SRC)
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the memory type.
    pub fn with_memory(mut self, memory: MemoryType) -> Self {
        self.memory = memory;
        self
    }
}
