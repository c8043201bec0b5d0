//! Staging memory contract.

use std::sync::Arc;

use oxygen_core::Slot;

use crate::error::GraphicsError;
use crate::resources::Buffer;
use crate::types::FenceValue;

/// A CPU-writable range of a staging buffer.
#[derive(Debug, Clone)]
pub struct StagingAllocation {
    buffer: Arc<Buffer>,
    offset: u64,
    size: u64,
}

impl StagingAllocation {
    pub fn new(buffer: Arc<Buffer>, offset: u64, size: u64) -> Self {
        Self {
            buffer,
            offset,
            size,
        }
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Copies `data` to the start of the range.
    pub fn write(&self, data: &[u8]) -> Result<(), GraphicsError> {
        if data.len() as u64 > self.size {
            return Err(GraphicsError::InvalidArgument(format!(
                "{} bytes do not fit a {}-byte staging allocation",
                data.len(),
                self.size
            )));
        }
        self.buffer.write(self.offset, data)
    }
}

/// Counters of a staging provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StagingStats {
    pub allocations: u64,
    pub bytes_allocated: u64,
    /// Bytes per partition.
    pub partition_capacity: u64,
    pub partition_count: u32,
    pub grow_count: u32,
    pub shrink_count: u32,
    /// Partitions reused before their fence retired.
    pub overwrite_warnings: u32,
}

/// Source of transient upload memory.
pub trait StagingProvider: Send {
    /// Reserves `size` bytes in the active partition.
    ///
    /// Fails with `OutOfCapacity` when the partition cannot fit the request.
    fn allocate(&mut self, size: u64, debug_name: &str) -> Result<StagingAllocation, GraphicsError>;

    /// Activates the partition of `slot`, resetting its bump pointer.
    fn on_frame_start(&mut self, slot: Slot);

    /// Records the fence of work reading the active partition.
    fn on_submitted(&mut self, fence: FenceValue);

    /// All uploads with a fence at or below `fence` are done.
    fn retire_completed(&mut self, fence: FenceValue);

    fn stats(&self) -> StagingStats;
}
