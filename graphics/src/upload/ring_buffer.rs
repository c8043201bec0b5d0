//! Partitioned ring-buffer staging.
//!
//! One persistently mapped upload buffer is split into one partition per
//! frame in flight. Each partition is a bump allocator reset when its frame
//! slot comes around again:
//!
//! ```text
//! |<-- partition 0 -->|<-- partition 1 -->|<-- partition 2 -->|
//! [xxxxxxx.......... ][xxxxxxxxxxxxx.... ][xxx.............. ]
//!  ^bump               ^bump               ^bump
//! ```
//!
//! There is no per-allocation fence tracking: reusing a partition whose
//! submission has not retired is logged and the memory is overwritten.
//!
//! # Example
//!
//! ```ignore
//! let mut staging = RingBufferStaging::new(device.clone(), 3, &StagingConfig::default())?;
//! staging.on_frame_start(frame.slot);
//! let alloc = staging.allocate(bytes.len() as u64, "material constants")?;
//! alloc.write(&bytes)?;
//! recorder.copy_buffer(alloc.buffer(), alloc.offset(), &dst, 0, alloc.size());
//! ```

use std::sync::Arc;

use oxygen_core::Slot;

use super::{StagingAllocation, StagingProvider, StagingStats};
use crate::config::StagingConfig;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::Buffer;
use crate::types::{BufferDescriptor, BufferUsage, FenceValue};

/// Align a value up to the given alignment.
#[inline]
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[derive(Debug, Clone, Copy, Default)]
struct Partition {
    write_offset: u64,
    /// Highest bump offset since activation.
    peak: u64,
    last_fence: Option<FenceValue>,
    retired: bool,
}

/// [`StagingProvider`] backed by one partitioned upload buffer.
pub struct RingBufferStaging {
    device: Arc<GraphicsDevice>,
    buffer: Arc<Buffer>,
    partitions: Vec<Partition>,
    partition_capacity: u64,
    initial_capacity: u64,
    active: usize,
    alignment: u64,
    slack_factor: f32,
    shrink_after_idle_frames: u32,
    idle_frames: u32,
    stats: StagingStats,
}

impl RingBufferStaging {
    pub fn new(
        device: Arc<GraphicsDevice>,
        partition_count: u32,
        config: &StagingConfig,
    ) -> Result<Self, GraphicsError> {
        if !config.alignment.is_power_of_two() {
            return Err(GraphicsError::InvalidArgument(format!(
                "alignment must be a power of 2, got {}",
                config.alignment
            )));
        }
        if config.partition_size == 0 || partition_count == 0 {
            return Err(GraphicsError::InvalidArgument(
                "staging capacity cannot be zero".to_string(),
            ));
        }
        let capacity = align_up(config.partition_size, config.alignment);
        let buffer = Self::create_buffer(&device, capacity, partition_count)?;
        log::debug!(
            "RingBufferStaging: {partition_count} partitions of {capacity} bytes"
        );
        Ok(Self {
            device,
            buffer,
            partitions: vec![Partition::default(); partition_count as usize],
            partition_capacity: capacity,
            initial_capacity: capacity,
            active: 0,
            alignment: config.alignment,
            slack_factor: config.slack_factor,
            shrink_after_idle_frames: config.shrink_after_idle_frames,
            idle_frames: 0,
            stats: StagingStats {
                partition_capacity: capacity,
                partition_count,
                ..StagingStats::default()
            },
        })
    }

    fn create_buffer(
        device: &GraphicsDevice,
        partition_capacity: u64,
        partition_count: u32,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        device.create_buffer(
            &BufferDescriptor::upload(
                partition_capacity * u64::from(partition_count),
                BufferUsage::empty(),
            )
            .with_label("staging_ring"),
        )
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub fn partition_capacity(&self) -> u64 {
        self.partition_capacity
    }

    pub fn active_partition(&self) -> usize {
        self.active
    }

    /// Bytes used in the active partition.
    pub fn used(&self) -> u64 {
        self.partitions[self.active].write_offset
    }

    /// Grows partitions so a single allocation of `required` bytes fits.
    ///
    /// The old buffer is released once in-flight work completes. Returns
    /// whether the buffer was replaced.
    pub fn ensure_capacity(&mut self, required: u64) -> Result<bool, GraphicsError> {
        if required <= self.partition_capacity {
            return Ok(false);
        }
        let target = (required as f64 * f64::from(self.slack_factor)).ceil() as u64;
        let capacity = align_up(target.max(required), self.alignment);
        log::info!(
            "RingBufferStaging: growing partitions {} -> {capacity} bytes",
            self.partition_capacity
        );
        self.resize(capacity)?;
        self.stats.grow_count += 1;
        Ok(true)
    }

    fn resize(&mut self, capacity: u64) -> Result<(), GraphicsError> {
        let buffer = Self::create_buffer(&self.device, capacity, self.partitions.len() as u32)?;
        let old = std::mem::replace(&mut self.buffer, buffer);
        self.device.reclaimer().defer_release_resource(old);
        self.partition_capacity = capacity;
        self.stats.partition_capacity = capacity;
        for partition in &mut self.partitions {
            partition.write_offset = 0;
            partition.peak = 0;
        }
        Ok(())
    }

    fn track_idle(&mut self) -> Result<(), GraphicsError> {
        if self.partition_capacity <= self.initial_capacity {
            self.idle_frames = 0;
            return Ok(());
        }
        let peak = self.partitions[self.active].peak;
        if peak < self.partition_capacity / 4 {
            self.idle_frames += 1;
        } else {
            self.idle_frames = 0;
        }
        if self.idle_frames >= self.shrink_after_idle_frames {
            let capacity = align_up(
                (self.partition_capacity / 2).max(self.initial_capacity),
                self.alignment,
            );
            log::info!(
                "RingBufferStaging: shrinking partitions {} -> {capacity} bytes after {} idle frames",
                self.partition_capacity,
                self.idle_frames
            );
            self.resize(capacity)?;
            self.stats.shrink_count += 1;
            self.idle_frames = 0;
        }
        Ok(())
    }
}

impl StagingProvider for RingBufferStaging {
    fn allocate(&mut self, size: u64, debug_name: &str) -> Result<StagingAllocation, GraphicsError> {
        if size == 0 {
            return Err(GraphicsError::InvalidArgument(format!(
                "zero-sized staging allocation '{debug_name}'"
            )));
        }
        let capacity = self.partition_capacity;
        if size > capacity {
            log::warn!(
                "RingBufferStaging: '{debug_name}' needs {size} bytes, partition holds {capacity}"
            );
            return Err(GraphicsError::OutOfCapacity {
                requested: size,
                capacity,
            });
        }
        let partition = &mut self.partitions[self.active];
        let offset = align_up(partition.write_offset, self.alignment);
        if offset + size > capacity {
            return Err(GraphicsError::OutOfCapacity {
                requested: size,
                capacity: capacity.saturating_sub(offset),
            });
        }
        partition.write_offset = offset + size;
        partition.peak = partition.peak.max(partition.write_offset);
        self.stats.allocations += 1;
        self.stats.bytes_allocated += size;

        let base = self.active as u64 * capacity;
        log::trace!("RingBufferStaging: '{debug_name}' {size} bytes at {}", base + offset);
        Ok(StagingAllocation::new(
            Arc::clone(&self.buffer),
            base + offset,
            size,
        ))
    }

    fn on_frame_start(&mut self, slot: Slot) {
        if let Err(err) = self.track_idle() {
            log::error!("RingBufferStaging: shrink failed: {err}");
        }
        self.active = slot.index() % self.partitions.len();
        let partition = &mut self.partitions[self.active];
        if let Some(fence) = partition.last_fence
            && !partition.retired
        {
            log::warn!(
                "RingBufferStaging: partition {} reused before fence {fence} retired",
                self.active
            );
            self.stats.overwrite_warnings += 1;
        }
        *partition = Partition::default();
    }

    fn on_submitted(&mut self, fence: FenceValue) {
        let partition = &mut self.partitions[self.active];
        partition.last_fence = Some(fence);
        partition.retired = false;
    }

    fn retire_completed(&mut self, fence: FenceValue) {
        for partition in &mut self.partitions {
            if partition.last_fence.is_some_and(|f| f <= fence) {
                partition.retired = true;
            }
        }
    }

    fn stats(&self) -> StagingStats {
        self.stats
    }
}

impl std::fmt::Debug for RingBufferStaging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBufferStaging")
            .field("partition_capacity", &self.partition_capacity)
            .field("partitions", &self.partitions.len())
            .field("active", &self.active)
            .field("buffer", &self.buffer.label())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::config::GraphicsConfig;

    fn create_test_device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(Arc::new(HeadlessBackend::new()), GraphicsConfig::default()).unwrap()
    }

    fn staging(size: u64) -> RingBufferStaging {
        let config = StagingConfig::default()
            .with_partition_size(size)
            .with_alignment(16)
            .with_shrink_after_idle_frames(2);
        RingBufferStaging::new(create_test_device(), 3, &config).unwrap()
    }

    #[test]
    fn test_allocations_are_aligned_and_partitioned() {
        let mut ring = staging(256);
        ring.on_frame_start(Slot::new(1));
        let a = ring.allocate(10, "a").unwrap();
        let b = ring.allocate(10, "b").unwrap();
        assert_eq!(a.offset(), 256);
        assert_eq!(b.offset(), 256 + 16);
    }

    #[test]
    fn test_frame_start_resets_bump() {
        let mut ring = staging(256);
        ring.allocate(200, "a").unwrap();
        assert!(ring.allocate(100, "b").is_err());
        ring.on_frame_start(Slot::new(0));
        assert_eq!(ring.used(), 0);
        assert!(ring.allocate(100, "b").is_ok());
    }

    #[test]
    fn test_write_lands_in_buffer() {
        let mut ring = staging(64);
        let alloc = ring.allocate(4, "bytes").unwrap();
        alloc.write(&[1, 2, 3, 4]).unwrap();
        assert_eq!(ring.buffer().read(alloc.offset(), 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(alloc.write(&[0; 5]).is_err());
    }

    #[test]
    fn test_unretired_partition_warns() {
        let mut ring = staging(64);
        ring.on_frame_start(Slot::new(0));
        ring.on_submitted(FenceValue::new(1));
        ring.on_frame_start(Slot::new(1));
        ring.on_frame_start(Slot::new(2));
        ring.on_frame_start(Slot::new(0));
        assert_eq!(ring.stats().overwrite_warnings, 1);

        ring.on_submitted(FenceValue::new(2));
        ring.retire_completed(FenceValue::new(2));
        ring.on_frame_start(Slot::new(0));
        assert_eq!(ring.stats().overwrite_warnings, 1);
    }

    #[test]
    fn test_grow_then_shrink_when_idle() {
        let mut ring = staging(64);
        assert!(ring.ensure_capacity(1000).unwrap());
        assert!(ring.partition_capacity() >= 1000);
        assert!(ring.allocate(1000, "big").is_ok());

        // Frame 0 used 1000 bytes, so it does not count as idle.
        ring.on_frame_start(Slot::new(1));
        ring.on_frame_start(Slot::new(2));
        ring.on_frame_start(Slot::new(0));
        assert_eq!(ring.stats().shrink_count, 1);
        assert!(ring.partition_capacity() < 1000);
    }
}
