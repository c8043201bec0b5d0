//! Small uploads recorded straight into the current command recorder.

use std::sync::Arc;

use oxygen_core::Slot;

use super::{StagingProvider, StagingStats};
use crate::commands::CommandRecorder;
use crate::error::GraphicsError;
use crate::resources::Buffer;
use crate::types::{FenceValue, ResourceState};

/// Records copy commands on the caller's recorder instead of a separate
/// upload submission.
///
/// Used for small per-pass writes such as per-view scene constants. CPU
/// visible destinations are written directly and record nothing.
pub struct InlineTransfersCoordinator {
    staging: Box<dyn StagingProvider>,
    bytes_this_frame: u64,
    copies_this_frame: u32,
}

impl InlineTransfersCoordinator {
    pub fn new(staging: Box<dyn StagingProvider>) -> Self {
        Self {
            staging,
            bytes_this_frame: 0,
            copies_this_frame: 0,
        }
    }

    /// Writes `data` to `dst` at `offset`.
    ///
    /// For device-local destinations the bytes are staged and a copy is
    /// recorded; `dst` is left in `state_after`.
    pub fn write_buffer(
        &mut self,
        recorder: &mut CommandRecorder,
        dst: &Arc<Buffer>,
        offset: u64,
        data: &[u8],
        state_after: ResourceState,
    ) -> Result<(), GraphicsError> {
        if data.is_empty() {
            return Ok(());
        }
        if offset + data.len() as u64 > dst.size() {
            return Err(GraphicsError::InvalidArgument(format!(
                "inline write of {} bytes at {offset} overflows {:?} ({} bytes)",
                data.len(),
                dst.label(),
                dst.size()
            )));
        }
        if dst.memory().is_cpu_visible() {
            return dst.write(offset, data);
        }

        let staging = self
            .staging
            .allocate(data.len() as u64, dst.label().unwrap_or("inline"))?;
        staging.write(data)?;
        recorder.begin_tracking_resource_state(dst, ResourceState::Common, false);
        recorder.require_resource_state(dst, ResourceState::CopyDest)?;
        recorder.copy_buffer(staging.buffer(), staging.offset(), dst, offset, staging.size());
        recorder.require_resource_state(dst, state_after)?;
        self.bytes_this_frame += staging.size();
        self.copies_this_frame += 1;
        Ok(())
    }

    pub fn write_pod<T: bytemuck::Pod>(
        &mut self,
        recorder: &mut CommandRecorder,
        dst: &Arc<Buffer>,
        offset: u64,
        value: &T,
        state_after: ResourceState,
    ) -> Result<(), GraphicsError> {
        self.write_buffer(recorder, dst, offset, bytemuck::bytes_of(value), state_after)
    }

    pub fn on_frame_start(&mut self, slot: Slot) {
        if self.copies_this_frame > 0 {
            log::trace!(
                "InlineTransfersCoordinator: {} copies, {} bytes last frame",
                self.copies_this_frame,
                self.bytes_this_frame
            );
        }
        self.bytes_this_frame = 0;
        self.copies_this_frame = 0;
        self.staging.on_frame_start(slot);
    }

    /// The recorder carrying this frame's copies was submitted at `fence`.
    pub fn on_submitted(&mut self, fence: FenceValue) {
        self.staging.on_submitted(fence);
    }

    pub fn retire_completed(&mut self, fence: FenceValue) {
        self.staging.retire_completed(fence);
    }

    pub fn copies_this_frame(&self) -> u32 {
        self.copies_this_frame
    }

    pub fn staging_stats(&self) -> StagingStats {
        self.staging.stats()
    }
}

impl std::fmt::Debug for InlineTransfersCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineTransfersCoordinator")
            .field("bytes_this_frame", &self.bytes_this_frame)
            .field("copies_this_frame", &self.copies_this_frame)
            .finish()
    }
}
