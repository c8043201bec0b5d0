//! Command recording with automatic resource state tracking.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Command, CommandList, ResourceBarrier};
use crate::error::GraphicsError;
use crate::framebuffer::Framebuffer;
use crate::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, PipelineCache, PipelineStateDesc};
use crate::resources::{Buffer, GpuResource, ResourceId, Texture};
use crate::types::ResourceState;

/// Root slot of the bindless SRV table.
pub const ROOT_SLOT_BINDLESS_TABLE: u32 = 0;
/// Root slot of the scene constants CBV.
pub const ROOT_SLOT_SCENE_CONSTANTS: u32 = 1;
/// Root slot of the `draw_index` constant.
pub const ROOT_SLOT_DRAW_INDEX: u32 = 2;

/// Anything the recorder can track the state of.
pub trait TrackedResource {
    fn resource_id(&self) -> ResourceId;
}

impl TrackedResource for Buffer {
    fn resource_id(&self) -> ResourceId {
        self.id()
    }
}

impl TrackedResource for Texture {
    fn resource_id(&self) -> ResourceId {
        self.id()
    }
}

impl TrackedResource for GpuResource {
    fn resource_id(&self) -> ResourceId {
        self.id()
    }
}

impl<T: TrackedResource> TrackedResource for Arc<T> {
    fn resource_id(&self) -> ResourceId {
        self.as_ref().resource_id()
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackedState {
    initial: ResourceState,
    current: ResourceState,
    /// Restore `initial` when recording finishes.
    keep_initial: bool,
}

/// Records one [`CommandList`].
///
/// Transitions requested through [`require_resource_state`] are batched and
/// emitted as a single barrier command before the next copy, clear, draw or
/// dispatch, or on [`flush_barriers`].
///
/// [`require_resource_state`]: CommandRecorder::require_resource_state
/// [`flush_barriers`]: CommandRecorder::flush_barriers
pub struct CommandRecorder {
    list: CommandList,
    pipelines: Arc<PipelineCache>,
    tracked: HashMap<ResourceId, TrackedState>,
    pending: Vec<ResourceBarrier>,
    bound_pipeline: Option<u64>,
    draw_calls: u32,
}

impl CommandRecorder {
    pub fn new(name: impl Into<String>, pipelines: Arc<PipelineCache>) -> Self {
        Self {
            list: CommandList::new(name),
            pipelines,
            tracked: HashMap::new(),
            pending: Vec::new(),
            bound_pipeline: None,
            draw_calls: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.list.name()
    }

    // ========================================================================
    // Resource states
    // ========================================================================

    /// Starts tracking a resource known to be in `state`.
    ///
    /// With `keep_initial` the resource is transitioned back to `state` when
    /// recording finishes. Tracking an already tracked resource is a no-op.
    pub fn begin_tracking_resource_state(
        &mut self,
        resource: &impl TrackedResource,
        state: ResourceState,
        keep_initial: bool,
    ) {
        self.tracked
            .entry(resource.resource_id())
            .or_insert(TrackedState {
                initial: state,
                current: state,
                keep_initial,
            });
    }

    pub fn is_tracked(&self, resource: &impl TrackedResource) -> bool {
        self.tracked.contains_key(&resource.resource_id())
    }

    /// State the resource will be in once pending barriers execute.
    pub fn resource_state(&self, resource: &impl TrackedResource) -> Option<ResourceState> {
        self.tracked
            .get(&resource.resource_id())
            .map(|t| t.current)
    }

    /// Queues a transition of `resource` to `state`.
    pub fn require_resource_state(
        &mut self,
        resource: &impl TrackedResource,
        state: ResourceState,
    ) -> Result<(), GraphicsError> {
        let id = resource.resource_id();
        let Some(tracked) = self.tracked.get_mut(&id) else {
            return Err(GraphicsError::InvalidArgument(format!(
                "resource {id} is not tracked by recorder '{}'",
                self.list.name()
            )));
        };
        if tracked.current == state {
            return Ok(());
        }
        let before = tracked.current;
        tracked.current = state;
        Self::queue_transition(&mut self.pending, id, before, state);
        Ok(())
    }

    fn queue_transition(
        pending: &mut Vec<ResourceBarrier>,
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    ) {
        // Collapse with an unflushed transition of the same resource.
        if let Some(pos) = pending.iter().position(|b| b.resource == resource) {
            if pending[pos].before == after {
                pending.remove(pos);
            } else {
                pending[pos].after = after;
            }
            return;
        }
        pending.push(ResourceBarrier {
            resource,
            before,
            after,
        });
    }

    pub fn pending_barriers(&self) -> &[ResourceBarrier] {
        &self.pending
    }

    /// Emits all queued transitions as one barrier command.
    pub fn flush_barriers(&mut self) {
        if !self.pending.is_empty() {
            let barriers = std::mem::take(&mut self.pending);
            log::trace!(
                "CommandRecorder[{}]: flushing {} barriers",
                self.list.name(),
                barriers.len()
            );
            self.list.push(Command::Barriers(barriers));
        }
    }

    // ========================================================================
    // Pipeline and root arguments
    // ========================================================================

    pub fn set_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> u64 {
        let hash = self.pipelines.get_or_create_graphics(desc);
        if self.bound_pipeline != Some(hash) {
            self.bound_pipeline = Some(hash);
            self.list.push(Command::SetGraphicsPipeline { hash });
        }
        hash
    }

    pub fn set_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> u64 {
        let hash = self.pipelines.get_or_create_compute(desc);
        if self.bound_pipeline != Some(hash) {
            self.bound_pipeline = Some(hash);
            self.list.push(Command::SetComputePipeline { hash });
        }
        hash
    }

    pub fn set_pipeline_state(&mut self, desc: &PipelineStateDesc) -> u64 {
        match desc {
            PipelineStateDesc::Graphics(d) => self.set_graphics_pipeline(d),
            PipelineStateDesc::Compute(d) => self.set_compute_pipeline(d),
        }
    }

    pub fn bound_pipeline(&self) -> Option<u64> {
        self.bound_pipeline
    }

    /// Binds the global bindless table at root slot 0.
    pub fn set_bindless_table(&mut self) {
        self.list.push(Command::SetBindlessTable {
            slot: ROOT_SLOT_BINDLESS_TABLE,
        });
    }

    /// Binds scene constants at root slot 1.
    pub fn set_scene_constants(&mut self, buffer: &Arc<Buffer>, offset: u64) {
        self.list.push(Command::SetRootConstantBuffer {
            slot: ROOT_SLOT_SCENE_CONSTANTS,
            buffer: Arc::clone(buffer),
            offset,
        });
    }

    /// Sets the `draw_index` root constant at slot 2.
    pub fn set_draw_index(&mut self, index: u32) {
        self.set_root_constant(ROOT_SLOT_DRAW_INDEX, index);
    }

    pub fn set_root_constant(&mut self, slot: u32, value: u32) {
        self.list.push(Command::SetRootConstant { slot, value });
    }

    // ========================================================================
    // Work
    // ========================================================================

    pub fn bind_framebuffer(&mut self, framebuffer: &Framebuffer) {
        self.list.push(Command::BindFramebuffer {
            colors: framebuffer.color_attachments().iter().map(|t| t.id()).collect(),
            depth: framebuffer.depth_attachment().map(|t| t.id()),
        });
    }

    pub fn clear_color(&mut self, texture: &Arc<Texture>, color: [f32; 4]) {
        self.flush_barriers();
        self.list.push(Command::ClearColor {
            texture: Arc::clone(texture),
            color,
        });
    }

    pub fn clear_depth(&mut self, texture: &Arc<Texture>, depth: f32) {
        self.flush_barriers();
        self.list.push(Command::ClearDepth {
            texture: Arc::clone(texture),
            depth,
        });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.flush_barriers();
        self.draw_calls += 1;
        self.list.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.flush_barriers();
        self.draw_calls += 1;
        self.list.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.flush_barriers();
        self.list.push(Command::Dispatch { x, y, z });
    }

    pub fn copy_buffer(
        &mut self,
        src: &Arc<Buffer>,
        src_offset: u64,
        dst: &Arc<Buffer>,
        dst_offset: u64,
        size: u64,
    ) {
        self.flush_barriers();
        self.list.push(Command::CopyBuffer {
            src: Arc::clone(src),
            src_offset,
            dst: Arc::clone(dst),
            dst_offset,
            size,
        });
    }

    pub fn copy_buffer_to_texture(&mut self, src: &Arc<Buffer>, src_offset: u64, dst: &Arc<Texture>) {
        self.flush_barriers();
        self.list.push(Command::CopyBufferToTexture {
            src: Arc::clone(src),
            src_offset,
            dst: Arc::clone(dst),
        });
    }

    pub fn begin_event(&mut self, label: impl Into<String>) {
        self.list.push(Command::BeginEvent(label.into()));
    }

    pub fn end_event(&mut self) {
        self.list.push(Command::EndEvent);
    }

    pub fn draw_call_count(&self) -> u32 {
        self.draw_calls
    }

    pub fn command_count(&self) -> usize {
        self.list.len()
    }

    /// Restores `keep_initial` resources and returns the recorded list.
    pub fn finish(mut self) -> CommandList {
        let mut restores: Vec<_> = self
            .tracked
            .iter()
            .filter(|(_, t)| t.keep_initial && t.current != t.initial)
            .map(|(id, t)| (*id, t.current, t.initial))
            .collect();
        restores.sort_by_key(|(id, _, _)| *id);
        for (id, current, initial) in restores {
            Self::queue_transition(&mut self.pending, id, current, initial);
        }
        self.flush_barriers();
        self.list
    }
}

impl std::fmt::Debug for CommandRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRecorder")
            .field("name", &self.list.name())
            .field("commands", &self.list.len())
            .field("tracked", &self.tracked.len())
            .field("pending_barriers", &self.pending.len())
            .finish()
    }
}
