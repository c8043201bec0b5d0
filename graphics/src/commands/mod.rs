//! Recorded GPU commands and the command recorder.
//!
//! A [`CommandList`] is a plain vector of [`Command`]s. The
//! [`CommandRecorder`] fills one while tracking resource states, batching
//! transitions and caching pipeline states; [`CommandQueue::submit`](crate::CommandQueue::submit)
//! steals the recorded commands.

mod recorder;

use std::sync::Arc;

pub use recorder::{
    CommandRecorder, ROOT_SLOT_BINDLESS_TABLE, ROOT_SLOT_DRAW_INDEX, ROOT_SLOT_SCENE_CONSTANTS,
    TrackedResource,
};

use crate::resources::{Buffer, ResourceId, Texture};
use crate::types::ResourceState;

/// State transition of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceBarrier {
    pub resource: ResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// One recorded command.
#[derive(Debug, Clone)]
pub enum Command {
    Barriers(Vec<ResourceBarrier>),
    CopyBuffer {
        src: Arc<Buffer>,
        src_offset: u64,
        dst: Arc<Buffer>,
        dst_offset: u64,
        size: u64,
    },
    /// Tightly packed copy of the whole top mip.
    CopyBufferToTexture {
        src: Arc<Buffer>,
        src_offset: u64,
        dst: Arc<Texture>,
    },
    SetGraphicsPipeline {
        hash: u64,
    },
    SetComputePipeline {
        hash: u64,
    },
    SetBindlessTable {
        slot: u32,
    },
    SetRootConstantBuffer {
        slot: u32,
        buffer: Arc<Buffer>,
        offset: u64,
    },
    SetRootConstant {
        slot: u32,
        value: u32,
    },
    BindFramebuffer {
        colors: Vec<ResourceId>,
        depth: Option<ResourceId>,
    },
    ClearColor {
        texture: Arc<Texture>,
        color: [f32; 4],
    },
    ClearDepth {
        texture: Arc<Texture>,
        depth: f32,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    BeginEvent(String),
    EndEvent,
}

/// Commands recorded for one submission.
#[derive(Debug, Default)]
pub struct CommandList {
    name: String,
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Moves all commands out, leaving the list empty.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }
}
