//! Headless GPU backend for tests and tools.
//!
//! Resources are plain byte vectors, so copies really move data and tests
//! can read back what the GPU would have seen. Descriptor writes land in a
//! table mapping heap slots to views, and every executed command is appended
//! to an [`ExecutedCommand`] log.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{BackendError, GpuBackend, GpuBuffer, GpuTexture, HeadlessMemory};
use crate::commands::{Command, ResourceBarrier};
use crate::descriptors::DescriptorContents;
use crate::error::GraphicsError;
use crate::queue::QueueRole;
use crate::resources::{Buffer, ResourceId, Texture};
use crate::types::{BufferDescriptor, HeapIndex, TextureDescriptor};

/// A command as the headless GPU executed it.
///
/// Resources are referred to by id so the log never keeps them alive.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutedCommand {
    Barriers {
        queue: QueueRole,
        barriers: Vec<ResourceBarrier>,
    },
    CopyBuffer {
        queue: QueueRole,
        src: ResourceId,
        src_offset: u64,
        dst: ResourceId,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        queue: QueueRole,
        src: ResourceId,
        dst: ResourceId,
        size: u64,
    },
    SetPipeline {
        queue: QueueRole,
        compute: bool,
        hash: u64,
    },
    SetRootArgument {
        queue: QueueRole,
        slot: u32,
        value: u64,
    },
    Clear {
        queue: QueueRole,
        texture: ResourceId,
    },
    Draw {
        queue: QueueRole,
        vertex_count: u32,
        instance_count: u32,
        draw_index: Option<u32>,
    },
    Dispatch {
        queue: QueueRole,
        groups: [u32; 3],
    },
    Marker {
        queue: QueueRole,
        label: String,
    },
}

/// In-memory backend.
#[derive(Default)]
pub struct HeadlessBackend {
    descriptors: Mutex<HashMap<HeapIndex, DescriptorContents>>,
    log: Mutex<Vec<ExecutedCommand>>,
    refuse_creation: AtomicBool,
}

impl HeadlessBackend {
    /// Create a new headless backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent resource creation fail (or succeed again).
    pub fn set_refuse_creation(&self, refuse: bool) {
        self.refuse_creation.store(refuse, Ordering::Release);
    }

    /// What a heap slot currently points at.
    pub fn descriptor(&self, index: HeapIndex) -> Option<DescriptorContents> {
        self.descriptors.lock().get(&index).copied()
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.lock().len()
    }

    /// Copy of the execution log.
    pub fn log(&self) -> Vec<ExecutedCommand> {
        self.log.lock().clone()
    }

    /// Drains the execution log.
    pub fn take_log(&self) -> Vec<ExecutedCommand> {
        std::mem::take(&mut *self.log.lock())
    }

    /// Every executed buffer copy as `(dst, dst_offset, size)`.
    pub fn buffer_copies(&self) -> Vec<(ResourceId, u64, u64)> {
        self.log
            .lock()
            .iter()
            .filter_map(|c| match c {
                ExecutedCommand::CopyBuffer {
                    dst,
                    dst_offset,
                    size,
                    ..
                } => Some((*dst, *dst_offset, *size)),
                _ => None,
            })
            .collect()
    }

    /// Contents of any buffer, mapped or not.
    pub fn buffer_contents(&self, buffer: &Buffer) -> Vec<u8> {
        match buffer.gpu() {
            GpuBuffer::Headless(memory) => memory.lock().clone(),
        }
    }

    /// Contents of a texture's top mip.
    pub fn texture_contents(&self, texture: &Texture) -> Vec<u8> {
        match texture.gpu() {
            GpuTexture::Headless(memory) => memory.lock().clone(),
        }
    }

    fn check_creation(&self, what: &str, label: Option<&str>) -> Result<(), GraphicsError> {
        if self.refuse_creation.load(Ordering::Acquire) {
            return Err(BackendError::CreationRefused(format!("{what} {label:?}")).into());
        }
        Ok(())
    }
}

fn buffer_memory(buffer: &GpuBuffer) -> &HeadlessMemory {
    match buffer {
        GpuBuffer::Headless(memory) => memory,
    }
}

fn texture_memory(texture: &GpuTexture) -> &HeadlessMemory {
    match texture {
        GpuTexture::Headless(memory) => memory,
    }
}

fn check_range(resource: ResourceId, offset: u64, size: u64, len: usize) -> Result<(), BackendError> {
    let len = len as u64;
    if offset.checked_add(size).is_none_or(|end| end > len) {
        return Err(BackendError::OutOfBounds {
            resource: resource.get(),
            offset,
            size,
            len,
        });
    }
    Ok(())
}

fn copy_bytes(
    src: &Buffer,
    src_offset: u64,
    dst_id: ResourceId,
    dst: &HeadlessMemory,
    dst_offset: u64,
    size: u64,
) -> Result<(), BackendError> {
    let src_memory = buffer_memory(src.gpu());
    let (so, dofs, n) = (src_offset as usize, dst_offset as usize, size as usize);
    if Arc::ptr_eq(src_memory, dst) {
        let mut bytes = dst.lock();
        check_range(src.id(), src_offset, size, bytes.len())?;
        check_range(dst_id, dst_offset, size, bytes.len())?;
        bytes.copy_within(so..so + n, dofs);
        return Ok(());
    }
    let src_bytes = src_memory.lock();
    let mut dst_bytes = dst.lock();
    check_range(src.id(), src_offset, size, src_bytes.len())?;
    check_range(dst_id, dst_offset, size, dst_bytes.len())?;
    dst_bytes[dofs..dofs + n].copy_from_slice(&src_bytes[so..so + n]);
    Ok(())
}

impl GpuBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "Headless"
    }

    fn create_buffer(
        &self,
        id: ResourceId,
        descriptor: &BufferDescriptor,
    ) -> Result<GpuBuffer, GraphicsError> {
        self.check_creation("buffer", descriptor.label.as_deref())?;
        log::trace!(
            "HeadlessBackend: creating buffer {id} {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        Ok(GpuBuffer::Headless(Arc::new(Mutex::new(vec![
            0u8;
            descriptor.size as usize
        ]))))
    }

    fn create_texture(
        &self,
        id: ResourceId,
        descriptor: &TextureDescriptor,
    ) -> Result<GpuTexture, GraphicsError> {
        self.check_creation("texture", descriptor.label.as_deref())?;
        log::trace!(
            "HeadlessBackend: creating texture {id} {:?} ({}x{})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height
        );
        Ok(GpuTexture::Headless(Arc::new(Mutex::new(vec![
            0u8;
            descriptor.byte_size() as usize
        ]))))
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let mut bytes = buffer_memory(buffer).lock();
        check_range(ResourceId::default(), offset, data.len() as u64, bytes.len())?;
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        let bytes = buffer_memory(buffer).lock();
        check_range(ResourceId::default(), offset, size, bytes.len())?;
        let start = offset as usize;
        Ok(bytes[start..start + size as usize].to_vec())
    }

    fn write_descriptor(&self, index: HeapIndex, contents: Option<DescriptorContents>) {
        let mut table = self.descriptors.lock();
        match contents {
            Some(c) => {
                table.insert(index, c);
            }
            None => {
                table.remove(&index);
            }
        }
    }

    fn execute(&self, queue: QueueRole, commands: &[Command]) -> Result<(), GraphicsError> {
        let mut executed = Vec::with_capacity(commands.len());
        let mut draw_index = None;
        for command in commands {
            let entry = match command {
                Command::Barriers(barriers) => ExecutedCommand::Barriers {
                    queue,
                    barriers: barriers.clone(),
                },
                Command::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    copy_bytes(src, *src_offset, dst.id(), buffer_memory(dst.gpu()), *dst_offset, *size)?;
                    ExecutedCommand::CopyBuffer {
                        queue,
                        src: src.id(),
                        src_offset: *src_offset,
                        dst: dst.id(),
                        dst_offset: *dst_offset,
                        size: *size,
                    }
                }
                Command::CopyBufferToTexture {
                    src,
                    src_offset,
                    dst,
                } => {
                    let size = dst.descriptor().byte_size();
                    copy_bytes(src, *src_offset, dst.id(), texture_memory(dst.gpu()), 0, size)?;
                    ExecutedCommand::CopyBufferToTexture {
                        queue,
                        src: src.id(),
                        dst: dst.id(),
                        size,
                    }
                }
                Command::SetGraphicsPipeline { hash } => ExecutedCommand::SetPipeline {
                    queue,
                    compute: false,
                    hash: *hash,
                },
                Command::SetComputePipeline { hash } => ExecutedCommand::SetPipeline {
                    queue,
                    compute: true,
                    hash: *hash,
                },
                Command::SetBindlessTable { slot } => ExecutedCommand::SetRootArgument {
                    queue,
                    slot: *slot,
                    value: 0,
                },
                Command::SetRootConstantBuffer {
                    slot,
                    buffer,
                    offset,
                } => ExecutedCommand::SetRootArgument {
                    queue,
                    slot: *slot,
                    value: (buffer.id().get() << 32) | *offset,
                },
                Command::SetRootConstant { slot, value } => {
                    draw_index = Some(*value);
                    ExecutedCommand::SetRootArgument {
                        queue,
                        slot: *slot,
                        value: u64::from(*value),
                    }
                }
                Command::BindFramebuffer { colors, .. } => ExecutedCommand::Marker {
                    queue,
                    label: format!("framebuffer({} colors)", colors.len()),
                },
                Command::ClearColor { texture, .. } | Command::ClearDepth { texture, .. } => {
                    ExecutedCommand::Clear {
                        queue,
                        texture: texture.id(),
                    }
                }
                Command::Draw {
                    vertex_count,
                    instance_count,
                    ..
                } => ExecutedCommand::Draw {
                    queue,
                    vertex_count: *vertex_count,
                    instance_count: *instance_count,
                    draw_index,
                },
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                    ..
                } => ExecutedCommand::Draw {
                    queue,
                    vertex_count: *index_count,
                    instance_count: *instance_count,
                    draw_index,
                },
                Command::Dispatch { x, y, z } => ExecutedCommand::Dispatch {
                    queue,
                    groups: [*x, *y, *z],
                },
                Command::BeginEvent(label) => ExecutedCommand::Marker {
                    queue,
                    label: label.clone(),
                },
                Command::EndEvent => continue,
            };
            executed.push(entry);
        }
        self.log.lock().extend(executed);
        Ok(())
    }
}

impl std::fmt::Debug for HeadlessBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessBackend")
            .field("descriptors", &self.descriptors.lock().len())
            .field("log_len", &self.log.lock().len())
            .finish()
    }
}

static_assertions::assert_impl_all!(HeadlessBackend: Send, Sync);
