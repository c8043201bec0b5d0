//! Batched CPU to GPU uploads.
//!
//! [`UploadCoordinator::submit`] copies the payload into staging memory
//! right away and queues a copy. [`UploadCoordinator::flush`] records all
//! queued copies into one command list, merging contiguous buffer ranges,
//! and submits it to the upload queue. Every request returns an
//! [`UploadTicket`] that resolves once the queue timeline passes the
//! submission fence.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use oxygen_core::Slot;

use super::{StagingAllocation, StagingProvider};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::queue::{CommandQueue, QueueRole, TimelineWait};
use crate::resources::{Buffer, ResourceId, Texture};
use crate::types::{FenceValue, ResourceState};

/// Where an upload lands.
#[derive(Debug, Clone)]
pub enum UploadDestination {
    Buffer { buffer: Arc<Buffer>, offset: u64 },
    /// Top mip of a texture, tightly packed.
    Texture(Arc<Texture>),
}

impl UploadDestination {
    pub fn resource_id(&self) -> ResourceId {
        match self {
            Self::Buffer { buffer, .. } => buffer.id(),
            Self::Texture(texture) => texture.id(),
        }
    }
}

/// One upload: bytes plus destination.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub destination: UploadDestination,
    pub data: Vec<u8>,
    pub debug_name: String,
}

impl UploadRequest {
    pub fn buffer(buffer: &Arc<Buffer>, offset: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            destination: UploadDestination::Buffer {
                buffer: Arc::clone(buffer),
                offset,
            },
            data: data.into(),
            debug_name: String::new(),
        }
    }

    pub fn texture(texture: &Arc<Texture>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            destination: UploadDestination::Texture(Arc::clone(texture)),
            data: data.into(),
            debug_name: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = name.into();
        self
    }

    fn validate(&self) -> Result<(), GraphicsError> {
        if self.data.is_empty() {
            return Err(GraphicsError::InvalidArgument(format!(
                "upload '{}' has no data",
                self.debug_name
            )));
        }
        let len = self.data.len() as u64;
        match &self.destination {
            UploadDestination::Buffer { buffer, offset } => {
                if offset.checked_add(len).is_none_or(|end| end > buffer.size()) {
                    return Err(GraphicsError::InvalidArgument(format!(
                        "upload '{}' writes {len} bytes at {offset} into a {}-byte buffer",
                        self.debug_name,
                        buffer.size()
                    )));
                }
            }
            UploadDestination::Texture(texture) => {
                let expected = texture.descriptor().byte_size();
                if len != expected {
                    return Err(GraphicsError::InvalidArgument(format!(
                        "upload '{}' has {len} bytes, texture needs {expected}",
                        self.debug_name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Outcome of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub bytes_uploaded: u64,
    pub fence: FenceValue,
    /// Set when the submission carrying the upload failed.
    pub error: Option<GraphicsError>,
}

impl UploadResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

type CompletionCallback = Box<dyn FnOnce(&UploadResult) + Send>;

#[derive(Default)]
struct TicketInner {
    fence: Option<FenceValue>,
    result: Option<UploadResult>,
    callbacks: Vec<CompletionCallback>,
    wakers: Vec<Waker>,
}

struct TicketState {
    id: u64,
    bytes: u64,
    queue: Arc<CommandQueue>,
    inner: Mutex<TicketInner>,
}

impl TicketState {
    /// Resolves the ticket if its fence has been reached.
    fn try_complete(&self) -> bool {
        let (result, callbacks, wakers) = {
            let mut inner = self.inner.lock();
            if inner.result.is_some() {
                return true;
            }
            let Some(fence) = inner.fence else {
                return false;
            };
            if !self.queue.is_complete(fence) {
                return false;
            }
            let result = UploadResult {
                bytes_uploaded: self.bytes,
                fence,
                error: None,
            };
            inner.result = Some(result.clone());
            (
                result,
                std::mem::take(&mut inner.callbacks),
                std::mem::take(&mut inner.wakers),
            )
        };
        Self::deliver(&result, callbacks, wakers);
        true
    }

    fn fail(&self, fence: FenceValue, error: GraphicsError) {
        let (result, callbacks, wakers) = {
            let mut inner = self.inner.lock();
            let result = UploadResult {
                bytes_uploaded: 0,
                fence,
                error: Some(error),
            };
            inner.fence = Some(fence);
            inner.result = Some(result.clone());
            (
                result,
                std::mem::take(&mut inner.callbacks),
                std::mem::take(&mut inner.wakers),
            )
        };
        Self::deliver(&result, callbacks, wakers);
    }

    fn assign_fence(&self, fence: FenceValue) {
        let wakers = {
            let mut inner = self.inner.lock();
            inner.fence = Some(fence);
            std::mem::take(&mut inner.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    fn deliver(result: &UploadResult, callbacks: Vec<CompletionCallback>, wakers: Vec<Waker>) {
        for callback in callbacks {
            callback(result);
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Handle to a queued upload.
#[derive(Clone)]
pub struct UploadTicket {
    state: Arc<TicketState>,
}

impl UploadTicket {
    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn bytes(&self) -> u64 {
        self.state.bytes
    }

    /// Fence of the submission carrying this upload, once flushed.
    pub fn fence(&self) -> Option<FenceValue> {
        self.state.inner.lock().fence
    }

    pub fn is_complete(&self) -> bool {
        self.state.try_complete()
    }

    pub fn result(&self) -> Option<UploadResult> {
        self.state.try_complete();
        self.state.inner.lock().result.clone()
    }

    /// Runs `callback` on completion, or immediately if already complete.
    pub fn on_complete(&self, callback: impl FnOnce(&UploadResult) + Send + 'static) {
        self.state.try_complete();
        let mut inner = self.state.inner.lock();
        match inner.result.clone() {
            Some(result) => {
                drop(inner);
                callback(&result);
            }
            None => inner.callbacks.push(Box::new(callback)),
        }
    }

    /// Future resolving with the upload result.
    pub fn wait_async(&self) -> UploadWait {
        UploadWait {
            ticket: self.clone(),
            timeline: None,
        }
    }
}

impl std::fmt::Debug for UploadTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTicket")
            .field("id", &self.state.id)
            .field("bytes", &self.state.bytes)
            .field("fence", &self.fence())
            .finish()
    }
}

/// Future returned by [`UploadTicket::wait_async`].
pub struct UploadWait {
    ticket: UploadTicket,
    timeline: Option<TimelineWait>,
}

impl Future for UploadWait {
    type Output = UploadResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<UploadResult> {
        loop {
            if self.ticket.state.try_complete()
                && let Some(result) = self.ticket.state.inner.lock().result.clone()
            {
                return Poll::Ready(result);
            }
            if let Some(timeline) = self.timeline.as_mut() {
                match Pin::new(timeline).poll(cx) {
                    // Reached: loop to resolve the ticket.
                    Poll::Ready(()) => continue,
                    Poll::Pending => return Poll::Pending,
                }
            }
            let fence = {
                let mut inner = self.ticket.state.inner.lock();
                match inner.fence {
                    Some(fence) => fence,
                    None => {
                        if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                            inner.wakers.push(cx.waker().clone());
                        }
                        return Poll::Pending;
                    }
                }
            };
            let timeline = self.ticket.state.queue.wait_async(fence);
            self.timeline = Some(timeline);
        }
    }
}

/// In-flight tickets awaiting their fences.
#[derive(Default)]
pub struct UploadTracker {
    in_flight: Vec<UploadTicket>,
}

impl UploadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, ticket: UploadTicket) {
        self.in_flight.push(ticket);
    }

    /// Resolves finished tickets. Returns the highest fence retired.
    pub fn poll(&mut self) -> Option<FenceValue> {
        let mut retired = None;
        self.in_flight.retain(|ticket| {
            if ticket.is_complete() {
                retired = retired.max(ticket.fence());
                false
            } else {
                true
            }
        });
        retired
    }

    pub fn pending_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn all_complete(&self) -> bool {
        self.in_flight.iter().all(UploadTicket::is_complete)
    }
}

struct PendingCopy {
    staging: StagingAllocation,
    destination: UploadDestination,
    ticket: Arc<TicketState>,
}

/// Upload statistics since creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadStats {
    pub submitted: u64,
    pub bytes_submitted: u64,
    pub flushes: u64,
    /// Copy commands recorded after merging contiguous ranges.
    pub copies_recorded: u64,
    pub completed: u64,
}

/// Owns staging memory and the upload queue submissions.
pub struct UploadCoordinator {
    device: Arc<GraphicsDevice>,
    queue: Arc<CommandQueue>,
    staging: Box<dyn StagingProvider>,
    pending: Vec<PendingCopy>,
    tracker: UploadTracker,
    next_ticket: AtomicU64,
    stats: UploadStats,
}

impl UploadCoordinator {
    /// Coordinator submitting on the transfer queue.
    pub fn new(device: Arc<GraphicsDevice>, staging: Box<dyn StagingProvider>) -> Self {
        let queue = Arc::clone(device.queue(QueueRole::Transfer));
        Self::with_queue(device, queue, staging)
    }

    pub fn with_queue(
        device: Arc<GraphicsDevice>,
        queue: Arc<CommandQueue>,
        staging: Box<dyn StagingProvider>,
    ) -> Self {
        Self {
            device,
            queue,
            staging,
            pending: Vec::new(),
            tracker: UploadTracker::new(),
            next_ticket: AtomicU64::new(1),
            stats: UploadStats::default(),
        }
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    pub fn staging(&self) -> &dyn StagingProvider {
        self.staging.as_ref()
    }

    pub fn staging_mut(&mut self) -> &mut dyn StagingProvider {
        self.staging.as_mut()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.tracker.pending_count()
    }

    pub fn stats(&self) -> UploadStats {
        self.stats
    }

    /// Stages `request` and queues its copy for the next flush.
    ///
    /// Fails with `OutOfCapacity` when the active staging partition cannot
    /// hold the payload; callers split the upload or grow staging.
    pub fn submit(&mut self, request: UploadRequest) -> Result<UploadTicket, GraphicsError> {
        request.validate()?;
        let UploadRequest {
            destination,
            data,
            debug_name,
        } = request;
        let staging = self.staging.allocate(data.len() as u64, &debug_name)?;
        staging.write(&data)?;

        let state = Arc::new(TicketState {
            id: self.next_ticket.fetch_add(1, Ordering::Relaxed),
            bytes: data.len() as u64,
            queue: Arc::clone(&self.queue),
            inner: Mutex::new(TicketInner::default()),
        });
        log::trace!(
            "UploadCoordinator: queued '{debug_name}' ({} bytes) as ticket {}",
            state.bytes,
            state.id
        );
        self.stats.submitted += 1;
        self.stats.bytes_submitted += state.bytes;
        self.pending.push(PendingCopy {
            staging,
            destination,
            ticket: Arc::clone(&state),
        });
        Ok(UploadTicket { state })
    }

    /// Submits several requests, stopping at the first failure.
    pub fn submit_many(
        &mut self,
        requests: impl IntoIterator<Item = UploadRequest>,
    ) -> Result<Vec<UploadTicket>, GraphicsError> {
        requests.into_iter().map(|r| self.submit(r)).collect()
    }

    /// Records and submits every queued copy.
    ///
    /// Returns the submission fence, or `None` when nothing was queued.
    pub fn flush(&mut self) -> Result<Option<FenceValue>, GraphicsError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        oxygen_core::profile_scope!("upload_flush");
        let pending = std::mem::take(&mut self.pending);
        let mut recorder = self.device.create_recorder("uploads");

        for copy in &pending {
            match &copy.destination {
                UploadDestination::Buffer { buffer, .. } => {
                    recorder.begin_tracking_resource_state(buffer, ResourceState::Common, true);
                    recorder.require_resource_state(buffer, ResourceState::CopyDest)?;
                }
                UploadDestination::Texture(texture) => {
                    recorder.begin_tracking_resource_state(
                        texture,
                        texture.descriptor().initial_state,
                        true,
                    );
                    recorder.require_resource_state(texture, ResourceState::CopyDest)?;
                }
            }
        }

        let mut copies = 0u64;
        let mut run: Option<(Arc<Buffer>, u64, Arc<Buffer>, u64, u64)> = None;
        for copy in &pending {
            match &copy.destination {
                UploadDestination::Buffer { buffer, offset } => {
                    let src = copy.staging.buffer();
                    let src_offset = copy.staging.offset();
                    let size = copy.staging.size();
                    if let Some((run_src, run_src_offset, run_dst, run_dst_offset, run_size)) =
                        run.as_mut()
                        && Arc::ptr_eq(run_src, src)
                        && Arc::ptr_eq(run_dst, buffer)
                        && *run_src_offset + *run_size == src_offset
                        && *run_dst_offset + *run_size == *offset
                    {
                        *run_size += size;
                        continue;
                    }
                    if let Some((s, so, d, dof, sz)) = run.take() {
                        recorder.copy_buffer(&s, so, &d, dof, sz);
                        copies += 1;
                    }
                    run = Some((Arc::clone(src), src_offset, Arc::clone(buffer), *offset, size));
                }
                UploadDestination::Texture(texture) => {
                    if let Some((s, so, d, dof, sz)) = run.take() {
                        recorder.copy_buffer(&s, so, &d, dof, sz);
                        copies += 1;
                    }
                    recorder.copy_buffer_to_texture(
                        copy.staging.buffer(),
                        copy.staging.offset(),
                        texture,
                    );
                    copies += 1;
                }
            }
        }
        if let Some((s, so, d, dof, sz)) = run.take() {
            recorder.copy_buffer(&s, so, &d, dof, sz);
            copies += 1;
        }

        let mut list = recorder.finish();
        let fence = match self.queue.submit(std::slice::from_mut(&mut list)) {
            Ok(fence) => fence,
            Err(err) => {
                log::error!("UploadCoordinator: submission of {} uploads failed: {err}", pending.len());
                let fence = self.queue.current_value();
                for copy in &pending {
                    copy.ticket.fail(fence, err.clone());
                }
                return Err(err);
            }
        };
        self.staging.on_submitted(fence);
        self.stats.flushes += 1;
        self.stats.copies_recorded += copies;
        log::trace!(
            "UploadCoordinator: flushed {} uploads as {copies} copies at fence {fence}",
            pending.len()
        );
        for copy in pending {
            copy.ticket.assign_fence(fence);
            self.tracker.track(UploadTicket { state: copy.ticket });
        }
        Ok(Some(fence))
    }

    /// Resolves completed tickets and retires their staging.
    ///
    /// Returns the number of tickets completed by this call.
    pub fn poll(&mut self) -> usize {
        let before = self.tracker.pending_count();
        if let Some(fence) = self.tracker.poll() {
            self.staging.retire_completed(fence);
        }
        let done = before - self.tracker.pending_count();
        self.stats.completed += done as u64;
        done
    }

    /// Polls completions and rotates staging to the partition of `slot`.
    pub fn on_frame_start(&mut self, slot: Slot) {
        self.poll();
        if !self.pending.is_empty() {
            log::warn!(
                "UploadCoordinator: {} uploads were never flushed before frame start",
                self.pending.len()
            );
            if let Err(err) = self.flush() {
                log::error!("UploadCoordinator: late flush failed: {err}");
            }
        }
        self.staging.on_frame_start(slot);
    }
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("queue", &self.queue.role())
            .field("pending", &self.pending.len())
            .field("in_flight", &self.tracker.pending_count())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::config::{GraphicsConfig, StagingConfig};
    use crate::queue::QueueExecution;
    use crate::types::{BufferDescriptor, BufferUsage, TextureDescriptor, TextureFormat, TextureUsage};
    use crate::upload::RingBufferStaging;
    use std::sync::atomic::AtomicBool;

    fn setup(execution: QueueExecution) -> (Arc<HeadlessBackend>, UploadCoordinator) {
        let backend = Arc::new(HeadlessBackend::new());
        let device = GraphicsDevice::new(
            backend.clone(),
            GraphicsConfig::default().with_queue_execution(execution),
        )
        .unwrap();
        let staging = RingBufferStaging::new(
            device.clone(),
            3,
            &StagingConfig::default().with_partition_size(4096).with_alignment(16),
        )
        .unwrap();
        (backend, UploadCoordinator::new(device, Box::new(staging)))
    }

    fn buffer(coordinator: &UploadCoordinator, size: u64) -> Arc<Buffer> {
        coordinator
            .device()
            .create_buffer(&BufferDescriptor::new(size, BufferUsage::STORAGE | BufferUsage::COPY_DST))
            .unwrap()
    }

    #[test]
    fn test_flush_moves_bytes() {
        let (backend, mut uploads) = setup(QueueExecution::Immediate);
        let dst = buffer(&uploads, 64);
        let ticket = uploads
            .submit(UploadRequest::buffer(&dst, 8, vec![7u8; 8]).with_name("bytes"))
            .unwrap();
        assert!(!ticket.is_complete());

        let fence = uploads.flush().unwrap().unwrap();
        assert_eq!(ticket.fence(), Some(fence));
        assert!(ticket.is_complete());
        let result = ticket.result().unwrap();
        assert_eq!(result.bytes_uploaded, 8);
        assert!(result.is_success());

        let contents = backend.buffer_contents(&dst);
        assert_eq!(&contents[8..16], &[7u8; 8]);
        assert_eq!(contents[0], 0);
    }

    #[test]
    fn test_contiguous_uploads_coalesce() {
        let (backend, mut uploads) = setup(QueueExecution::Immediate);
        let dst = buffer(&uploads, 256);
        // 16-byte payloads keep staging offsets contiguous at 16-byte alignment.
        for i in 0..4u64 {
            uploads
                .submit(UploadRequest::buffer(&dst, i * 16, vec![i as u8; 16]))
                .unwrap();
        }
        uploads
            .submit(UploadRequest::buffer(&dst, 128, vec![9u8; 16]))
            .unwrap();
        uploads.flush().unwrap();

        assert_eq!(uploads.stats().copies_recorded, 2);
        let copies = backend.buffer_copies();
        assert_eq!(copies, vec![(dst.id(), 0, 64), (dst.id(), 128, 16)]);
    }

    #[test]
    fn test_deferred_ticket_completes_on_signal() {
        let (_backend, mut uploads) = setup(QueueExecution::Deferred);
        let dst = buffer(&uploads, 32);
        let ticket = uploads.submit(UploadRequest::buffer(&dst, 0, vec![1u8; 4])).unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        ticket.on_complete(move |result| {
            assert!(result.is_success());
            flag.store(true, Ordering::SeqCst);
        });

        uploads.flush().unwrap();
        assert_eq!(uploads.poll(), 0);
        assert!(!fired.load(Ordering::SeqCst));

        uploads.queue().flush();
        assert_eq!(uploads.poll(), 1);
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(uploads.in_flight_count(), 0);
    }

    #[test]
    fn test_wait_async_resolves() {
        let (_backend, mut uploads) = setup(QueueExecution::Deferred);
        let dst = buffer(&uploads, 32);
        let ticket = uploads.submit(UploadRequest::buffer(&dst, 0, vec![1u8; 4])).unwrap();
        uploads.flush().unwrap();
        let queue = uploads.queue().clone();
        let waiter = std::thread::spawn(move || oxygen_core::compute::block_on(ticket.wait_async()));
        queue.flush();
        let result = waiter.join().unwrap();
        assert_eq!(result.bytes_uploaded, 4);
    }

    #[test]
    fn test_texture_upload() {
        let (backend, mut uploads) = setup(QueueExecution::Immediate);
        let texture = uploads
            .device()
            .create_texture(&TextureDescriptor::new_2d(
                2,
                2,
                TextureFormat::Rgba8Unorm,
                TextureUsage::SHADER_RESOURCE | TextureUsage::COPY_DST,
            ))
            .unwrap();
        assert!(uploads.submit(UploadRequest::texture(&texture, vec![1u8; 8])).is_err());
        uploads.submit(UploadRequest::texture(&texture, vec![3u8; 16])).unwrap();
        uploads.flush().unwrap();
        assert_eq!(backend.texture_contents(&texture), vec![3u8; 16]);
    }

    #[test]
    fn test_rejects_invalid_requests() {
        let (_backend, mut uploads) = setup(QueueExecution::Immediate);
        let dst = buffer(&uploads, 16);
        let err = uploads.submit(UploadRequest::buffer(&dst, 0, Vec::new())).unwrap_err();
        assert_eq!(err.kind(), oxygen_core::ErrorKind::InvalidArgument);
        let err = uploads.submit(UploadRequest::buffer(&dst, 12, vec![0u8; 8])).unwrap_err();
        assert_eq!(err.kind(), oxygen_core::ErrorKind::InvalidArgument);
        // The end offset would wrap around.
        let err = uploads
            .submit(UploadRequest::buffer(&dst, u64::MAX - 2, vec![0u8; 8]))
            .unwrap_err();
        assert_eq!(err.kind(), oxygen_core::ErrorKind::InvalidArgument);
        let big = buffer(&uploads, 8192);
        let err = uploads.submit(UploadRequest::buffer(&big, 0, vec![0u8; 5000])).unwrap_err();
        assert_eq!(err.kind(), oxygen_core::ErrorKind::OutOfCapacity);
        assert_eq!(uploads.pending_count(), 0);
    }
}
