//! Fence-gated slot recycling with generation stamping.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use oxygen_core::contract_violation;
use parking_lot::{Mutex, RwLock};

use super::GenerationTracker;
use crate::descriptors::DescriptorAllocator;
use crate::error::GraphicsError;
use crate::queue::CommandQueue;
use crate::types::{DescriptorDomain, FenceValue, HeapIndex, VersionedBindlessHandle};

type AllocateHook = Box<dyn Fn(DescriptorDomain) -> Result<HeapIndex, GraphicsError> + Send + Sync>;
type FreeHook = Box<dyn Fn(DescriptorDomain, HeapIndex) -> Result<(), GraphicsError> + Send + Sync>;

const WATCHDOG_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const WATCHDOG_MAX_BACKOFF: Duration = Duration::from_secs(64);

/// Counters of a [`TimelineGatedSlotReuse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotReuseStats {
    /// Slots currently held by callers or awaiting reclaim.
    pub allocated: u64,
    /// Released slots whose fence has not been reached.
    pub pending: u64,
    /// Slots returned to the allocator so far.
    pub reclaimed: u64,
}

#[derive(Debug)]
struct Watchdog {
    last_completed: FenceValue,
    since: Instant,
    backoff: Duration,
}

impl Watchdog {
    fn new(completed: FenceValue) -> Self {
        Self {
            last_completed: completed,
            since: Instant::now(),
            backoff: WATCHDOG_INITIAL_BACKOFF,
        }
    }

    fn observe(&mut self, queue: &CommandQueue, completed: FenceValue, oldest: FenceValue) {
        if completed != self.last_completed {
            *self = Self::new(completed);
            return;
        }
        if self.since.elapsed() >= self.backoff {
            log::warn!(
                "TimelineGatedSlotReuse: {} queue stalled at fence {completed} \
                 for {:?} (oldest pending release at {oldest})",
                queue.role().name(),
                self.since.elapsed()
            );
            self.since = Instant::now();
            self.backoff = (self.backoff * 2).min(WATCHDOG_MAX_BACKOFF);
        }
    }
}

struct QueueBuckets {
    queue: Weak<CommandQueue>,
    buckets: BTreeMap<FenceValue, Vec<(DescriptorDomain, HeapIndex)>>,
    watchdog: Watchdog,
}

/// Recycles bindless slots only after the GPU is done with them.
///
/// Releases land in per-queue buckets keyed by fence value. [`process`]
/// frees every bucket at or below the queue's completed value, bumping the
/// generation of each freed index.
///
/// [`process`]: TimelineGatedSlotReuse::process
pub struct TimelineGatedSlotReuse {
    allocate_hook: AllocateHook,
    free_hook: FreeHook,
    generations: GenerationTracker,
    pending_flags: RwLock<Vec<AtomicBool>>,
    queues: Mutex<Vec<QueueBuckets>>,
    allocated: AtomicU64,
    pending: AtomicU64,
    reclaimed: AtomicU64,
}

impl TimelineGatedSlotReuse {
    pub fn new<A, F>(allocate: A, free: F) -> Self
    where
        A: Fn(DescriptorDomain) -> Result<HeapIndex, GraphicsError> + Send + Sync + 'static,
        F: Fn(DescriptorDomain, HeapIndex) -> Result<(), GraphicsError> + Send + Sync + 'static,
    {
        Self {
            allocate_hook: Box::new(allocate),
            free_hook: Box::new(free),
            generations: GenerationTracker::default(),
            pending_flags: RwLock::new(Vec::new()),
            queues: Mutex::new(Vec::new()),
            allocated: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
        }
    }

    /// Hooks straight into a descriptor allocator's raw slots.
    pub fn from_allocator(allocator: Arc<DescriptorAllocator>) -> Self {
        let free_allocator = Arc::clone(&allocator);
        Self::new(
            move |domain| allocator.allocate_raw(domain),
            move |domain, index| free_allocator.free_raw(domain, index),
        )
    }

    fn ensure_flags(&self, index: HeapIndex) {
        let needed = index.index() + 1;
        if self.pending_flags.read().len() >= needed {
            return;
        }
        let mut flags = self.pending_flags.write();
        while flags.len() < needed {
            flags.push(AtomicBool::new(false));
        }
    }

    /// Allocates a slot stamped with its current generation.
    pub fn allocate(&self, domain: DescriptorDomain) -> Result<VersionedBindlessHandle, GraphicsError> {
        let index = (self.allocate_hook)(domain)?;
        self.ensure_flags(index);
        self.generations.ensure_capacity(index.index() + 1);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(VersionedBindlessHandle::new(index, self.generations.load(index)))
    }

    /// Stamps a slot that was allocated outside this gate, so it can be
    /// released through [`release`](Self::release).
    pub fn adopt(&self, index: HeapIndex) -> VersionedBindlessHandle {
        self.ensure_flags(index);
        self.generations.ensure_capacity(index.index() + 1);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        VersionedBindlessHandle::new(index, self.generations.load(index))
    }

    pub fn is_handle_current(&self, handle: VersionedBindlessHandle) -> bool {
        self.generations.load(handle.index) == handle.generation
    }

    /// Marks a handle pending, failing on stale or double releases.
    fn mark_pending(&self, handle: VersionedBindlessHandle) -> Result<(), GraphicsError> {
        if !self.is_handle_current(handle) {
            contract_violation!(
                GraphicsError::InvalidArgument(format!("stale handle {handle:?}")),
                "release of stale bindless handle {handle:?}"
            );
        }
        self.ensure_flags(handle.index);
        let swapped = self.pending_flags.read()[handle.index.index()]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !swapped {
            contract_violation!(
                GraphicsError::InvalidArgument(format!("handle {handle:?} released twice")),
                "double release of bindless handle {handle:?}"
            );
        }
        Ok(())
    }

    fn with_buckets<R>(
        &self,
        queue: &Arc<CommandQueue>,
        f: impl FnOnce(&mut BTreeMap<FenceValue, Vec<(DescriptorDomain, HeapIndex)>>) -> R,
    ) -> R {
        let mut queues = self.queues.lock();
        let pos = match queues
            .iter()
            .position(|q| std::ptr::eq(q.queue.as_ptr(), Arc::as_ptr(queue)))
        {
            Some(pos) => pos,
            None => {
                queues.push(QueueBuckets {
                    queue: Arc::downgrade(queue),
                    buckets: BTreeMap::new(),
                    watchdog: Watchdog::new(queue.completed_value()),
                });
                queues.len() - 1
            }
        };
        f(&mut queues[pos].buckets)
    }

    /// Releases a handle once `queue` reaches `fence`.
    pub fn release(
        &self,
        domain: DescriptorDomain,
        handle: VersionedBindlessHandle,
        queue: &Arc<CommandQueue>,
        fence: FenceValue,
    ) -> Result<(), GraphicsError> {
        self.mark_pending(handle)?;
        self.with_buckets(queue, |buckets| {
            buckets.entry(fence).or_default().push((domain, handle.index));
        });
        self.pending.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Releases several handles against one fence.
    ///
    /// Items before a rejected handle stay released.
    pub fn release_batch(
        &self,
        queue: &Arc<CommandQueue>,
        fence: FenceValue,
        items: &[(DescriptorDomain, VersionedBindlessHandle)],
    ) -> Result<(), GraphicsError> {
        let mut accepted = Vec::with_capacity(items.len());
        let mut result = Ok(());
        for &(domain, handle) in items {
            if let Err(err) = self.mark_pending(handle) {
                result = Err(err);
                break;
            }
            accepted.push((domain, handle.index));
        }
        if !accepted.is_empty() {
            let count = accepted.len() as u64;
            self.with_buckets(queue, |buckets| {
                buckets.entry(fence).or_default().extend(accepted);
            });
            self.pending.fetch_add(count, Ordering::Relaxed);
        }
        result
    }

    /// Reclaims everything whose fence has completed on any queue.
    ///
    /// Returns the number of slots freed.
    pub fn process(&self) -> usize {
        let ready = {
            let mut queues = self.queues.lock();
            let mut ready = Vec::new();
            queues.retain_mut(|q| Self::collect_ready(q, &mut ready));
            ready
        };
        self.reclaim(ready)
    }

    /// Like [`process`](Self::process) but only for one queue.
    pub fn process_for(&self, queue: &Arc<CommandQueue>) -> usize {
        let ready = {
            let mut queues = self.queues.lock();
            let mut ready = Vec::new();
            queues.retain_mut(|q| {
                if !std::ptr::eq(q.queue.as_ptr(), Arc::as_ptr(queue)) {
                    return true;
                }
                Self::collect_ready(q, &mut ready)
            });
            ready
        };
        self.reclaim(ready)
    }

    /// Moves completed items into `ready`; returns whether the entry stays.
    fn collect_ready(q: &mut QueueBuckets, ready: &mut Vec<(DescriptorDomain, HeapIndex)>) -> bool {
        let Some(queue) = q.queue.upgrade() else {
            log::debug!(
                "TimelineGatedSlotReuse: reclaiming {} buckets of a dropped queue",
                q.buckets.len()
            );
            ready.extend(std::mem::take(&mut q.buckets).into_values().flatten());
            return false;
        };
        let completed = queue.completed_value();
        let waiting = q.buckets.split_off(&completed.next());
        let done = std::mem::replace(&mut q.buckets, waiting);
        ready.extend(done.into_values().flatten());

        if cfg!(debug_assertions)
            && let Some(oldest) = q.buckets.keys().next().copied()
        {
            q.watchdog.observe(&queue, completed, oldest);
        }
        true
    }

    fn reclaim(&self, ready: Vec<(DescriptorDomain, HeapIndex)>) -> usize {
        let count = ready.len();
        for (domain, index) in ready {
            // Invalidate outstanding handles before the slot can be reissued.
            self.generations.bump(index);
            if let Some(flag) = self.pending_flags.read().get(index.index()) {
                flag.store(false, Ordering::Release);
            }
            if let Err(err) = (self.free_hook)(domain, index) {
                log::error!("TimelineGatedSlotReuse: free hook failed for {index}: {err}");
            }
        }
        if count > 0 {
            let n = count as u64;
            self.pending.fetch_sub(n, Ordering::Relaxed);
            self.allocated.fetch_sub(n, Ordering::Relaxed);
            self.reclaimed.fetch_add(n, Ordering::Relaxed);
            log::trace!("TimelineGatedSlotReuse: reclaimed {count} slots");
        }
        count
    }

    pub fn stats(&self) -> SlotReuseStats {
        SlotReuseStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for TimelineGatedSlotReuse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineGatedSlotReuse")
            .field("stats", &self.stats())
            .finish()
    }
}

static_assertions::assert_impl_all!(TimelineGatedSlotReuse: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::commands::CommandList;
    use crate::queue::{QueueExecution, QueueRole};

    fn setup() -> (TimelineGatedSlotReuse, Arc<CommandQueue>) {
        let backend = Arc::new(HeadlessBackend::new());
        let allocator = Arc::new(
            DescriptorAllocator::with_layout(backend.clone(), &[(DescriptorDomain::SRV, 8)])
                .unwrap(),
        );
        let queue = Arc::new(CommandQueue::new(
            QueueRole::Graphics,
            QueueExecution::Deferred,
            backend,
        ));
        (TimelineGatedSlotReuse::from_allocator(allocator), queue)
    }

    #[test]
    fn test_reclaim_only_after_fence() {
        let (reuse, queue) = setup();
        let h = reuse.allocate(DescriptorDomain::SRV).unwrap();
        queue.submit(&mut [CommandList::new("a")]).unwrap();
        reuse
            .release(DescriptorDomain::SRV, h, &queue, FenceValue::new(1))
            .unwrap();
        assert_eq!(reuse.process(), 0);
        assert!(reuse.is_handle_current(h));
        assert_eq!(reuse.stats().pending, 1);

        queue.signal();
        assert_eq!(reuse.process(), 1);
        assert!(!reuse.is_handle_current(h));
        assert_eq!(
            reuse.stats(),
            SlotReuseStats {
                allocated: 0,
                pending: 0,
                reclaimed: 1
            }
        );
    }

    #[test]
    fn test_dropped_queue_buckets_are_reclaimed() {
        let (reuse, queue) = setup();
        let h = reuse.allocate(DescriptorDomain::SRV).unwrap();
        reuse
            .release(DescriptorDomain::SRV, h, &queue, FenceValue::new(50))
            .unwrap();
        drop(queue);
        assert_eq!(reuse.process(), 1);
    }

    #[test]
    fn test_process_for_ignores_other_queues() {
        let (reuse, queue) = setup();
        let other = Arc::new(CommandQueue::new(
            QueueRole::Compute,
            QueueExecution::Deferred,
            Arc::new(HeadlessBackend::new()),
        ));
        let a = reuse.allocate(DescriptorDomain::SRV).unwrap();
        let b = reuse.allocate(DescriptorDomain::SRV).unwrap();
        reuse.release(DescriptorDomain::SRV, a, &queue, FenceValue::new(1)).unwrap();
        reuse.release(DescriptorDomain::SRV, b, &other, FenceValue::new(1)).unwrap();
        queue.signal();
        other.signal();
        assert_eq!(reuse.process_for(&queue), 1);
        assert!(reuse.is_handle_current(b));
        assert_eq!(reuse.process(), 1);
    }

    #[test]
    fn test_adopted_slot_is_gated() {
        let backend = Arc::new(HeadlessBackend::new());
        let allocator = Arc::new(
            DescriptorAllocator::with_layout(backend.clone(), &[(DescriptorDomain::SRV, 8)])
                .unwrap(),
        );
        let queue = Arc::new(CommandQueue::new(
            QueueRole::Graphics,
            QueueExecution::Deferred,
            backend,
        ));
        let reuse = TimelineGatedSlotReuse::from_allocator(Arc::clone(&allocator));
        let index = allocator.allocate(DescriptorDomain::SRV).unwrap().into_raw();
        let fence = queue.submit(&mut [CommandList::new("reads")]).unwrap();

        let handle = reuse.adopt(index);
        reuse.release(DescriptorDomain::SRV, handle, &queue, fence).unwrap();
        assert_eq!(allocator.allocated_count(DescriptorDomain::SRV), 1);
        assert_ne!(allocator.allocate_raw(DescriptorDomain::SRV).unwrap(), index);

        queue.signal();
        assert_eq!(reuse.process(), 1);
        assert_eq!(allocator.allocate_raw(DescriptorDomain::SRV).unwrap(), index);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "double release"))]
    fn test_double_release_is_rejected() {
        let (reuse, queue) = setup();
        let h = reuse.allocate(DescriptorDomain::SRV).unwrap();
        reuse.release(DescriptorDomain::SRV, h, &queue, FenceValue::new(1)).unwrap();
        let second = reuse.release(DescriptorDomain::SRV, h, &queue, FenceValue::new(1));
        assert!(second.is_err());
    }
}
