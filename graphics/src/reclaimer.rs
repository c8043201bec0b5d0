//! Deferred destruction of GPU objects.
//!
//! An object handed to the [`DeferredReclaimer`] is kept alive until every
//! tracked queue has completed the value it had submitted at the time of the
//! handoff. Dead queues no longer gate anything.

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::queue::CommandQueue;
use crate::resources::{GpuResource, ResourceId};
use crate::types::FenceValue;

struct Deferred {
    resource: Option<ResourceId>,
    label: String,
    gates: Vec<(Weak<CommandQueue>, FenceValue)>,
    object: Box<dyn Any + Send>,
}

impl Deferred {
    fn is_ready(&self) -> bool {
        self.gates.iter().all(|(queue, fence)| {
            queue
                .upgrade()
                .is_none_or(|q| q.completed_value() >= *fence)
        })
    }
}

#[derive(Default)]
pub struct DeferredReclaimer {
    queues: RwLock<Vec<Weak<CommandQueue>>>,
    pending: Mutex<Vec<Deferred>>,
    released: Mutex<HashSet<ResourceId>>,
    reclaimed: AtomicU64,
}

impl DeferredReclaimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gates future releases on `queue`.
    pub fn track_queue(&self, queue: &Arc<CommandQueue>) {
        self.queues.write().push(Arc::downgrade(queue));
    }

    fn capture_gates(&self) -> Vec<(Weak<CommandQueue>, FenceValue)> {
        self.queues
            .read()
            .iter()
            .filter_map(|weak| {
                weak.upgrade()
                    .map(|q| (Weak::clone(weak), q.current_value()))
            })
            .collect()
    }

    /// Keeps `object` alive until in-flight work completes.
    pub fn defer_release<T: Send + 'static>(&self, object: T, label: impl Into<String>) {
        let gates = self.capture_gates();
        self.pending.lock().push(Deferred {
            resource: None,
            label: label.into(),
            gates,
            object: Box::new(object),
        });
    }

    /// Defers the release of a GPU resource.
    ///
    /// Returns `false` without doing anything if the resource was already
    /// handed over.
    pub fn defer_release_resource(&self, resource: impl Into<GpuResource>) -> bool {
        let resource = resource.into();
        let id = resource.id();
        if !self.released.lock().insert(id) {
            log::trace!("DeferredReclaimer: {id} already released");
            return false;
        }
        let label = resource.label().unwrap_or("unnamed").to_string();
        let gates = self.capture_gates();
        self.pending.lock().push(Deferred {
            resource: Some(id),
            label,
            gates,
            object: Box::new(resource),
        });
        true
    }

    pub fn was_released(&self, id: ResourceId) -> bool {
        self.released.lock().contains(&id)
    }

    /// Drops every object whose gates are complete. Returns how many.
    pub fn process(&self) -> usize {
        let ready: Vec<Deferred> = {
            let mut pending = self.pending.lock();
            let (ready, waiting) = std::mem::take(&mut *pending)
                .into_iter()
                .partition(Deferred::is_ready);
            *pending = waiting;
            ready
        };
        for entry in &ready {
            log::trace!(
                "DeferredReclaimer: reclaiming '{}' ({:?})",
                entry.label,
                entry.resource
            );
        }
        self.forget(&ready);
        let count = ready.len();
        self.reclaimed.fetch_add(count as u64, Ordering::Relaxed);
        drop(ready);
        count
    }

    /// Ids of reclaimed resources may be handed over again.
    fn forget(&self, reclaimed: &[Deferred]) {
        let mut released = self.released.lock();
        for id in reclaimed.iter().filter_map(|entry| entry.resource) {
            released.remove(&id);
        }
    }

    /// Per-frame hook.
    pub fn on_begin_frame(&self) {
        self.process();
    }

    /// Drops everything regardless of fences; used at shutdown after the
    /// queues were flushed.
    pub fn release_all(&self) -> usize {
        let all = std::mem::take(&mut *self.pending.lock());
        let count = all.len();
        if count > 0 {
            log::debug!("DeferredReclaimer: releasing {count} objects at shutdown");
        }
        self.forget(&all);
        self.reclaimed.fetch_add(count as u64, Ordering::Relaxed);
        drop(all);
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn reclaimed_count(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for DeferredReclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredReclaimer")
            .field("pending", &self.pending_count())
            .field("reclaimed", &self.reclaimed_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(DeferredReclaimer: Send, Sync);
