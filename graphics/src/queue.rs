//! Command queues with a timeline fence.
//!
//! Every submission is stamped with the next [`FenceValue`] of its queue.
//! The timeline keeps `completed <= current` at all times; work queued
//! in [`QueueExecution::Deferred`] mode runs when the GPU side signals,
//! which the headless backend simulates through [`CommandQueue::signal`]
//! and friends.
//!
//! [`CommandQueue::wait_for_queue`] orders the next submission after a
//! fence of another queue. On the headless timeline the wait is resolved
//! by raising the producer to that fence before the consumer's work runs.
//! Waits must not form a cycle between queues.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::backend::GpuBackend;
use crate::commands::{Command, CommandList};
use crate::error::GraphicsError;
use crate::types::FenceValue;

/// Hardware queue a [`CommandQueue`] feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueRole {
    Graphics,
    Compute,
    Transfer,
}

impl QueueRole {
    pub fn name(self) -> &'static str {
        match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
            Self::Transfer => "transfer",
        }
    }
}

/// When submitted work executes on the headless timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueExecution {
    /// Work completes inside `submit`.
    #[default]
    Immediate,
    /// Work completes on `signal`, `signal_value` or `flush`.
    Deferred,
}

struct QueueWait {
    producer: Weak<CommandQueue>,
    value: FenceValue,
}

struct Submission {
    fence: FenceValue,
    label: String,
    commands: Vec<Command>,
    waits: Vec<QueueWait>,
}

struct Timeline {
    current: FenceValue,
    completed: FenceValue,
    pending: VecDeque<Submission>,
    /// Attached to the next submission.
    waits: Vec<QueueWait>,
}

/// Serial command queue with a monotone timeline.
pub struct CommandQueue {
    role: QueueRole,
    execution: QueueExecution,
    backend: Arc<dyn GpuBackend>,
    timeline: Mutex<Timeline>,
    progressed: Condvar,
    wakers: Mutex<Vec<Waker>>,
}

impl CommandQueue {
    pub fn new(role: QueueRole, execution: QueueExecution, backend: Arc<dyn GpuBackend>) -> Self {
        log::debug!("CommandQueue: created {} queue ({execution:?})", role.name());
        Self {
            role,
            execution,
            backend,
            timeline: Mutex::new(Timeline {
                current: FenceValue::ZERO,
                completed: FenceValue::ZERO,
                pending: VecDeque::new(),
                waits: Vec::new(),
            }),
            progressed: Condvar::new(),
            wakers: Mutex::new(Vec::new()),
        }
    }

    pub fn role(&self) -> QueueRole {
        self.role
    }

    pub fn execution(&self) -> QueueExecution {
        self.execution
    }

    /// Highest fence value handed out.
    pub fn current_value(&self) -> FenceValue {
        self.timeline.lock().current
    }

    /// Highest fence value the GPU has reached.
    pub fn completed_value(&self) -> FenceValue {
        self.timeline.lock().completed
    }

    pub fn pending_submissions(&self) -> usize {
        self.timeline.lock().pending.len()
    }

    pub fn is_complete(&self, value: FenceValue) -> bool {
        self.completed_value() >= value
    }

    /// Makes the next submission wait until `producer` reaches `value`.
    ///
    /// A value the producer already completed adds no wait.
    pub fn wait_for_queue(&self, producer: &Arc<CommandQueue>, value: FenceValue) -> Result<(), GraphicsError> {
        if std::ptr::eq(self, Arc::as_ptr(producer)) {
            return Err(GraphicsError::InvalidArgument(format!(
                "{} queue cannot wait on itself",
                self.role.name()
            )));
        }
        let submitted = producer.current_value();
        if value > submitted {
            return Err(GraphicsError::InvalidArgument(format!(
                "fence {value} was never handed out by the {} queue (current {submitted})",
                producer.role.name()
            )));
        }
        if producer.is_complete(value) {
            return Ok(());
        }
        log::trace!(
            "CommandQueue[{}]: next submission waits on {} fence {value}",
            self.role.name(),
            producer.role.name()
        );
        self.timeline.lock().waits.push(QueueWait {
            producer: Arc::downgrade(producer),
            value,
        });
        Ok(())
    }

    /// Submits command lists as one unit of work.
    ///
    /// Commands are moved out of every list, which are left empty. Returns
    /// the fence value the submission completes at.
    pub fn submit(&self, lists: &mut [CommandList]) -> Result<FenceValue, GraphicsError> {
        let mut label = String::new();
        let mut commands = Vec::new();
        for list in lists.iter_mut() {
            if !label.is_empty() {
                label.push('+');
            }
            label.push_str(list.name());
            commands.append(&mut list.take_commands());
        }

        let mut timeline = self.timeline.lock();
        let fence = timeline.current.next();
        timeline.current = fence;
        let waits = std::mem::take(&mut timeline.waits);
        log::trace!(
            "CommandQueue[{}]: submit '{label}' ({} commands) -> fence {fence}",
            self.role.name(),
            commands.len()
        );

        match self.execution {
            QueueExecution::Immediate => {
                self.resolve_waits(&waits);
                let result = self.backend.execute(self.role, &commands);
                timeline.completed = fence;
                drop(timeline);
                self.notify();
                result.map(|()| fence)
            }
            QueueExecution::Deferred => {
                timeline.pending.push_back(Submission {
                    fence,
                    label,
                    commands,
                    waits,
                });
                Ok(fence)
            }
        }
    }

    /// Completes the oldest pending submission, or advances the timeline by
    /// one when nothing is pending. Returns the new completed value.
    pub fn signal(&self) -> FenceValue {
        let mut timeline = self.timeline.lock();
        match timeline.pending.pop_front() {
            Some(submission) => {
                self.run(&submission);
                timeline.completed = submission.fence;
            }
            None => {
                let next = timeline.current.next();
                timeline.current = next;
                timeline.completed = next;
            }
        }
        let completed = timeline.completed;
        drop(timeline);
        self.notify();
        completed
    }

    /// Raises the timeline to `value`, running every submission at or below it.
    pub fn signal_value(&self, value: FenceValue) {
        let mut timeline = self.timeline.lock();
        while timeline
            .pending
            .front()
            .is_some_and(|s| s.fence <= value)
        {
            if let Some(submission) = timeline.pending.pop_front() {
                self.run(&submission);
                timeline.completed = submission.fence;
            }
        }
        timeline.current = timeline.current.max(value);
        timeline.completed = timeline.completed.max(value);
        drop(timeline);
        self.notify();
    }

    /// Completes all outstanding work.
    pub fn flush(&self) {
        let current = self.current_value();
        self.signal_value(current);
    }

    /// Blocks until the timeline reaches `value`.
    pub fn wait(&self, value: FenceValue, timeout: Option<Duration>) -> Result<(), GraphicsError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut timeline = self.timeline.lock();
        while timeline.completed < value {
            match deadline {
                Some(deadline) => {
                    if self.progressed.wait_until(&mut timeline, deadline).timed_out()
                        && timeline.completed < value
                    {
                        return Err(GraphicsError::Timeout {
                            value: value.get(),
                            completed: timeline.completed.get(),
                        });
                    }
                }
                None => self.progressed.wait(&mut timeline),
            }
        }
        Ok(())
    }

    /// Future completing when the timeline reaches `value`.
    pub fn wait_async(self: &Arc<Self>, value: FenceValue) -> TimelineWait {
        TimelineWait {
            queue: Arc::clone(self),
            value,
        }
    }

    fn run(&self, submission: &Submission) {
        self.resolve_waits(&submission.waits);
        if let Err(err) = self.backend.execute(self.role, &submission.commands) {
            log::error!(
                "CommandQueue[{}]: submission '{}' (fence {}) failed: {err}",
                self.role.name(),
                submission.label,
                submission.fence
            );
        }
    }

    /// Runs producer work up to every unmet wait. A dropped producer no
    /// longer gates.
    fn resolve_waits(&self, waits: &[QueueWait]) {
        for wait in waits {
            if let Some(producer) = wait.producer.upgrade()
                && !producer.is_complete(wait.value)
            {
                log::trace!(
                    "CommandQueue[{}]: resolving wait on {} fence {}",
                    self.role.name(),
                    producer.role.name(),
                    wait.value
                );
                producer.signal_value(wait.value);
            }
        }
    }

    fn notify(&self) {
        self.progressed.notify_all();
        for waker in self.wakers.lock().drain(..) {
            waker.wake();
        }
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let timeline = self.timeline.lock();
        f.debug_struct("CommandQueue")
            .field("role", &self.role)
            .field("current", &timeline.current)
            .field("completed", &timeline.completed)
            .field("pending", &timeline.pending.len())
            .field("waits", &timeline.waits.len())
            .finish()
    }
}

/// Future returned by [`CommandQueue::wait_async`].
pub struct TimelineWait {
    queue: Arc<CommandQueue>,
    value: FenceValue,
}

impl Future for TimelineWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.queue.is_complete(self.value) {
            return Poll::Ready(());
        }
        let mut wakers = self.queue.wakers.lock();
        if self.queue.is_complete(self.value) {
            return Poll::Ready(());
        }
        if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
            wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

static_assertions::assert_impl_all!(CommandQueue: Send, Sync);
