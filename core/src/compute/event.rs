use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct EventInner {
    triggered: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

/// One-shot completion notification.
///
/// Awaiting [`wait`](Event::wait) completes once [`trigger`](Event::trigger)
/// has been called on any clone. A triggered event stays triggered until
/// [`reset`](Event::reset).
#[derive(Debug, Clone, Default)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::Release);
        for waker in self.inner.wakers.lock().drain(..) {
            waker.wake();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.inner.triggered.store(false, Ordering::Release);
    }

    pub fn wait(&self) -> EventWait {
        EventWait { event: self.clone() }
    }
}

/// Future returned by [`Event::wait`].
pub struct EventWait {
    event: Event,
}

impl Future for EventWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.event.is_triggered() {
            return Poll::Ready(());
        }
        let mut wakers = self.event.inner.wakers.lock();
        // Re-check under the lock so a concurrent trigger cannot be missed.
        if self.event.is_triggered() {
            return Poll::Ready(());
        }
        if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
            wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
