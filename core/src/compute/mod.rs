//! Cooperative async primitives.
//!
//! Engine coroutines are plain Rust futures driven by a manual polling loop
//! with a noop waker. Nothing here depends on an async runtime.
//!
//! - [`Co`]: boxed coroutine type returned by phase handlers and passes
//! - [`block_on`]: drives a future to completion on the current thread
//! - [`Event`]: one-shot completion notification
//! - [`CancellationToken`] / [`Checkpoint`]: cooperative cancellation
//! - [`YieldNow`]: yields once to the executor
//! - [`CatchPanic`]: turns a panic inside `poll` into an error value
//! - [`ThreadPool`]: bounded scoped fan-out for parallel work

mod cancellation;
mod catch_panic;
mod event;
mod thread_pool;
mod yield_now;

pub use cancellation::{CancellationToken, Cancelled, Checkpoint};
pub use catch_panic::{CatchPanic, PanicPayload, catch_panic, panic_message};
pub use event::{Event, EventWait};
pub use thread_pool::{Scope, ThreadPool};
pub use yield_now::{YieldNow, yield_now};

use std::future::Future;
use std::pin::{Pin, pin};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

static_assertions::assert_impl_all!(Event: Send, Sync);
static_assertions::assert_impl_all!(CancellationToken: Send, Sync);

/// Boxed coroutine borrowing from `'a`.
pub type Co<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Boxes a future into a [`Co`].
pub fn co<'a, T, F>(future: F) -> Co<'a, T>
where
    F: Future<Output = T> + 'a,
{
    Box::pin(future)
}

/// A coroutine that completes immediately with `value`.
pub fn ready<'a, T: 'a>(value: T) -> Co<'a, T> {
    Box::pin(std::future::ready(value))
}

/// Waker that does nothing; executors here poll in a loop instead.
pub fn noop_waker() -> Waker {
    fn noop(_: *const ()) {}
    fn clone(p: *const ()) -> RawWaker {
        RawWaker::new(p, &VTABLE)
    }
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
    // SAFETY: every vtable entry ignores the data pointer.
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}

/// Polls `future` until it completes, yielding the thread between polls.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);
    loop {
        if let Poll::Ready(value) = future.as_mut().poll(&mut cx) {
            return value;
        }
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_drives_yields() {
        let value = block_on(async {
            yield_now().await;
            yield_now().await;
            7
        });
        assert_eq!(value, 7);
    }

    #[test]
    fn test_co_borrows_locals() {
        let mut counter = 0;
        {
            let task: Co<'_, ()> = co(async {
                counter += 1;
            });
            block_on(task);
        }
        assert_eq!(counter, 1);
        assert_eq!(block_on(ready(3)), 3);
    }
}
