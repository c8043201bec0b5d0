use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future that returns `Pending` exactly once.
///
/// Gives the executor a chance to run other work, or to observe
/// cancellation, before the caller continues.
#[derive(Debug, Default)]
pub struct YieldNow {
    yielded: bool,
}

/// Creates a [`YieldNow`] future.
pub fn yield_now() -> YieldNow {
    YieldNow::default()
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
