use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Payload of a caught panic.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

/// Future adapter that converts a panic during `poll` into `Err(payload)`.
pub struct CatchPanic<F> {
    inner: F,
}

/// Wraps an `Unpin` future (such as a [`Co`](super::Co)) in [`CatchPanic`].
pub fn catch_panic<F: Future + Unpin>(inner: F) -> CatchPanic<F> {
    CatchPanic { inner }
}

impl<F: Future + Unpin> Future for CatchPanic<F> {
    type Output = Result<F::Output, PanicPayload>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = &mut self.get_mut().inner;
        match catch_unwind(AssertUnwindSafe(|| Pin::new(inner).poll(cx))) {
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &PanicPayload) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{Co, block_on, co};

    #[test]
    fn test_panic_becomes_error() {
        let task: Co<'_, u32> = co(async { panic!("handler exploded") });
        let result = block_on(catch_panic(task));
        let payload = result.unwrap_err();
        assert_eq!(panic_message(&payload), "handler exploded");
    }

    #[test]
    fn test_value_passes_through() {
        let task: Co<'_, u32> = co(async { 5 });
        assert_eq!(block_on(catch_panic(task)).unwrap(), 5);
    }
}
