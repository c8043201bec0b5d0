use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use super::yield_now::{YieldNow, yield_now};

/// Error returned when a task observes cancellation at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("task cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Shared cancellation flag.
///
/// Clones observe the same flag; cancelling any clone cancels all of them.
/// The frame loop hands one to every coroutine it starts so `stop()` can
/// unwind them at their next await point.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Await point that yields once and fails if the token was cancelled.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::with_token(self.clone())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Yield point that also checks a [`CancellationToken`].
pub struct Checkpoint {
    inner: YieldNow,
    token: Option<CancellationToken>,
}

impl Checkpoint {
    /// Yields without checking for cancellation.
    pub fn yield_only() -> Self {
        Self {
            inner: yield_now(),
            token: None,
        }
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            inner: yield_now(),
            token: Some(token),
        }
    }
}

impl Future for Checkpoint {
    type Output = Result<(), Cancelled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Cancelled>> {
        if let Some(token) = &self.token
            && token.is_cancelled()
        {
            return Poll::Ready(Err(Cancelled));
        }

        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(()) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}
