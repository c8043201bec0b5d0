/// Bounded pool for scoped parallel work.
///
/// Uses `std::thread::scope`, so tasks may borrow from the caller. At most
/// `num_threads` workers run at once.
///
/// ```
/// use oxygen_core::compute::ThreadPool;
///
/// let pool = ThreadPool::new(4);
/// let squares = pool.map(&[1u32, 2, 3, 4, 5], |v| v * v);
/// assert_eq!(squares, vec![1, 4, 9, 16, 25]);
/// ```
#[derive(Debug)]
pub struct ThreadPool {
    num_threads: usize,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
        }
    }

    /// Pool sized to the available CPU cores.
    pub fn default_threads() -> Self {
        Self::new(std::thread::available_parallelism().map_or(1, |n| n.get()))
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Runs `f` with a scope; every spawned task completes before returning.
    pub fn scope<'env, F>(&self, f: F)
    where
        F: for<'scope> FnOnce(&Scope<'scope, 'env>),
    {
        std::thread::scope(|s| {
            let scope = Scope { inner: s };
            f(&scope);
        });
    }

    /// Applies `f` to every item, preserving order.
    ///
    /// Items are split into at most `num_threads` contiguous chunks. A single
    /// chunk runs inline on the calling thread.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        if items.is_empty() {
            return Vec::new();
        }
        let chunk_size = items.len().div_ceil(self.num_threads);
        if chunk_size >= items.len() {
            return items.iter().map(&f).collect();
        }

        let f = &f;
        let mut chunks: Vec<Vec<R>> = Vec::new();
        std::thread::scope(|s| {
            let handles: Vec<_> = items
                .chunks(chunk_size)
                .map(|chunk| s.spawn(move || chunk.iter().map(f).collect::<Vec<R>>()))
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(results) => chunks.push(results),
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            }
        });
        chunks.into_iter().flatten().collect()
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::default_threads()
    }
}

/// Scope handed to [`ThreadPool::scope`].
pub struct Scope<'scope, 'env: 'scope> {
    inner: &'scope std::thread::Scope<'scope, 'env>,
}

impl<'scope, 'env> Scope<'scope, 'env> {
    /// Spawns a task on a new scoped thread.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'scope,
    {
        self.inner.spawn(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_scope_runs_all_tasks() {
        let pool = ThreadPool::new(4);
        let counter = AtomicU32::new(0);
        pool.scope(|s| {
            for _ in 0..10 {
                s.spawn(|| {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
        });
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_map_preserves_order() {
        let pool = ThreadPool::new(3);
        let items: Vec<u32> = (0..100).collect();
        let doubled = pool.map(&items, |v| v * 2);
        assert_eq!(doubled, items.iter().map(|v| v * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_thread_runs_inline() {
        let pool = ThreadPool::new(1);
        let caller = std::thread::current().id();
        let ids = pool.map(&[1, 2], |_| std::thread::current().id());
        assert!(ids.iter().all(|id| *id == caller));
    }
}
