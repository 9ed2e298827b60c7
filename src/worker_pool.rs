//! `BoundedQueue<T>` and `WorkerPool` (spec §4.13, §5).
//!
//! Grounded directly on the original engine's `BoundedBuffer<T>`
//! (`boundedbuffer.h`): a capacity-N queue guarded by one mutex and two
//! condvars, where `push` blocks while full and `pop` blocks while empty
//! until `finish()` is signaled, at which point waiting poppers are
//! released and further pops on an empty, finished queue return `None`
//! instead of blocking forever.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

struct Inner<T> {
    capacity: usize,
    buffer: VecDeque<T>,
    finished: bool,
}

/// A capacity-bounded multi-producer multi-consumer queue.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity,
                buffer: VecDeque::with_capacity(capacity),
                finished: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Blocks until there is room, then pushes `item`.
    pub fn push(&self, item: T) {
        let mut guard = self.inner.lock();
        while guard.buffer.len() >= guard.capacity && !guard.finished {
            self.not_full.wait(&mut guard);
        }
        guard.buffer.push_back(item);
        self.not_empty.notify_all();
    }

    /// Pushes as many of `items` as currently fit, returning the number
    /// actually pushed (mirrors the original's `push(vector, ...)`
    /// overload, which never blows past remaining capacity in one call).
    pub fn push_batch(&self, items: &mut Vec<T>) -> usize {
        let mut guard = self.inner.lock();
        while guard.buffer.len() >= guard.capacity && !guard.finished {
            self.not_full.wait(&mut guard);
        }
        let remaining = guard.capacity.saturating_sub(guard.buffer.len());
        let n = remaining.min(items.len());
        guard.buffer.extend(items.drain(0..n));
        self.not_empty.notify_all();
        n
    }

    /// Pushes the entire batch, looping until every item has been placed.
    pub fn push_all(&self, mut items: Vec<T>) {
        while !items.is_empty() {
            self.push_batch(&mut items);
        }
    }

    /// Blocks until an item is available or the queue is finished and
    /// drained, in which case `None` is returned.
    pub fn pop(&self) -> Option<T> {
        let mut guard = self.inner.lock();
        while guard.buffer.is_empty() && !guard.finished {
            self.not_empty.wait(&mut guard);
        }
        let item = guard.buffer.pop_front();
        self.not_full.notify_all();
        item
    }

    /// Pops up to `n` items into `out`, returning the count popped. Blocks
    /// once if the queue is currently empty and not finished; otherwise
    /// returns immediately (possibly with 0 items, once finished+drained).
    pub fn pop_up_to(&self, n: usize, out: &mut Vec<T>) -> usize {
        let mut guard = self.inner.lock();
        while guard.buffer.is_empty() && !guard.finished {
            self.not_empty.wait(&mut guard);
        }
        let count = n.min(guard.buffer.len());
        out.extend(guard.buffer.drain(0..count));
        self.not_full.notify_all();
        count
    }

    pub fn pop_all(&self, out: &mut Vec<T>) -> usize {
        let mut guard = self.inner.lock();
        while guard.buffer.is_empty() && !guard.finished {
            self.not_empty.wait(&mut guard);
        }
        let count = guard.buffer.len();
        out.extend(guard.buffer.drain(..));
        self.not_full.notify_all();
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every waiter. Idempotent: signaling finish more than once
    /// has no additional effect.
    pub fn finish(&self) {
        let mut guard = self.inner.lock();
        guard.finished = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }
}

/// A fixed-size thread pool that drains a [`BoundedQueue`] of work items,
/// applying a closure to each and pushing results (if any) onward. Results
/// are produced in arbitrary order; callers must only depend on "all done"
/// events (spec §4.13).
pub struct WorkerPool {
    num_threads: usize,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
        }
    }

    /// A pool sized to the available hardware concurrency, the default
    /// per spec §4.13.
    pub fn with_hardware_concurrency() -> Self {
        Self::new(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Runs `work` over every item of `queue` using `self.num_threads`
    /// worker threads, pushing each item's result into `results`. Blocks
    /// until `queue` is finished and fully drained. A worker panic is
    /// caught and propagated as `Err(())`, upgrading to `BackendError`/
    /// `SimError::WorkerPanic` at the scheduler boundary (spec §5).
    pub fn run<T, U, F>(&self, queue: Arc<BoundedQueue<T>>, results: Arc<BoundedQueue<U>>, work: F) -> Result<(), ()>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let panicked = Arc::new(std::sync::atomic::AtomicBool::new(false));

        std::thread::scope(|scope| {
            for _ in 0..self.num_threads {
                let queue = Arc::clone(&queue);
                let results = Arc::clone(&results);
                let work = Arc::clone(&work);
                let panicked = Arc::clone(&panicked);
                scope.spawn(move || {
                    while let Some(item) = queue.pop() {
                        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| work(item)));
                        match result {
                            Ok(u) => results.push(u),
                            Err(_) => {
                                panicked.store(true, std::sync::atomic::Ordering::SeqCst);
                                queue.finish();
                                break;
                            }
                        }
                    }
                });
            }
        });

        results.finish();
        if panicked.load(std::sync::atomic::Ordering::SeqCst) {
            Err(())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_preserves_fifo_order() {
        let q = BoundedQueue::new(4);
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn finish_releases_blocked_pop() {
        let q = Arc::new(BoundedQueue::<i32>::new(4));
        let q2 = Arc::clone(&q);
        let handle = std::thread::spawn(move || q2.pop());
        std::thread::sleep(std::time::Duration::from_millis(20));
        q.finish();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn worker_pool_processes_all_items_in_some_order() {
        let queue = Arc::new(BoundedQueue::new(64));
        for i in 0..100 {
            queue.push(i);
        }
        queue.finish();
        let results = Arc::new(BoundedQueue::new(64));
        let pool = WorkerPool::new(4);
        pool.run(queue, Arc::clone(&results), |i: i32| i * 2).unwrap();
        let mut out = Vec::new();
        results.pop_all(&mut out);
        out.sort_unstable();
        let expected: Vec<i32> = (0..100).map(|i| i * 2).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn worker_panic_is_reported() {
        let queue = Arc::new(BoundedQueue::new(8));
        queue.push(1);
        queue.finish();
        let results = Arc::new(BoundedQueue::new(8));
        let pool = WorkerPool::new(2);
        let outcome = pool.run(queue, results, |_: i32| -> i32 { panic!("boom") });
        assert!(outcome.is_err());
    }
}
