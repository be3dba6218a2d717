//! Priority work queue drained by a fixed number of concurrent handlers.
//!
//! Lower priority values run first; equal priorities run in insertion
//! order. A path is not re-queued while a handler is working on it.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::{error, warn};

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<(i32, u64, PathBuf)>>,
    in_flight: HashSet<PathBuf>,
    next_seq: u64,
}

#[derive(Default)]
pub struct BoundedWorkQueue {
    state: Mutex<QueueState>,
}

/// Clears the in-flight marker even if the handler panics.
struct InFlight<'a> {
    queue: &'a BoundedWorkQueue,
    path: PathBuf,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.lock().in_flight.remove(&self.path);
    }
}

impl BoundedWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `path`. Returns false (and drops it) while that path is in flight.
    pub fn add(&self, path: impl Into<PathBuf>, priority: i32) -> bool {
        let path = path.into();
        let mut state = self.lock();
        if state.in_flight.contains(&path) {
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Reverse((priority, seq, path)));
        true
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    fn take_next(&self) -> Option<PathBuf> {
        let mut state = self.lock();
        let Reverse((_, _, path)) = state.heap.pop()?;
        state.in_flight.insert(path.clone());
        Some(path)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drain the queue with up to `concurrency` handlers at once and return
    /// how many handlers succeeded. Failed or panicked handlers are logged
    /// and not counted.
    pub async fn process<F, Fut, E>(self: &Arc<Self>, handler: F, concurrency: usize) -> usize
    where
        F: Fn(PathBuf) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let handler = Arc::new(handler);
        let processed = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();

        for _ in 0..concurrency.max(1) {
            let queue = Arc::clone(self);
            let handler = Arc::clone(&handler);
            let processed = Arc::clone(&processed);
            workers.spawn(async move {
                while let Some(path) = queue.take_next() {
                    let _guard = InFlight {
                        queue: &queue,
                        path: path.clone(),
                    };
                    match handler(path.clone()).await {
                        Ok(()) => {
                            processed.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => warn!(path = %path.display(), "Work item failed: {}", e),
                    }
                }
            });
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("Queue worker aborted: {}", e);
            }
        }

        processed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_processes_in_priority_order() {
        let queue = Arc::new(BoundedWorkQueue::new());
        queue.add("c", 5);
        queue.add("a", 0);
        queue.add("b", 1);
        queue.add("a2", 0);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let count = queue
            .process(
                move |path: PathBuf| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.lock().unwrap().push(path.display().to_string());
                        Ok::<(), String>(())
                    }
                },
                1,
            )
            .await;

        assert_eq!(count, 4);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "a2", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_not_counted() {
        let queue = Arc::new(BoundedWorkQueue::new());
        for name in ["ok1", "bad", "ok2"] {
            queue.add(name, 0);
        }
        let count = queue
            .process(
                |path: PathBuf| async move {
                    if path == PathBuf::from("bad") {
                        Err("unreadable".to_string())
                    } else {
                        Ok(())
                    }
                },
                2,
            )
            .await;
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_in_flight_path_is_not_requeued() {
        let queue = Arc::new(BoundedWorkQueue::new());
        queue.add("busy.py", 0);

        let inner = Arc::clone(&queue);
        let handle = tokio::spawn(async move {
            inner
                .process(
                    |_path: PathBuf| async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<(), String>(())
                    },
                    1,
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!queue.add("busy.py", 0));
        assert!(queue.add("other.py", 0));

        assert_eq!(handle.await.unwrap(), 2);
        assert!(queue.add("busy.py", 0));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let queue = Arc::new(BoundedWorkQueue::new());
        for i in 0..8 {
            queue.add(format!("f{i}"), 0);
        }
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));

        let count = queue
            .process(
                move |_path: PathBuf| {
                    let (active, peak) = (Arc::clone(&a), Arc::clone(&p));
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<(), String>(())
                    }
                },
                3,
            )
            .await;

        assert_eq!(count, 8);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_empty_queue_returns_zero() {
        let queue = Arc::new(BoundedWorkQueue::new());
        let count = queue
            .process(|_path: PathBuf| async { Ok::<(), String>(()) }, 4)
            .await;
        assert_eq!(count, 0);
    }
}
