//! Lazy Free Worker
//!
//! Background thread that drops evicted values and returns their bytes
//! to the memory tracker.

use crossbeam::channel::{unbounded, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

use crate::memory::MemoryTracker;
use crate::storage::Object;

enum Job {
    Free { obj: Object, bytes: usize },
    Shutdown,
}

/// Handle to the background free worker.
///
/// `enqueue` transfers ownership of a detached object to the worker;
/// the object's bytes stay charged to the tracker until the worker
/// drops it. `pending_jobs` is what the eviction backstop polls.
pub struct LazyFree {
    tx: Sender<Job>,
    pending: Arc<AtomicUsize>,
    paused: Arc<AtomicBool>,
    freed_objects: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl LazyFree {
    pub fn spawn(tracker: MemoryTracker) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let paused = Arc::new(AtomicBool::new(false));
        let freed_objects = Arc::new(AtomicU64::new(0));

        let worker_pending = pending.clone();
        let worker_paused = paused.clone();
        let worker_freed = freed_objects.clone();
        let handle = thread::Builder::new()
            .name("lazyfree".to_string())
            .spawn(move || {
                info!("lazy free worker started");
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Free { obj, bytes } => {
                            while worker_paused.load(Ordering::Acquire) {
                                thread::sleep(Duration::from_micros(100));
                            }
                            drop(obj);
                            tracker.release(bytes);
                            worker_pending.fetch_sub(1, Ordering::AcqRel);
                            worker_freed.fetch_add(1, Ordering::Relaxed);
                        }
                        Job::Shutdown => break,
                    }
                }
                info!("lazy free worker stopped");
            })
            .expect("failed to spawn lazy free worker");

        Self {
            tx,
            pending,
            paused,
            freed_objects,
            handle: Some(handle),
        }
    }

    /// Queue a detached object for destruction.
    pub fn enqueue(&self, obj: Object, bytes: usize) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(Job::Free { obj, bytes }).is_err() {
            // Worker already shut down; the job is lost but the counter
            // must not stay stuck.
            self.pending.fetch_sub(1, Ordering::AcqRel);
            debug!("lazy free worker gone, dropped job");
        }
    }

    /// Jobs queued but not yet destroyed.
    pub fn pending_jobs(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn freed_objects(&self) -> u64 {
        self.freed_objects.load(Ordering::Relaxed)
    }

    /// Throttle the worker. While paused, queued jobs stay pending.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    /// Detached handle for toggling the pause flag from another thread.
    pub fn pause_handle(&self) -> PauseHandle {
        PauseHandle(self.paused.clone())
    }
}

/// Cloneable control over the worker's pause flag.
#[derive(Clone)]
pub struct PauseHandle(Arc<AtomicBool>);

impl PauseHandle {
    pub fn set(&self, paused: bool) {
        self.0.store(paused, Ordering::Release);
    }
}

impl Drop for LazyFree {
    fn drop(&mut self) {
        self.paused.store(false, Ordering::Release);
        let _ = self.tx.send(Job::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Instant;

    fn wait_until(deadline_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed().as_millis() < deadline_ms as u128 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_worker_releases_bytes() {
        let tracker = MemoryTracker::new();
        tracker.charge(500);
        let worker = LazyFree::spawn(tracker.clone());

        let obj = Object::new_lru(Bytes::from_static(b"value"), 0);
        worker.enqueue(obj, 500);
        assert!(wait_until(2000, || worker.pending_jobs() == 0));
        assert_eq!(tracker.used_bytes(), 0);
        assert_eq!(worker.freed_objects(), 1);
    }

    #[test]
    fn test_paused_worker_holds_jobs() {
        let tracker = MemoryTracker::new();
        tracker.charge(100);
        let worker = LazyFree::spawn(tracker.clone());
        worker.set_paused(true);

        let obj = Object::new_lru(Bytes::from_static(b"v"), 0);
        worker.enqueue(obj, 100);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(worker.pending_jobs(), 1);
        assert_eq!(tracker.used_bytes(), 100);

        worker.set_paused(false);
        assert!(wait_until(2000, || worker.pending_jobs() == 0));
        assert_eq!(tracker.used_bytes(), 0);
    }
}
