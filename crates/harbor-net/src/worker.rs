//! Worker pool — the business-logic side of the pipeline.
//!
//! N threads, each bound to its own event queue. Events are sharded by
//! `connection_id % N`, so every event of one connection is handled by the
//! same worker in submission order, while different connections proceed in
//! parallel. Workers never perform I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use harbor_core::event::NetworkEvent;

use crate::queue::EventQueue;

/// Callback invoked on a worker thread for every event. A blocking callback
/// stalls only its own worker.
pub type EventCallback = Arc<dyn Fn(&NetworkEvent) + Send + Sync>;

/// Fixed set of worker threads with per-worker queues.
pub struct WorkerPool {
    queues: Vec<Arc<EventQueue<NetworkEvent>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    callback: Arc<RwLock<Option<EventCallback>>>,
    running: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Build a pool with `workers` threads (not yet started) and the given
    /// per-worker queue capacity.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let queues = (0..workers)
            .map(|_| Arc::new(EventQueue::new(queue_capacity)))
            .collect();
        Self {
            queues,
            threads: Mutex::new(Vec::new()),
            callback: Arc::new(RwLock::new(None)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install or replace the event callback. Takes effect for the next
    /// dispatched event, including while the pool is running.
    pub fn set_callback(&self, callback: EventCallback) {
        *self.callback.write() = Some(callback);
    }

    /// Spawn the worker threads. False if already running.
    pub fn start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let mut threads = self.threads.lock();
        for (worker_id, queue) in self.queues.iter().enumerate() {
            let queue = queue.clone();
            let callback = self.callback.clone();
            let running = self.running.clone();

            let handle = std::thread::Builder::new()
                .name(format!("harbor-worker-{worker_id}"))
                .spawn(move || {
                    tracing::debug!(worker_id, "worker started");
                    while running.load(Ordering::Relaxed) {
                        if let Some(event) = queue.wait_dequeue(Duration::from_millis(1)) {
                            Self::dispatch(&callback, &event);
                        }
                    }
                    // Residual drain: events observed before the stop are
                    // still delivered, on this worker, in order.
                    while let Some(event) = queue.try_dequeue() {
                        Self::dispatch(&callback, &event);
                    }
                    tracing::debug!(worker_id, "worker stopped");
                })
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }
        true
    }

    /// Route an event to its connection's worker. Blocks while that worker's
    /// queue is full; false once the pool has been stopped (event dropped).
    pub fn submit_event(&self, event: NetworkEvent) -> bool {
        let worker = (event.connection_id() % self.queues.len() as u64) as usize;
        self.queues[worker].enqueue(event)
    }

    /// Stop the pool: wake every queue, join the threads. In-flight
    /// callbacks run to completion and queued events drain before the
    /// threads exit. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for queue in &self.queues {
            queue.notify_stop();
        }
        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn worker_count(&self) -> usize {
        self.queues.len()
    }

    fn dispatch(callback: &RwLock<Option<EventCallback>>, event: &NetworkEvent) {
        // Snapshot under a short read lock so a callback may replace itself.
        let snapshot = callback.read().clone();
        if let Some(cb) = snapshot {
            cb(event);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}
