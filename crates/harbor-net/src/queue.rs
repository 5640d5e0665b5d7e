//! Bounded blocking FIFO used to hand events from reactors to workers.
//!
//! Mutex + condition variables; one `not_empty` side for consumers and one
//! `not_full` side for producers. FIFO order holds per producer; across
//! producers the interleaving is unspecified. `notify_stop` wakes every
//! waiter and makes further enqueues fail, so shutdown never deadlocks on a
//! full or empty queue.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct State<T> {
    items: VecDeque<T>,
    stopped: bool,
}

/// Bounded MPMC queue with blocking and non-blocking operations.
pub struct EventQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> EventQueue<T> {
    /// A queue holding at most `capacity` items. Capacity 0 is promoted to 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                stopped: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue, blocking while the queue is full. Returns false once the
    /// queue has been stopped (the item is dropped).
    pub fn enqueue(&self, item: T) -> bool {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.stopped {
            self.not_full.wait(&mut state);
        }
        if state.stopped {
            return false;
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        true
    }

    /// Enqueue without blocking. False if full or stopped.
    pub fn try_enqueue(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.stopped || state.items.len() >= self.capacity {
            return false;
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        true
    }

    /// Dequeue without blocking.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = state.items.pop_front();
        if item.is_some() {
            drop(state);
            self.not_full.notify_one();
        }
        item
    }

    /// Dequeue, blocking up to `timeout`. None on timeout or stop with an
    /// empty queue. Items already enqueued are still delivered after a stop.
    pub fn wait_dequeue(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.stopped {
                return None;
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                return state.items.pop_front();
            }
        }
    }

    /// Wake all waiters; subsequent enqueues fail. Queued items remain
    /// dequeueable so shutdown can drain them.
    pub fn notify_stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Clear the stopped flag, making the queue usable again.
    pub fn reset(&self) {
        self.state.lock().stopped = false;
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}
