//! Blocking FIFO work queue.

use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;

/// An item that can travel through the work queues.
///
/// The key identifies the item for deduplication while it waits in the
/// delay heap.
pub trait WorkItem: Clone + Send + Sync + 'static {
    type Key: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
}

struct QueueState<T> {
    items: VecDeque<T>,
    shutting_down: bool,
}

/// FIFO queue whose consumers wait while it is empty.
///
/// `Notify` plays the role of a condition variable for the mutex-guarded
/// state: `add` wakes one waiter, `shutdown` wakes them all.
pub struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Notify,
}

impl<T: Send> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                shutting_down: false,
            }),
            available: Notify::new(),
        }
    }

    // A worker panicking mid-action never holds this lock, so the state is
    // still consistent after poisoning.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item. Dropped silently once shutdown has started.
    pub fn add(&self, item: T) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                debug!("queue shutting down, dropping item");
                return;
            }
            state.items.push_back(item);
        }
        self.available.notify_one();
    }

    /// Remove and return the head of the queue, waiting while it is empty.
    ///
    /// Returns `None` once shutdown has been signaled and the queue is
    /// drained; items added before shutdown are still handed out.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent add or
            // shutdown between the check and the await is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stop accepting items and wake every waiting consumer. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        self.available.notify_waiters();
    }

    pub fn shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

impl<T: Send> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
