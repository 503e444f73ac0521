//! Work queue with delayed, deduplicated insertion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace};

use crate::heap::{DelayHeap, DelayedEntry, Insertion};
use crate::queue::{BlockingQueue, WorkItem};

/// A [`BlockingQueue`] that can also accept items to be released later.
///
/// Delayed items are handed over a bounded channel to a single background
/// task, the only owner of the delay heap. While an item is waiting in the
/// heap, further delayed adds for the same key only ever move its ready time
/// earlier.
pub struct DelayingQueue<T: WorkItem> {
    queue: Arc<BlockingQueue<T>>,
    waiting_tx: mpsc::Sender<DelayedEntry<T>>,
    stop_tx: watch::Sender<bool>,
}

impl<T: WorkItem> DelayingQueue<T> {
    /// Create the queue and spawn its waiting loop.
    ///
    /// `buffer` bounds how many delayed adds may be in flight to the loop
    /// before `add_after` callers wait; zero is treated as one. Must be called
    /// from within a Tokio runtime.
    pub fn new(buffer: usize) -> Self {
        let queue = Arc::new(BlockingQueue::new());
        let (waiting_tx, waiting_rx) = mpsc::channel(buffer.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);

        tokio::spawn(waiting_loop(Arc::clone(&queue), waiting_rx, stop_rx));

        Self {
            queue,
            waiting_tx,
            stop_tx,
        }
    }

    /// Make an item available to consumers immediately.
    pub fn add(&self, item: T) {
        self.queue.add(item);
    }

    /// Make an item available after `delay`.
    ///
    /// Waits while the hand-off buffer is full; gives up silently if the queue
    /// shuts down in the meantime.
    pub async fn add_after(&self, item: T, delay: Duration) {
        if self.queue.shutting_down() {
            return;
        }

        if delay.is_zero() {
            self.queue.add(item);
            return;
        }

        let entry = DelayedEntry {
            item,
            ready_at: Instant::now() + delay,
        };

        let mut stop_rx = self.stop_tx.subscribe();
        tokio::select! {
            _ = stop_rx.wait_for(|stopped| *stopped) => {
                debug!("queue stopped before delayed add was accepted");
            }
            sent = self.waiting_tx.send(entry) => {
                if sent.is_err() {
                    debug!("waiting loop gone, dropping delayed add");
                }
            }
        }
    }

    pub async fn get(&self) -> Option<T> {
        self.queue.get().await
    }

    /// Shut down the FIFO and stop the waiting loop. Idempotent.
    ///
    /// Items still waiting in the delay heap are discarded.
    pub fn shutdown(&self) {
        self.queue.shutdown();
        self.stop_tx
            .send_if_modified(|stopped| !std::mem::replace(stopped, true));
    }

    pub fn shutting_down(&self) -> bool {
        self.queue.shutting_down()
    }

    /// Number of items ready for consumers.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Owns the delay heap: releases matured entries into the FIFO and merges
/// incoming delayed adds, sleeping until the earliest ready time in between.
async fn waiting_loop<T: WorkItem>(
    queue: Arc<BlockingQueue<T>>,
    mut waiting_rx: mpsc::Receiver<DelayedEntry<T>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut heap = DelayHeap::new();

    loop {
        if queue.shutting_down() {
            break;
        }

        let now = Instant::now();
        while let Some(entry) = heap.pop_ready(now) {
            queue.add(entry.item);
        }

        let next_ready_at = heap.next_ready_at();

        tokio::select! {
            _ = stop_rx.wait_for(|stopped| *stopped) => break,
            _ = sleep_until(next_ready_at.unwrap_or(now)), if next_ready_at.is_some() => {}
            received = waiting_rx.recv() => {
                let Some(entry) = received else { break };
                admit(&queue, &mut heap, entry);

                // Merge the rest of a burst before re-arming the timer.
                while let Ok(entry) = waiting_rx.try_recv() {
                    admit(&queue, &mut heap, entry);
                }
            }
        }
    }

    debug!(discarded = heap.len(), "delaying queue waiting loop stopped");
}

fn admit<T: WorkItem>(queue: &BlockingQueue<T>, heap: &mut DelayHeap<T>, entry: DelayedEntry<T>) {
    if entry.ready_at <= Instant::now() {
        queue.add(entry.item);
        return;
    }

    let key = entry.item.key();
    match heap.insert(entry.item, entry.ready_at) {
        Insertion::Pushed => trace!(?key, "delayed item pending"),
        Insertion::Advanced => trace!(?key, "pending item moved earlier"),
        Insertion::Unchanged => trace!(?key, "pending item already due earlier"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::time::{sleep, timeout};

    #[derive(Debug, Clone, PartialEq)]
    struct Tick(&'static str);

    impl WorkItem for Tick {
        type Key = &'static str;

        fn key(&self) -> &'static str {
            self.0
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Slot(u32);

    impl WorkItem for Slot {
        type Key = u32;

        fn key(&self) -> u32 {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_is_immediate() {
        let queue = DelayingQueue::new(10);
        queue.add_after(Tick("now"), Duration::ZERO).await;

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some(Tick("now")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_respected() {
        let queue = DelayingQueue::new(10);
        let start = Instant::now();

        queue.add_after(Tick("later"), Duration::from_millis(50)).await;
        assert!(queue.is_empty());

        assert_eq!(queue.get().await, Some(Tick("later")));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_request_wins() {
        let queue = DelayingQueue::new(10);
        let start = Instant::now();

        queue.add_after(Tick("x"), Duration::from_millis(50)).await;
        sleep(Duration::from_millis(5)).await;
        queue.add_after(Tick("x"), Duration::from_millis(10)).await;

        assert_eq!(queue.get().await, Some(Tick("x")));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(15), "released early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(50), "released late: {elapsed:?}");

        // The earlier 50ms request must not produce a second delivery.
        sleep(Duration::from_millis(100)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_request_does_not_postpone() {
        let queue = DelayingQueue::new(10);
        let start = Instant::now();

        queue.add_after(Tick("x"), Duration::from_millis(10)).await;
        queue.add_after(Tick("x"), Duration::from_millis(80)).await;

        assert_eq!(queue.get().await, Some(Tick("x")));
        assert!(start.elapsed() < Duration::from_millis(80));

        sleep(Duration::from_millis(100)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_matured_items_release_in_ready_order() {
        let queue = DelayingQueue::new(10);

        queue.add_after(Tick("c"), Duration::from_millis(30)).await;
        queue.add_after(Tick("a"), Duration::from_millis(10)).await;
        queue.add_after(Tick("b"), Duration::from_millis(20)).await;

        assert_eq!(queue.get().await, Some(Tick("a")));
        assert_eq!(queue.get().await, Some(Tick("b")));
        assert_eq!(queue.get().await, Some(Tick("c")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediates_keep_fifo_order() {
        let queue = DelayingQueue::new(10);

        queue.add(Tick("1"));
        queue.add_after(Tick("2"), Duration::ZERO).await;
        queue.add(Tick("3"));

        assert_eq!(queue.get().await, Some(Tick("1")));
        assert_eq!(queue.get().await, Some(Tick("2")));
        assert_eq!(queue.get().await, Some(Tick("3")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_larger_than_buffer() {
        const KEYS: [&str; 8] = ["k0", "k1", "k2", "k3", "k4", "k5", "k6", "k7"];
        let queue = DelayingQueue::new(2);

        for (i, key) in KEYS.iter().enumerate() {
            queue
                .add_after(Tick(*key), Duration::from_millis(10 + i as u64))
                .await;
        }

        for key in KEYS {
            assert_eq!(queue.get().await, Some(Tick(key)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_unblocks_get_and_discards_pending() {
        let queue = Arc::new(DelayingQueue::new(10));
        queue.add_after(Tick("never"), Duration::from_secs(60)).await;

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.shutdown();
        let got = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("blocked get should return after shutdown")
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adds_after_shutdown_are_ignored() {
        let queue = DelayingQueue::new(10);
        queue.shutdown();
        queue.shutdown();

        queue.add(Tick("a"));
        queue.add_after(Tick("b"), Duration::ZERO).await;
        queue.add_after(Tick("c"), Duration::from_millis(5)).await;

        assert!(queue.shutting_down());
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_callers_waiting_on_full_buffer() {
        let queue = Arc::new(DelayingQueue::new(1));

        let mut callers = tokio::task::JoinSet::new();
        for i in 0..48 {
            let queue = Arc::clone(&queue);
            callers.spawn(async move {
                queue.add_after(Slot(i), Duration::from_secs(60 + u64::from(i))).await;
            });
        }
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        queue.shutdown();

        let mut returned = 0;
        timeout(Duration::from_secs(1), async {
            while let Some(joined) = callers.join_next().await {
                joined.unwrap();
                returned += 1;
            }
        })
        .await
        .expect("every add_after caller should return after shutdown");

        assert_eq!(returned, 48);
        assert_eq!(queue.get().await, None);
    }
}
