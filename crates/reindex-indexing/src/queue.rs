//! Bounded batch queue between the producer and the bulk submitter.
//!
//! `put` waits while the queue is full and `take` waits while it is empty.
//! A taken batch is leased until the consumer either `ack`s it or
//! `requeue`s it to the tail. Once the queue is closed, `take` keeps handing
//! out what is left and returns `None` only when nothing is queued and no
//! lease is outstanding, so a batch requeued after close is never lost.

use std::collections::VecDeque;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::Notify;

use reindex_types::Batch;

/// Returned by [`WorkQueue::put`] once the queue is closed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("queue is closed")]
pub struct QueueClosed;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Batch>,
    leased: usize,
    closed: bool,
}

/// Bounded FIFO of batches with leases.
#[derive(Debug)]
pub struct WorkQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    not_empty: Notify,
    not_full: Notify,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` produced batches.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a batch, waiting while the queue is full.
    pub async fn put(&self, batch: Batch) -> Result<(), QueueClosed> {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return Err(QueueClosed);
                }
                if state.items.len() < self.capacity {
                    state.items.push_back(batch);
                    drop(state);
                    self.not_empty.notify_waiters();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Take the next batch, waiting while none is available.
    ///
    /// Returns `None` once the queue is closed, empty and has no leases.
    pub async fn take(&self) -> Option<Batch> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(batch) = state.items.pop_front() {
                    state.leased += 1;
                    drop(state);
                    self.not_full.notify_waiters();
                    return Some(batch);
                }
                if state.closed && state.leased == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release the lease on a finished batch.
    pub fn ack(&self) {
        let mut state = self.lock();
        state.leased = state.leased.saturating_sub(1);
        drop(state);
        self.not_empty.notify_waiters();
    }

    /// Return a leased batch to the tail. Never waits, and works after close.
    pub fn requeue(&self, batch: Batch) {
        let mut state = self.lock();
        state.leased = state.leased.saturating_sub(1);
        state.items.push_back(batch);
        drop(state);
        self.not_empty.notify_waiters();
    }

    /// Stop accepting new batches. Queued and leased batches still drain.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Batches waiting to be taken.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued plus leased batches.
    pub fn backlog(&self) -> usize {
        let state = self.lock();
        state.items.len() + state.leased
    }

    /// Closed with nothing queued or leased.
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.closed && state.items.is_empty() && state.leased == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use reindex_types::Record;
    use serde_json::json;

    fn batch(cursors: &[i64]) -> Batch {
        Batch::new(
            cursors
                .iter()
                .map(|c| Record::new(*c, format!("doc-{}", c), json!({})))
                .collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = WorkQueue::new(3);
        queue.put(batch(&[1, 2])).await.unwrap();
        queue.put(batch(&[3, 4])).await.unwrap();

        assert_eq!(queue.take().await.unwrap().high_water(), 2);
        assert_eq!(queue.take().await.unwrap().high_water(), 4);
        assert_eq!(queue.backlog(), 2);
    }

    #[tokio::test]
    async fn test_put_waits_while_full() {
        let queue = Arc::new(WorkQueue::new(1));
        queue.put(batch(&[1])).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put(batch(&[2])).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.take().await.unwrap().high_water(), 1);
        producer.await.unwrap().unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_take_waits_for_put() {
        let queue = Arc::new(WorkQueue::new(1));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.put(batch(&[7])).await.unwrap();
        assert_eq!(consumer.await.unwrap().unwrap().high_water(), 7);
    }

    #[tokio::test]
    async fn test_close_drains_then_completes() {
        let queue = WorkQueue::new(2);
        queue.put(batch(&[1])).await.unwrap();
        queue.close();

        assert_eq!(queue.put(batch(&[2])).await, Err(QueueClosed));
        assert!(queue.take().await.is_some());
        queue.ack();
        assert!(queue.take().await.is_none());
        assert!(queue.is_drained());
    }

    #[tokio::test]
    async fn test_requeue_after_close_is_not_lost() {
        let queue = Arc::new(WorkQueue::new(2));
        queue.put(batch(&[1, 2])).await.unwrap();
        queue.put(batch(&[3, 4])).await.unwrap();
        queue.close();

        let first = queue.take().await.unwrap();
        let second = queue.take().await.unwrap();
        queue.ack();

        // One lease is still out, so take must wait instead of completing.
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.requeue(second);
        let retried = waiter.await.unwrap().unwrap();
        assert_eq!(retried.high_water(), 4);
        assert_eq!(first.high_water(), 2);

        queue.ack();
        assert!(queue.take().await.is_none());
    }

    #[tokio::test]
    async fn test_ack_wakes_waiting_take() {
        let queue = Arc::new(WorkQueue::new(1));
        queue.put(batch(&[1])).await.unwrap();
        let _leased = queue.take().await.unwrap();
        queue.close();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.ack();
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_put() {
        let queue = Arc::new(WorkQueue::new(1));
        queue.put(batch(&[1])).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put(batch(&[2])).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.close();
        assert_eq!(producer.await.unwrap(), Err(QueueClosed));
    }
}
