//! sk-queue - Blocking multi-producer/multi-consumer queue.
//!
//! The pipeline uses one queue for received items and one for serialized
//! messages. Both ends are cloneable handles; a queue closes when one side
//! has no handles left:
//!
//! - consumers see [`QueueClosed`] once the queue is empty and every
//!   [`QueueProducer`] has been dropped, so dropping producers is how a stage
//!   signals end-of-stream downstream;
//! - producers get their item back in a [`PushError`] once every
//!   [`QueueConsumer`] has been dropped, so a failed downstream stage never
//!   leaves an upstream one blocked on a full queue.
//!
//! Order is FIFO per queue. The queue knows nothing about sequence numbers.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::fmt;
use std::time::Duration;
use tracing::trace;

pub use sk_error::QueueClosed;

/// Creates a queue holding at most `capacity` items, or an unbounded one for
/// `None`.
pub fn bounded<T>(capacity: Option<usize>) -> (QueueProducer<T>, QueueConsumer<T>) {
    let (sender, receiver) = match capacity {
        Some(cap) => crossbeam_channel::bounded(cap),
        None => crossbeam_channel::unbounded(),
    };
    trace!(capacity = ?capacity, "Created queue");
    (QueueProducer { sender }, QueueConsumer { receiver })
}

/// Item rejected by a closed queue.
pub struct PushError<T>(pub T);

impl<T> PushError<T> {
    /// Recover the item that could not be queued.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PushError(..)")
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Queue closed")
    }
}

impl<T> std::error::Error for PushError<T> {}

impl<T> From<PushError<T>> for QueueClosed {
    fn from(_: PushError<T>) -> Self {
        QueueClosed
    }
}

/// Sending half of a queue.
pub struct QueueProducer<T> {
    sender: Sender<T>,
}

impl<T> Clone for QueueProducer<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> QueueProducer<T> {
    /// Enqueue an item, blocking while a bounded queue is full.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        self.sender.send(item).map_err(|e| PushError(e.into_inner()))
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    /// Capacity, or `None` for an unbounded queue.
    pub fn capacity(&self) -> Option<usize> {
        self.sender.capacity()
    }
}

/// Receiving half of a queue.
pub struct QueueConsumer<T> {
    receiver: Receiver<T>,
}

impl<T> Clone for QueueConsumer<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> QueueConsumer<T> {
    /// Dequeue an item, blocking while the queue is empty.
    pub fn pop(&self) -> Result<T, QueueClosed> {
        self.receiver.recv().map_err(|_| QueueClosed)
    }

    /// Dequeue an item, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when the wait timed out with the queue still open.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, QueueClosed> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Ok(Some(item)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(QueueClosed),
        }
    }

    /// Dequeue an item if one is immediately available.
    pub fn try_pop(&self) -> Result<Option<T>, QueueClosed> {
        match self.receiver.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(QueueClosed),
        }
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Capacity, or `None` for an unbounded queue.
    pub fn capacity(&self) -> Option<usize> {
        self.receiver.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = bounded(Some(8));
        for i in 0..5 {
            tx.push(i).unwrap();
        }
        assert_eq!(rx.len(), 5);
        for i in 0..5 {
            assert_eq!(rx.pop().unwrap(), i);
        }
        assert!(rx.is_empty());
    }

    #[test]
    fn test_pop_after_producers_dropped_drains_then_closes() {
        let (tx, rx) = bounded(Some(4));
        tx.push("a").unwrap();
        tx.push("b").unwrap();
        drop(tx);

        assert_eq!(rx.pop().unwrap(), "a");
        assert_eq!(rx.pop().unwrap(), "b");
        assert_eq!(rx.pop(), Err(QueueClosed));
        assert_eq!(rx.try_pop(), Err(QueueClosed));
    }

    #[test]
    fn test_queue_stays_open_while_any_producer_lives() {
        let (tx, rx) = bounded::<u32>(Some(4));
        let tx2 = tx.clone();
        drop(tx);

        assert_eq!(rx.try_pop(), Ok(None));
        tx2.push(1).unwrap();
        drop(tx2);
        assert_eq!(rx.pop(), Ok(1));
        assert_eq!(rx.pop(), Err(QueueClosed));
    }

    #[test]
    fn test_push_fails_without_consumers() {
        let (tx, rx) = bounded(Some(1));
        drop(rx);

        let err = tx.push(42).unwrap_err();
        assert_eq!(err.to_string(), "Queue closed");
        assert_eq!(err.into_inner(), 42);
    }

    #[test]
    fn test_pop_timeout_on_empty_queue() {
        let (_tx, rx) = bounded::<u8>(Some(1));
        let start = Instant::now();
        assert_eq!(rx.pop_timeout(Duration::from_millis(20)), Ok(None));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_full_queue_blocks_until_consumed() {
        let (tx, rx) = bounded(Some(1));
        tx.push(1).unwrap();

        let producer = thread::spawn(move || {
            // Blocks until the consumer below makes room.
            tx.push(2).unwrap();
        });

        thread::sleep(Duration::from_millis(20));
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.pop().unwrap(), 1);
        producer.join().unwrap();
        assert_eq!(rx.pop().unwrap(), 2);
    }

    #[test]
    fn test_blocked_push_released_when_consumers_drop() {
        let (tx, rx) = bounded(Some(1));
        tx.push(1).unwrap();

        let producer = thread::spawn(move || tx.push(2).is_err());
        thread::sleep(Duration::from_millis(20));
        drop(rx);

        assert!(producer.join().unwrap());
    }

    #[test]
    fn test_multiple_producers_and_consumers() {
        let (tx, rx) = bounded(Some(16));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..250u64 {
                        tx.push(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        drop(tx);

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let rx = rx.clone();
                thread::spawn(move || {
                    let mut count = 0usize;
                    while rx.pop().is_ok() {
                        count += 1;
                    }
                    count
                })
            })
            .collect();
        drop(rx);

        for p in producers {
            p.join().unwrap();
        }
        let total: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn test_unbounded_capacity() {
        let (tx, rx) = bounded::<u8>(None);
        assert_eq!(tx.capacity(), None);
        assert_eq!(rx.capacity(), None);
        for i in 0..=255u8 {
            tx.push(i).unwrap();
        }
        assert_eq!(rx.len(), 256);
    }
}
