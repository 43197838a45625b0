//! Block propagation queue.
//!
//! [`Broadcaster::enqueue`](crate::broadcaster::Broadcaster::enqueue) hands
//! blocks to a [`BlockQueue`]; the fetcher/relay component on the other end
//! drains them from the [`BlockQueueReceiver`] and owns deduplication,
//! ordering against the chain, and relay to other peers.
//!
//! Pushes are lock-free and never block, so consensus threads can enqueue
//! concurrently with inbound message handling.

use {
    crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender},
    log::{trace, warn},
    std::time::Duration,
};

/// A block together with the peer it came from (or is attributed to).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedBlock<B> {
    /// Identifier of the originating peer.
    pub origin: String,
    /// The block itself.
    pub block: B,
}

/// Producer side of the propagation queue.
#[derive(Debug)]
pub struct BlockQueue<B> {
    sender: Sender<QueuedBlock<B>>,
}

impl<B> Clone for BlockQueue<B> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Consumer side of the propagation queue.
#[derive(Debug)]
pub struct BlockQueueReceiver<B> {
    receiver: Receiver<QueuedBlock<B>>,
}

/// Create a connected queue pair.
pub fn block_queue<B>() -> (BlockQueue<B>, BlockQueueReceiver<B>) {
    let (sender, receiver) = unbounded();
    (BlockQueue { sender }, BlockQueueReceiver { receiver })
}

impl<B> BlockQueue<B> {
    /// Push a block. Returns `false` if the consumer is gone and the block
    /// was discarded.
    pub fn push(&self, origin: &str, block: B) -> bool {
        let queued = QueuedBlock {
            origin: origin.to_string(),
            block,
        };
        if self.sender.send(queued).is_err() {
            warn!("block queue consumer dropped, discarding block from {origin}");
            return false;
        }
        trace!("queued block from {origin}");
        true
    }
}

impl<B> BlockQueueReceiver<B> {
    /// Take the next block if one is waiting.
    pub fn try_recv(&self) -> Option<QueuedBlock<B>> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next block.
    ///
    /// Returns `None` on timeout or when every producer is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<QueuedBlock<B>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(queued) => Some(queued),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take every block currently queued.
    pub fn drain(&self) -> Vec<QueuedBlock<B>> {
        self.receiver.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::{collections::HashSet, thread},
    };

    #[test]
    fn test_fifo_order() {
        let (queue, rx) = block_queue();
        queue.push("a", 1u64);
        queue.push("b", 2u64);
        assert_eq!(rx.len(), 2);
        let first = rx.try_recv().unwrap();
        assert_eq!(first.origin, "a");
        assert_eq!(first.block, 1);
        assert_eq!(rx.try_recv().unwrap().block, 2);
        assert!(rx.is_empty());
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_push_after_consumer_dropped() {
        let (queue, rx) = block_queue::<u64>();
        drop(rx);
        assert!(!queue.push("a", 1));
    }

    #[test]
    fn test_concurrent_pushes_lose_nothing() {
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 250;

        let (queue, rx) = block_queue();
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        queue.push(&format!("peer-{t}"), t * PER_THREAD + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let drained = rx.drain();
        assert_eq!(drained.len() as u64, THREADS * PER_THREAD);
        let unique: HashSet<u64> = drained.iter().map(|q| q.block).collect();
        assert_eq!(unique.len() as u64, THREADS * PER_THREAD);
    }
}
