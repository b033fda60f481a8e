//! Multi-producer write queue drained by the poll loop.
//!
//! External callers append [`WriteRequest`] entries from any thread; the
//! poll loop alone drains them, in insertion order, removing an entry only
//! after its write is confirmed. A failed write leaves its entry at the
//! front and ends the drain for that cycle, so ordering toward the device
//! is preserved across cycles.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::error::Result;

/// One queued virtual-variable write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRequest {
    /// Virtual variable address.
    pub address: u16,
    /// Value to write.
    pub value: u16,
}

/// FIFO queue of pending writes, safe for concurrent producers.
#[derive(Debug, Default)]
pub struct CommandQueue {
    inner: Mutex<VecDeque<WriteRequest>>,
}

impl CommandQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a write request at the back of the queue.
    pub fn push(&self, address: u16, value: u16) {
        self.lock().push_back(WriteRequest { address, value });
    }

    /// Returns the number of pending entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns whether the queue has no pending entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes all pending entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drains pending entries in insertion order through `write`.
    ///
    /// Each entry is removed only once `write` confirms success. On the
    /// first failure the entry goes back to the front and the drain stops
    /// for this cycle; the entry will be retried next cycle, still ahead
    /// of everything queued behind it. Entries appended while draining are
    /// left for the next cycle.
    ///
    /// Returns the number of confirmed writes.
    pub fn drain_with<F>(&self, mut write: F) -> usize
    where
        F: FnMut(u16, u16) -> Result<()>,
    {
        let batch = self.lock().len();
        let mut completed = 0;

        for _ in 0..batch {
            let entry = match self.lock().pop_front() {
                Some(entry) => entry,
                None => break,
            };
            // The write runs without holding the lock so producers are
            // never blocked behind a slow device.
            match write(entry.address, entry.value) {
                Ok(()) => completed += 1,
                Err(e) => {
                    warn!(
                        address = entry.address,
                        value = entry.value,
                        error = %e,
                        "queued write failed, will retry next cycle"
                    );
                    self.lock().push_front(entry);
                    break;
                }
            }
        }
        completed
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<WriteRequest>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SappError;
    use std::sync::Arc;

    #[test]
    fn test_drain_in_insertion_order() {
        let queue = CommandQueue::new();
        queue.push(1, 10);
        queue.push(2, 20);
        queue.push(3, 30);

        let mut seen = Vec::new();
        let completed = queue.drain_with(|addr, value| {
            seen.push((addr, value));
            Ok(())
        });

        assert_eq!(completed, 3);
        assert!(queue.is_empty());
        assert_eq!(seen, vec![(1, 10), (2, 20), (3, 30)]);
    }

    #[test]
    fn test_failed_entry_blocks_later_ones() {
        let queue = CommandQueue::new();
        queue.push(1, 10);
        queue.push(2, 20);
        queue.push(3, 30);

        let mut seen = Vec::new();
        let completed = queue.drain_with(|addr, _| {
            seen.push(addr);
            if addr == 2 {
                Err(SappError::Timeout)
            } else {
                Ok(())
            }
        });

        // First confirmed and removed; second failed and retained at the
        // front; third untouched behind it.
        assert_eq!(completed, 1);
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(queue.len(), 2);

        let mut remaining = Vec::new();
        queue.drain_with(|addr, _| {
            remaining.push(addr);
            Ok(())
        });
        assert_eq!(remaining, vec![2, 3]);
    }

    #[test]
    fn test_entries_pushed_during_drain_wait_for_next_cycle() {
        let queue = Arc::new(CommandQueue::new());
        queue.push(1, 1);

        let producer = Arc::clone(&queue);
        let completed = queue.drain_with(|_, _| {
            producer.push(2, 2);
            Ok(())
        });

        assert_eq!(completed, 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(CommandQueue::new());
        let mut handles = Vec::new();
        for t in 0..4u16 {
            let queue = Arc::clone(&queue);
            handles.push(std::thread::spawn(move || {
                for i in 0..25u16 {
                    queue.push(t * 100 + i, i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 100);
    }
}
