//! Bounded FIFO of pending event descriptors.
//!
//! The queue itself is not synchronized. The bus wraps it in a mutex and pairs
//! it with condition variables for the blocking posting modes.

use std::collections::VecDeque;

use super::entities::EventDesc;

/// Returned by [`EventDescQueue::try_enqueue`] when the queue is at capacity.
///
/// Carries the rejected descriptor back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFull(pub EventDesc);

/// Bounded FIFO of [`EventDesc`].
///
/// Length stays within `[0, capacity]`. Enqueue beyond capacity is rejected,
/// never dropped or overwritten.
#[derive(Debug)]
pub struct EventDescQueue {
    items: VecDeque<EventDesc>,
    capacity: usize,
}

impl EventDescQueue {
    /// Create an empty queue holding at most `capacity` descriptors.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append iff the queue has room.
    pub fn try_enqueue(&mut self, desc: EventDesc) -> Result<(), QueueFull> {
        if self.is_full() {
            return Err(QueueFull(desc));
        }
        self.items.push_back(desc);
        Ok(())
    }

    /// Remove the whole current contents in FIFO order.
    pub fn try_dequeue_all(&mut self) -> Vec<EventDesc> {
        self.items.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
