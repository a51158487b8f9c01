//! Subscriber table for one bus.
//!
//! Generic over the callback type so the domain layer does not depend on the
//! consumer port. The bus instantiates it with `Arc<dyn EventConsumer>`.

use super::entities::{EventFilter, EventId, SubscriberId};

/// One registered subscriber.
#[derive(Debug, Clone)]
pub struct SubscriberEntry<C> {
    pub id: SubscriberId,
    pub consumer: C,
    pub filter: EventFilter,
}

/// Why an insertion was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddRejection {
    /// An entry with the same identity exists
    Conflict,
    /// The table holds `max` entries already
    TooMany { max: usize },
}

/// Bounded, insertion-ordered subscriber table.
#[derive(Debug)]
pub struct SubscriberRegistry<C> {
    entries: Vec<SubscriberEntry<C>>,
    max: usize,
}

impl<C> SubscriberRegistry<C> {
    pub fn new(max: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max),
            max,
        }
    }

    /// Insert a new entry.
    ///
    /// Identity is checked before capacity, so a duplicate on a full table
    /// reports `Conflict`. The table is unchanged on rejection.
    pub fn add(&mut self, entry: SubscriberEntry<C>) -> Result<(), AddRejection> {
        if self.contains(entry.id) {
            return Err(AddRejection::Conflict);
        }
        if self.entries.len() >= self.max {
            return Err(AddRejection::TooMany { max: self.max });
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Remove by identity. Returns the removed entry, or `None` when absent.
    pub fn remove(&mut self, id: SubscriberId) -> Option<SubscriberEntry<C>> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Invoke `f` for every entry whose filter accepts `event_id`, in
    /// insertion order.
    pub fn for_each_matching<F>(&self, event_id: EventId, mut f: F)
    where
        F: FnMut(&SubscriberEntry<C>),
    {
        self.entries
            .iter()
            .filter(|e| e.filter.matches(event_id))
            .for_each(|e| f(e));
    }

    /// True if at least one entry accepts `event_id`.
    pub fn has_match(&self, event_id: EventId) -> bool {
        self.entries.iter().any(|e| e.filter.matches(event_id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max
    }
}

impl<C: Clone> SubscriberRegistry<C> {
    /// Clone the callbacks of every matching entry, in insertion order.
    pub fn matching(&self, event_id: EventId) -> Vec<C> {
        let mut out = Vec::new();
        self.for_each_matching(event_id, |e| out.push(e.consumer.clone()));
        out
    }

    /// Clone every entry, in insertion order.
    pub fn snapshot(&self) -> Vec<SubscriberEntry<C>> {
        self.entries.clone()
    }
}
