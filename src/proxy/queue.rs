use std::fmt;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue capacity must be greater than zero")]
    ZeroCapacity,
}

/// Returned by [`BoundedQueue::insert`] once the queue has been closed; hands the item back.
#[derive(Error, PartialEq, Eq)]
#[error("queue is closed")]
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueClosed(..)")
    }
}

/// Fixed-capacity FIFO handoff between the accept loop and the worker threads.
///
/// Producers block while the queue is full and consumers block while it is empty. Both waits
/// re-check their predicate after every wakeup, so spurious wakeups and racing consumers are
/// harmless.
pub struct BoundedQueue<T> {
    ring: Mutex<Ring<T>>,
    slot_available: Condvar,
    item_available: Condvar,
}

struct Ring<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
    closed: bool,
}

impl<T> Ring<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    fn push_back(&mut self, item: T) {
        let tail = (self.head + self.len) % self.capacity();
        debug_assert!(self.slots[tail].is_none());
        self.slots[tail] = Some(item);
        self.len += 1;
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        item
    }
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        let slots = std::iter::repeat_with(|| None).take(capacity).collect();
        Ok(Self {
            ring: Mutex::new(Ring {
                slots,
                head: 0,
                len: 0,
                closed: false,
            }),
            slot_available: Condvar::new(),
            item_available: Condvar::new(),
        })
    }

    /// Appends `item`, blocking until a slot frees up. Fails only after [`close`](Self::close).
    pub fn insert(&self, item: T) -> Result<(), QueueClosed<T>> {
        let mut ring = self.ring.lock();
        while ring.is_full() && !ring.closed {
            self.slot_available.wait(&mut ring);
        }
        if ring.closed {
            return Err(QueueClosed(item));
        }
        ring.push_back(item);
        drop(ring);
        self.item_available.notify_one();
        Ok(())
    }

    /// Takes the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` only when the queue is closed and every item queued before the close has
    /// been handed out.
    pub fn remove(&self) -> Option<T> {
        let mut ring = self.ring.lock();
        while ring.len == 0 && !ring.closed {
            self.item_available.wait(&mut ring);
        }
        let item = ring.pop_front()?;
        drop(ring);
        self.slot_available.notify_one();
        Some(item)
    }

    /// Stops accepting new items and wakes every blocked producer and consumer.
    pub fn close(&self) {
        let mut ring = self.ring.lock();
        ring.closed = true;
        drop(ring);
        self.slot_available.notify_all();
        self.item_available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.ring.lock().closed
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("BoundedQueue")
            .field("capacity", &ring.capacity())
            .field("len", &ring.len)
            .field("closed", &ring.closed)
            .finish()
    }
}
