//! Fixed-capacity ring buffer with overwrite-oldest semantics.

/// Bounded history. Pushing into a full ring overwrites the oldest slot.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Index of the oldest element.
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Create a ring holding at most `capacity` items. A zero capacity is
    /// raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `item`, returning the evicted oldest item when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let cap = self.capacity();
        if self.len < cap {
            let idx = (self.head + self.len) % cap;
            self.slots[idx] = Some(item);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(item);
            self.head = (self.head + 1) % cap;
            evicted
        }
    }

    /// Drop items from the oldest end while `pred` holds.
    pub fn drop_front_while(&mut self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let cap = self.capacity();
        let mut dropped = 0;
        while self.len > 0 {
            let oldest = match self.slots[self.head].as_ref() {
                Some(item) => item,
                None => break,
            };
            if !pred(oldest) {
                break;
            }
            self.slots[self.head] = None;
            self.head = (self.head + 1) % cap;
            self.len -= 1;
            dropped += 1;
        }
        dropped
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let cap = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % cap].as_ref())
    }
}
