//! Fixed-capacity FIFO guarded by a single mutex.
//!
//! This is the queue between the receive, process and send loops of the UDP
//! transport. It never blocks: `push` on a full buffer hands the item back
//! and `pop` on an empty buffer returns `None`, so the caller decides whether
//! to drop, retry or back off.

use parking_lot::Mutex;

struct Slots<T> {
    items: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    count: usize,
}

pub struct RingBuffer<T> {
    slots: Mutex<Slots<T>>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a buffer holding at most `capacity` items.
    ///
    /// A zero capacity is bumped to one so that `push` can ever succeed.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let items = (0..capacity).map(|_| None).collect::<Vec<_>>();

        Self {
            slots: Mutex::new(Slots {
                items: items.into_boxed_slice(),
                head: 0,
                tail: 0,
                count: 0,
            }),
            capacity,
        }
    }

    /// Appends an item, or returns it untouched when the buffer is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut slots = self.slots.lock();
        if slots.count == self.capacity {
            return Err(item);
        }

        let head = slots.head;
        slots.items[head] = Some(item);
        slots.head = (head + 1) % self.capacity;
        slots.count += 1;
        Ok(())
    }

    /// Removes the oldest item.
    pub fn pop(&self) -> Option<T> {
        let mut slots = self.slots.lock();
        if slots.count == 0 {
            return None;
        }

        let tail = slots.tail;
        let item = slots.items[tail].take();
        slots.tail = (tail + 1) % self.capacity;
        slots.count -= 1;
        item
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().count == 0
    }

    pub fn is_full(&self) -> bool {
        self.slots.lock().count == self.capacity
    }

    /// Number of queued items at the time of the call.
    pub fn len(&self) -> usize {
        self.slots.lock().count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_pop_fifo() {
        let buffer = RingBuffer::new(4);
        assert!(buffer.is_empty());

        for i in 0..3 {
            assert!(buffer.push(i).is_ok());
        }
        assert_eq!(buffer.len(), 3);

        assert_eq!(buffer.pop(), Some(0));
        assert_eq!(buffer.pop(), Some(1));
        assert_eq!(buffer.pop(), Some(2));
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn test_push_fails_when_full() {
        let buffer = RingBuffer::new(2);
        assert!(buffer.push("a").is_ok());
        assert!(buffer.push("b").is_ok());
        assert!(buffer.is_full());

        assert_eq!(buffer.push("c"), Err("c"));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.pop(), Some("a"));
        assert!(buffer.push("c").is_ok());
    }

    #[test]
    fn test_wraps_around() {
        let buffer = RingBuffer::new(3);
        for round in 0..10 {
            assert!(buffer.push(round * 2).is_ok());
            assert!(buffer.push(round * 2 + 1).is_ok());
            assert_eq!(buffer.pop(), Some(round * 2));
            assert_eq!(buffer.pop(), Some(round * 2 + 1));
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_never_exceeds_capacity_and_matches_model() {
        // Deterministic pseudo-random op sequence checked against a VecDeque.
        let capacity = 5;
        let buffer = RingBuffer::new(capacity);
        let mut model = VecDeque::new();
        let mut state: u32 = 0x9E37_79B9;

        for value in 0..2_000u32 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;

            if state % 3 == 0 {
                assert_eq!(buffer.pop(), model.pop_front());
            } else if buffer.push(value).is_ok() {
                model.push_back(value);
            } else {
                assert_eq!(model.len(), capacity);
            }

            assert!(buffer.len() <= capacity);
            assert_eq!(buffer.len(), model.len());
        }
    }

    #[test]
    fn test_concurrent_producer_consumer_keeps_order() {
        let buffer = Arc::new(RingBuffer::new(16));
        let producer_buffer = Arc::clone(&buffer);

        let producer = thread::spawn(move || {
            let mut next = 0u32;
            while next < 1_000 {
                if producer_buffer.push(next).is_ok() {
                    next += 1;
                } else {
                    thread::yield_now();
                }
            }
        });

        let mut received = Vec::with_capacity(1_000);
        while received.len() < 1_000 {
            match buffer.pop() {
                Some(value) => received.push(value),
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();

        assert!(received.windows(2).all(|pair| pair[0] + 1 == pair[1]));
    }

    #[test]
    fn test_zero_capacity_is_bumped() {
        let buffer = RingBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        assert!(buffer.push(7).is_ok());
        assert_eq!(buffer.push(8), Err(8));
    }
}
