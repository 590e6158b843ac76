//! Wait-free single-producer single-consumer queue
//!
//! Bounded FIFO used to move frame buffers between an ingest worker and
//! the synchronizer without locks or hot-path allocation. The SPSC
//! contract is enforced at the type level: [`channel`] returns split
//! [`Producer`] and [`Consumer`] halves, neither is `Clone`, and each
//! half moves into the one thread allowed to use it.
//!
//! # Algorithm
//!
//! A Lamport ring over `capacity + 1` slots. The producer owns the tail
//! index, the consumer owns the head index. The producer writes the slot
//! and then publishes it with a Release store of the tail; the consumer
//! pairs that with an Acquire load before reading the slot. That
//! Release/Acquire edge is the only synchronization between the two
//! threads, and it covers everything written into the element before the
//! push. No compare-and-swap is needed with one writer per index.
//!
//! Head and tail live on separate cache lines (`CachePadded`) so the
//! producer and consumer do not false-share.
//!
//! Both operations are wait-free: `push` returns the value back when the
//! ring is full, `pop` returns `None` when it is empty, and neither ever
//! blocks or spins.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared<T> {
    /// Ring storage, one slot more than the usable capacity
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,

    /// Next slot to pop; advanced only by the consumer
    head: CachePadded<AtomicUsize>,

    /// Next slot to push; advanced only by the producer
    tail: CachePadded<AtomicUsize>,
}

// The queue moves T values between exactly two threads; slots are only
// touched by the side that owns them per the head/tail protocol.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    fn advance(&self, index: usize) -> usize {
        if index + 1 == self.slots.len() {
            0
        } else {
            index + 1
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Both endpoints are gone, so head/tail are quiescent.
        let mut head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        while head != tail {
            unsafe { (*self.slots[head].get()).assume_init_drop() };
            head = self.advance(head);
        }
    }
}

/// Producer half of an SPSC queue
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer half of an SPSC queue
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

/// Create a bounded SPSC queue holding up to `capacity` elements
pub fn channel<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(capacity > 0, "spsc capacity must be nonzero");

    let slots = (0..capacity + 1)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let shared = Arc::new(Shared {
        slots,
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
    });

    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

impl<T> Producer<T> {
    /// Enqueue a value, returning it back if the queue is full
    ///
    /// Wait-free; never blocks.
    pub fn push(&mut self, value: T) -> std::result::Result<(), T> {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        let next = self.shared.advance(tail);

        if next == self.shared.head.load(Ordering::Acquire) {
            return Err(value);
        }

        unsafe { (*self.shared.slots[tail].get()).write(value) };
        self.shared.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Number of elements currently queued
    ///
    /// Exact when the queue is quiescent; a snapshot otherwise.
    pub fn len(&self) -> usize {
        len(&self.shared)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued elements
    pub fn capacity(&self) -> usize {
        self.shared.slots.len() - 1
    }
}

impl<T> Consumer<T> {
    /// Dequeue the oldest value, or `None` if the queue is empty
    ///
    /// Wait-free; never blocks.
    pub fn pop(&mut self) -> Option<T> {
        let head = self.shared.head.load(Ordering::Relaxed);

        if head == self.shared.tail.load(Ordering::Acquire) {
            return None;
        }

        let value = unsafe { (*self.shared.slots[head].get()).assume_init_read() };
        self.shared.head.store(self.shared.advance(head), Ordering::Release);
        Some(value)
    }

    /// Number of elements currently queued
    ///
    /// Exact when the queue is quiescent; a snapshot otherwise.
    pub fn len(&self) -> usize {
        len(&self.shared)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len() - 1
    }
}

fn len<T>(shared: &Shared<T>) -> usize {
    let head = shared.head.load(Ordering::Acquire);
    let tail = shared.tail.load(Ordering::Acquire);
    if tail >= head {
        tail - head
    } else {
        tail + shared.slots.len() - head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn fifo_order() {
        let (mut tx, mut rx) = channel(8);
        for i in 0..8 {
            tx.push(i).unwrap();
        }
        for i in 0..8 {
            assert_eq!(rx.pop(), Some(i));
        }
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn pop_empty_returns_none() {
        let (_tx, mut rx) = channel::<u32>(4);
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn saturation_then_drain() {
        // Fill to capacity, overflow attempts bounce, drain, refill.
        let (mut tx, mut rx) = channel(8);
        for i in 0..8u32 {
            tx.push(i).unwrap();
        }
        let mut bounced = Vec::new();
        for i in 8..13u32 {
            bounced.push(tx.push(i).unwrap_err());
        }
        assert_eq!(bounced, vec![8, 9, 10, 11, 12]);

        for i in 0..8u32 {
            assert_eq!(rx.pop(), Some(i));
        }
        for v in bounced {
            tx.push(v).unwrap();
        }
        for i in 8..13u32 {
            assert_eq!(rx.pop(), Some(i));
        }
        assert_eq!(rx.pop(), None);
        assert_eq!(tx.len(), 0);
    }

    #[test]
    fn len_tracks_contents() {
        let (mut tx, mut rx) = channel(4);
        assert_eq!(tx.len(), 0);
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        assert_eq!(tx.len(), 2);
        assert_eq!(rx.len(), 2);
        rx.pop();
        assert_eq!(rx.len(), 1);
        assert_eq!(tx.capacity(), 4);
    }

    #[test]
    fn cross_thread_sequence_integrity() {
        // Randomized interleaving: the consumer must observe exactly the
        // produced sequence, with no loss or duplication.
        use rand::Rng;

        const COUNT: u64 = 100_000;
        let (mut tx, mut rx) = channel(16);

        let producer = thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for i in 0..COUNT {
                let mut value = i;
                loop {
                    match tx.push(value) {
                        Ok(()) => break,
                        Err(v) => {
                            value = v;
                            thread::yield_now();
                        }
                    }
                }
                if rng.gen_ratio(1, 4096) {
                    thread::sleep(std::time::Duration::from_micros(50));
                }
            }
        });

        let mut expected = 0u64;
        while expected < COUNT {
            if let Some(value) = rx.pop() {
                assert_eq!(value, expected);
                expected += 1;
            } else {
                thread::yield_now();
            }
        }
        assert_eq!(rx.pop(), None);
        producer.join().unwrap();
    }

    #[test]
    fn unconsumed_elements_dropped_once() {
        #[derive(Debug)]
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let (mut tx, rx) = channel(8);
        for _ in 0..3 {
            tx.push(Counted(Arc::clone(&drops))).unwrap();
        }
        drop(tx);
        drop(rx);
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }
}
