//! Bounded single-producer single-consumer ring buffer
//!
//! Power-of-two capacity with free-running indices: the write index is
//! published with `Release` and observed with `Acquire` (symmetrically for
//! the read index), which establishes happens-before for slot contents.
//! `push` and `pop` never block, never allocate and never reorder.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Ring<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    read: AtomicUsize,
    write: AtomicUsize,
}

// SAFETY: slot access is partitioned by the index protocol. The producer
// writes only slots in [read, write) complement and the consumer reads only
// published slots; Producer and Consumer each require &mut self, so at most
// one thread touches each end.
unsafe impl<T: Send> Send for Ring<T> {}
// SAFETY: see above; shared access is limited to the atomic indices.
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        let cap = capacity.max(2).next_power_of_two();
        let slots = (0..cap)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: cap - 1,
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
        }
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let read = *self.read.get_mut();
        let write = *self.write.get_mut();
        let mut idx = read;
        while idx != write {
            // SAFETY: slots in [read, write) were written and never popped.
            unsafe {
                (*self.slots[idx & self.mask].get()).assume_init_drop();
            }
            idx = idx.wrapping_add(1);
        }
    }
}

/// Producer end of an SPSC ring; not cloneable, `push` takes `&mut self`
pub struct Producer<T> {
    ring: Arc<Ring<T>>,
}

/// Consumer end of an SPSC ring; not cloneable, `pop` takes `&mut self`
pub struct Consumer<T> {
    ring: Arc<Ring<T>>,
}

/// Create a connected producer/consumer pair with at least `capacity` slots
pub fn spsc<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let ring = Arc::new(Ring::with_capacity(capacity));
    (
        Producer { ring: ring.clone() },
        Consumer { ring },
    )
}

impl<T> Producer<T> {
    /// Push an item; returns it back without blocking when the ring is full
    pub fn push(&mut self, item: T) -> Result<(), T> {
        let ring = &*self.ring;
        let write = ring.write.load(Ordering::Relaxed);
        let read = ring.read.load(Ordering::Acquire);
        if write.wrapping_sub(read) == ring.capacity() {
            return Err(item);
        }
        // SAFETY: the slot at `write` is outside [read, write) so the
        // consumer does not touch it until the store below publishes it.
        unsafe {
            (*ring.slots[write & ring.mask].get()).write(item);
        }
        ring.write.store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Whether a push would fail right now
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.ring.len() == self.ring.capacity()
    }

    /// Number of buffered items
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the ring is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }

    /// Total slot capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl<T> Consumer<T> {
    /// Pop the oldest item, if any; the read index advances only after the
    /// item has been moved out
    pub fn pop(&mut self) -> Option<T> {
        let ring = &*self.ring;
        let read = ring.read.load(Ordering::Relaxed);
        let write = ring.write.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        // SAFETY: `read < write` so this slot was published by the producer;
        // the Acquire load above synchronizes with its Release store.
        let item = unsafe { (*ring.slots[read & ring.mask].get()).assume_init_read() };
        ring.read.store(read.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Whether the ring is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }

    /// Number of buffered items
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Total slot capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}
