//! Compute slot allocation.
//!
//! A slot is one unit of exclusive local compute capacity: one GPU, or
//! the single CPU execution context. A task must hold a slot for the
//! whole duration of generation. The pool is owned by the scheduler
//! task; generation tasks hand their slot index back over the outcome
//! channel, so acquisition and release are naturally serialised. A
//! reimplementation sharing the pool across OS threads must wrap it in
//! a mutex.

/// Fixed-size pool of compute slots, indexed from 0.
#[derive(Debug)]
pub struct SlotPool {
    /// `true` = busy.
    slots: Vec<bool>,
}

impl SlotPool {
    /// Pool with `count` slots (one per detected GPU).
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![false; count],
        }
    }

    /// Single always-available slot for CPU-only hosts.
    pub fn cpu() -> Self {
        Self::new(1)
    }

    /// Claim the lowest-indexed free slot, if any.
    pub fn acquire_first_free(&mut self) -> Option<usize> {
        let index = self.slots.iter().position(|busy| !busy)?;
        self.slots[index] = true;
        Some(index)
    }

    /// Mark a slot free. Idempotent; out-of-range indices are ignored.
    pub fn release(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = false;
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|&&busy| busy).count()
    }
}
