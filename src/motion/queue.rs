// src/motion/queue.rs
//! The bounded planner FIFO (spec §4.1, component C7).
//!
//! Ownership of a slot is carried entirely by `Block::state` rather than by
//! pointer identity (spec §9): an array-backed ring of `Block`s, with two
//! indices — `write_idx` (next slot `reserve_write` will hand out) and
//! `run_idx` (the slot that is either queued-next-up or currently
//! running). The queue is empty exactly when `write_idx == run_idx` and
//! that slot is `Empty`, matching the data-model invariant in spec §3.

use super::block::{Block, BlockState, MoveType};
use super::types::PLANNER_BUFFER_POOL_SIZE;
use crate::error::{MotionError, Result};

/// Magic sentinels bracketing the ring, checked by `assert_integrity`.
/// These stand in for the C source's struct-boundary guard words (spec
/// §4.1 "Errors": `assertion-violation` if magic-number guards are
/// corrupted). Safe Rust can't actually suffer the buffer overrun they
/// guarded against, but the check is kept as the load-bearing canary the
/// rest of the error model (and spec §7's fatal-assertion path) expects.
const MAGIC_HEAD: u32 = 0xCAFE_F00D;
const MAGIC_TAIL: u32 = 0xF00D_CAFE;

pub struct PlannerQueue {
    magic_head: u32,
    slots: [Block; PLANNER_BUFFER_POOL_SIZE],
    write_idx: usize,
    run_idx: usize,
    magic_tail: u32,
}

impl PlannerQueue {
    pub fn new() -> Self {
        Self {
            magic_head: MAGIC_HEAD,
            slots: core::array::from_fn(|_| Block::default()),
            write_idx: 0,
            run_idx: 0,
            magic_tail: MAGIC_TAIL,
        }
    }

    fn next(&self, idx: usize) -> usize {
        (idx + 1) % self.slots.len()
    }

    /// Fatal-assertion check for corrupted ring guards.
    pub fn assert_integrity(&self) -> Result<()> {
        if self.magic_head != MAGIC_HEAD {
            return Err(MotionError::QueueMagicCorrupt { slot: 0 });
        }
        if self.magic_tail != MAGIC_TAIL {
            return Err(MotionError::QueueMagicCorrupt {
                slot: self.slots.len() - 1,
            });
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.write_idx == self.run_idx && self.slots[self.write_idx].state == BlockState::Empty
    }

    pub fn is_full(&self) -> bool {
        self.slots[self.write_idx].state != BlockState::Empty
    }

    /// Borrow the next empty slot for writing, or report `QueueFull`.
    pub fn reserve_write(&mut self) -> Result<usize> {
        self.assert_integrity()?;
        if self.is_full() {
            return Err(MotionError::QueueFull);
        }
        let idx = self.write_idx;
        self.slots[idx].reset();
        self.slots[idx].state = BlockState::Loading;
        Ok(idx)
    }

    pub fn slot(&self, idx: usize) -> &Block {
        &self.slots[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut Block {
        &mut self.slots[idx]
    }

    /// Transition a reserved slot to `queued`, atomically with respect to
    /// the executor (spec §4.1 guarantee #3): the slot only ever reads as
    /// `Empty` or fully `Queued`, never partially written, because Rust's
    /// `&mut self` borrow already serializes writer and any would-be
    /// concurrent reader of this struct.
    pub fn commit_write(&mut self, idx: usize, move_type: MoveType) -> Result<()> {
        if idx != self.write_idx || self.slots[idx].state != BlockState::Loading {
            return Err(MotionError::RuntimeMagicCorrupt);
        }
        self.slots[idx].move_type = move_type;
        self.slots[idx].replannable = move_type == MoveType::Aline;
        self.slots[idx].state = BlockState::Queued;
        self.write_idx = self.next(self.write_idx);
        // Open-question resolution: clear `replannable` on the successor
        // (not-yet-built) slot so the back-replan sweep never walks past
        // the boundary of an unbuilt block.
        self.slots[self.write_idx].replannable = false;
        Ok(())
    }

    /// The currently running block, if any.
    pub fn peek_run(&self) -> Option<&Block> {
        if self.slots[self.run_idx].state == BlockState::Running {
            Some(&self.slots[self.run_idx])
        } else {
            None
        }
    }

    pub fn peek_run_mut(&mut self) -> Option<&mut Block> {
        if self.slots[self.run_idx].state == BlockState::Running {
            Some(&mut self.slots[self.run_idx])
        } else {
            None
        }
    }

    /// Promote the next queued block to `running`, if one is waiting.
    /// Returns a mutable reference to it.
    pub fn begin_run(&mut self) -> Option<&mut Block> {
        if self.slots[self.run_idx].state == BlockState::Queued {
            self.slots[self.run_idx].state = BlockState::Running;
        }
        self.peek_run_mut()
    }

    /// Free the running block and advance the run pointer. Returns
    /// whether the queue is now empty (spec §4.1 `advance_run` contract).
    /// Never advances while a block is still `Running` unless the caller
    /// has already finished it — callers are expected to only invoke this
    /// once the executor has declared the block done.
    pub fn advance_run(&mut self) -> Result<bool> {
        self.slots[self.run_idx].reset();
        self.run_idx = self.next(self.run_idx);
        Ok(self.is_empty())
    }

    /// Index of the most recently committed (newest) block, i.e. the slot
    /// immediately behind `write_idx`.
    pub fn newest_idx(&self) -> Option<usize> {
        let idx = if self.write_idx == 0 {
            self.slots.len() - 1
        } else {
            self.write_idx - 1
        };
        if self.slots[idx].state == BlockState::Empty {
            None
        } else {
            Some(idx)
        }
    }

    pub fn prev_idx(&self, idx: usize) -> usize {
        if idx == 0 { self.slots.len() - 1 } else { idx - 1 }
    }

    /// Slot immediately behind the run pointer — the block a feedhold's
    /// `decel-end` transition pins for the resumed re-run.
    pub fn next_run_idx(&self) -> usize {
        self.next(self.run_idx)
    }

    /// Slots newer than the run pointer, newest-first, that are still
    /// `replannable` — the back-propagation sweep's walk order (spec
    /// §4.3 "Back-propagation sweep" walks "replannable tail→head").
    /// Stops at the first non-replannable slot or at the run pointer.
    pub fn iterate_backward_from(&self, start_idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut idx = start_idx;
        loop {
            if idx == self.run_idx || !self.slots[idx].replannable {
                break;
            }
            out.push(idx);
            let prev = self.prev_idx(idx);
            if prev == idx {
                break;
            }
            idx = prev;
            if out.len() >= self.slots.len() {
                break;
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let mut n = 0usize;
        let mut idx = self.run_idx;
        loop {
            if self.slots[idx].state == BlockState::Empty {
                break;
            }
            n += 1;
            idx = self.next(idx);
            if idx == self.write_idx {
                break;
            }
        }
        n
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for PlannerQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_queue_is_empty() {
        let q = PlannerQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn reserve_commit_roundtrip() {
        let mut q = PlannerQueue::new();
        let idx = q.reserve_write().unwrap();
        q.slot_mut(idx).length = 10.0;
        q.commit_write(idx, MoveType::Aline).unwrap();
        assert!(!q.is_empty());
        assert_eq!(q.len(), 1);
        assert_eq!(q.slot(idx).state, BlockState::Queued);
    }

    #[test]
    fn queue_full_when_ring_saturated() {
        let mut q = PlannerQueue::new();
        for _ in 0..q.capacity() {
            let idx = q.reserve_write().unwrap();
            q.commit_write(idx, MoveType::Aline).unwrap();
        }
        assert!(matches!(q.reserve_write(), Err(MotionError::QueueFull)));
    }

    #[test]
    fn begin_and_advance_run() {
        let mut q = PlannerQueue::new();
        let idx = q.reserve_write().unwrap();
        q.commit_write(idx, MoveType::Aline).unwrap();
        assert!(q.peek_run().is_none());
        assert!(q.begin_run().is_some());
        assert!(q.peek_run().is_some());
        let now_empty = q.advance_run().unwrap();
        assert!(now_empty);
    }

    #[test]
    fn successor_slot_replannable_cleared_on_commit() {
        let mut q = PlannerQueue::new();
        let idx = q.reserve_write().unwrap();
        q.commit_write(idx, MoveType::Aline).unwrap();
        let successor = q.write_idx;
        assert!(!q.slot(successor).replannable);
    }

    #[test]
    fn corrupted_magic_is_fatal() {
        let mut q = PlannerQueue::new();
        q.magic_head = 0;
        assert!(matches!(
            q.reserve_write(),
            Err(MotionError::QueueMagicCorrupt { .. })
        ));
    }
}
