// src/motion/feedhold.rs
//! Feedhold controller (spec §4.6, component C4): the pause/decelerate/
//! resume state machine. Runs at LO priority — mutations only ever happen
//! on an executor tick.

use super::block::Block;
use super::trapezoid::jerk_distance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedholdState {
    #[default]
    Off,
    Sync,
    DecelContinue,
    DecelToZero,
    DecelEnd,
    Pending,
    Hold,
}

#[derive(Debug, Default)]
pub struct FeedholdController {
    state: FeedholdState,
}

impl FeedholdController {
    pub fn new() -> Self {
        Self { state: FeedholdState::Off }
    }

    pub fn state(&self) -> FeedholdState {
        self.state
    }

    /// A hold request arriving at any time just flips the state to `sync`;
    /// the actual re-planning happens on the next executor entry.
    pub fn request_hold(&mut self) {
        if self.state == FeedholdState::Off {
            self.state = FeedholdState::Sync;
        }
    }

    /// On the first executor entry while `sync`: snapshot the current
    /// segment velocity as the block's new entry/cruise, clear the head
    /// and body, and recompute a tail from the braking-distance formula.
    /// `length_remaining` is the distance from the hold point to the
    /// block's original target.
    pub fn enter_sync(&mut self, block: &mut Block, segment_velocity: f64, length_remaining: f64) {
        block.entry_velocity = segment_velocity;
        block.cruise_velocity = segment_velocity;
        block.head_length = 0.0;
        block.body_length = 0.0;

        let braking_distance = jerk_distance(segment_velocity, 0.0, block.jerk);

        if (braking_distance - length_remaining).abs() < 1e-3 {
            block.tail_length = length_remaining;
            block.exit_velocity = 0.0;
            self.state = FeedholdState::DecelToZero;
        } else if braking_distance > length_remaining {
            // Can't stop within this block; compute the velocity reachable
            // over the available length and carry the remaining decel to
            // the following block.
            let v = velocity_reachable_over(length_remaining, segment_velocity, block.jerk);
            block.tail_length = length_remaining;
            block.exit_velocity = v;
            self.state = FeedholdState::DecelContinue;
        } else {
            block.tail_length = length_remaining;
            block.exit_velocity = 0.0;
            self.state = FeedholdState::DecelToZero;
        }
    }

    /// Each new block entered while `decel-continue`: its entry equals the
    /// previous block's exit, and it becomes a tail-only move whose exit
    /// is again computed from braking distance.
    pub fn continue_across_block(&mut self, block: &mut Block, entry_velocity: f64) {
        block.entry_velocity = entry_velocity;
        block.cruise_velocity = entry_velocity;
        block.head_length = 0.0;
        block.body_length = 0.0;
        block.tail_length = block.length;

        let braking_distance = jerk_distance(entry_velocity, 0.0, block.jerk);
        if braking_distance <= block.length + 1e-3 {
            block.exit_velocity = 0.0;
            self.state = FeedholdState::DecelToZero;
        } else {
            block.exit_velocity = velocity_reachable_over(block.length, entry_velocity, block.jerk);
        }
    }

    /// The executor reports the decel-to-zero tail finished cleanly.
    pub fn on_decel_complete(&mut self) {
        if self.state == FeedholdState::DecelToZero {
            self.state = FeedholdState::DecelEnd;
        }
    }

    /// `decel-end`: invalidate the runtime block, pin the buffered block's
    /// `entry_vmax` to zero and recompute its length from the current
    /// position to the original target, then move to `pending`.
    pub fn finish_decel(&mut self, buffered_block: &mut Block, position_to_target_length: f64) {
        buffered_block.entry_vmax = 0.0;
        buffered_block.length = position_to_target_length;
        self.state = FeedholdState::Pending;
    }

    /// Step generator reports idle: transition to fully stopped.
    pub fn on_steppers_idle(&mut self) {
        if self.state == FeedholdState::Pending {
            self.state = FeedholdState::Hold;
        }
    }

    /// External resume request, run at task level. Returns `true` if there
    /// is runnable work to resume (caller should request an exec cycle);
    /// `false` means the machine goes to a full stop with an empty queue.
    pub fn resume(&mut self, queue_has_work: bool) -> bool {
        if self.state != FeedholdState::Hold {
            return false;
        }
        if queue_has_work {
            self.state = FeedholdState::Off;
            true
        } else {
            self.state = FeedholdState::Off;
            false
        }
    }

    pub fn is_holding(&self) -> bool {
        !matches!(self.state, FeedholdState::Off)
    }
}

/// Velocity reachable by decelerating from `v0` over `length` at jerk `j`
/// (the inverse of `jerk_distance` solved for `v2`, via bisection since
/// the closed form isn't invertible).
fn velocity_reachable_over(length: f64, v0: f64, jerk: f64) -> f64 {
    let mut lo = 0.0;
    let mut hi = v0;
    for _ in 0..10 {
        let mid = 0.5 * (lo + hi);
        if jerk_distance(v0, mid, jerk) <= length {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_hold_from_off_enters_sync() {
        let mut fh = FeedholdController::new();
        fh.request_hold();
        assert_eq!(fh.state(), FeedholdState::Sync);
    }

    #[test]
    fn ample_room_decelerates_to_zero_in_block() {
        let mut fh = FeedholdController::new();
        fh.request_hold();
        let mut block = Block { jerk: 1.0e9, ..Block::default() };
        fh.enter_sync(&mut block, 1000.0, 1000.0);
        assert_eq!(fh.state(), FeedholdState::DecelToZero);
        assert_eq!(block.exit_velocity, 0.0);
    }

    #[test]
    fn tight_room_spills_decel_into_next_block() {
        let mut fh = FeedholdController::new();
        fh.request_hold();
        let mut block = Block { jerk: 1.0e3, ..Block::default() };
        fh.enter_sync(&mut block, 6000.0, 0.01);
        assert_eq!(fh.state(), FeedholdState::DecelContinue);
        assert!(block.exit_velocity > 0.0);
    }

    #[test]
    fn full_lifecycle_reaches_hold_then_resumes() {
        let mut fh = FeedholdController::new();
        fh.request_hold();
        let mut block = Block { jerk: 1.0e9, ..Block::default() };
        fh.enter_sync(&mut block, 1000.0, 1000.0);
        fh.on_decel_complete();
        assert_eq!(fh.state(), FeedholdState::DecelEnd);
        let mut buffered = Block::default();
        fh.finish_decel(&mut buffered, 500.0);
        assert_eq!(fh.state(), FeedholdState::Pending);
        assert_eq!(buffered.entry_vmax, 0.0);
        fh.on_steppers_idle();
        assert_eq!(fh.state(), FeedholdState::Hold);
        assert!(fh.resume(true));
        assert_eq!(fh.state(), FeedholdState::Off);
    }
}
