// src/motion/block.rs
//! The planner buffer entry (spec §3 "Block") — the central entity shared
//! by the queue (C7), junction solver (C6), trapezoid planner (C5) and
//! segment executor (C3).

use super::types::{AxisVec, MAX_AXES};

/// Ownership state of a queue slot. Five values, as spec §9 prescribes in
/// place of pointer identity: "ownership of a block expressed by the
/// queue's state field (one of five values) rather than by pointer
/// identity".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockState {
    #[default]
    Empty,
    Loading,
    Queued,
    Pending,
    Running,
}

/// What kind of move this block represents. The executor dispatches on
/// this tag (spec §9: "a tagged union over `move-type` with a small
/// dispatch table at the executor's entry; no function pointer need
/// survive into the block itself").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveType {
    #[default]
    Null,
    Aline,
    Dwell,
    Start,
    Stop,
    End,
    Command,
}

/// A single planner buffer entry.
#[derive(Debug, Clone)]
pub struct Block {
    pub state: BlockState,
    pub move_type: MoveType,

    pub length: f64,
    pub unit_vector: AxisVec,
    pub target: AxisVec,
    pub work_offset: AxisVec,

    pub entry_velocity: f64,
    pub cruise_velocity: f64,
    pub exit_velocity: f64,

    pub entry_vmax: f64,
    pub cruise_vmax: f64,
    pub exit_vmax: f64,
    pub delta_vmax: f64,
    pub braking_velocity: f64,

    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,

    pub jerk: f64,
    /// Cached `1.0 / jerk`, refreshed whenever `jerk` is set, so the
    /// trapezoid planner's inner loop never divides.
    pub jerk_reciprocal: f64,
    /// Cached `jerk.cbrt()`, used by the degraded-trapezoid bisection.
    pub jerk_cube_root: f64,

    /// Whether the back-replan sweep may still revise this block.
    pub replannable: bool,

    /// Dwell duration in minutes; only meaningful for `MoveType::Dwell`.
    pub dwell_minutes: f64,
}

impl Default for Block {
    fn default() -> Self {
        Self {
            state: BlockState::Empty,
            move_type: MoveType::Null,
            length: 0.0,
            unit_vector: [0.0; MAX_AXES],
            target: [0.0; MAX_AXES],
            work_offset: [0.0; MAX_AXES],
            entry_velocity: 0.0,
            cruise_velocity: 0.0,
            exit_velocity: 0.0,
            entry_vmax: 0.0,
            cruise_vmax: 0.0,
            exit_vmax: 0.0,
            delta_vmax: 0.0,
            braking_velocity: 0.0,
            head_length: 0.0,
            body_length: 0.0,
            tail_length: 0.0,
            jerk: 1.0,
            jerk_reciprocal: 1.0,
            jerk_cube_root: 1.0,
            replannable: false,
            dwell_minutes: 0.0,
        }
    }
}

impl Block {
    /// Reset a slot to its post-`memset`-zero state, as spec §4.1 requires
    /// of `reserve_write`: "Slots returned by `reserve_write` are
    /// memset-zeroed."
    pub fn reset(&mut self) {
        *self = Block::default();
    }

    pub fn set_jerk(&mut self, jerk: f64) {
        self.jerk = jerk;
        self.jerk_reciprocal = 1.0 / jerk;
        self.jerk_cube_root = jerk.cbrt();
    }

    /// Sum of the three profile lengths; compared against `length` within
    /// `LENGTH_EPSILON` by testable-property #1.
    pub fn profile_length(&self) -> f64 {
        self.head_length + self.body_length + self.tail_length
    }

    /// Invariant check for property #2 (`0 <= entry <= cruise >= exit >= 0`
    /// and `cruise <= cruise_vmax`), used by tests and by debug assertions
    /// in the planner.
    pub fn velocities_consistent(&self) -> bool {
        self.entry_velocity >= 0.0
            && self.entry_velocity <= self.cruise_velocity
            && self.cruise_velocity >= self.exit_velocity
            && self.exit_velocity >= 0.0
            && self.cruise_velocity <= self.cruise_vmax + 1e-6
    }
}
