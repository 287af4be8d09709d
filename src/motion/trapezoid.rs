// src/motion/trapezoid.rs
//! Trapezoid planner (spec §4.3, component C5): converts a block's length
//! and entry/cruise/exit velocities into head/body/tail lengths, and the
//! backward-replan sweep that keeps neighboring blocks' junction
//! velocities consistent as new blocks arrive.

use super::block::{Block, BlockState, MoveType};
use super::junction::JunctionSolver;
use super::queue::PlannerQueue;
use super::types::LENGTH_EPSILON;
use crate::error::{MotionError, Result};

/// Minimum distance to change velocity from `v1` to `v2` under jerk `j`,
/// derived from the constant-jerk ramp (spec §4.3 step 0).
pub fn jerk_distance(v1: f64, v2: f64, j: f64) -> f64 {
    if j <= 0.0 {
        return f64::INFINITY;
    }
    (v1 + v2) * ((v2 - v1).abs() / j).sqrt()
}

/// The profile a trapezoid planning pass produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Profile {
    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,
    pub cruise_velocity: f64,
}

/// Plan the head/body/tail lengths for one block given its length and the
/// entry/cruise-ceiling/exit velocities, following spec §4.3 steps 1-3.
/// Returns `InfeasibleVelocity` if even a full head+tail (degraded
/// trapezoid with no body) can't fit the requested exit velocity — callers
/// resolve that by lowering `exit_velocity` in the back-propagation sweep
/// (step 4) and retrying, rather than this function guessing a value.
pub fn plan(length: f64, entry: f64, cruise_vmax: f64, exit: f64, jerk: f64) -> Result<Profile> {
    if length < 0.0 {
        return Err(MotionError::ZeroLengthMove);
    }

    let head_needed = jerk_distance(entry, cruise_vmax, jerk);
    let tail_needed = jerk_distance(cruise_vmax, exit, jerk);

    if head_needed + tail_needed <= length + LENGTH_EPSILON {
        // Step 2: full trapezoid.
        let body = (length - head_needed - tail_needed).max(0.0);
        return Ok(Profile {
            head_length: head_needed,
            body_length: body,
            tail_length: tail_needed,
            cruise_velocity: cruise_vmax,
        });
    }

    // Step 3: degraded trapezoid — solve for peak velocity V* such that
    // distance(entry, V*) + distance(V*, exit) == length, via bisection
    // (monotonic in V* for V* >= max(entry, exit)).
    let mut lo = entry.max(exit);
    let mut hi = cruise_vmax;
    // If even reaching `hi` can't cover the distance at max(entry,exit)
    // floor, we still bisect toward whatever peak is achievable; the
    // infeasibility test below is the one that actually rejects the move.
    let f = |v: f64| jerk_distance(entry, v, jerk) + jerk_distance(v, exit, jerk) - length;

    if f(hi) <= 0.0 {
        // Cruise ceiling alone already satisfies the distance (shouldn't
        // happen given the check above, but keep the function total).
        let head = jerk_distance(entry, hi, jerk);
        let tail = jerk_distance(hi, exit, jerk);
        return Ok(Profile {
            head_length: head,
            body_length: (length - head - tail).max(0.0),
            tail_length: tail,
            cruise_velocity: hi,
        });
    }

    if f(lo) > 0.0 {
        // Step 4 trigger: cannot reach the requested exit velocity even
        // at the lowest achievable peak. Caller lowers exit and retries.
        return Err(MotionError::InfeasibleVelocity {
            requested: exit,
            remaining_length: length,
            jerk,
        });
    }

    let mut mid = lo;
    for _ in 0..10 {
        mid = 0.5 * (lo + hi);
        let residual = f(mid);
        if residual.abs() <= 0.001 * length.max(LENGTH_EPSILON) {
            break;
        }
        if residual > 0.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }

    let head = jerk_distance(entry, mid, jerk);
    let tail = jerk_distance(mid, exit, jerk);
    let body = (length - head - tail).max(0.0);
    Ok(Profile {
        head_length: head,
        body_length: body,
        tail_length: tail,
        cruise_velocity: mid,
    })
}

/// Apply a freshly computed profile to a block, keeping the cached jerk
/// powers and the profile-length invariant intact.
pub fn apply_profile(block: &mut Block, profile: Profile) {
    block.head_length = profile.head_length;
    block.body_length = profile.body_length;
    block.tail_length = profile.tail_length;
    block.cruise_velocity = profile.cruise_velocity;
}

/// Highest speed a block of `length` under jerk `jerk` can fully
/// decelerate to rest from — the single-ramp inverse of `jerk_distance`
/// (`jerk_distance(v, 0, jerk) = v^1.5 / sqrt(jerk)`, solved for `v`).
fn max_decel_entry(length: f64, jerk: f64) -> f64 {
    if jerk <= 0.0 || length <= 0.0 {
        return 0.0;
    }
    (length * jerk.sqrt()).powf(2.0 / 3.0)
}

/// Walk the replannable tail of the queue, oldest to newest, recomputing
/// each block's junction exit velocity (the corner between it and its
/// successor — purely geometric, so it needs no downstream state) and
/// propagating it forward as the successor's entry (testable property #3:
/// entry of the later block equals the exit of the earlier one), then
/// re-running the trapezoid planner on it. Blocks are frozen
/// (`replannable = false`) once this sweep has processed them and the run
/// pointer has moved on, or once the block can no longer benefit from
/// further revision.
pub fn replan_backward(
    queue: &mut PlannerQueue,
    junction: &JunctionSolver,
    from_idx: usize,
) -> Result<()> {
    let indices = queue.iterate_backward_from(from_idx);
    if indices.is_empty() {
        return Ok(());
    }

    // indices is newest-first; walk oldest-first so each block's entry is
    // already settled (from its predecessor) by the time it's planned.
    for &idx in indices.iter().rev() {
        if queue.slot(idx).move_type != MoveType::Aline {
            continue;
        }

        let prev_idx = queue.prev_idx(idx);
        let prev = queue.slot(prev_idx);
        let entry = if prev.state != BlockState::Empty && prev.move_type == MoveType::Aline {
            prev.exit_velocity.min(queue.slot(idx).entry_vmax)
        } else {
            0.0
        };

        let next_idx = queue_next(queue, idx);
        let next = queue.slot(next_idx);
        let junction_v = if next.state != BlockState::Empty && next.move_type == MoveType::Aline {
            let u_self = queue.slot(idx).unit_vector;
            let u_next = next.unit_vector;
            let exit_vmax = queue.slot(idx).exit_vmax;
            let next_entry_vmax = next.entry_vmax;
            junction.max_entry_velocity(&u_self, &u_next, exit_vmax, next_entry_vmax)
        } else {
            // Nothing queued after this block yet: plan to come to rest,
            // same as any block at the tail of the queue.
            0.0
        };

        let block = queue.slot(idx);
        let cruise_vmax = block.cruise_vmax;
        let jerk = block.jerk;
        let length = block.length;
        let exit = junction_v.min(block.exit_vmax);

        // A full stop must always be reachable within this block's own
        // length before planning toward a nonzero exit; otherwise a very
        // fast entry handed down from the previous block's corner could
        // make even `plan`'s degraded trapezoid infeasible below.
        let entry = entry.min(max_decel_entry(length, jerk));

        let block = queue.slot_mut(idx);
        block.entry_velocity = entry;

        match plan(length, entry, cruise_vmax, exit, jerk) {
            Ok(profile) => {
                block.exit_velocity = exit;
                apply_profile(block, profile);
            }
            Err(MotionError::InfeasibleVelocity { .. }) => {
                // Lower the exit velocity until the block can brake to it
                // in the available length (braking-distance closed form,
                // same jerk_distance identity solved for v2 = 0 boundary
                // by bisection since jerk_distance isn't invertible in
                // closed form either).
                let lowered = lower_exit_to_feasible(length, entry, cruise_vmax, jerk);
                let profile = plan(length, entry, cruise_vmax, lowered, jerk)?;
                block.exit_velocity = lowered;
                apply_profile(block, profile);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn queue_next(queue: &PlannerQueue, idx: usize) -> usize {
    (idx + 1) % queue.capacity()
}

/// Bisect for the highest exit velocity <= `exit` the block can still
/// brake to within `length`, used when the preferred exit is infeasible.
fn lower_exit_to_feasible(length: f64, entry: f64, cruise_vmax: f64, jerk: f64) -> f64 {
    let mut lo = 0.0;
    let mut hi = entry.max(cruise_vmax);
    for _ in 0..10 {
        let mid = 0.5 * (lo + hi);
        if plan(length, entry, cruise_vmax, mid, jerk).is_ok() {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_trapezoid_when_distance_ample() {
        let profile = plan(100.0, 0.0, 1000.0, 0.0, 5.0e9).unwrap();
        assert!(profile.body_length > 0.0);
        assert!((profile.head_length + profile.body_length + profile.tail_length - 100.0).abs() < LENGTH_EPSILON);
        assert_eq!(profile.cruise_velocity, 1000.0);
    }

    #[test]
    fn short_hop_degrades_to_triangle_below_requested_feed() {
        // S1: 10mm hop at feed 1000 mm/min, huge jerk so the ramp is steep
        // but the move is still too short to reach 1000.
        let profile = plan(10.0, 0.0, 1000.0, 0.0, 5.0e9).unwrap();
        assert!(profile.cruise_velocity < 1000.0, "cruise = {}", profile.cruise_velocity);
        assert!(profile.body_length.abs() < 1e-6, "body should vanish in a triangle: {}", profile.body_length);
        assert!((profile.head_length + profile.body_length + profile.tail_length - 10.0).abs() < 1e-2);
    }

    #[test]
    fn idempotent_replanning_same_inputs() {
        let p1 = plan(42.0, 100.0, 2000.0, 50.0, 1.0e9).unwrap();
        let p2 = plan(42.0, 100.0, 2000.0, 50.0, 1.0e9).unwrap();
        assert_eq!(p1, p2);
    }

    #[test]
    fn jerk_distance_symmetry() {
        assert!((jerk_distance(0.0, 100.0, 1.0e6) - jerk_distance(100.0, 0.0, 1.0e6)).abs() < 1e-9);
    }
}
