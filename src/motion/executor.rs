// src/motion/executor.rs
//! Segment executor (spec §4.4, component C3): walks the active block's
//! velocity curve one fixed-duration sub-segment at a time, via
//! forward-difference iteration of a quintic Bézier, and hands the
//! resulting per-motor step counts to the loader-prep interface.
//!
//! Runs at LO priority: one call produces exactly one sub-segment, must
//! not block, allocate, or call back into the planner.

use super::block::{Block, MoveType};
use super::dda::StepGenerator;
use super::kinematics::Kinematics;
use super::types::{
    AxisVec, KahanAccumulator, MAX_AXES, MAX_MOTORS, MIN_SEGMENT_TIME, MIN_SEGMENT_USEC,
    MotorSteps, NOM_SEGMENT_USEC,
};
use crate::error::{QualityEvent, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Head,
    Body,
    Tail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionState {
    New,
    FirstHalf,
    SecondHalf,
    Off,
}

/// The quintic-Bézier forward-difference walker for one section (spec
/// §4.4 "Velocity curve via quintic Bézier forward differences").
#[derive(Debug, Clone, Copy)]
struct BezierWalker {
    v: KahanAccumulator,
    f1: KahanAccumulator,
    f2: KahanAccumulator,
    f3: KahanAccumulator,
    f4: KahanAccumulator,
    f5: KahanAccumulator,
    segment_index: u32,
}

impl BezierWalker {
    /// Set up the five forward-difference accumulators for a section
    /// going from `v_entry` to `v_exit` over `segments` equal steps.
    fn new(v_entry: f64, v_exit: f64, segments: u32) -> Self {
        let h = 1.0 / segments as f64;
        let a = -6.0 * v_entry + 6.0 * v_exit;
        let b = 15.0 * v_entry - 15.0 * v_exit;
        let c = -10.0 * v_entry + 10.0 * v_exit;

        let h2 = h * h;
        let h3 = h2 * h;
        let h4 = h3 * h;
        let h5 = h4 * h;

        let f5 = (121.0 / 16.0) * a * h5 + 5.0 * b * h4 + (13.0 / 4.0) * c * h3;
        let f4 = (165.0 / 2.0) * a * h5 + 29.0 * b * h4 + 9.0 * c * h3;
        let f3 = 255.0 * a * h5 + 48.0 * b * h4 + 6.0 * c * h3;
        let f2 = 300.0 * a * h5 + 24.0 * b * h4;
        let f1 = 120.0 * a * h5;

        // Value of the cubic-in-t part of the Bézier at t = h/2.
        let t = 0.5 * h;
        let v0 = a * t * t * t + b * t * t + c * t + v_entry;

        Self {
            v: KahanAccumulator::new(v0),
            f1: KahanAccumulator::new(f1),
            f2: KahanAccumulator::new(f2),
            f3: KahanAccumulator::new(f3),
            f4: KahanAccumulator::new(f4),
            f5: KahanAccumulator::new(f5),
            segment_index: 0,
        }
    }

    /// Velocity for the segment about to be emitted. Segment 0 uses the
    /// initial `v` untouched; every later segment applies the
    /// forward-difference update first (spec §4.4: "First segment ... uses
    /// the initial v; subsequent segments apply the update before the
    /// segment is emitted").
    fn current(&mut self) -> f64 {
        if self.segment_index > 0 {
            self.v.add(self.f5.value());
            self.f5.add(self.f4.value());
            self.f4.add(self.f3.value());
            self.f3.add(self.f2.value());
            self.f2.add(self.f1.value());
        }
        self.segment_index += 1;
        self.v.value()
    }
}

/// C3's working state (spec §3 "Runtime singleton").
pub struct RuntimeSingleton {
    section: Section,
    section_state: SectionState,
    waypoint: AxisVec,

    segments: u32,
    segment_count: u32,
    segment_time: f64,

    walker: Option<BezierWalker>,
    body_velocity: f64,

    position: AxisVec,
    target: AxisVec,
    position_steps: MotorSteps,
    target_steps: MotorSteps,
    commanded_steps: MotorSteps,
    following_error: [i32; MAX_MOTORS],

    section_start_position: AxisVec,
    unit_vector: AxisVec,

    dwell_remaining_minutes: f64,
    last_segment_velocity: f64,
}

impl RuntimeSingleton {
    pub fn new() -> Self {
        Self {
            section: Section::Head,
            section_state: SectionState::Off,
            waypoint: [0.0; MAX_AXES],
            segments: 0,
            segment_count: 0,
            segment_time: 0.0,
            walker: None,
            body_velocity: 0.0,
            position: [0.0; MAX_AXES],
            target: [0.0; MAX_AXES],
            position_steps: [0; MAX_MOTORS],
            target_steps: [0; MAX_MOTORS],
            commanded_steps: [0; MAX_MOTORS],
            following_error: [0; MAX_MOTORS],
            section_start_position: [0.0; MAX_AXES],
            unit_vector: [0.0; MAX_AXES],
            dwell_remaining_minutes: 0.0,
            last_segment_velocity: 0.0,
        }
    }

    pub fn position(&self) -> &AxisVec {
        &self.position
    }

    pub fn position_steps(&self) -> &MotorSteps {
        &self.position_steps
    }

    /// Velocity of the most recently emitted segment; feedhold sampling
    /// reads this to decide where to aim the decel-to-zero tail.
    pub fn current_velocity(&self) -> f64 {
        self.last_segment_velocity
    }

    /// Abandon whatever section is in progress and restart profiling from
    /// the tail, using the block's (just-rewritten) tail parameters and the
    /// runtime's current position as the new section start.
    pub fn jump_to_tail(&mut self) {
        self.section = Section::Tail;
        self.section_state = SectionState::New;
        self.section_start_position = self.position;
    }

    /// Load a freshly-dequeued block's profile into the runtime singleton,
    /// starting at its head.
    pub fn begin_block(&mut self, block: &Block, kinematics: &dyn Kinematics) {
        self.unit_vector = block.unit_vector;
        self.section_start_position = self.position;
        self.position_steps = kinematics.inverse(&self.position);
        self.commanded_steps = self.position_steps;
        self.section = Section::Head;
        self.section_state = SectionState::New;
        if block.move_type == MoveType::Dwell {
            self.dwell_remaining_minutes = block.dwell_minutes;
        }
    }
}

impl Default for RuntimeSingleton {
    fn default() -> Self {
        Self::new()
    }
}

/// One executor call's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecResult {
    Again,
    Done,
}

/// Run one executor tick against `block`, advancing `runtime` and handing
/// the resulting segment to `dda` via the prep interface. `polarity` is
/// per-motor pin polarity from configuration.
pub fn exec_tick(
    runtime: &mut RuntimeSingleton,
    block: &mut Block,
    dda: &mut StepGenerator,
    kinematics: &dyn Kinematics,
    polarity: &[bool; MAX_MOTORS],
) -> Result<(ExecResult, Option<QualityEvent>)> {
    match block.move_type {
        MoveType::Aline => exec_aline(runtime, block, dda, kinematics, polarity),
        MoveType::Dwell => exec_dwell(runtime, dda),
        MoveType::Start | MoveType::Stop | MoveType::End | MoveType::Command => {
            Ok((ExecResult::Done, None))
        }
        MoveType::Null => Ok((ExecResult::Done, None)),
    }
}

fn exec_dwell(
    runtime: &mut RuntimeSingleton,
    _dda: &mut StepGenerator,
) -> Result<(ExecResult, Option<QualityEvent>)> {
    if runtime.dwell_remaining_minutes <= 0.0 {
        return Ok((ExecResult::Done, None));
    }
    runtime.dwell_remaining_minutes = 0.0;
    Ok((ExecResult::Done, None))
}

fn exec_aline(
    runtime: &mut RuntimeSingleton,
    block: &mut Block,
    dda: &mut StepGenerator,
    kinematics: &dyn Kinematics,
    polarity: &[bool; MAX_MOTORS],
) -> Result<(ExecResult, Option<QualityEvent>)> {
    if runtime.section_state == SectionState::New || runtime.section_state == SectionState::Off {
        match enter_section(runtime, block)? {
            SectionOutcome::Skipped => return advance_after_skip(runtime, block),
            SectionOutcome::Collapsed => {
                let (result, _event) = advance_after_skip(runtime, block)?;
                return Ok((result, Some(QualityEvent::MinimumTimeMove)));
            }
            SectionOutcome::Entered => {}
        }
    }

    let v = match runtime.section {
        Section::Body => runtime.body_velocity,
        _ => runtime.walker.as_mut().expect("walker set by enter_section").current(),
    };
    runtime.last_segment_velocity = v;

    let segment_length = v * runtime.segment_time;
    let is_last_segment = runtime.segment_count == 1;

    let target = if is_last_segment {
        axis_add(&runtime.section_start_position, &runtime.unit_vector, runtime.waypoint_length())
    } else {
        axis_add(&runtime.position, &runtime.unit_vector, segment_length)
    };
    runtime.target = target;

    // 1. Bucket-brigade.
    runtime.commanded_steps = runtime.position_steps;
    runtime.position_steps = runtime.target_steps;

    // 2-3. Sample encoder, compute following error.
    let following_error = dda.following_error(&runtime.commanded_steps);
    runtime.following_error = following_error;

    // 4. Inverse kinematics.
    runtime.target_steps = kinematics.inverse(&runtime.target);

    // 5. Travel steps.
    let mut travel_steps = [0i64; MAX_MOTORS];
    for m in 0..MAX_MOTORS {
        travel_steps[m] = runtime.target_steps[m] - runtime.position_steps[m];
    }

    // 6. Hand off to the loader-prep interface.
    dda.prep_line(&travel_steps, &following_error, runtime.segment_time, polarity)?;

    // 7. Advance position.
    runtime.position = runtime.target;

    runtime.segment_count -= 1;
    if runtime.segment_count == 0 {
        advance_section(runtime)
    } else {
        Ok((ExecResult::Again, None))
    }
}

impl RuntimeSingleton {
    /// Distance from `section_start_position` to the precomputed section
    /// waypoint, along `unit_vector` — used to snap the final segment of a
    /// section exactly onto its end rather than drifting past it.
    fn waypoint_length(&self) -> f64 {
        (0..MAX_AXES)
            .map(|i| (self.waypoint[i] - self.section_start_position[i]) * self.unit_vector[i])
            .sum()
    }
}

fn axis_add(base: &AxisVec, unit: &AxisVec, length: f64) -> AxisVec {
    let mut out = [0.0; MAX_AXES];
    for i in 0..MAX_AXES {
        out[i] = base[i] + unit[i] * length;
    }
    out
}

enum SectionOutcome {
    Entered,
    /// Zero-length section: skipped silently, not a quality event (spec
    /// §4.4 "A zero-length section is skipped").
    Skipped,
    /// Nonzero length but the computed segment time fell below the floor:
    /// the section collapses to a no-op, no DDA segment fired (spec §4.4 /
    /// §8 scenario S6).
    Collapsed,
}

/// Begin a new section: compute move_time/segments/segment_time per spec
/// §4.4 "Segment partition".
fn enter_section(runtime: &mut RuntimeSingleton, block: &Block) -> Result<SectionOutcome> {
    let (length, v_entry, v_exit) = match runtime.section {
        Section::Head => (block.head_length, block.entry_velocity, block.cruise_velocity),
        Section::Body => (block.body_length, block.cruise_velocity, block.cruise_velocity),
        Section::Tail => (block.tail_length, block.cruise_velocity, block.exit_velocity),
    };

    if length <= 1e-9 {
        return Ok(SectionOutcome::Skipped);
    }

    let average_velocity = 0.5 * (v_entry + v_exit).max(1e-9);
    let move_time = length / average_velocity;
    let move_time_usec = move_time * 60_000_000.0;
    let segments = (move_time_usec / NOM_SEGMENT_USEC).ceil().max(1.0) as u32;
    let segment_time = move_time / segments as f64;

    // The section can't fill even one minimum-duration segment at the
    // target rate: it collapses to a no-op rather than firing a DDA
    // segment (spec §4.4 / §8 scenario S6).
    if segment_time < MIN_SEGMENT_TIME || segment_time * 60_000_000.0 < MIN_SEGMENT_USEC {
        return Ok(SectionOutcome::Collapsed);
    }

    runtime.segments = segments;
    runtime.segment_count = segments;
    runtime.segment_time = segment_time;
    runtime.section_start_position = runtime.position;
    for i in 0..MAX_AXES {
        runtime.waypoint[i] = runtime.position[i] + runtime.unit_vector[i] * length;
    }

    match runtime.section {
        Section::Body => {
            runtime.body_velocity = v_entry;
            runtime.walker = None;
        }
        _ => runtime.walker = Some(BezierWalker::new(v_entry, v_exit, segments)),
    }

    runtime.section_state = SectionState::FirstHalf;
    Ok(SectionOutcome::Entered)
}

/// A section with nothing to step (zero-length, or collapsed below the
/// minimum segment duration): snap position straight to the section's end
/// and move on to the next section (or finish), without ever calling into
/// the DDA.
fn advance_after_skip(
    runtime: &mut RuntimeSingleton,
    block: &mut Block,
) -> Result<(ExecResult, Option<QualityEvent>)> {
    let length = match runtime.section {
        Section::Head => block.head_length,
        Section::Body => block.body_length,
        Section::Tail => block.tail_length,
    };
    runtime.position = axis_add(&runtime.position, &runtime.unit_vector, length);
    advance_section(runtime)
}

fn advance_section(runtime: &mut RuntimeSingleton) -> Result<(ExecResult, Option<QualityEvent>)> {
    runtime.section = match runtime.section {
        Section::Head => Section::Body,
        Section::Body => Section::Tail,
        Section::Tail => {
            runtime.section_state = SectionState::Off;
            return Ok((ExecResult::Done, None));
        }
    };
    runtime.section_state = SectionState::New;
    Ok((ExecResult::Again, None))
}
