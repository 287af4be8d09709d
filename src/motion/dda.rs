// src/motion/dda.rs
//! Step generator and loader (spec §4.5, components C1+C2): the HI-rate
//! DDA tick, the MED-rate segment loader, and the three-state prep-buffer
//! ownership tag that serializes the hand-off between them and the
//! executor (LO).

use super::encoder::EncoderMirror;
use super::types::{
    DDA_SUBSTEPS, FOLLOWING_ERROR_FACTOR, FOLLOWING_ERROR_HOLDOFF_SEGMENTS,
    FOLLOWING_ERROR_MAX_CORRECTION, FOLLOWING_ERROR_THRESHOLD, FREQUENCY_DDA, MAX_MOTORS,
    MotorSteps,
};
use crate::error::{MotionError, Result};

/// Which phase currently owns the prep buffer. A one-byte ticket: each
/// phase must see the buffer as "theirs" before touching it, and hands off
/// by setting this last (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepOwner {
    Exec,
    Loader,
    Dda,
}

/// Parameters computed by `prep_line`, consumed by `load`.
#[derive(Debug, Clone, Copy)]
pub struct PrepBuffer {
    pub dda_ticks: u32,
    pub span: u32,
    pub direction: [bool; MAX_MOTORS],
    pub step_sign: [i8; MAX_MOTORS],
    pub substep_increment: [u32; MAX_MOTORS],
    pub accumulator_correction_ratio: Option<f64>,
}

impl Default for PrepBuffer {
    fn default() -> Self {
        Self {
            dda_ticks: 0,
            span: 0,
            direction: [false; MAX_MOTORS],
            step_sign: [1; MAX_MOTORS],
            substep_increment: [0; MAX_MOTORS],
            accumulator_correction_ratio: None,
        }
    }
}

/// Result of one DDA tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    Continue,
    SegmentDone,
}

/// HI/MED-level state: the live DDA accumulators plus the pending prep
/// buffer and its ownership tag.
pub struct StepGenerator {
    prep_owner: PrepOwner,
    prep: PrepBuffer,

    accumulator: [i64; MAX_MOTORS],
    increment: [u32; MAX_MOTORS],
    span: u32,
    direction: [bool; MAX_MOTORS],
    prev_direction: [bool; MAX_MOTORS],
    step_sign: [i8; MAX_MOTORS],
    power_state: [bool; MAX_MOTORS],
    segment_downcount: u32,

    encoder: EncoderMirror,
    holdoff: [u32; MAX_MOTORS],
    corrected_steps: [i64; MAX_MOTORS],

    prev_segment_time: Option<f64>,
}

impl StepGenerator {
    pub fn new() -> Self {
        Self {
            prep_owner: PrepOwner::Exec,
            prep: PrepBuffer::default(),
            accumulator: [0; MAX_MOTORS],
            increment: [0; MAX_MOTORS],
            span: 0,
            direction: [false; MAX_MOTORS],
            prev_direction: [false; MAX_MOTORS],
            step_sign: [1; MAX_MOTORS],
            power_state: [false; MAX_MOTORS],
            segment_downcount: 0,
            encoder: EncoderMirror::new(),
            holdoff: [0; MAX_MOTORS],
            corrected_steps: [0; MAX_MOTORS],
            prev_segment_time: None,
        }
    }

    pub fn encoder_mirror(&self) -> &MotorSteps {
        self.encoder.counts()
    }

    /// Following error at every motor: encoder count minus the commanded
    /// step position one segment behind (spec §4.4 step 3), sampled by the
    /// executor during segment prep.
    pub fn following_error(&self, commanded_steps: &MotorSteps) -> [i32; MAX_MOTORS] {
        self.encoder.following_error(commanded_steps)
    }

    /// Reset the encoder mirror to the step-position mirror directly
    /// (Open Question #2 resolution).
    pub fn reset_encoder_mirror(&mut self, position_steps: &MotorSteps) {
        self.encoder.reset_to(position_steps);
    }

    /// Called from the executor (LO) once per segment, with the prep
    /// buffer owned by `Exec`. Computes everything `load` will need,
    /// applies the following-error nudge, and hands ownership to the
    /// loader.
    pub fn prep_line(
        &mut self,
        travel_steps: &MotorSteps,
        following_error: &[i32; MAX_MOTORS],
        segment_time: f64,
        polarity: &[bool; MAX_MOTORS],
    ) -> Result<()> {
        if self.prep_owner != PrepOwner::Exec {
            return Err(MotionError::PrepNotReady { owner: self.prep_owner });
        }
        if !segment_time.is_finite() {
            return Err(MotionError::NanOrInfTime);
        }

        let dda_ticks = (segment_time * 60.0 * FREQUENCY_DDA).round().max(1.0) as u32;
        let span = dda_ticks.saturating_mul(DDA_SUBSTEPS);

        let accumulator_correction_ratio = match self.prev_segment_time {
            Some(prev) if (segment_time - prev).abs() > 1e-9 => Some(segment_time / prev),
            _ => None,
        };
        self.prev_segment_time = Some(segment_time);

        let mut direction = [false; MAX_MOTORS];
        let mut step_sign = [1i8; MAX_MOTORS];
        let mut substep_increment = [0u32; MAX_MOTORS];

        for m in 0..MAX_MOTORS {
            let mut travel = travel_steps[m];

            let err = following_error[m];
            if err.abs() > FOLLOWING_ERROR_THRESHOLD && self.holdoff[m] == 0 {
                let raw = (err as f64 * FOLLOWING_ERROR_FACTOR).round() as i64;
                let cap = travel.abs().min(FOLLOWING_ERROR_MAX_CORRECTION as i64);
                let correction = raw.clamp(-cap, cap);
                travel -= correction;
                self.corrected_steps[m] += correction;
                self.holdoff[m] = FOLLOWING_ERROR_HOLDOFF_SEGMENTS;
            } else {
                self.holdoff[m] = self.holdoff[m].saturating_sub(1);
            }

            let positive = travel >= 0;
            direction[m] = positive ^ polarity[m];
            step_sign[m] = if positive { 1 } else { -1 };
            substep_increment[m] = (travel.unsigned_abs() as u32).saturating_mul(DDA_SUBSTEPS);
        }

        self.prep = PrepBuffer {
            dda_ticks,
            span,
            direction,
            step_sign,
            substep_increment,
            accumulator_correction_ratio,
        };
        self.prep_owner = PrepOwner::Loader;
        Ok(())
    }

    /// MED-level: fires at the end of the current segment's downcount.
    /// Transfers `prep` into the live DDA state in one critical section.
    pub fn load(&mut self) -> Result<()> {
        if self.prep_owner != PrepOwner::Loader {
            return Err(MotionError::PrepNotReady { owner: self.prep_owner });
        }

        self.span = self.prep.span;
        self.segment_downcount = self.prep.dda_ticks;
        self.prev_direction = self.direction;

        for m in 0..MAX_MOTORS {
            self.direction[m] = self.prep.direction[m];
            self.step_sign[m] = self.prep.step_sign[m];
            self.increment[m] = self.prep.substep_increment[m];

            if let Some(ratio) = self.prep.accumulator_correction_ratio {
                self.accumulator[m] = (self.accumulator[m] as f64 * ratio).round() as i64;
            }

            if self.direction[m] != self.prev_direction[m] {
                self.accumulator[m] = -(self.span as i64 + self.accumulator[m]);
            }

            if self.increment[m] != 0 {
                self.power_state[m] = true;
            }
        }

        self.prep_owner = PrepOwner::Dda;
        Ok(())
    }

    /// HI-level: one DDA tick across all motors. Returns `SegmentDone`
    /// when the downcount reaches zero, at which point the timer would be
    /// disabled and the loader requested.
    pub fn tick(&mut self) -> TickResult {
        for m in 0..MAX_MOTORS {
            self.accumulator[m] += self.increment[m] as i64;
            if self.accumulator[m] > 0 {
                self.accumulator[m] -= self.span as i64;
                self.encoder.record_step(m, self.step_sign[m]);
            }
        }

        if self.segment_downcount == 0 {
            return TickResult::SegmentDone;
        }
        self.segment_downcount -= 1;
        if self.segment_downcount == 0 {
            self.prep_owner = PrepOwner::Exec;
            TickResult::SegmentDone
        } else {
            TickResult::Continue
        }
    }

    pub fn power_state(&self) -> &[bool; MAX_MOTORS] {
        &self.power_state
    }

    pub fn de_energize(&mut self, motor: usize) {
        self.power_state[motor] = false;
    }

    pub fn prep_owner(&self) -> PrepOwner {
        self.prep_owner
    }

    /// No segment in flight and nothing staged: the feedhold `pending`
    /// state polls this to decide when to declare steppers idle.
    pub fn is_idle(&self) -> bool {
        self.prep_owner == PrepOwner::Exec && self.segment_downcount == 0
    }

    /// Kill path: force the DDA idle and the prep buffer back to `Exec`,
    /// regardless of whatever segment was mid-flight.
    pub fn kill(&mut self) {
        self.increment = [0; MAX_MOTORS];
        self.segment_downcount = 0;
        self.power_state = [false; MAX_MOTORS];
        self.prep_owner = PrepOwner::Exec;
        self.prev_segment_time = None;
    }
}

impl Default for StepGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(v: i64) -> MotorSteps {
        let mut s = [0i64; MAX_MOTORS];
        s[0] = v;
        s
    }

    #[test]
    fn prep_line_rejects_nonfinite_segment_time() {
        let mut gen = StepGenerator::new();
        let err = [0; MAX_MOTORS];
        let polarity = [false; MAX_MOTORS];
        let result = gen.prep_line(&steps(10), &err, f64::NAN, &polarity);
        assert!(matches!(result, Err(MotionError::NanOrInfTime)));
    }

    #[test]
    fn load_without_prep_is_not_ready() {
        let mut gen = StepGenerator::new();
        assert!(matches!(gen.load(), Err(MotionError::PrepNotReady { .. })));
    }

    #[test]
    fn full_cycle_emits_steps_and_advances_encoder() {
        let mut gen = StepGenerator::new();
        let err = [0; MAX_MOTORS];
        let polarity = [false; MAX_MOTORS];
        gen.prep_line(&steps(32), &err, 2500.0 / 60_000_000.0, &polarity).unwrap();
        gen.load().unwrap();

        let mut steps_emitted = 0i64;
        for _ in 0..gen.segment_downcount + 1 {
            if gen.tick() == TickResult::SegmentDone {
                break;
            }
        }
        steps_emitted += gen.encoder_mirror()[0];
        assert!(steps_emitted > 0);
        assert_eq!(gen.prep_owner(), PrepOwner::Exec);
    }

    #[test]
    fn direction_change_flips_accumulator_about_midpoint() {
        let mut gen = StepGenerator::new();
        let err = [0; MAX_MOTORS];
        let polarity = [false; MAX_MOTORS];
        gen.prep_line(&steps(10), &err, 2500.0 / 60_000_000.0, &polarity).unwrap();
        gen.load().unwrap();
        gen.prep_owner = PrepOwner::Exec;
        gen.prep_line(&steps(-10), &err, 2500.0 / 60_000_000.0, &polarity).unwrap();
        let acc_before = gen.accumulator[0];
        gen.load().unwrap();
        assert_ne!(gen.accumulator[0], acc_before);
    }

    #[test]
    fn following_error_nudge_shrinks_travel_when_threshold_exceeded() {
        let mut gen = StepGenerator::new();
        let mut err = [0; MAX_MOTORS];
        err[0] = FOLLOWING_ERROR_THRESHOLD + 5;
        let polarity = [false; MAX_MOTORS];
        gen.prep_line(&steps(100), &err, 2500.0 / 60_000_000.0, &polarity).unwrap();
        assert_ne!(gen.corrected_steps[0], 0);
    }

    #[test]
    fn kill_parks_prep_owner_at_exec() {
        let mut gen = StepGenerator::new();
        let err = [0; MAX_MOTORS];
        let polarity = [false; MAX_MOTORS];
        gen.prep_line(&steps(10), &err, 2500.0 / 60_000_000.0, &polarity).unwrap();
        gen.kill();
        assert_eq!(gen.prep_owner(), PrepOwner::Exec);
    }
}
