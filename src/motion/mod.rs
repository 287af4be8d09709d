// src/motion/mod.rs
//! The motion core: planner queue (C7), junction solver (C6), trapezoid
//! planner (C5), segment executor (C3), feedhold controller (C4), step
//! generator/loader (C1+C2) and encoder mirror (C8), composed behind one
//! public API (`MotionCore`) for the host harness in `main.rs`.

pub mod block;
pub mod dda;
pub mod encoder;
pub mod executor;
pub mod feedhold;
pub mod junction;
pub mod kinematics;
pub mod power;
pub mod queue;
pub mod trapezoid;
pub mod types;

use block::{Block, BlockState, MoveType};
use dda::StepGenerator;
use executor::{ExecResult, RuntimeSingleton};
use feedhold::{FeedholdController, FeedholdState};
use junction::JunctionSolver;
use kinematics::Kinematics;
use power::PowerManager;
use queue::PlannerQueue;
use types::{AxisVec, MAX_MOTORS};

fn distance(a: &AxisVec, b: &AxisVec) -> f64 {
    (0..types::MAX_AXES).map(|i| (a[i] - b[i]).powi(2)).sum::<f64>().sqrt()
}

use crate::error::{QualityEvent, Result};

/// Top-level composition of every component, the entry point the host
/// harness drives.
pub struct MotionCore {
    queue: PlannerQueue,
    junction: JunctionSolver,
    runtime: RuntimeSingleton,
    dda: StepGenerator,
    feedhold: FeedholdController,
    power: PowerManager,
    kinematics: Box<dyn Kinematics>,
    polarity: [bool; MAX_MOTORS],
    alarm: bool,
    /// Exit velocity carried forward while a feedhold's decel spills past a
    /// single block (`decel-continue`, spec §4.6).
    carried_exit_velocity: f64,
}

impl MotionCore {
    pub fn new(
        junction_deviation: f64,
        centripetal_accel: f64,
        kinematics: Box<dyn Kinematics>,
        polarity: [bool; MAX_MOTORS],
        power: PowerManager,
    ) -> Self {
        Self {
            queue: PlannerQueue::new(),
            junction: JunctionSolver::new(junction_deviation, centripetal_accel),
            runtime: RuntimeSingleton::new(),
            dda: StepGenerator::new(),
            feedhold: FeedholdController::new(),
            power,
            kinematics,
            polarity,
            alarm: false,
            carried_exit_velocity: 0.0,
        }
    }

    /// Queue a linear move (spec §6 "Planner input"). `jerk` and
    /// `velocity_max` are resolved per-axis upstream and passed in already
    /// combined into scalar limits for this block.
    pub fn queue_line(
        &mut self,
        target: AxisVec,
        feed_rate: f64,
        jerk: f64,
        work_offset: AxisVec,
    ) -> Result<()> {
        if self.alarm {
            return Err(crate::error::MotionError::Alarmed);
        }

        let start = *self.runtime.position();
        let unit = JunctionSolver::unit_vector(&start, &target);
        let length: f64 = (0..types::MAX_AXES)
            .map(|i| (target[i] - start[i]).powi(2))
            .sum::<f64>()
            .sqrt();

        if length <= 0.0 {
            return Err(crate::error::MotionError::ZeroLengthMove);
        }

        if self.queue.is_empty() {
            // Cycle start (spec §4.7): resync the encoder mirror to the
            // commanded step position before the freshly-idle planner
            // starts moving again.
            self.dda.reset_encoder_mirror(self.runtime.position_steps());
            self.queue_dwell(types::PLANNER_STARTUP_DELAY_MINUTES)?;
        }

        let idx = self.queue.reserve_write()?;
        let block = self.queue.slot_mut(idx);
        block.unit_vector = unit;
        block.target = target;
        block.work_offset = work_offset;
        block.length = length;
        block.set_jerk(jerk);
        block.cruise_vmax = feed_rate;
        block.entry_vmax = feed_rate;
        block.exit_vmax = feed_rate;
        block.entry_velocity = 0.0;
        block.exit_velocity = 0.0;

        self.queue.commit_write(idx, MoveType::Aline)?;

        if let Some(newest) = self.queue.newest_idx() {
            trapezoid::replan_backward(&mut self.queue, &self.junction, newest)?;
        }
        Ok(())
    }

    /// Queue a dwell block, minutes duration.
    pub fn queue_dwell(&mut self, minutes: f64) -> Result<()> {
        let idx = self.queue.reserve_write()?;
        let block = self.queue.slot_mut(idx);
        block.dwell_minutes = minutes;
        self.queue.commit_write(idx, MoveType::Dwell)
    }

    /// Drive one executor tick. Call this from the LO-priority path.
    pub fn exec_tick(&mut self) -> Result<(ExecResult, Option<QualityEvent>)> {
        match self.feedhold.state() {
            FeedholdState::Pending => {
                if self.dda.is_idle() {
                    self.feedhold.on_steppers_idle();
                }
                return Ok((ExecResult::Again, None));
            }
            FeedholdState::Hold => return Ok((ExecResult::Again, None)),
            _ => {}
        }

        let freshly_started = self.queue.peek_run().is_none();
        if freshly_started {
            let block = match self.queue.begin_run() {
                Some(b) => b,
                None => return Ok((ExecResult::Done, None)),
            };
            if self.feedhold.state() == FeedholdState::DecelContinue {
                self.feedhold.continue_across_block(block, self.carried_exit_velocity);
            }
            self.runtime.begin_block(block, self.kinematics.as_ref());
        }

        if self.feedhold.state() == FeedholdState::Sync {
            let segment_velocity = self.runtime.current_velocity();
            let position = *self.runtime.position();
            let block = self.queue.peek_run_mut().expect("begin_run just populated it");
            let length_remaining = distance(&position, &block.target);
            self.feedhold.enter_sync(block, segment_velocity, length_remaining);
            self.runtime.jump_to_tail();
        }

        let block = self.queue.peek_run_mut().expect("begin_run just populated it");
        let (result, event) = executor::exec_tick(
            &mut self.runtime,
            block,
            &mut self.dda,
            self.kinematics.as_ref(),
            &self.polarity,
        )?;

        if result == ExecResult::Done {
            match self.feedhold.state() {
                FeedholdState::DecelToZero => {
                    self.feedhold.on_decel_complete();
                    let position = *self.runtime.position();
                    let next_idx = self.queue.next_run_idx();
                    if self.queue.slot(next_idx).state == BlockState::Queued {
                        let length = distance(&position, &self.queue.slot(next_idx).target);
                        self.feedhold.finish_decel(self.queue.slot_mut(next_idx), length);
                    } else {
                        self.feedhold.finish_decel(&mut Block::default(), 0.0);
                    }
                }
                FeedholdState::DecelContinue => {
                    self.carried_exit_velocity =
                        self.queue.peek_run().map(|b| b.exit_velocity).unwrap_or(0.0);
                }
                _ => {}
            }
            self.queue.advance_run()?;
        }

        Ok((result, event))
    }

    /// One DDA tick (HI priority).
    pub fn dda_tick(&mut self) -> dda::TickResult {
        self.dda.tick()
    }

    /// Motor power-timeout housekeeping, run by the host at whatever
    /// wall-clock cadence it likes (this core has no clock of its own).
    /// De-energizes any motor that has been idle past its configured
    /// timeout.
    pub fn power_tick(&mut self, elapsed_secs: f64) {
        let moved = *self.dda.power_state();
        for motor in self.power.tick(&moved, elapsed_secs) {
            self.dda.de_energize(motor);
        }
    }

    /// One loader fire (MED priority), called when the DDA's segment
    /// downcount reaches zero.
    pub fn loader_fire(&mut self) -> Result<()> {
        self.dda.load()
    }

    /// Request a feedhold at any time.
    pub fn request_hold(&mut self) {
        self.feedhold.request_hold();
    }

    pub fn resume(&mut self) -> bool {
        self.feedhold.resume(!self.queue.is_empty())
    }

    /// Kill path (spec §5 "Cancellation"): DDA off, prep buffer flushed,
    /// queue flushed, alarm latched.
    pub fn kill(&mut self) {
        self.dda.kill();
        self.queue = PlannerQueue::new();
        self.alarm = true;
    }

    pub fn is_alarmed(&self) -> bool {
        self.alarm
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn position(&self) -> &AxisVec {
        self.runtime.position()
    }

    pub fn position_steps(&self) -> &types::MotorSteps {
        self.runtime.position_steps()
    }

    pub fn encoder_steps(&self) -> &types::MotorSteps {
        self.dda.encoder_mirror()
    }

    /// Entry velocity of the block currently running, if any.
    pub fn running_entry_velocity(&self) -> Option<f64> {
        self.queue.peek_run().map(|b| b.entry_velocity)
    }

    /// Exit velocity of the block currently running, if any.
    pub fn running_exit_velocity(&self) -> Option<f64> {
        self.queue.peek_run().map(|b| b.exit_velocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinematics::CartesianKinematics;

    fn core() -> MotionCore {
        let kin = Box::new(CartesianKinematics::new([80.0; MAX_MOTORS]));
        let power = PowerManager::new(600.0, [crate::config::PowerMode::WhenMoving; MAX_MOTORS]);
        MotionCore::new(0.01, 200_000.0, kin, [false; MAX_MOTORS], power)
    }

    #[test]
    fn queue_line_rejects_zero_length_move() {
        let mut c = core();
        let target = [0.0; types::MAX_AXES];
        assert!(c.queue_line(target, 1000.0, 1.0e9, [0.0; types::MAX_AXES]).is_err());
    }

    #[test]
    fn queue_line_accepts_nonzero_move() {
        let mut c = core();
        let mut target = [0.0; types::MAX_AXES];
        target[0] = 10.0;
        assert!(c.queue_line(target, 1000.0, 5.0e9, [0.0; types::MAX_AXES]).is_ok());
        // The freshly-idle planner also gets a startup-delay dwell ahead
        // of the move (spec §5 "Timeouts").
        assert_eq!(c.queue_len(), 2);
    }

    #[test]
    fn kill_flushes_queue_and_latches_alarm() {
        let mut c = core();
        let mut target = [0.0; types::MAX_AXES];
        target[0] = 10.0;
        c.queue_line(target, 1000.0, 5.0e9, [0.0; types::MAX_AXES]).unwrap();
        c.kill();
        assert!(c.is_alarmed());
        assert_eq!(c.queue_len(), 0);
    }
}
