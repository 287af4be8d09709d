// src/motion/power.rs
//! Motor power-timeout policy (spec §5 "Timeouts", data-model `power-mode`).
//! Not a named component in the spec's table, but the Motor data model
//! requires it and the DDA is the only owner of per-motor enable state, so
//! it is attached here (SPEC_FULL.md §4).

use super::types::MAX_MOTORS;
use crate::config::PowerMode;

#[derive(Debug, Clone, Copy)]
pub struct PowerManager {
    timeout_secs: f64,
    idle_secs: [f64; MAX_MOTORS],
    modes: [PowerMode; MAX_MOTORS],
}

impl PowerManager {
    pub fn new(timeout_secs: f64, modes: [PowerMode; MAX_MOTORS]) -> Self {
        Self { timeout_secs, idle_secs: [0.0; MAX_MOTORS], modes }
    }

    /// Call once per executor tick with whether each motor moved this
    /// segment and how much wall-clock time elapsed. Returns the motors
    /// that should now be de-energized.
    pub fn tick(&mut self, moved: &[bool; MAX_MOTORS], elapsed_secs: f64) -> Vec<usize> {
        let mut to_de_energize = Vec::new();
        for m in 0..MAX_MOTORS {
            if moved[m] {
                self.idle_secs[m] = 0.0;
                continue;
            }
            if self.modes[m] != PowerMode::WhenMoving {
                continue;
            }
            self.idle_secs[m] += elapsed_secs;
            if self.idle_secs[m] >= self.timeout_secs {
                to_de_energize.push(m);
            }
        }
        to_de_energize
    }

    pub fn reset(&mut self, motor: usize) {
        self.idle_secs[motor] = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_moving_motor_de_energizes_after_timeout() {
        let modes = [PowerMode::WhenMoving; MAX_MOTORS];
        let mut mgr = PowerManager::new(1.0, modes);
        let moved = [false; MAX_MOTORS];
        assert!(mgr.tick(&moved, 0.5).is_empty());
        let timed_out = mgr.tick(&moved, 0.6);
        assert!(timed_out.contains(&0));
    }

    #[test]
    fn movement_resets_idle_clock() {
        let modes = [PowerMode::WhenMoving; MAX_MOTORS];
        let mut mgr = PowerManager::new(1.0, modes);
        let mut moved = [false; MAX_MOTORS];
        mgr.tick(&moved, 0.9);
        moved[0] = true;
        assert!(mgr.tick(&moved, 0.9).is_empty());
    }

    #[test]
    fn always_mode_motors_never_time_out() {
        let modes = [PowerMode::Always; MAX_MOTORS];
        let mut mgr = PowerManager::new(0.001, modes);
        let moved = [false; MAX_MOTORS];
        assert!(mgr.tick(&moved, 10.0).is_empty());
    }
}
