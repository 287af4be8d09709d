// src/motion/kinematics.rs
//! Pluggable forward/inverse-kinematics callback (spec §1 Non-goals:
//! "multi-axis kinematics beyond a pluggable forward/inverse-kinematics
//! callback" — the core only ever calls through this trait, never
//! hardcodes a transform).

use super::types::{AxisVec, MAX_AXES, MAX_MOTORS, MotorSteps};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KinematicsKind {
    Cartesian,
    CoreXY,
}

/// Converts between a Cartesian/joint target vector and motor step
/// counts. Called from the executor's LO context (spec §4.4 step 4):
/// must be cheap and non-blocking, no allocation on the hot path.
pub trait Kinematics: Send + Sync {
    fn inverse(&self, position: &AxisVec) -> MotorSteps;
    fn forward(&self, steps: &MotorSteps) -> AxisVec;
}

/// Direct per-axis scaling: motor `i` drives axis `i` 1:1.
pub struct CartesianKinematics {
    steps_per_unit: [f64; MAX_MOTORS],
}

impl CartesianKinematics {
    pub fn new(steps_per_unit: [f64; MAX_MOTORS]) -> Self {
        Self { steps_per_unit }
    }
}

impl Kinematics for CartesianKinematics {
    fn inverse(&self, position: &AxisVec) -> MotorSteps {
        let mut steps = [0i64; MAX_MOTORS];
        for i in 0..MAX_MOTORS {
            steps[i] = (position[i] * self.steps_per_unit[i]).round() as i64;
        }
        steps
    }

    fn forward(&self, steps: &MotorSteps) -> AxisVec {
        let mut position = [0.0; MAX_AXES];
        for i in 0..MAX_AXES {
            position[i] = steps[i] as f64 / self.steps_per_unit[i];
        }
        position
    }
}

/// CoreXY: motors 0/1 drive X+Y / X-Y, remaining axes pass through 1:1.
pub struct CoreXyKinematics {
    steps_per_unit: [f64; MAX_MOTORS],
}

impl CoreXyKinematics {
    pub fn new(steps_per_unit: [f64; MAX_MOTORS]) -> Self {
        Self { steps_per_unit }
    }
}

impl Kinematics for CoreXyKinematics {
    fn inverse(&self, position: &AxisVec) -> MotorSteps {
        let mut steps = [0i64; MAX_MOTORS];
        let a = position[0] + position[1];
        let b = position[0] - position[1];
        steps[0] = (a * self.steps_per_unit[0]).round() as i64;
        steps[1] = (b * self.steps_per_unit[1]).round() as i64;
        for i in 2..MAX_MOTORS {
            steps[i] = (position[i] * self.steps_per_unit[i]).round() as i64;
        }
        steps
    }

    fn forward(&self, steps: &MotorSteps) -> AxisVec {
        let mut position = [0.0; MAX_AXES];
        let a = steps[0] as f64 / self.steps_per_unit[0];
        let b = steps[1] as f64 / self.steps_per_unit[1];
        position[0] = (a + b) / 2.0;
        position[1] = (a - b) / 2.0;
        for i in 2..MAX_AXES {
            position[i] = steps[i] as f64 / self.steps_per_unit[i];
        }
        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cartesian_roundtrips_through_steps() {
        let k = CartesianKinematics::new([80.0; MAX_MOTORS]);
        let pos = [10.0, 20.0, 5.0, 0.0, 0.0, 0.0];
        let steps = k.inverse(&pos);
        let back = k.forward(&steps);
        for i in 0..3 {
            assert!((back[i] - pos[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn corexy_roundtrips_through_steps() {
        let k = CoreXyKinematics::new([80.0; MAX_MOTORS]);
        let pos = [10.0, 20.0, 5.0, 0.0, 0.0, 0.0];
        let steps = k.inverse(&pos);
        let back = k.forward(&steps);
        for i in 0..3 {
            assert!((back[i] - pos[i]).abs() < 1e-6);
        }
    }
}
