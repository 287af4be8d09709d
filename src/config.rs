// src/config.rs
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MotionError, Result};
use crate::motion::types::DEFAULT_CENTRIPETAL_ACCEL;

/// Per-axis configuration (spec §3 "Axis").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxisConfig {
    pub travel_max: f64,
    pub velocity_max: f64,
    pub feedrate_max: f64,
    pub jerk_max: f64,
    #[serde(default = "default_junction_deviation")]
    pub junction_deviation: f64,
    #[serde(default)]
    pub switch_mode: SwitchMode,
    #[serde(default)]
    pub homing_velocity: f64,
    #[serde(default)]
    pub homing_offset: f64,
    /// Radius for rotary axes; `None` for linear axes.
    #[serde(default)]
    pub radius: Option<f64>,
}

fn default_junction_deviation() -> f64 {
    0.01
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum SwitchMode {
    #[default]
    Disabled,
    Min,
    Max,
    MinMax,
}

impl AxisConfig {
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.feedrate_max > self.velocity_max {
            return Err(MotionError::Config(format!(
                "axis {name}: feedrate_max ({}) must be <= velocity_max ({})",
                self.feedrate_max, self.velocity_max
            )));
        }
        if self.jerk_max <= 0.0 {
            return Err(MotionError::Config(format!(
                "axis {name}: jerk_max must be > 0, got {}",
                self.jerk_max
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Microsteps {
    M1 = 1,
    M2 = 2,
    M4 = 4,
    M8 = 8,
    M16 = 16,
    M32 = 32,
}

impl Microsteps {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum PowerMode {
    Disabled,
    Always,
    InCycle,
    #[default]
    WhenMoving,
}

/// Per-motor configuration (spec §3 "Motor").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotorConfig {
    /// Which axis this motor drives (key into the axis table).
    pub axis_map: String,
    pub step_angle: f64,
    pub travel_per_rev: f64,
    pub microsteps: Microsteps,
    #[serde(default)]
    pub polarity: bool,
    #[serde(default)]
    pub power_mode: PowerMode,
    #[serde(default = "default_power_level")]
    pub power_level: f64,
}

fn default_power_level() -> f64 {
    1.0
}

impl MotorConfig {
    /// `steps_per_unit = (360 / step_angle / travel_per_rev) * microsteps`.
    pub fn steps_per_unit(&self) -> f64 {
        (360.0 / self.step_angle / self.travel_per_rev) * self.microsteps.as_u32() as f64
    }
}

/// System-wide configuration (spec §6 "Per-system").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    #[serde(default = "default_motor_power_timeout")]
    pub motor_power_timeout_secs: f64,
    #[serde(default = "default_centripetal_accel")]
    pub junction_acceleration: f64,
    #[serde(default = "default_true")]
    pub enable_acceleration: bool,
}

fn default_motor_power_timeout() -> f64 {
    600.0
}
fn default_centripetal_accel() -> f64 {
    DEFAULT_CENTRIPETAL_ACCEL
}
fn default_true() -> bool {
    true
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            motor_power_timeout_secs: default_motor_power_timeout(),
            junction_acceleration: default_centripetal_accel(),
            enable_acceleration: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub system: SystemConfig,
    pub axes: HashMap<String, AxisConfig>,
    #[serde(default)]
    pub motors: HashMap<String, MotorConfig>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        for (name, axis) in &self.axes {
            axis.validate(name)?;
        }
        for (name, motor) in &self.motors {
            if !self.axes.contains_key(&motor.axis_map) {
                return Err(MotionError::Config(format!(
                    "motor {name}: axis_map references unknown axis '{}'",
                    motor.axis_map
                )));
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_validate_rejects_feedrate_above_velocity() {
        let axis = AxisConfig {
            travel_max: 200.0,
            velocity_max: 100.0,
            feedrate_max: 150.0,
            jerk_max: 1.0,
            junction_deviation: 0.01,
            switch_mode: SwitchMode::Disabled,
            homing_velocity: 0.0,
            homing_offset: 0.0,
            radius: None,
        };
        assert!(axis.validate("x").is_err());
    }

    #[test]
    fn motor_steps_per_unit() {
        let motor = MotorConfig {
            axis_map: "x".into(),
            step_angle: 1.8,
            travel_per_rev: 40.0,
            microsteps: Microsteps::M16,
            polarity: false,
            power_mode: PowerMode::WhenMoving,
            power_level: 1.0,
        };
        // (360 / 1.8 / 40) * 16 = 80
        assert!((motor.steps_per_unit() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn load_config_from_toml() {
        let toml_str = r#"
            [system]
            motor_power_timeout_secs = 600.0
            junction_acceleration = 200000.0
            enable_acceleration = true

            [axes.x]
            travel_max = 300.0
            velocity_max = 6000.0
            feedrate_max = 6000.0
            jerk_max = 5000000000.0

            [motors.x]
            axis_map = "x"
            step_angle = 1.8
            travel_per_rev = 40.0
            microsteps = "M16"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.axes["x"].velocity_max, 6000.0);
    }
}