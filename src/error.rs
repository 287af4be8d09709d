// src/error.rs
use thiserror::Error;

/// Errors surfaced to the public API (planner input, config loading).
///
/// Mirrors spec §7 "Input errors" and "Fatal assertions": both bubble up
/// through `Result`, the difference is only in what the caller does next
/// (an input error just means the block wasn't queued; a fatal assertion
/// means the caller should also latch the alarm state, which
/// `MotionCore::kill` does for you).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotionError {
    #[error("planner queue is full")]
    QueueFull,

    #[error("motion core is alarmed; reset required before queuing moves")]
    Alarmed,

    #[error("zero-length move")]
    ZeroLengthMove,

    #[error("segment time is infinite or NaN")]
    NanOrInfTime,

    #[error("requested exit velocity {requested} mm/min is not reachable over the remaining {remaining_length} mm at jerk {jerk}")]
    InfeasibleVelocity {
        requested: f64,
        remaining_length: f64,
        jerk: f64,
    },

    #[error("planner queue ring magic corrupt at slot {slot}")]
    QueueMagicCorrupt { slot: usize },

    #[error("runtime singleton magic corrupt")]
    RuntimeMagicCorrupt,

    #[error("loader fired while prep buffer was not owned by loader (owner = {owner:?})")]
    PrepNotReady { owner: crate::motion::dda::PrepOwner },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MotionError {
    /// True for the three fatal-assertion kinds in spec §7 that force the
    /// alarm state rather than just rejecting one block.
    pub fn is_fatal_assertion(&self) -> bool {
        matches!(
            self,
            MotionError::QueueMagicCorrupt { .. }
                | MotionError::RuntimeMagicCorrupt
                | MotionError::PrepNotReady { .. }
                | MotionError::NanOrInfTime
        )
    }
}

/// Non-fatal quality events (spec §7): counted/logged, never returned as
/// `Err` from the hot path since the executor "must not... invoke the
/// planner" or otherwise do anything that could look like error recovery
/// at interrupt level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityEvent {
    /// A section's computed segment time fell below `MIN_SEGMENT_TIME`;
    /// it still ran, folded into a single segment faster than the nominal
    /// cadence, rather than being dropped.
    MinimumTimeMove,
    /// The loader fired and found no segment prepared; the DDA idled for
    /// one tick rather than gapping.
    PlannerUnderrun,
}

pub type Result<T> = std::result::Result<T, MotionError>;
