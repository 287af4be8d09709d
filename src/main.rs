// src/main.rs
//! Thin host harness: loads configuration, builds a `MotionCore`, and
//! feeds it a small line-segment script. This is not a G-code
//! interpreter — that lexer/parser is an external collaborator (spec §1)
//! — it only understands the trivial `target,feed,jerk` script format
//! documented in `demos/moves.txt`.

use clap::Parser;
use embermill_rs::config::{self, Config};
use embermill_rs::motion::dda::TickResult;
use embermill_rs::motion::kinematics::CartesianKinematics;
use embermill_rs::motion::power::PowerManager;
use embermill_rs::motion::types::{AxisVec, MAX_AXES, MAX_MOTORS};
use embermill_rs::MotionCore;

#[derive(Parser, Debug)]
#[command(name = "embermill-host", about = "Motion-core host harness")]
struct Cli {
    /// Path to a printer.toml-style configuration file.
    #[arg(short, long, default_value = "printer.toml")]
    config: String,

    /// Path to a moves script (`target_x,target_y,target_z,feed,jerk` per line).
    #[arg(short, long, default_value = "demos/moves.txt")]
    moves: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    let level: tracing::Level = cli.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    tracing::info!("embermill-host starting");
    tracing::info!("loading configuration from {}", cli.config);

    let config = config::load_config(&cli.config).map_err(|e| {
        tracing::error!("failed to load config '{}': {}", cli.config, e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    let mut core = build_core(&config);

    tracing::info!("loading moves from {}", cli.moves);
    let moves = load_moves(&cli.moves).unwrap_or_else(|e| {
        tracing::warn!("could not read moves file '{}': {} (running with no moves)", cli.moves, e);
        Vec::new()
    });

    for mv in &moves {
        match core.queue_line(mv.target, mv.feed, mv.jerk, [0.0; MAX_AXES]) {
            Ok(()) => tracing::debug!("queued move to {:?} at feed {}", mv.target, mv.feed),
            Err(e) => tracing::warn!("rejected move: {}", e),
        }
    }

    run_to_completion(&mut core);

    tracing::info!("cycle complete, final position {:?}", core.position());
    Ok(())
}

fn build_core(config: &Config) -> MotionCore {
    let mut steps_per_unit = [80.0; MAX_MOTORS];
    let mut polarity = [false; MAX_MOTORS];
    for (i, motor) in config.motors.values().enumerate().take(MAX_MOTORS) {
        steps_per_unit[i] = motor.steps_per_unit();
        polarity[i] = motor.polarity;
    }

    let junction_deviation = config
        .axes
        .values()
        .next()
        .map(|a| a.junction_deviation)
        .unwrap_or(0.01);

    let power_modes = core::array::from_fn(|i| {
        config
            .motors
            .values()
            .nth(i)
            .map(|m| m.power_mode)
            .unwrap_or_default()
    });

    let power = PowerManager::new(config.system.motor_power_timeout_secs, power_modes);
    let kinematics = Box::new(CartesianKinematics::new(steps_per_unit));

    MotionCore::new(junction_deviation, config.system.junction_acceleration, kinematics, polarity, power)
}

struct ScriptMove {
    target: AxisVec,
    feed: f64,
    jerk: f64,
}

fn load_moves(path: &str) -> std::io::Result<Vec<ScriptMove>> {
    let contents = std::fs::read_to_string(path)?;
    let mut moves = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 5 {
            tracing::warn!("skipping malformed moves line: {}", line);
            continue;
        }
        let mut target = [0.0; MAX_AXES];
        target[0] = fields[0].parse().unwrap_or(0.0);
        target[1] = fields[1].parse().unwrap_or(0.0);
        target[2] = fields[2].parse().unwrap_or(0.0);
        let feed = fields[3].parse().unwrap_or(0.0);
        let jerk = fields[4].parse().unwrap_or(0.0);
        moves.push(ScriptMove { target, feed, jerk });
    }
    Ok(moves)
}

/// Drain the planner queue synchronously, interleaving executor and DDA
/// ticks the way the three interrupt priorities would in firmware: each
/// executor call preps one segment, the loader immediately transfers it
/// into the live DDA state, then the DDA ticks until the segment's
/// downcount is spent.
fn run_to_completion(core: &mut MotionCore) {
    let mut guard = 0u64;
    loop {
        let done = match core.exec_tick() {
            Ok((embermill_rs::motion::executor::ExecResult::Done, event)) => {
                if let Some(event) = event {
                    tracing::warn!("quality event: {:?}", event);
                }
                core.queue_len() == 0
            }
            Ok((_, Some(event))) => {
                tracing::warn!("quality event: {:?}", event);
                false
            }
            Ok(_) => false,
            Err(e) => {
                tracing::error!("fatal motion error: {}", e);
                core.kill();
                true
            }
        };
        if done {
            break;
        }

        if core.loader_fire().is_ok() {
            while core.dda_tick() != TickResult::SegmentDone {
                guard += 1;
                if guard > 10_000_000 {
                    tracing::error!("run_to_completion exceeded tick budget, aborting");
                    return;
                }
            }
        }

        guard += 1;
        if guard > 10_000_000 {
            tracing::error!("run_to_completion exceeded tick budget, aborting");
            break;
        }
    }
}
