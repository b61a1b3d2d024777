//! Poise balance controller CLI.
//!
//! Runs the full tick pipeline against a linear inverted pendulum plant:
//! - `stand`: balance in place under random pushes and report ICP error
//! - `walk`: step forward along a straight line and report every touchdown
//! - `check`: validate a configuration file and print the resolved values

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use nalgebra::{Vector2, Vector3};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use poise_balance::{
    BalanceConfig, BalanceController, BalanceError, ClarabelSolver, ControllerInput, FootMeasurement,
    FootstepCommand, GaitEvent, LimbSide,
};
use poise_test_utils::{LipmPlant, PlanarLeg, StaticKinematics, biped, random_push, seeded_rng, tick_time};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Capture-point balance and stepping controller.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Controller configuration (TOML). Defaults to a 30 kg synthetic biped.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Balance in place under random CoM velocity pushes.
    Stand {
        /// Simulated duration in seconds.
        #[arg(short, long, default_value_t = 5.0)]
        duration: f64,

        /// Largest push per axis (m/s).
        #[arg(short, long, default_value_t = 0.1)]
        push: f64,

        /// Seconds between pushes.
        #[arg(long, default_value_t = 1.0)]
        push_interval: f64,

        /// Random seed.
        #[arg(short, long, default_value_t = 0)]
        seed: u64,
    },

    /// Walk forward with a scripted footstep plan.
    Walk {
        /// Number of footsteps.
        #[arg(short = 'n', long, default_value_t = 6)]
        steps: usize,

        /// Forward distance per step (m).
        #[arg(short, long, default_value_t = 0.15)]
        length: f64,

        /// Swing duration per step (s).
        #[arg(long, default_value_t = 0.6)]
        swing: f64,

        /// Double support between steps (s).
        #[arg(long, default_value_t = 0.2)]
        transfer: f64,
    },

    /// Validate a configuration file.
    Check,
}

// ---------------------------------------------------------------------------
// Simulation rig
// ---------------------------------------------------------------------------

/// Controller, plant and kinematics wired together.
struct Rig {
    controller: BalanceController<ClarabelSolver>,
    plant: LipmPlant,
    legs: Vec<PlanarLeg>,
    kinematics: StaticKinematics,
    feet: Vec<FootMeasurement>,
    cmp: Vector2<f64>,
}

impl Rig {
    fn new(config: BalanceConfig, legs: Vec<PlanarLeg>) -> Result<Self, BalanceError> {
        let gravity = config.gravity;
        let solver = ClarabelSolver::new(config.solver.clone());
        let controller = BalanceController::new(config, solver)?;
        let kinematics = StaticKinematics::from_legs(&legs);
        let centre = legs.iter().map(|l| l.foot.xy()).sum::<Vector2<f64>>() / legs.len().max(1) as f64;
        let feet = legs
            .iter()
            .map(|leg| FootMeasurement {
                limb: leg.limb,
                position: leg.foot,
                yaw: 0.0,
                contact_force: None,
            })
            .collect();
        Ok(Self {
            controller,
            plant: LipmPlant::new(centre, poise_test_utils::scenario::COM_HEIGHT, gravity),
            legs,
            kinematics,
            feet,
            cmp: centre,
        })
    }

    /// Mean of the active contact anchors.
    fn support_centre(&self) -> Vector2<f64> {
        let contacts = self.controller.gait().contacts();
        let (sum, n) = contacts
            .iter()
            .filter(|c| c.is_active())
            .fold((Vector2::zeros(), 0_usize), |(s, n), c| (s + c.anchor(), n + 1));
        if n == 0 { self.plant.com } else { sum / n as f64 }
    }

    /// Run one tick at `time` and advance the plant by `dt`.
    fn tick(&mut self, time: f64, dt: f64) -> Vec<GaitEvent> {
        let desired_icp = self.support_centre();
        let input = ControllerInput {
            time,
            capture: self.plant.capture(),
            desired_icp,
            desired_icp_velocity: Vector2::zeros(),
            feet: &self.feet,
            task_wrenches: &[],
            kinematics: &self.kinematics,
        };
        let out = self.controller.tick(&input);
        if out.faulted {
            warn!(time, "tick faulted, keeping previous CMP");
        } else {
            self.cmp = out.cmp;
        }
        let events = out.events.clone();
        let setpoints = out.swing_setpoints.clone();

        // Feet follow their swing setpoints and land where the contact does.
        for event in &events {
            if let GaitEvent::TouchDown { limb, location, .. } = *event {
                self.move_foot(limb, Vector3::new(location.x, location.y, 0.0));
            }
        }
        for (limb, setpoint) in setpoints {
            self.move_foot(limb, setpoint.position);
        }

        self.plant.step(&self.cmp, dt);
        events
    }

    fn move_foot(&mut self, limb: poise_balance::LimbId, position: Vector3<f64>) {
        if let Some(foot) = self.feet.iter_mut().find(|f| f.limb == limb) {
            foot.position = position;
        }
        if let Some(leg) = self.legs.iter().find(|l| l.limb == limb) {
            self.kinematics.set_body_point(&leg.foot_body(), position);
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<(BalanceConfig, Vec<PlanarLeg>), BalanceError> {
    let (default_config, default_legs) = biped(30.0, 0.2);
    let Some(path) = path else {
        return Ok((default_config, default_legs.to_vec()));
    };
    let mut config = BalanceConfig::from_file(path)?;
    if config.limbs.is_empty() {
        info!("no limbs configured, using the synthetic biped");
        config.limbs = default_config.limbs;
        return Ok((config, default_legs.to_vec()));
    }
    // Rebuild planar legs at the configured feet so kinematics line up.
    let legs = config
        .limbs
        .iter()
        .map(|limb| {
            PlanarLeg::new(
                limb.id,
                limb.side,
                Vector2::from(limb.initial_position),
                poise_test_utils::scenario::LEG_LENGTH,
                0.05,
            )
        })
        .collect::<Vec<_>>();
    for (limb, leg) in config.limbs.iter_mut().zip(&legs) {
        let generated = leg.limb_config();
        limb.support_body = generated.support_body;
        limb.chain = generated.chain;
    }
    Ok((config, legs))
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn run_stand(
    config: BalanceConfig,
    legs: Vec<PlanarLeg>,
    duration: f64,
    push: f64,
    push_interval: f64,
    seed: u64,
) -> Result<(), BalanceError> {
    let dt = config.control_dt;
    let mut rig = Rig::new(config, legs)?;
    let mut rng = seeded_rng(seed);
    let ticks = (duration / dt).round() as usize;
    let push_every = ((push_interval / dt).round() as usize).max(1);

    let mut worst: f64 = 0.0;
    let mut held = 0_usize;
    for k in 0..ticks {
        if k > 0 && k % push_every == 0 {
            let kick = random_push(&mut rng, push);
            info!(time = tick_time(k, dt), x = kick.x, y = kick.y, "push");
            rig.plant.push(&kick);
        }
        rig.tick(tick_time(k, dt), dt);
        if !rig.controller.output().committed {
            held += 1;
        }
        let error = (rig.support_centre() - rig.plant.icp()).norm();
        worst = worst.max(error);
    }

    let final_error = (rig.support_centre() - rig.plant.icp()).norm();
    println!("ticks={ticks}, held={held}, worst_icp_error={worst:.4} m, final_icp_error={final_error:.4} m");
    Ok(())
}

fn run_walk(
    config: BalanceConfig,
    legs: Vec<PlanarLeg>,
    steps: usize,
    length: f64,
    swing: f64,
    transfer: f64,
) -> Result<(), BalanceError> {
    let dt = config.control_dt;
    let mut rig = Rig::new(config, legs)?;

    let mut liftoff = 0.5;
    for i in 0..steps {
        let leg = &rig.legs[i % rig.legs.len()];
        let advance = length * (i + 1) as f64;
        let goal = Vector2::new(leg.foot.x + advance, leg.foot.y);
        let command = FootstepCommand::new(leg.limb, goal, liftoff, liftoff + swing);
        rig.controller.enqueue_footstep(&command)?;
        liftoff += swing + transfer;
    }

    let end = liftoff + 1.0;
    let ticks = (end / dt).round() as usize;
    for k in 0..ticks {
        let time = tick_time(k, dt);
        for event in rig.tick(time, dt) {
            match event {
                GaitEvent::LiftOff { limb, step, .. } => {
                    println!("{time:7.3}s  liftoff   limb {limb} step {}", step.0);
                }
                GaitEvent::TouchDown {
                    limb,
                    location,
                    sensed,
                    ..
                } => {
                    let how = if sensed { "sensed" } else { "scheduled" };
                    println!(
                        "{time:7.3}s  touchdown limb {limb} at ({:.3}, {:.3}) {how}",
                        location.x, location.y
                    );
                }
            }
        }
    }

    let icp = rig.plant.icp();
    println!(
        "final com=({:.3}, {:.3}) icp=({:.3}, {:.3})",
        rig.plant.com.x, rig.plant.com.y, icp.x, icp.y
    );
    Ok(())
}

fn run_check(config: &BalanceConfig) {
    println!("control_dt = {} s", config.control_dt);
    println!("mass = {} kg", config.mass);
    println!("feedback_gain = {:?}", config.optimizer.feedback_gain);
    println!("max_footsteps = {}", config.optimizer.max_footsteps);
    println!("angular momentum = {}", config.optimizer.use_angular_momentum);
    println!("step adjustment = {}", config.optimizer.use_step_adjustment);
    for limb in &config.limbs {
        let side = match limb.side {
            LimbSide::Left => "left",
            LimbSide::Right => "right",
        };
        println!(
            "limb {} ({side}): body {}, {} joints, {} sole vertices",
            limb.id,
            limb.support_body,
            limb.chain.len(),
            limb.sole_vertices.len()
        );
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = load_config(cli.config.as_deref()).and_then(|(config, legs)| {
        match cli.command {
            Some(Commands::Stand {
                duration,
                push,
                push_interval,
                seed,
            }) => run_stand(config, legs, duration, push, push_interval, seed),
            Some(Commands::Walk {
                steps,
                length,
                swing,
                transfer,
            }) => run_walk(config, legs, steps, length, swing, transfer),
            Some(Commands::Check) => {
                run_check(&config);
                Ok(())
            }
            // Default: stand with defaults
            None => run_stand(config, legs, 5.0, 0.1, 1.0, 0),
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "poise failed");
            ExitCode::FAILURE
        }
    }
}
