//! Mecanum drive MPC command-line driver.
//!
//! Provides two modes of operation:
//! - `solve`: Run one solve from rest toward a target pose, or along a CSV
//!   path schedule, and print the result
//! - `info`: Print workspace crate versions and the problem layout

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use drivempc_core::layout::{SOLVER_INPUT_LEN, STAGE_PARAMETERS_LEN, TRAJECTORY_LEN};
use drivempc_core::prelude::*;
use drivempc_core::{load_schedule, total_objective};
use drivempc_mpc::{MpcError, SolverSession};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Model predictive control for a four-wheel mecanum drive.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve one control cycle from rest at the origin.
    ///
    /// With `--schedule`, targets and weights come from the CSV file starting
    /// at `--waypoint`, and the target and weight flags are ignored.
    Solve {
        /// TOML configuration file (model, integration, solver).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Target x position (m).
        #[arg(long, default_value_t = 1.0)]
        target_x: f64,

        /// Target y position (m).
        #[arg(long, default_value_t = 0.0)]
        target_y: f64,

        /// Target heading (rad).
        #[arg(long, default_value_t = 0.0)]
        target_heading: f64,

        /// Penalty on every motor command.
        #[arg(long, default_value_t = 0.0)]
        motor_weight: f64,

        /// CSV path schedule, one row per waypoint.
        #[arg(short, long)]
        schedule: Option<PathBuf>,

        /// First schedule waypoint of the horizon.
        #[arg(long, default_value_t = 0)]
        waypoint: usize,

        /// Print solver progress to stderr.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print crate information.
    Info,
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

struct SolveArgs {
    config: Option<PathBuf>,
    target: [f64; 3],
    motor_weight: f64,
    schedule: Option<PathBuf>,
    waypoint: usize,
    verbose: bool,
}

fn run_solve(args: &SolveArgs) -> Result<(), MpcError> {
    let mut config = match &args.config {
        Some(path) => MpcConfig::from_file(path)?,
        None => MpcConfig::default(),
    };
    config.solver.verbose |= args.verbose;

    let input = match &args.schedule {
        Some(path) => {
            let schedule = load_schedule(path)?;
            info!(waypoints = schedule.len(), start = args.waypoint, "loaded path schedule");
            let schedule = schedule
                .into_iter()
                .map(|p| StageParameters {
                    model: config.model,
                    ..p
                })
                .collect();
            SolverInputBuilder::new()
                .parameters(schedule)
                .initial_guess(StageState::default())
                .build(args.waypoint, config.model.battery_voltage)?
        }
        None => {
            let [x, y, heading] = args.target;
            let stage = StageParametersBuilder::new()
                .drive_model(config.model)
                .motor_weights(args.motor_weight)
                .linear_weights(1.0)
                .angular_weight(1.0)
                .target_position(x, y, heading)
                .build_raw();
            let parameters = ParameterSetBuilder::new()
                .fill(stage)
                .build(config.model.battery_voltage);
            SolverInput::at_rest(StartState::default(), parameters)
        }
    };

    let mut session = SolverSession::from_config(&config)?;
    if config.solver.verbose {
        session = session.with_sink(Box::new(std::io::stderr()));
    }
    let out = session.solve(&input)?;

    let d = &out.diagnostics;
    println!("exit code: {}{}", out.exit_code, if out.converged() { " (optimal)" } else { "" });
    println!(
        "iterations={}, objective={:.6}, res_eq={:.2e}, solvetime={:.3}s, fevalstime={:.3}s",
        d.it, d.pobj, d.res_eq, d.solvetime, d.fevalstime
    );
    println!(
        "trajectory cost: {:.6}",
        total_objective(input.parameters.iter(), &out.trajectory)
    );
    println!();
    println!("stage  u_fl    u_fr    u_bl    u_br    x       y       theta   vx      vy      omega");
    for (k, s) in out.trajectory.iter().enumerate() {
        print!("{k:>5}");
        for v in s.command.iter().chain(&s.position).chain(&s.velocity) {
            print!(" {v:>7.3}");
        }
        println!();
    }
    Ok(())
}

fn run_info() {
    println!("drivempc v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("crates:");
    println!("  drivempc-core {}", env!("CARGO_PKG_VERSION"));
    println!("  drivempc-mpc  {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("horizon: {NUM_STAGES} stages");
    println!("stage parameters: {STAGE_PARAMETERS_LEN} doubles");
    println!("solver input: {SOLVER_INPUT_LEN} doubles");
    println!("solver output: {TRAJECTORY_LEN} doubles");
    println!();
    println!("edition: 2024");
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let args = match cli.command {
        Some(Commands::Info) => {
            run_info();
            return ExitCode::SUCCESS;
        }
        Some(Commands::Solve {
            config,
            target_x,
            target_y,
            target_heading,
            motor_weight,
            schedule,
            waypoint,
            verbose,
        }) => SolveArgs {
            config,
            target: [target_x, target_y, target_heading],
            motor_weight,
            schedule,
            waypoint,
            verbose,
        },
        // Default: solve the nominal one-metre move
        None => SolveArgs {
            config: None,
            target: [1.0, 0.0, 0.0],
            motor_weight: 0.0,
            schedule: None,
            waypoint: 0,
            verbose: false,
        },
    };

    match run_solve(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
