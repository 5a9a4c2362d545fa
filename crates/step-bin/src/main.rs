//! `stepctl`: command line for a Parker Gemini GT6 stepper drive.
//!
//! Subcommands cover the lab's routine motions:
//! - `back-forth`: the standard exercise cycle (forward, pause, back, repeat)
//! - `move`: one relative or absolute move in degrees
//! - `turn`: whole rotations of the stage
//! - `home` / `set-home`: run the homing cycle, or declare here to be home
//! - `run`: play a raw command script at the console
//! - `scan`: probe the serial ports and report what answers
//!
//! # Usage
//!
//! ```bash
//! stepctl -v back-forth -n 3 -f 45
//! stepctl move --degrees 90 --absolute
//! stepctl --dry-run home
//! ```
//!
//! Defaults come from `stepctl.toml` in the working directory (or the file
//! named by `--config`), then from `STEPCTL_`-prefixed environment
//! variables, then from flags. Nested config fields use double underscores:
//! `STEPCTL_DRIVE__PORT=/dev/ttyUSB1`.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use tracing::{debug, info};

use step_core::{candidate_ports, open_serial, probe, ProbeOutcome};
use step_driver_parker::{Gt6Config, Gt6Driver, GT6_PROFILE};

/// Config file picked up from the working directory when `--config` is not
/// given.
const DEFAULT_CONFIG_FILE: &str = "stepctl.toml";

// =============================================================================
// Configuration
// =============================================================================

/// On-disk configuration for `stepctl`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct StepctlConfig {
    /// Drive connection settings.
    drive: Gt6Config,
    /// Motion parameters used when flags do not say otherwise.
    motion: MotionDefaults,
}

/// Drive initialization parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct MotionDefaults {
    /// Velocity in revolutions per second.
    velocity: f64,
    /// Acceleration (the drive reuses it as deceleration).
    accel: f64,
    /// Arm the software travel limits during initialization.
    enable_limits: bool,
}

impl Default for MotionDefaults {
    fn default() -> Self {
        Self {
            velocity: 3.0,
            accel: 2.0,
            enable_limits: false,
        }
    }
}

/// Layered configuration: config file, then `STEPCTL_` environment
/// variables. Fields nobody set fall back to the serde defaults.
///
/// An explicitly named file must exist; the default `stepctl.toml` is
/// optional.
fn load_config(explicit: Option<&Path>) -> Result<StepctlConfig> {
    let mut figment = Figment::new();
    match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("config file not found: {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                figment = figment.merge(Toml::file(default_path));
            }
        }
    }
    figment
        .merge(Env::prefixed("STEPCTL_").split("__"))
        .extract()
        .context("failed to load configuration")
}

// =============================================================================
// Command line
// =============================================================================

#[derive(Parser)]
#[command(name = "stepctl")]
#[command(about = "Control a Parker Gemini GT6 stepper drive", long_about = None)]
struct Cli {
    /// Config file (default: stepctl.toml in the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port path; skips the port scan
    #[arg(long, global = true)]
    port: Option<String>,

    /// Log the would-be commands without touching hardware
    #[arg(long, global = true)]
    dry_run: bool,

    /// Use multiple -v for more detailed messages
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Exercise the stage: forward, pause, back, repeat
    BackForth {
        /// Number of forward/back cycles
        #[arg(short = 'n', long, default_value_t = 1)]
        cycles: u32,

        /// Forward step in degrees (positive = clockwise)
        #[arg(short = 'f', long, default_value_t = 30.0, allow_negative_numbers = true)]
        degrees_fwd: f64,

        /// Back step in degrees
        #[arg(short = 'b', long, default_value_t = 30.0, allow_negative_numbers = true)]
        degrees_back: f64,

        /// Pause between moves, in seconds
        #[arg(short = 't', long, default_value_t = 1.0)]
        sleep_time: f64,

        /// Velocity in rev/s; overrides the configured default
        #[arg(short = 'V', long)]
        velocity: Option<f64>,

        /// Acceleration; overrides the configured default
        #[arg(short = 'A', long)]
        accel: Option<f64>,

        /// Arm the software travel limits
        #[arg(short = 'L', long)]
        limits: bool,

        /// Skip the homing cycle before the first move
        #[arg(long)]
        skip_home_start: bool,

        /// Skip the homing cycle after the last move
        #[arg(long)]
        skip_home_end: bool,
    },

    /// One move in degrees, relative unless --absolute
    Move {
        /// Degrees to move (positive = clockwise)
        #[arg(short, long, default_value_t = 1.0, allow_negative_numbers = true)]
        degrees: f64,

        /// Treat --degrees as an absolute position from home
        #[arg(long)]
        absolute: bool,

        /// Repeat the move this many times
        #[arg(short = 'n', long, default_value_t = 1)]
        repeat: u32,

        /// Skip the homing cycle before moving
        #[arg(long)]
        skip_home: bool,
    },

    /// Whole rotations of the stage
    Turn {
        /// Number of full turns (negative = counterclockwise)
        #[arg(short = 'n', long, default_value_t = 1, allow_negative_numbers = true)]
        turns: i64,
    },

    /// Run the homing cycle
    Home,

    /// Declare the current position to be home
    SetHome,

    /// Play a console command script (one command per line, `;` comments)
    Run {
        /// Path to the script file
        script: PathBuf,
    },

    /// Probe the serial ports and report what answers
    Scan,
}

// =============================================================================
// Entry point
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.drive.port = Some(port);
    }
    if cli.dry_run {
        config.drive.dry_run = true;
    }

    match cli.command {
        Commands::Scan => scan_ports().await,
        command => run_motion_command(command, &config).await,
    }
}

/// Map -v counts onto a default filter; RUST_LOG wins when set.
fn init_tracing(verbosity: u8) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter_directive(verbosity)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn filter_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

// =============================================================================
// Subcommand handlers
// =============================================================================

/// Connect to the drive and dispatch one motion subcommand.
async fn run_motion_command(command: Commands, config: &StepctlConfig) -> Result<()> {
    if config.drive.dry_run {
        println!("🧪 Dry run: commands are logged, nothing moves");
    }
    let driver = Gt6Driver::connect(&config.drive)
        .await
        .context("no usable drive connection")?;

    let result = dispatch(&driver, &config.motion, command).await;
    driver.close().await;
    result
}

async fn dispatch(driver: &Gt6Driver, motion: &MotionDefaults, command: Commands) -> Result<()> {
    match command {
        Commands::BackForth {
            cycles,
            degrees_fwd,
            degrees_back,
            sleep_time,
            velocity,
            accel,
            limits,
            skip_home_start,
            skip_home_end,
        } => {
            let velocity = velocity.unwrap_or(motion.velocity);
            let accel = accel.unwrap_or(motion.accel);
            driver
                .initialize(limits || motion.enable_limits, velocity, accel)
                .await?;
            back_forth(
                driver,
                cycles,
                degrees_fwd,
                degrees_back,
                sleep_time,
                !skip_home_start,
                !skip_home_end,
            )
            .await
        }
        Commands::Move {
            degrees,
            absolute,
            repeat,
            skip_home,
        } => {
            driver
                .initialize(motion.enable_limits, motion.velocity, motion.accel)
                .await?;
            if !skip_home {
                driver.home().await?;
            }
            for _ in 0..repeat {
                if absolute {
                    driver.move_absolute(degrees).await?;
                } else {
                    driver.move_relative(degrees).await?;
                }
            }
            Ok(())
        }
        Commands::Turn { turns } => {
            driver
                .initialize(motion.enable_limits, motion.velocity, motion.accel)
                .await?;
            driver.rotate_full_turns(turns).await
        }
        Commands::Home => {
            driver
                .initialize(motion.enable_limits, motion.velocity, motion.accel)
                .await?;
            driver.home().await
        }
        Commands::SetHome => {
            driver
                .initialize(motion.enable_limits, motion.velocity, motion.accel)
                .await?;
            driver.set_current_position_as_home().await
        }
        Commands::Run { script } => {
            driver
                .initialize(motion.enable_limits, motion.velocity, motion.accel)
                .await?;
            driver.run_script(&script).await
        }
        // Handled in main before a drive connection exists.
        Commands::Scan => Ok(()),
    }
}

async fn back_forth(
    driver: &Gt6Driver,
    cycles: u32,
    degrees_fwd: f64,
    degrees_back: f64,
    sleep_time: f64,
    home_start: bool,
    home_end: bool,
) -> Result<()> {
    let pause = Duration::try_from_secs_f64(sleep_time)
        .map_err(|e| anyhow!("invalid --sleep-time {}: {}", sleep_time, e))?;

    if home_start {
        driver.home().await?;
        sleep_logged(pause).await;
    }
    for cycle in 0..cycles {
        info!("cycle {}/{}", cycle + 1, cycles);
        driver.move_relative(degrees_fwd).await?;
        sleep_logged(pause).await;
        driver.move_relative(-degrees_back).await?;
        sleep_logged(pause).await;
    }
    if home_end {
        driver.home().await?;
    }

    println!();
    println!("Done");
    Ok(())
}

async fn sleep_logged(pause: Duration) {
    debug!("sleeping {:?}", pause);
    tokio::time::sleep(pause).await;
}

/// Probe every candidate port and report what answered.
async fn scan_ports() -> Result<()> {
    println!("🔍 Scanning serial ports for a {}", GT6_PROFILE.name);
    let candidates = candidate_ports()?;
    if candidates.is_empty() {
        println!("   No usb serial adapters found");
        return Ok(());
    }
    for path in candidates {
        match probe_one(&path).await {
            Ok(outcome) if outcome.matched => {
                println!("✅ {}: {}", path, outcome.reply.trim());
            }
            Ok(outcome) if outcome.reply.is_empty() => {
                println!("❌ {}: no reply", path);
            }
            Ok(outcome) => {
                println!("❌ {}: {}", path, outcome.reply.trim());
            }
            Err(e) => {
                println!("❌ {}: {}", path, e);
            }
        }
    }
    Ok(())
}

async fn probe_one(path: &str) -> Result<ProbeOutcome> {
    let mut port = open_serial(path, GT6_PROFILE.baud_rate).await?;
    let outcome = probe(&mut port, &GT6_PROFILE).await?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verbosity_maps_to_filter_levels() {
        assert_eq!(filter_directive(0), "warn");
        assert_eq!(filter_directive(1), "info");
        assert_eq!(filter_directive(2), "debug");
        assert_eq!(filter_directive(3), "trace");
        assert_eq!(filter_directive(9), "trace");
    }

    #[test]
    fn back_forth_flag_defaults_match_the_lab_routine() {
        let cli = Cli::try_parse_from(["stepctl", "back-forth"]).unwrap();
        match cli.command {
            Commands::BackForth {
                cycles,
                degrees_fwd,
                degrees_back,
                sleep_time,
                velocity,
                accel,
                limits,
                skip_home_start,
                skip_home_end,
            } => {
                assert_eq!(cycles, 1);
                assert!((degrees_fwd - 30.0).abs() < f64::EPSILON);
                assert!((degrees_back - 30.0).abs() < f64::EPSILON);
                assert!((sleep_time - 1.0).abs() < f64::EPSILON);
                assert_eq!(velocity, None);
                assert_eq!(accel, None);
                assert!(!limits);
                assert!(!skip_home_start);
                assert!(!skip_home_end);
            }
            _ => panic!("expected back-forth"),
        }
    }

    #[test]
    fn global_flags_parse_before_and_after_the_subcommand() {
        let cli = Cli::try_parse_from(["stepctl", "--dry-run", "home"]).unwrap();
        assert!(cli.dry_run);

        let cli = Cli::try_parse_from(["stepctl", "turn", "-n", "-2", "--port", "/dev/ttyUSB0"])
            .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        match cli.command {
            Commands::Turn { turns } => assert_eq!(turns, -2),
            _ => panic!("expected turn"),
        }
    }

    #[test]
    fn config_tables_layer_over_defaults() {
        let config: StepctlConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [drive]
                dry_run = true
                steps_per_rotation = 450000

                [motion]
                velocity = 8.0
                "#,
            ))
            .extract()
            .unwrap();

        assert!(config.drive.dry_run);
        assert_eq!(config.drive.steps_per_rotation, 450_000);
        assert!((config.motion.velocity - 8.0).abs() < f64::EPSILON);
        // Untouched fields keep their defaults.
        assert!((config.motion.accel - 2.0).abs() < f64::EPSILON);
        assert!(!config.motion.enable_limits);
    }

    #[test]
    fn empty_config_is_all_defaults() {
        let config: StepctlConfig = Figment::new().extract().unwrap();
        assert_eq!(config.drive.port, None);
        assert!(!config.drive.dry_run);
        assert!((config.motion.velocity - 3.0).abs() < f64::EPSILON);
    }
}
