//! Parker Compumotor Gemini GT6 stepper drive driver.
//!
//! Reference: Gemini GT6 Hardware Installation Guide / Gemini Programmer's
//! Reference.
//!
//! Protocol overview:
//! - Format: ASCII command/response over RS-232
//! - Baud: 9600, 8N1, no flow control
//! - Commands: bare mnemonics with numeric suffixes ("V3", "D225000")
//! - Every reply runs until one of the console's prompt markers; see
//!   [`step_core::framing`]
//!
//! The drive fronts a rotation stage, so the driver's public methods speak
//! degrees and translate each move into native step counts. Command bursts
//! for one motion go out back to back while holding the session lock, so
//! two tasks cannot interleave their sequences.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use step_core::{discover, ControllerProfile, DeviceSelector, Response, ResponseMarkers, Session};

// =============================================================================
// Console identity
// =============================================================================

/// Response markers for the GT6 console prompt.
pub const GT6_MARKERS: ResponseMarkers = ResponseMarkers {
    prompt: "\r\n> ",
    undefined: "\r\n? ",
    program: "\r\n- ",
};

/// Probe identity for discovery. A bogus command draws the
/// "*UNDEFINED_LABEL" complaint that only a Gemini console produces.
pub const GT6_PROFILE: ControllerProfile = ControllerProfile {
    name: "Parker Gemini GT6",
    baud_rate: 9600,
    probe_command: b"xxx\n",
    probe_signature: "*UNDEFINED_LABEL",
    markers: GT6_MARKERS,
};

/// Software travel limits, in drive steps from home.
const SOFT_LIMIT_POS: &str = "LSPOS+1000000";
const SOFT_LIMIT_NEG: &str = "LSNEG-990000";

// =============================================================================
// Gt6Config
// =============================================================================

/// Configuration for the GT6 driver.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Gt6Config {
    /// Serial port path (e.g. "/dev/ttyUSB0"). `None` scans for the device.
    pub port: Option<String>,
    /// Skip hardware entirely; commands are logged and dropped.
    pub dry_run: bool,
    /// Drive step counts per full rotation of the stage.
    pub steps_per_rotation: i64,
    /// Pause after each motion sequence, in seconds.
    pub settle_secs: f64,
    /// Per-command response deadline in seconds (default: 60).
    pub command_deadline_secs: Option<u64>,
}

impl Default for Gt6Config {
    fn default() -> Self {
        Self {
            port: None,
            dry_run: false,
            steps_per_rotation: 900_000,
            settle_secs: 1.0,
            command_deadline_secs: None,
        }
    }
}

impl Gt6Config {
    /// Device selector implied by this configuration.
    ///
    /// `dry_run` takes precedence over a configured port.
    pub fn selector(&self) -> DeviceSelector {
        if self.dry_run {
            DeviceSelector::Simulated
        } else {
            match &self.port {
                Some(path) => DeviceSelector::Physical(path.clone()),
                None => DeviceSelector::AutoDetect,
            }
        }
    }
}

// =============================================================================
// Gt6Driver
// =============================================================================

/// Driver for the Parker Compumotor Gemini GT6 stepper drive.
///
/// One instance owns the console session. Operations take `&self` and
/// serialize through an internal mutex; the lock is held through the
/// post-move settle pause.
pub struct Gt6Driver {
    /// Console session protected by Mutex for exclusive access
    session: Mutex<Session>,
    /// Step counts per full stage rotation
    steps_per_rotation: i64,
    /// Pause after each motion sequence
    settle: Duration,
}

impl Gt6Driver {
    /// Connect per the configuration.
    ///
    /// Opens and probes hardware for physical and auto-detect selectors, or
    /// sets up a transportless session for dry runs.
    ///
    /// # Errors
    /// Returns error if:
    /// - No port answers the probe as a GT6
    /// - The serial port cannot be opened
    /// - The configuration is invalid
    pub async fn connect(config: &Gt6Config) -> Result<Self> {
        let session = discover(&config.selector(), &GT6_PROFILE)
            .await
            .context("GT6 discovery failed")?;
        Self::from_session(session, config)
    }

    /// Wrap an already-established session.
    ///
    /// Used by [`connect`](Self::connect), and by tests that run the
    /// protocol over an in-memory transport.
    pub fn from_session(session: Session, config: &Gt6Config) -> Result<Self> {
        if config.steps_per_rotation <= 0 {
            return Err(anyhow!(
                "steps_per_rotation must be positive, got {}",
                config.steps_per_rotation
            ));
        }
        let settle = Duration::try_from_secs_f64(config.settle_secs)
            .map_err(|e| anyhow!("invalid settle_secs {}: {}", config.settle_secs, e))?;
        let session = match config.command_deadline_secs {
            Some(secs) => session.with_command_deadline(Duration::from_secs(secs)),
            None => session,
        };
        Ok(Self {
            session: Mutex::new(session),
            steps_per_rotation: config.steps_per_rotation,
            settle,
        })
    }

    fn steps_for_degrees(&self, degrees: f64) -> i64 {
        (self.steps_per_rotation as f64 * degrees / 360.0).round() as i64
    }

    /// Put the drive into a known state.
    ///
    /// Disables command echo, selects the stepping drive mode and
    /// resolution, programs velocity and acceleration, and sets the
    /// software travel limits, armed or disarmed per `enable_limits`.
    #[instrument(skip(self), err)]
    pub async fn initialize(&self, enable_limits: bool, velocity: f64, accel: f64) -> Result<()> {
        info!("initializing motor drive");
        let mut session = self.session.lock().await;
        if session.is_live() {
            // Two empty sends coax a fresh prompt out of the console.
            session.transact("").await?;
            session.transact("").await?;
        }
        session.transact("ECHO0").await?;
        session.transact("DMODE12").await?;
        session.transact("DRES25000").await?;
        session.transact(&format!("V{}", velocity)).await?;
        session.transact(&format!("A{}", accel)).await?;
        // The second A programs deceleration.
        session.transact(&format!("A{}", accel)).await?;
        session.transact("MA0").await?;
        session.transact(SOFT_LIMIT_POS).await?;
        session.transact(SOFT_LIMIT_NEG).await?;
        session
            .transact(if enable_limits { "LS3" } else { "LS0" })
            .await?;
        Ok(())
    }

    /// Rotate by `degrees` relative to the current position.
    ///
    /// Positive degrees turn clockwise, negative counterclockwise.
    #[instrument(skip(self), err)]
    pub async fn move_relative(&self, degrees: f64) -> Result<()> {
        info!("move: {} deg", degrees);
        let steps = self.steps_for_degrees(degrees);
        let mut session = self.session.lock().await;
        session.transact("DRIVE1").await?;
        session.transact(&format!("D{}", steps)).await?;
        // GO's response only arrives once motion has finished, so the
        // drive is already stopped when DRIVE0 goes out.
        session.transact("GO").await?;
        session.transact("DRIVE0").await?;
        session.transact("TAS").await?;
        tokio::time::sleep(self.settle).await;
        debug!("move complete");
        Ok(())
    }

    /// Rotate to the absolute position `degrees`, measured from home.
    ///
    /// The drive is left in incremental mode afterwards.
    #[instrument(skip(self), err)]
    pub async fn move_absolute(&self, degrees: f64) -> Result<()> {
        info!("go to: {} deg", degrees);
        let steps = self.steps_for_degrees(degrees);
        let mut session = self.session.lock().await;
        session.transact("DRIVE1").await?;
        session.transact("MA1").await?;
        session.transact(&format!("D{}", steps)).await?;
        session.transact("GO").await?;
        session.transact("MA0").await?;
        session.transact("DRIVE0").await?;
        session.transact("TAS").await?;
        tokio::time::sleep(self.settle).await;
        debug!("move complete");
        Ok(())
    }

    /// Spin `turns` complete rotations. Negative turns go counterclockwise.
    #[instrument(skip(self), err)]
    pub async fn rotate_full_turns(&self, turns: i64) -> Result<()> {
        info!("turn: {} full rotations", turns);
        let steps = turns
            .checked_mul(self.steps_per_rotation)
            .ok_or_else(|| anyhow!("turn count {} overflows the drive's step range", turns))?;
        let mut session = self.session.lock().await;
        session.transact("DRIVE1").await?;
        session.transact(&format!("D{}", steps)).await?;
        session.transact("GO").await?;
        session.transact("DRIVE0").await?;
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    /// Run the homing cycle.
    ///
    /// Programs the homing profile (acceleration, velocities, backup to the
    /// home edge) and then executes it.
    #[instrument(skip(self), err)]
    pub async fn home(&self) -> Result<()> {
        info!("homing");
        let mut session = self.session.lock().await;
        session.transact("MC0").await?;
        session.transact("HOMA10").await?;
        session.transact("HOMV7").await?;
        session.transact("HOMVF.3").await?;
        session.transact("HOMBAC1").await?;
        session.transact("HOMDF1").await?;
        session.transact("HOMEDG0").await?;
        session.transact("DRIVE1").await?;
        session.transact("HOM0").await?;
        session.transact("DRIVE0").await?;
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    /// Declare the current position to be home (absolute zero).
    #[instrument(skip(self), err)]
    pub async fn set_current_position_as_home(&self) -> Result<()> {
        info!("set home");
        let mut session = self.session.lock().await;
        session.transact("DRIVE1").await?;
        session.transact("PSET0").await?;
        session.transact("DRIVE0").await?;
        Ok(())
    }

    /// Send one raw console command and return the framed response.
    ///
    /// Escape hatch for commands the driver has no method for.
    #[instrument(skip(self), err)]
    pub async fn command(&self, raw: &str) -> Result<Response> {
        let mut session = self.session.lock().await;
        let response = session.transact(raw).await?;
        Ok(response)
    }

    /// Play a command script against the console, printing each response.
    ///
    /// Blank lines are skipped, and everything from `;` to end of line is a
    /// comment, matching the drive's own program listing format.
    #[instrument(skip(self), err)]
    pub async fn run_script(&self, path: &Path) -> Result<()> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read script {}", path.display()))?;
        let mut session = self.session.lock().await;
        for line in text.lines() {
            if let Some(cmd) = script_command(line) {
                let response = session.transact(cmd).await?;
                println!("{}", response.trimmed());
            }
        }
        Ok(())
    }

    /// Return the stage to absolute zero, then close the port.
    #[instrument(skip(self), err)]
    pub async fn finish(&self) -> Result<()> {
        self.move_absolute(0.0).await?;
        self.close().await;
        Ok(())
    }

    /// Close the serial port. Safe to call more than once.
    pub async fn close(&self) {
        let mut session = self.session.lock().await;
        session.close().await;
    }
}

/// Extract the command part of one script line, if any.
fn script_command(line: &str) -> Option<&str> {
    let code = match line.split_once(';') {
        Some((before, _comment)) => before,
        None => line,
    };
    let code = code.trim();
    (!code.is_empty()).then_some(code)
}
