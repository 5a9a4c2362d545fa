//! Integration tests for the GT6 driver over an in-memory serial link.
//!
//! A scripted console on the far end of a duplex pipe echoes every command
//! back under a prompt marker and records what it saw, so the tests can
//! assert the exact command sequence each motion produces.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use step_core::{Session, Terminator};
use step_driver_parker::{Gt6Config, Gt6Driver, GT6_MARKERS};

// =============================================================================
// Scripted console
// =============================================================================

type CommandLog = Arc<Mutex<Vec<String>>>;

/// Read newline-terminated commands, log them, and echo each one back
/// under a prompt. Exits on EOF.
async fn console_task(stream: DuplexStream, log: CommandLog) {
    let mut port = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match port.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let command = line.trim_end_matches('\n').to_string();
        let reply = format!("{}\r\n> ", command);
        log.lock().unwrap().push(command);
        if port.get_mut().write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

fn test_config() -> Gt6Config {
    Gt6Config {
        settle_secs: 0.0,
        ..Gt6Config::default()
    }
}

/// Driver wired to a scripted console, plus the console's command log.
fn driver_with_console() -> (Gt6Driver, CommandLog) {
    let (host, device) = tokio::io::duplex(1024);
    let log: CommandLog = Arc::new(Mutex::new(Vec::new()));
    tokio::spawn(console_task(host, log.clone()));

    let session = Session::connected(Box::new(device), GT6_MARKERS);
    let driver = Gt6Driver::from_session(session, &test_config()).unwrap();
    (driver, log)
}

fn logged(log: &CommandLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

// =============================================================================
// Motion sequences
// =============================================================================

#[tokio::test]
async fn relative_move_sends_the_incremental_sequence() {
    let (driver, log) = driver_with_console();

    driver.move_relative(90.0).await.unwrap();

    assert_eq!(logged(&log), ["DRIVE1", "D225000", "GO", "DRIVE0", "TAS"]);
}

#[tokio::test]
async fn negative_degrees_move_counterclockwise() {
    let (driver, log) = driver_with_console();

    driver.move_relative(-90.0).await.unwrap();

    assert_eq!(logged(&log), ["DRIVE1", "D-225000", "GO", "DRIVE0", "TAS"]);
}

#[tokio::test]
async fn absolute_move_brackets_with_ma1_and_ma0() {
    let (driver, log) = driver_with_console();

    driver.move_absolute(45.0).await.unwrap();

    assert_eq!(
        logged(&log),
        ["DRIVE1", "MA1", "D112500", "GO", "MA0", "DRIVE0", "TAS"]
    );
}

#[tokio::test]
async fn full_turns_scale_the_rotation_count() {
    let (driver, log) = driver_with_console();

    driver.rotate_full_turns(1).await.unwrap();
    driver.rotate_full_turns(-2).await.unwrap();

    // No TAS after a plain turn.
    assert_eq!(
        logged(&log),
        [
            "DRIVE1", "D900000", "GO", "DRIVE0", //
            "DRIVE1", "D-1800000", "GO", "DRIVE0",
        ]
    );
}

#[tokio::test]
async fn initialize_programs_the_drive() {
    let (driver, log) = driver_with_console();

    driver.initialize(false, 3.0, 2.0).await.unwrap();

    assert_eq!(
        logged(&log),
        [
            "", "", // prompt wake-up
            "ECHO0",
            "DMODE12",
            "DRES25000",
            "V3",
            "A2",
            "A2",
            "MA0",
            "LSPOS+1000000",
            "LSNEG-990000",
            "LS0",
        ]
    );
}

#[tokio::test]
async fn initialize_can_arm_the_travel_limits() {
    let (driver, log) = driver_with_console();

    driver.initialize(true, 5.0, 10.0).await.unwrap();

    let commands = logged(&log);
    assert_eq!(commands.last().map(String::as_str), Some("LS3"));
    assert!(commands.contains(&"V5".to_string()));
    assert_eq!(
        commands.iter().filter(|c| c.as_str() == "A10").count(),
        2,
        "acceleration and deceleration are both programmed via A"
    );
}

#[tokio::test]
async fn fractional_velocity_keeps_its_decimals() {
    let (driver, log) = driver_with_console();

    driver.initialize(false, 2.5, 0.5).await.unwrap();

    let commands = logged(&log);
    assert!(commands.contains(&"V2.5".to_string()));
    assert!(commands.contains(&"A0.5".to_string()));
}

#[tokio::test]
async fn homing_programs_the_profile_then_runs_it() {
    let (driver, log) = driver_with_console();

    driver.home().await.unwrap();

    assert_eq!(
        logged(&log),
        [
            "MC0", "HOMA10", "HOMV7", "HOMVF.3", "HOMBAC1", "HOMDF1", "HOMEDG0", //
            "DRIVE1", "HOM0", "DRIVE0",
        ]
    );
}

#[tokio::test]
async fn set_home_zeroes_the_position_register() {
    let (driver, log) = driver_with_console();

    driver.set_current_position_as_home().await.unwrap();

    assert_eq!(logged(&log), ["DRIVE1", "PSET0", "DRIVE0"]);
}

// =============================================================================
// Raw commands and scripts
// =============================================================================

#[tokio::test]
async fn raw_command_returns_the_framed_response() {
    let (driver, log) = driver_with_console();

    let response = driver.command("TSS").await.unwrap();

    assert_eq!(logged(&log), ["TSS"]);
    assert_eq!(response.terminator, Some(Terminator::Prompt));
    assert!(response.text.starts_with("TSS"));
}

#[tokio::test]
async fn scripts_skip_blanks_and_comments() {
    use std::io::Write;

    let (driver, log) = driver_with_console();

    let mut script = tempfile::NamedTempFile::new().unwrap();
    writeln!(script, "V10 ; set velocity").unwrap();
    writeln!(script).unwrap();
    writeln!(script, "; a whole-line comment").unwrap();
    writeln!(script, "A25").unwrap();

    driver.run_script(script.path()).await.unwrap();

    assert_eq!(logged(&log), ["V10", "A25"]);
}

#[tokio::test]
async fn missing_script_is_an_error() {
    let (driver, log) = driver_with_console();

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-such-script.prg");
    assert!(driver.run_script(&missing).await.is_err());
    assert!(logged(&log).is_empty());
}

// =============================================================================
// Shutdown and dry runs
// =============================================================================

#[tokio::test]
async fn finish_returns_to_zero_then_goes_quiet() {
    let (driver, log) = driver_with_console();

    driver.finish().await.unwrap();

    assert_eq!(
        logged(&log),
        ["DRIVE1", "MA1", "D0", "GO", "MA0", "DRIVE0", "TAS"]
    );

    // The port is closed; further commands are silently dropped.
    let response = driver.command("V1").await.unwrap();
    assert_eq!(response.terminator, None);
    assert!(response.text.is_empty());
    assert!(!logged(&log).contains(&"V1".to_string()));
}

#[tokio::test]
async fn dry_run_exercises_every_operation_without_hardware() {
    let config = Gt6Config {
        dry_run: true,
        settle_secs: 0.0,
        ..Gt6Config::default()
    };
    let session = Session::simulated(GT6_MARKERS);
    let driver = Gt6Driver::from_session(session, &config).unwrap();

    driver.initialize(false, 3.0, 2.0).await.unwrap();
    driver.home().await.unwrap();
    driver.move_relative(30.0).await.unwrap();
    driver.move_absolute(0.0).await.unwrap();
    driver.rotate_full_turns(1).await.unwrap();
    driver.set_current_position_as_home().await.unwrap();

    let response = driver.command("TAS").await.unwrap();
    assert!(response.text.is_empty());
    assert_eq!(response.terminator, None);

    driver.finish().await.unwrap();
}
