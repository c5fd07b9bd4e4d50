//! Simulated match: pre-match self-tests, a timed autonomous drive, a few
//! seconds of teleop, then disable. Prints the final snapshot as JSON.
//!
//! ```text
//! RUST_LOG=robomind=debug cargo run --example match_sim [robot.toml]
//! ```

use robomind::auto::TimedDrive;
use robomind::clock::ManualClock;
use robomind::config::RobotConfig;
use robomind::hal::{SimMotor, SimSensors, SimSolenoid, SimSwitch};
use robomind::subsystems::drivetrain::signal as drive_signal;
use robomind::subsystems::elevator::signal as lift_signal;
use robomind::subsystems::{DriveHardware, ElevatorHardware, Robot, RobotHardware, ShiftState};
use robomind::{RobotMode, Scheduler};
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RobotConfig::load(path)?,
        None => RobotConfig::default(),
    };

    let clock = ManualClock::starting_now();
    let mut scheduler = Scheduler::new(config.scheduler.clone(), Box::new(clock.clone()));
    let sensors = SimSensors::new();
    let hardware = RobotHardware {
        drive: DriveHardware {
            left: Box::new(SimMotor::new("drive_left")),
            right: Box::new(SimMotor::new("drive_right")),
            shifter: Box::new(SimSolenoid::new()),
            sensors: Rc::new(sensors.clone()),
        },
        elevator: ElevatorHardware {
            gearbox: Box::new(SimMotor::new("elevator")),
            lower_limit: Box::new(SimSwitch::new(true)),
            deployer: Box::new(SimSolenoid::new()),
            shifter: Box::new(SimSolenoid::new()),
            ratchet: Box::new(SimSolenoid::new()),
            kicker: Box::new(SimSolenoid::new()),
            clamp: Box::new(SimSolenoid::new()),
        },
    };
    let robot = Robot::register(&mut scheduler, hardware, &config)?;

    let report = robot
        .self_tests(Duration::from_millis(250))
        .run(&mut scheduler, &clock)?;
    if report.passed() {
        info!(tests = report.results.len(), "self-tests passed");
    } else {
        warn!("self-tests failed:\n{}", report.to_json()?);
    }

    let period = config.scheduler.period();
    let run_for = |scheduler: &mut Scheduler, duration: Duration| {
        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            clock.advance(period);
            scheduler.tick();
            elapsed += period;
        }
    };

    scheduler.set_auto(Box::new(TimedDrive::new(0.6, 0.6, Duration::from_secs(2))));
    scheduler.set_mode(RobotMode::Autonomous)?;
    run_for(&mut scheduler, Duration::from_secs(15));

    scheduler.set_mode(RobotMode::Teleop)?;
    scheduler.set_state(robot.drivetrain.shifting, ShiftState::Auto)?;
    scheduler.signals().set_number(drive_signal::THROTTLE, 1.0)?;
    scheduler.signals().set_number(lift_signal::MANUAL, 0.5)?;
    sensors.set_current(12.0);
    for velocity in [200.0, 600.0, 1000.0, 1400.0] {
        sensors.set_velocity(velocity);
        run_for(&mut scheduler, Duration::from_secs(1));
        info!(
            velocity,
            gear = ?robot.drivetrain.gear(&scheduler),
            reason = ?robot.drivetrain.last_decision(&scheduler).map(|d| d.reason),
            "teleop"
        );
    }

    scheduler.set_mode(RobotMode::Disabled)?;
    println!("{}", serde_json::to_string_pretty(&scheduler.snapshot())?);
    Ok(())
}
