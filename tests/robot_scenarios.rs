//! Whole-robot scenarios on simulated hardware and a manual clock.

use robomind::auto::TimedDrive;
use robomind::clock::ManualClock;
use robomind::config::RobotConfig;
use robomind::hal::{ControlMode, MotorCommand, SimMotor, SimSensors, SimSolenoid, SimSwitch};
use robomind::subsystems::drivetrain::signal as drive_signal;
use robomind::subsystems::elevator::signal as lift_signal;
use robomind::subsystems::{
    DeployState, DriveHardware, DriveState, ElevatorHardware, ElevatorState, Robot, RobotHardware, ShiftState,
};
use robomind::{Gear, RobotMode, Scheduler};
use std::rc::Rc;
use std::time::Duration;

struct Match {
    scheduler: Scheduler,
    clock: ManualClock,
    robot: Robot,
    left: SimMotor,
    right: SimMotor,
    gearbox: SimMotor,
    deployer: SimSolenoid,
}

impl Match {
    fn new(config: &RobotConfig) -> Self {
        let clock = ManualClock::starting_now();
        let mut scheduler = Scheduler::new(config.scheduler.clone(), Box::new(clock.clone()));
        let (left, right) = (SimMotor::new("left"), SimMotor::new("right"));
        let gearbox = SimMotor::new("elevator");
        let deployer = SimSolenoid::new();

        let hardware = RobotHardware {
            drive: DriveHardware {
                left: Box::new(left.clone()),
                right: Box::new(right.clone()),
                shifter: Box::new(SimSolenoid::new()),
                sensors: Rc::new(SimSensors::new()),
            },
            elevator: ElevatorHardware {
                gearbox: Box::new(gearbox.clone()),
                lower_limit: Box::new(SimSwitch::new(true)),
                deployer: Box::new(deployer.clone()),
                shifter: Box::new(SimSolenoid::new()),
                ratchet: Box::new(SimSolenoid::new()),
                kicker: Box::new(SimSolenoid::new()),
                clamp: Box::new(SimSolenoid::new()),
            },
        };
        let robot = Robot::register(&mut scheduler, hardware, config).unwrap();

        Self {
            scheduler,
            clock,
            robot,
            left,
            right,
            gearbox,
            deployer,
        }
    }

    fn step(&mut self, ticks: usize) {
        let period = self.scheduler.config().period();
        for _ in 0..ticks {
            self.clock.advance(period);
            self.scheduler.tick();
        }
    }

    /// Run the pre-match self-tests, which leave the elevator deployed.
    fn check(&mut self) {
        let mut suite = self.robot.self_tests(Duration::from_millis(100));
        let report = suite.run(&mut self.scheduler, &self.clock).unwrap();
        assert!(report.passed(), "{}", report.to_json().unwrap());
    }
}

#[test]
fn pre_match_self_tests_cover_every_mechanism() {
    let mut game = Match::new(&RobotConfig::default());
    let mut suite = game.robot.self_tests(Duration::from_millis(100));

    assert_eq!(
        suite.names(),
        vec![
            "Drive shifter test",
            "Kicker test",
            "Clamp test",
            "Ratchet test",
            "Shifter test",
            "Elevator test",
        ]
    );

    let report = suite.run(&mut game.scheduler, &game.clock).unwrap();
    assert!(report.passed(), "{}", report.to_json().unwrap());
    assert_eq!(game.scheduler.state(game.robot.elevator.deploy), Some(DeployState::Deployed));
    assert_eq!(game.scheduler.state(game.robot.elevator.lift), Some(ElevatorState::Off));
    assert!(game.robot.elevator.is_homed(&game.scheduler));
    assert_eq!(game.deployer.history(), vec![false, true, false]);
    assert!(game.scheduler.faults().is_empty());
}

#[test]
fn autonomous_routine_drives_then_hands_over_to_teleop() {
    let mut game = Match::new(&RobotConfig::default());
    game.check();
    game.scheduler
        .set_auto(Box::new(TimedDrive::new(0.5, 0.5, Duration::from_secs(1))));

    game.scheduler.set_mode(RobotMode::Autonomous).unwrap();
    assert!(game.scheduler.auto_active());
    assert_eq!(game.scheduler.state(game.robot.drivetrain.drive), Some(DriveState::ExternalControl));
    assert_eq!(game.robot.drivetrain.gear(&game.scheduler), Some(Gear::High));

    game.step(1);
    assert_eq!(
        game.left.last(),
        MotorCommand {
            mode: ControlMode::PercentOutput,
            value: 0.5
        }
    );

    game.step(60);
    assert!(!game.scheduler.auto_active());
    assert_eq!(game.left.last().value, 0.0);
    assert_eq!(game.right.last().value, 0.0);

    game.scheduler.set_mode(RobotMode::Teleop).unwrap();
    game.scheduler.signals().set_number(drive_signal::THROTTLE, 0.5).unwrap();
    game.scheduler.signals().set_number(lift_signal::MANUAL, 1.0).unwrap();
    game.step(1);

    assert_eq!(game.scheduler.state(game.robot.drivetrain.drive), Some(DriveState::ClosedLoop));
    assert_eq!(game.scheduler.state(game.robot.elevator.lift), Some(ElevatorState::ManualAdjustment));
    assert_eq!(
        game.right.last(),
        MotorCommand {
            mode: ControlMode::Velocity,
            value: 2100.0
        }
    );
    assert_eq!(game.scheduler.signals().number(lift_signal::POSITION), Ok(200.0));
    assert_eq!(
        game.gearbox.last(),
        MotorCommand {
            mode: ControlMode::MotionMagic,
            value: 200.0
        }
    );

    game.scheduler.set_mode(RobotMode::Disabled).unwrap();
    assert_eq!(game.scheduler.state(game.robot.drivetrain.drive), Some(DriveState::Stopped));
    assert_eq!(game.scheduler.state(game.robot.elevator.lift), Some(ElevatorState::Off));
}

#[test]
fn leaving_autonomous_early_stops_the_routine() {
    let mut game = Match::new(&RobotConfig::default());
    game.scheduler
        .set_auto(Box::new(TimedDrive::new(0.8, 0.8, Duration::from_secs(15))));
    game.scheduler.set_mode(RobotMode::Autonomous).unwrap();
    game.step(5);

    game.scheduler.set_mode(RobotMode::Disabled).unwrap();

    assert!(!game.scheduler.auto_active());
    assert_eq!(game.scheduler.signals().number(drive_signal::AUTO_LEFT), Ok(0.0));
    assert_eq!(game.scheduler.state(game.robot.drivetrain.drive), Some(DriveState::Stopped));
}

#[test]
fn drivetrain_fault_does_not_stop_the_elevator() {
    let mut game = Match::new(&RobotConfig::default());
    game.check();
    game.scheduler.set_mode(RobotMode::Teleop).unwrap();
    game.scheduler.signals().set_number(lift_signal::MANUAL, 1.0).unwrap();
    game.left.set_offline(true);

    game.step(1);
    assert!(game.scheduler.is_faulted("Drivetrain"));
    assert!(!game.scheduler.is_faulted("Elevator"));
    assert_eq!(game.scheduler.faults().len(), 1);

    game.step(2);
    assert_eq!(game.scheduler.signals().number(lift_signal::POSITION), Ok(600.0));

    game.left.set_offline(false);
    assert!(game.scheduler.clear_fault("Drivetrain"));
    let report = game.scheduler.tick();
    assert_eq!(report.advanced, 2);
    assert_eq!(report.skipped, 0);
}

#[test]
fn snapshot_reports_every_machine() {
    let mut game = Match::new(&RobotConfig::default());
    game.scheduler.set_mode(RobotMode::Teleop).unwrap();
    game.scheduler
        .set_state(game.robot.drivetrain.shifting, ShiftState::Low)
        .unwrap();
    game.step(1);

    let json = serde_json::to_value(game.scheduler.snapshot()).unwrap();

    assert_eq!(json["mode"], "teleop");
    assert_eq!(json["subsystems"][0]["name"], "Drivetrain");
    assert!(json["subsystems"][0]["fault"].is_null());
    assert_eq!(json["subsystems"][0]["machines"][0]["state"], "closedloop");
    assert_eq!(json["subsystems"][0]["machines"][1]["state"], "low");
    assert_eq!(json["subsystems"][1]["name"], "Elevator");
    assert_eq!(json["subsystems"][1]["machines"].as_array().map(Vec::len), Some(6));
    assert_eq!(json["subsystems"][1]["machines"][1]["state"], "off");
    assert_eq!(json["stats"]["count"], 1);
}

#[test]
fn configured_period_paces_the_self_tests() {
    let config = RobotConfig::from_toml(
        r#"
        [scheduler]
        period_ms = 10

        [elevator]
        deploy_ms = 250
        "#,
    )
    .unwrap();
    let mut game = Match::new(&config);

    game.check();

    assert_eq!(game.scheduler.state(game.robot.elevator.deploy), Some(DeployState::Deployed));
    assert!(game.scheduler.stats().count > 0);
}
