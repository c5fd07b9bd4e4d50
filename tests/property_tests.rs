//! Property-based tests for the engine and the gear-shift decision.
//!
//! These tests use proptest to verify properties hold across
//! many randomly generated inputs.

use chrono::{TimeDelta, Utc};
use proptest::prelude::*;
use robomind::builder::{StateBuilder, StateMachineBuilder};
use robomind::core::State;
use robomind::shift::{decide, Gear, ShiftConfig, ShiftInputs, ShiftReason};
use robomind::signals::SignalStore;
use robomind::subsystems::drivetrain::arcade;
use robomind::{state_enum, StateMachine, Transition};

state_enum! {
    enum Deploy {
        Stowed => "stowed",
        Deploying => "deploy",
        Deployed => "deployed",
        Safe => "safe",
    }
}

type Step = StateBuilder<Deploy, Vec<String>>;

const LOCKED: &str = "deploy.locked";

/// Every state logs its entry and exit; `Deployed` refuses entry while the
/// `deploy.locked` flag is set.
fn machine(depth: usize) -> StateMachine<Deploy, Vec<String>> {
    Deploy::variants()
        .iter()
        .try_fold(StateMachineBuilder::new("deploy", Vec::new()), |builder, &state| {
            let step = Step::new(state)
                .entry(move |cx| {
                    cx.data.push(format!("enter {}", state.name()));
                    Ok(())
                })
                .exit(move |cx| {
                    cx.data.push(format!("exit {}", state.name()));
                    Ok(())
                });
            let step = if state == Deploy::Deployed {
                step.reject_if(|_, signals| signals.flag(LOCKED).unwrap_or(true))
            } else {
                step
            };
            builder.state(step)
        })
        .unwrap()
        .default_state(Deploy::Safe)
        .history_depth(depth)
        .build()
        .unwrap()
}

fn signals() -> SignalStore {
    let signals = SignalStore::new();
    signals.declare_flag(LOCKED, false).unwrap();
    signals
}

prop_compose! {
    fn arbitrary_state()(index in 0..4usize) -> Deploy {
        Deploy::variants()[index]
    }
}

prop_compose! {
    fn arbitrary_gear()(high in any::<bool>()) -> Gear {
        if high { Gear::High } else { Gear::Low }
    }
}

prop_compose! {
    /// Inputs whose last shift is well outside the dwell window.
    fn settled_inputs()(
        gear in arbitrary_gear(),
        current in 0.0f64..34.9,
        speed in -5.0f64..5.0,
    ) -> ShiftInputs {
        let now = Utc::now();
        ShiftInputs {
            now,
            last_shift: now - TimeDelta::seconds(1),
            current: Some(current),
            speed: Some(speed),
            reference: None,
            gear,
        }
    }
}

proptest! {
    #[test]
    fn overcurrent_always_selects_low(
        mut inputs in settled_inputs(),
        current in 35.0f64..500.0,
        since_shift in 0i64..2000,
    ) {
        inputs.current = Some(current);
        inputs.last_shift = inputs.now - TimeDelta::milliseconds(since_shift);

        let decision = decide(&ShiftConfig::default(), &inputs);

        prop_assert_eq!(decision.gear, Gear::Low);
        prop_assert_eq!(decision.reason, ShiftReason::Overcurrent);
    }

    #[test]
    fn dwell_window_holds_gear(mut inputs in settled_inputs(), since_shift in 0i64..=250) {
        inputs.last_shift = inputs.now - TimeDelta::milliseconds(since_shift);

        let decision = decide(&ShiftConfig::default(), &inputs);

        prop_assert_eq!(decision.gear, inputs.gear);
        prop_assert_eq!(decision.reason, ShiftReason::FastToggle);
    }

    #[test]
    fn dead_band_holds_gear(mut inputs in settled_inputs(), speed in 1.7f64..=2.3) {
        inputs.speed = Some(speed);

        let decision = decide(&ShiftConfig::default(), &inputs);

        prop_assert_eq!(decision.gear, inputs.gear);
        prop_assert_eq!(decision.reason, ShiftReason::NoCaseSatisfied);
    }

    #[test]
    fn missing_current_always_selects_low(mut inputs in settled_inputs()) {
        inputs.current = None;
        prop_assert_eq!(decide(&ShiftConfig::default(), &inputs).gear, Gear::Low);
    }

    #[test]
    fn decision_is_deterministic(inputs in settled_inputs()) {
        let config = ShiftConfig::default();
        prop_assert_eq!(decide(&config, &inputs), decide(&config, &inputs));
    }

    #[test]
    fn requesting_active_state_is_idempotent(state in arbitrary_state()) {
        let signals = signals();
        let now = Utc::now();
        let mut machine = machine(32);
        machine.start(&signals, now).unwrap();

        machine.set_state(state, &signals, now).unwrap();
        let entries = machine.data().len();
        let again = machine.set_state(state, &signals, now).unwrap();

        prop_assert_eq!(again, Transition::Unchanged(state));
        prop_assert_eq!(machine.data().len(), entries);
    }

    #[test]
    fn unknown_names_fall_back_to_default(
        start in arbitrary_state(),
        name in "[a-z_]{0,12}",
    ) {
        prop_assume!(Deploy::from_name(&name).is_none());
        let signals = signals();
        let now = Utc::now();
        let mut machine = machine(32);
        machine.start(&signals, now).unwrap();
        machine.set_state(start, &signals, now).unwrap();

        machine.set_state_named(&name, &signals, now).unwrap();

        prop_assert_eq!(machine.state(), Some(Deploy::Safe));
    }

    #[test]
    fn rejected_request_changes_nothing_until_guard_clears(start in arbitrary_state()) {
        prop_assume!(start != Deploy::Deployed);
        let signals = signals();
        let now = Utc::now();
        let mut machine = machine(32);
        machine.start(&signals, now).unwrap();
        machine.set_state(start, &signals, now).unwrap();
        let before = machine.data().clone();

        signals.set_flag(LOCKED, true).unwrap();
        let rejected = machine.set_state(Deploy::Deployed, &signals, now).unwrap();
        prop_assert!(
            matches!(rejected, Transition::Rejected { target: Deploy::Deployed, .. }),
            "unexpected transition"
        );
        prop_assert_eq!(machine.state(), Some(start));
        prop_assert_eq!(machine.data(), &before);

        signals.set_flag(LOCKED, false).unwrap();
        let retried = machine.set_state(Deploy::Deployed, &signals, now).unwrap();
        prop_assert!(retried.entered());
        prop_assert_eq!(machine.state(), Some(Deploy::Deployed));
    }

    #[test]
    fn exit_always_precedes_next_entry(states in prop::collection::vec(arbitrary_state(), 1..20)) {
        let signals = signals();
        let now = Utc::now();
        let mut machine = machine(32);
        machine.start(&signals, now).unwrap();

        for state in states {
            machine.set_state(state, &signals, now).unwrap();
        }

        let log = machine.data();
        prop_assert_eq!(log[0].as_str(), "enter safe");
        for pair in log[1..].chunks(2) {
            prop_assert!(pair[0].starts_with("exit "));
            prop_assert!(pair[1].starts_with("enter "));
        }
    }

    #[test]
    fn history_is_bounded_and_ordered(
        states in prop::collection::vec(arbitrary_state(), 0..40),
        depth in 1usize..16,
    ) {
        let signals = signals();
        let now = Utc::now();
        let mut machine = machine(depth);
        machine.start(&signals, now).unwrap();

        for state in &states {
            machine.set_state(*state, &signals, now).unwrap();
        }

        let history = machine.history();
        prop_assert!(history.len() <= depth);
        prop_assert_eq!(history.last().map(|r| r.to), machine.state());
        let records: Vec<_> = history.transitions().collect();
        for pair in records.windows(2) {
            prop_assert_eq!(pair[0].to, pair[1].from.unwrap());
        }
    }

    #[test]
    fn arcade_outputs_stay_in_range(
        throttle in -3.0f64..3.0,
        turn in -3.0f64..3.0,
        deadband in 0.0f64..0.5,
    ) {
        let (left, right) = arcade(throttle, turn, deadband);
        prop_assert!((-1.0..=1.0).contains(&left));
        prop_assert!((-1.0..=1.0).contains(&right));
    }
}

#[test]
fn stalled_high_gear_scenario() {
    let now = Utc::now();
    let decision = decide(
        &ShiftConfig::default(),
        &ShiftInputs {
            now,
            last_shift: now - TimeDelta::seconds(1),
            current: Some(0.0),
            speed: Some(0.05),
            reference: None,
            gear: Gear::High,
        },
    );

    assert_eq!(decision.gear, Gear::Low);
    assert_eq!(decision.reason.to_string(), "stall/underspeed");
}

#[test]
fn fast_low_gear_scenario_upshifts() {
    let now = Utc::now();
    let decision = decide(
        &ShiftConfig::default(),
        &ShiftInputs {
            now,
            last_shift: now - TimeDelta::seconds(1),
            current: Some(0.0),
            speed: Some(2.5),
            reference: None,
            gear: Gear::Low,
        },
    );

    assert_eq!(decision.gear, Gear::High);
    assert_eq!(decision.reason.to_string(), "high speed");
}

#[test]
fn overcurrent_scenario_ignores_speed() {
    let now = Utc::now();
    for speed in [None, Some(0.0), Some(2.5), Some(100.0)] {
        let decision = decide(
            &ShiftConfig::default(),
            &ShiftInputs {
                now,
                last_shift: now,
                current: Some(40.0),
                speed,
                reference: None,
                gear: Gear::Low,
            },
        );

        assert_eq!(decision.gear, Gear::Low);
        assert_eq!(decision.reason.to_string(), "overcurrent");
    }
}

#[test]
fn second_request_within_a_tick_supersedes_the_first() {
    let signals = signals();
    let now = Utc::now();
    let mut machine = machine(32);
    machine.start(&signals, now).unwrap();

    machine.set_state(Deploy::Stowed, &signals, now).unwrap();
    machine
        .set_state(Deploy::Deploying, &signals, now + TimeDelta::milliseconds(10))
        .unwrap();

    assert_eq!(
        machine.data(),
        &vec!["enter safe", "exit safe", "enter stowed", "exit stowed", "enter deploy"]
    );
    assert_eq!(machine.state(), Some(Deploy::Deploying));
}
