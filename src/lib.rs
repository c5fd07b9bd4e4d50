//! Robomind: tick-driven state machines for competition robots
//!
//! Every mechanism on the robot (drivetrain, elevator, pneumatic clamps) is
//! modelled as a handful of small finite-state machines. A fixed-rate
//! [`Scheduler`] advances every machine once per tick, and a small set of
//! lifecycle [`RobotEvent`]s (disabled, autonomous, teleop) force immediate
//! transitions in between.
//!
//! # Core Concepts
//!
//! - **State**: a closed enum per machine, see [`State`] and [`state_enum!`]
//! - **State machine**: guarded entry/action/exit callbacks, reject-guards and
//!   timeout transitions, see [`StateMachine`]
//! - **Scheduler**: owns subsystems, the [`SignalStore`] and the [`EventBus`]
//! - **Auto-shift**: the hysteretic gear selection in [`shift`]
//!
//! # Example
//!
//! ```rust
//! use robomind::builder::{StateBuilder, StateMachineBuilder};
//! use robomind::clock::ManualClock;
//! use robomind::config::SchedulerConfig;
//! use robomind::{state_enum, Scheduler};
//!
//! state_enum! {
//!     pub enum Clamp {
//!         Open => "open",
//!         Closed => "closed",
//!     }
//! }
//!
//! type ClampState = StateBuilder<Clamp, u32>;
//!
//! let clock = ManualClock::starting_now();
//! let mut scheduler = Scheduler::new(SchedulerConfig::default(), Box::new(clock.clone()));
//!
//! let machine = StateMachineBuilder::new("clamp", 0u32)
//!     .state(ClampState::new(Clamp::Open).entry(|cx| {
//!         *cx.data += 1;
//!         Ok(())
//!     }))
//!     .unwrap()
//!     .state(ClampState::new(Clamp::Closed))
//!     .unwrap()
//!     .default_state(Clamp::Open);
//!
//! let clamp = scheduler
//!     .add_subsystem("Intake")
//!     .unwrap()
//!     .declare(machine)
//!     .unwrap();
//!
//! scheduler.tick();
//! assert_eq!(scheduler.state(clamp), Some(Clamp::Open));
//!
//! scheduler.set_state(clamp, Clamp::Closed).unwrap();
//! assert_eq!(scheduler.state(clamp), Some(Clamp::Closed));
//! ```

pub mod auto;
pub mod builder;
pub mod clock;
pub mod config;
pub mod core;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod hal;
pub mod machine;
pub mod scheduler;
pub mod shift;
pub mod signals;
pub mod subsystems;

// Re-export commonly used types
pub use crate::core::{RejectGuard, State, StateHistory, StateWatch, TransitionRecord};
pub use error::{BoxError, CallbackFault, ControlError, Phase};
pub use events::{EventBus, RobotEvent, RobotMode};
pub use machine::{StateCx, StateMachine, Transition};
pub use scheduler::{Control, MachineHandle, Scheduler, SubsystemSetup};
pub use shift::{Gear, ShiftDecision, ShiftReason};
pub use signals::{SignalStore, SignalValue};
