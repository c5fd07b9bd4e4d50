//! Builder API for ergonomic state machine construction.
//!
//! This module provides fluent builders and macros for declaring the fixed
//! state graph of each machine at setup time.

pub mod error;
pub mod machine;
pub mod macros;

pub use error::BuildError;
pub use machine::{StateBuilder, StateMachineBuilder, DEFAULT_HISTORY_DEPTH};

use crate::core::State;
use crate::error::BoxError;
use crate::machine::StateCx;

/// Create a state whose only behaviour is an entry callback.
///
/// Most actuator states (a solenoid position, a drive mode) only need to
/// command hardware once when they are entered.
///
/// # Example
///
/// ```
/// use robomind::builder::{on_entry, StateMachineBuilder};
/// use robomind::{state_enum, StateCx};
///
/// state_enum! {
///     enum Kicker {
///         Out => "out",
///         In => "in",
///     }
/// }
///
/// let machine = StateMachineBuilder::new("kicker", false)
///     .state(on_entry(Kicker::Out, |cx: &mut StateCx<'_, Kicker, bool>| {
///         *cx.data = true;
///         Ok(())
///     }))
///     .unwrap()
///     .state(on_entry(Kicker::In, |cx: &mut StateCx<'_, Kicker, bool>| {
///         *cx.data = false;
///         Ok(())
///     }))
///     .unwrap()
///     .default_state(Kicker::In)
///     .build()
///     .unwrap();
/// ```
pub fn on_entry<S, D, F>(state: S, f: F) -> StateBuilder<S, D>
where
    S: State,
    F: FnMut(&mut StateCx<'_, S, D>) -> Result<(), BoxError> + 'static,
{
    StateBuilder::new(state).entry(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    enum TestState {
        Out,
        In,
    }

    impl State for TestState {
        fn name(&self) -> &'static str {
            match self {
                Self::Out => "out",
                Self::In => "in",
            }
        }

        fn variants() -> &'static [Self] {
            &[Self::Out, Self::In]
        }
    }

    #[test]
    fn on_entry_builds_entry_only_state() {
        let machine = StateMachineBuilder::new("kicker", 0u8)
            .state(on_entry(TestState::Out, |cx: &mut StateCx<'_, TestState, u8>| {
                *cx.data += 1;
                Ok(())
            }))
            .unwrap()
            .state(StateBuilder::new(TestState::In))
            .unwrap()
            .default_state(TestState::In)
            .build();

        assert!(machine.is_ok());
    }
}
