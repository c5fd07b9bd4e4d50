//! Core State trait for state machine states.
//!
//! Each machine's states form a closed enum. Names exist for diagnostics
//! and for the fail-safe lookup of a state by string, which falls back to
//! the machine's default state when the name is unknown.

use std::fmt::Debug;

/// Trait for state machine states.
///
/// Implement it with [`state_enum!`](crate::state_enum) rather than by hand.
///
/// # Example
///
/// ```rust
/// use robomind::core::State;
///
/// #[derive(Clone, Copy, PartialEq, Eq, Debug)]
/// enum Ratchet {
///     Locked,
///     Unlocked,
/// }
///
/// impl State for Ratchet {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::Locked => "locked",
///             Self::Unlocked => "unlocked",
///         }
///     }
///
///     fn variants() -> &'static [Self] {
///         &[Self::Locked, Self::Unlocked]
///     }
/// }
///
/// assert_eq!(Ratchet::from_name("unlocked"), Some(Ratchet::Unlocked));
/// assert_eq!(Ratchet::from_name(""), None);
/// ```
pub trait State: Copy + Eq + Debug + 'static {
    /// Human-readable name, unique within the enum.
    fn name(&self) -> &'static str;

    /// Every variant, in declaration order.
    fn variants() -> &'static [Self];

    /// Look a variant up by its name.
    fn from_name(name: &str) -> Option<Self> {
        Self::variants().iter().copied().find(|s| s.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    enum TestState {
        Stowed,
        Deploying,
        Deployed,
    }

    impl State for TestState {
        fn name(&self) -> &'static str {
            match self {
                Self::Stowed => "stowed",
                Self::Deploying => "deploy",
                Self::Deployed => "deployed",
            }
        }

        fn variants() -> &'static [Self] {
            &[Self::Stowed, Self::Deploying, Self::Deployed]
        }
    }

    #[test]
    fn state_name_returns_correct_value() {
        assert_eq!(TestState::Stowed.name(), "stowed");
        assert_eq!(TestState::Deploying.name(), "deploy");
        assert_eq!(TestState::Deployed.name(), "deployed");
    }

    #[test]
    fn from_name_round_trips_every_variant() {
        for state in TestState::variants() {
            assert_eq!(TestState::from_name(state.name()), Some(*state));
        }
    }

    #[test]
    fn from_name_rejects_unknown_and_empty_names() {
        assert_eq!(TestState::from_name("Deployed"), None);
        assert_eq!(TestState::from_name(""), None);
    }
}
