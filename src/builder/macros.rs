//! Macros for ergonomic state declaration.

/// Declare a state enum and implement [`State`](crate::core::State) for it.
///
/// Each variant is paired with its diagnostic name.
///
/// # Example
///
/// ```
/// use robomind::core::State;
/// use robomind::state_enum;
///
/// state_enum! {
///     pub enum ShiftState {
///         High => "high",
///         Low => "low",
///         Auto => "autoShifting",
///     }
/// }
///
/// assert_eq!(ShiftState::Auto.name(), "autoShifting");
/// assert_eq!(ShiftState::from_name("low"), Some(ShiftState::Low));
/// ```
#[macro_export]
macro_rules! state_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident => $label:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant
            ),+
        }

        impl $crate::core::State for $name {
            fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }

            fn variants() -> &'static [Self] {
                &[$(Self::$variant),+]
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::core::State;

    state_enum! {
        enum TestState {
            Locked => "locked",
            Unlocked => "unlocked",
        }
    }

    #[test]
    fn state_enum_macro_generates_trait() {
        assert_eq!(TestState::Locked.name(), "locked");
        assert_eq!(TestState::Unlocked.name(), "unlocked");
        assert_eq!(TestState::variants(), &[TestState::Locked, TestState::Unlocked]);
    }

    #[test]
    fn state_enum_supports_visibility_and_attributes() {
        state_enum! {
            /// Clamp positions.
            pub enum PublicState {
                /// Jaws closed on the cube.
                Clamped => "out",
                Unclamped => "in",
            }
        }

        assert_eq!(PublicState::from_name("out"), Some(PublicState::Clamped));
    }
}
