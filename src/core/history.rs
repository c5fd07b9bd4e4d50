//! State transition history tracking.
//!
//! Each machine keeps the most recent transitions for diagnostics. The
//! buffer is bounded: once full, recording a transition drops the oldest.

use super::state::State;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use std::time::Duration;

/// Why a transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    /// The machine entered its default state when first started.
    Startup,
    /// An explicit request named a defined state.
    Request,
    /// The requested state was unknown, so the default state was used.
    Fallback,
    /// The active state's timeout expired.
    Timeout,
}

/// Record of a single state transition.
#[derive(Debug, Clone, Serialize)]
#[serde(bound = "")]
pub struct TransitionRecord<S: State> {
    /// The state being left, `None` at startup
    #[serde(serialize_with = "optional_name")]
    pub from: Option<S>,
    /// The state being entered
    #[serde(serialize_with = "name")]
    pub to: S,
    pub cause: Cause,
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
}

/// Bounded, ordered history of state transitions.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use robomind::core::{Cause, State, StateHistory, TransitionRecord};
///
/// #[derive(Clone, Copy, PartialEq, Eq, Debug)]
/// enum Kicker { Out, In }
///
/// impl State for Kicker {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::Out => "out",
///             Self::In => "in",
///         }
///     }
///
///     fn variants() -> &'static [Self] {
///         &[Self::Out, Self::In]
///     }
/// }
///
/// let mut history = StateHistory::with_capacity(8);
/// history.record(TransitionRecord {
///     from: None,
///     to: Kicker::In,
///     cause: Cause::Startup,
///     timestamp: Utc::now(),
/// });
/// history.record(TransitionRecord {
///     from: Some(Kicker::In),
///     to: Kicker::Out,
///     cause: Cause::Request,
///     timestamp: Utc::now(),
/// });
///
/// assert_eq!(history.get_path(), vec![Kicker::In, Kicker::Out]);
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(bound = "")]
pub struct StateHistory<S: State> {
    records: VecDeque<TransitionRecord<S>>,
    #[serde(skip)]
    capacity: usize,
}

impl<S: State> StateHistory<S> {
    /// Create an empty history holding at most `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    /// Record a transition, dropping the oldest record when full.
    pub fn record(&mut self, transition: TransitionRecord<S>) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(transition);
    }

    /// States traversed, oldest first: the first record's origin (when it
    /// has one) followed by the destination of every record.
    pub fn get_path(&self) -> Vec<S> {
        let mut path = Vec::with_capacity(self.records.len() + 1);
        if let Some(from) = self.records.front().and_then(|r| r.from) {
            path.push(from);
        }
        path.extend(self.records.iter().map(|r| r.to));
        path
    }

    /// Time between the oldest and newest retained transitions.
    pub fn duration(&self) -> Option<Duration> {
        let (first, last) = (self.records.front()?, self.records.back()?);
        last.timestamp
            .signed_duration_since(first.timestamp)
            .to_std()
            .ok()
    }

    pub fn last(&self) -> Option<&TransitionRecord<S>> {
        self.records.back()
    }

    pub fn transitions(&self) -> impl Iterator<Item = &TransitionRecord<S>> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn name<S: State, Ser: Serializer>(state: &S, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
    serializer.serialize_str(state.name())
}

fn optional_name<S: State, Ser: Serializer>(
    state: &Option<S>,
    serializer: Ser,
) -> Result<Ser::Ok, Ser::Error> {
    match state {
        Some(s) => serializer.serialize_some(s.name()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    enum Step {
        A,
        B,
        C,
    }

    impl State for Step {
        fn name(&self) -> &'static str {
            match self {
                Self::A => "A",
                Self::B => "B",
                Self::C => "C",
            }
        }

        fn variants() -> &'static [Self] {
            &[Self::A, Self::B, Self::C]
        }
    }

    fn record(from: Option<Step>, to: Step, at: DateTime<Utc>) -> TransitionRecord<Step> {
        TransitionRecord {
            from,
            to,
            cause: Cause::Request,
            timestamp: at,
        }
    }

    #[test]
    fn path_starts_with_startup_state() {
        let now = Utc::now();
        let mut history = StateHistory::with_capacity(4);
        history.record(record(None, Step::A, now));
        history.record(record(Some(Step::A), Step::B, now));

        assert_eq!(history.get_path(), vec![Step::A, Step::B]);
    }

    #[test]
    fn oldest_records_are_dropped_when_full() {
        let now = Utc::now();
        let mut history = StateHistory::with_capacity(2);
        history.record(record(None, Step::A, now));
        history.record(record(Some(Step::A), Step::B, now));
        history.record(record(Some(Step::B), Step::C, now));

        assert_eq!(history.len(), 2);
        assert_eq!(history.get_path(), vec![Step::A, Step::B, Step::C]);
        assert_eq!(history.last().map(|r| r.to), Some(Step::C));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut history = StateHistory::with_capacity(0);
        history.record(record(None, Step::A, Utc::now()));
        assert!(history.is_empty());
        assert!(history.duration().is_none());
    }

    #[test]
    fn duration_spans_first_to_last() {
        let start = Utc::now();
        let mut history = StateHistory::with_capacity(4);
        history.record(record(None, Step::A, start));
        history.record(record(Some(Step::A), Step::B, start + TimeDelta::milliseconds(40)));

        assert_eq!(history.duration(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn records_serialize_state_names() {
        let mut history = StateHistory::with_capacity(4);
        history.record(record(Some(Step::A), Step::C, Utc::now()));

        let json = serde_json::to_value(&history).unwrap();
        assert_eq!(json["records"][0]["from"], "A");
        assert_eq!(json["records"][0]["to"], "C");
        assert_eq!(json["records"][0]["cause"], "request");
    }
}
