//! Robot lifecycle events and their synchronous dispatch.

use crate::error::BoxError;
use crate::scheduler::Control;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::error;

/// Lifecycle events raised when the robot changes mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotEvent {
    Disabled,
    AutoEnabled,
    TeleopEnabled,
}

impl fmt::Display for RobotEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::AutoEnabled => "auto_enabled",
            Self::TeleopEnabled => "teleop_enabled",
        })
    }
}

/// Operating mode of the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotMode {
    #[default]
    Disabled,
    Autonomous,
    Teleop,
}

impl RobotMode {
    /// The event raised when the robot enters this mode.
    pub fn event(self) -> RobotEvent {
        match self {
            Self::Disabled => RobotEvent::Disabled,
            Self::Autonomous => RobotEvent::AutoEnabled,
            Self::Teleop => RobotEvent::TeleopEnabled,
        }
    }
}

/// A reaction returned an error while an event was being delivered.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("reaction of '{subscriber}' to {event} failed: {message}")]
pub struct EventFault {
    pub event: RobotEvent,
    pub subscriber: String,
    pub message: String,
}

/// Callback run when a subscribed event is published.
pub type Reaction = Box<dyn FnMut(&mut Control<'_>) -> Result<(), BoxError>>;

struct Subscription {
    event: RobotEvent,
    subscriber: String,
    reaction: Reaction,
}

/// Publish/subscribe channel for [`RobotEvent`]s.
///
/// Reactions run synchronously on the publisher's thread, in the order they
/// were subscribed.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, event: RobotEvent, subscriber: impl Into<String>, reaction: F)
    where
        F: FnMut(&mut Control<'_>) -> Result<(), BoxError> + 'static,
    {
        self.subscriptions.push(Subscription {
            event,
            subscriber: subscriber.into(),
            reaction: Box::new(reaction),
        });
    }

    /// Names of the subscribers to `event`, in delivery order.
    pub fn subscribers(&self, event: RobotEvent) -> Vec<&str> {
        self.subscriptions
            .iter()
            .filter(|s| s.event == event)
            .map(|s| s.subscriber.as_str())
            .collect()
    }

    /// Deliver `event` to every subscriber.
    ///
    /// Returns the number of reactions run. The first failing reaction
    /// aborts delivery to the remaining subscribers.
    pub fn publish(&mut self, event: RobotEvent, control: &mut Control<'_>) -> Result<usize, EventFault> {
        let mut delivered = 0;
        for subscription in self.subscriptions.iter_mut().filter(|s| s.event == event) {
            if let Err(e) = (subscription.reaction)(control) {
                let fault = EventFault {
                    event,
                    subscriber: subscription.subscriber.clone(),
                    message: e.to_string(),
                };
                error!(%event, subscriber = %fault.subscriber, error = %fault.message, "event reaction failed");
                return Err(fault);
            }
            delivered += 1;
        }
        Ok(delivered)
    }
}
