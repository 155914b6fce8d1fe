use std::fmt::{self, Display};

/// Log target for membership and suspicion events that only the coordinator reports, so that
/// one member speaks for the group
pub const LIFECYCLE_LOG_TARGET: &str = "groupcomm::lifecycle";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Unregistered,
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
    Failed,
    Destroyed,
}

impl Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Unregistered => "unregistered",
            ServiceState::Created => "created",
            ServiceState::Starting => "starting",
            ServiceState::Started => "started",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
            ServiceState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// What a lifecycle request does from a given state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Already there or on the way, nothing to do
    Ignore,
    Proceed,

    /// The service has to be created first
    CreateFirst,

    /// The service has to be stopped first
    StopFirst,
}

impl ServiceState {
    pub(crate) fn on_create(self: Self) -> Transition {
        match self {
            ServiceState::Created
            | ServiceState::Starting
            | ServiceState::Started
            | ServiceState::Stopping
            | ServiceState::Stopped => Transition::Ignore,
            ServiceState::Unregistered | ServiceState::Failed | ServiceState::Destroyed => Transition::Proceed,
        }
    }

    /// A failed start may be retried
    pub(crate) fn on_start(self: Self) -> Transition {
        match self {
            ServiceState::Starting | ServiceState::Started => Transition::Ignore,
            ServiceState::Unregistered | ServiceState::Destroyed => Transition::CreateFirst,
            ServiceState::Created | ServiceState::Stopping | ServiceState::Stopped | ServiceState::Failed => {
                Transition::Proceed
            }
        }
    }

    pub(crate) fn on_stop(self: Self) -> Transition {
        match self {
            ServiceState::Started | ServiceState::Failed => Transition::Proceed,
            _ => Transition::Ignore,
        }
    }

    pub(crate) fn on_destroy(self: Self) -> Transition {
        match self {
            ServiceState::Destroyed | ServiceState::Unregistered => Transition::Ignore,
            ServiceState::Started | ServiceState::Failed => Transition::StopFirst,
            _ => Transition::Proceed,
        }
    }
}
