use groupcomm_net::{CodecResult, Payload};

use crate::errors::StateTransferError;

/// A future that resolves when a requested transfer finishes
pub mod future;

/// One pending transfer for one service
pub mod task;

/// Registers transfer tasks and moves state between the transport and them
pub mod coordinator;

pub use future::StateTransferFuture;
pub use task::StateStream;

/// Supplies the current state of one service when another member asks for it
pub trait StateTransferProvider: Send + Sync {
    fn current_state(self: &Self) -> CodecResult<Payload>;
}

impl<F> StateTransferProvider for F
where
    F: Fn() -> CodecResult<Payload> + Send + Sync,
{
    fn current_state(self: &Self) -> CodecResult<Payload> {
        self()
    }
}

/// How a transfer ended. When no state was received and there is no error, this node is the
/// first member of the group and has nobody to get state from.
#[derive(Debug, Clone)]
pub struct StateTransferResult<S> {
    state_received: bool,
    state: Option<S>,
    error: Option<StateTransferError>,
}

pub type SerializableStateTransferResult = StateTransferResult<Payload>;
pub type StreamStateTransferResult = StateTransferResult<StateStream>;

impl<S> StateTransferResult<S> {
    pub fn state_received(self: &Self) -> bool { self.state_received }
    pub fn state(self: &Self) -> Option<&S> { self.state.as_ref() }
    pub fn error(self: &Self) -> Option<&StateTransferError> { self.error.as_ref() }

    pub fn into_state(self: Self) -> Option<S> {
        self.state
    }

    pub(crate) fn received(state: S) -> Self {
        Self {
            state_received: true,
            state: Some(state),
            error: None,
        }
    }

    pub(crate) fn nothing_to_receive() -> Self {
        Self {
            state_received: false,
            state: None,
            error: None,
        }
    }

    pub(crate) fn failed(error: StateTransferError) -> Self {
        Self {
            state_received: false,
            state: None,
            error: Some(error),
        }
    }
}
