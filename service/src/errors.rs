use std::time::Duration;

use groupcomm_net::{Address, CodecError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("member {duplicate} has the same socket address as this node ({local})")]
    DuplicateNode { local: String, duplicate: Address },

    #[error("transport could not resolve address {0}")]
    UnresolvedAddress(Address),

    #[error("node {0} was not produced by this service")]
    ForeignNode(String),

    #[error("service has no transport")]
    NotConnected,

    #[error("no view was received within {0:?}")]
    NoView(Duration),

    #[error("service has been destroyed")]
    Destroyed,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    StateTransfer(#[from] StateTransferError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors reported by a transport implementation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("transport is closed")]
    Closed,

    #[error("no member is able to supply state")]
    NoStateProvider,

    #[error("{0} is not a member of the current view")]
    UnknownDestination(Address),

    #[error("{0}")]
    Failure(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Why a state transfer did not produce state. Carried inside the transfer result rather than
/// returned as an error, except for `ModeConflict` which is reported to the caller at once.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateTransferError {
    #[error("a {pending_mode} state transfer for {service} is already pending")]
    ModeConflict {
        service: String,
        pending_mode: &'static str,
    },

    #[error("state for {service} was not received within {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    #[error("initial state transfer for {service} failed: no member supplied state and this node is not the coordinator")]
    InitialTransferFailed { service: String },

    #[error("failed to decode transferred state: {0}")]
    Decode(String),

    #[error("transport failed during state transfer: {0}")]
    Transport(String),

    #[error("state transfer task was dropped before it completed")]
    Abandoned,
}
