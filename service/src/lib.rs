/// Settings loaded from configuration files and the environment
pub mod config;

/// Error types returned by the service and by transports
pub mod errors;

/// Holds outbound calls back while the transport reorganises the group
pub mod flush_gate;

/// A bounded record of membership events for operators
pub mod history;

/// Lifecycle states of a service instance
pub mod lifecycle;

/// Tracks the current view and the listeners interested in it
pub mod membership;

/// Cluster nodes and group views as applications see them
pub mod model;

/// Delivers membership changes to registered listeners
pub mod notification;

/// Group remote procedure calls
pub mod rpc;

/// The group communication service itself
pub mod service;

/// Transfers service state from existing members to a joining member
pub mod state_transfer;

/// The contract with the group transport, and an in-process implementation of it
pub mod transport;

/// Threads that run asynchronous work for the service
pub mod worker_pool;

pub use groupcomm_net::{bin_serialization::RemoteFailure, Address, Payload};

pub use config::ServiceConfig;
pub use errors::{ServiceError, ServiceResult, StateTransferError, TransportError};
pub use lifecycle::ServiceState;
pub use membership::GroupMembershipListener;
pub use model::{ClusterNode, GroupView};
pub use rpc::{CallOptions, DecodeContext, ResponseFilter, RpcHandler, RpcResult};
pub use service::{GroupCommunicationService, GroupCommunicationServiceBuilder};
pub use state_transfer::{StateStream, StateTransferFuture, StateTransferProvider, StateTransferResult};
