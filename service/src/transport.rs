/*
The contract between the service and the group transport underneath it. The transport owns
membership, failure detection, multicast and the state exchange primitive; the service only
reacts to its callbacks and asks it to send. Addresses handed out by a transport are opaque
and only that transport can resolve them.
*/

use std::{
    io::{Read, Write},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use groupcomm_net::{Address, ViewId};

use crate::errors::{TransportError, TransportResult};

/// Binds a service instance to the transport it was started with
pub mod binding;

/// An in-process transport that connects many nodes living in one process
pub mod loopback;

/// Membership as reported by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct RawView {
    pub view_id: ViewId,

    /// Current members in the order the transport ranks them, the first one coordinates
    pub members: Vec<Address>,

    /// Present when the view was formed by merging partitions, one entry per partition
    pub subgroups: Option<Vec<Vec<Address>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    All,
    Single(Address),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Wait for a response from every destination
    All,

    /// Return after the first acceptable response
    First,

    /// Do not wait for responses at all
    None,
}

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub destination: Destination,
    pub exclude: Vec<Address>,
    pub mode: ResponseMode,
    pub timeout: Duration,

    /// Deliver without waiting for messages sent earlier by this member
    pub out_of_band: bool,

    pub payload: Vec<u8>,
}

/// One entry per destination. `payload` is `None` when the member did not answer within the
/// timeout, was suspected, or its answer was rejected by the response filter.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub sender: Address,
    pub payload: Option<Vec<u8>>,
}

/// Consulted by the transport as responses arrive
pub trait RspFilter {
    fn is_acceptable(self: &mut Self, response: &[u8], sender: &Address) -> bool;

    /// Returning false ends the wait for further responses
    fn need_more_responses(self: &Self) -> bool;
}

pub trait Transport: Send + Sync {
    fn connect(self: &Self, group_name: &str) -> TransportResult<()>;
    fn disconnect(self: &Self);
    fn close(self: &Self);

    fn is_connected(self: &Self) -> bool;
    fn is_open(self: &Self) -> bool;

    fn local_address(self: &Self) -> Option<Address>;
    fn view(self: &Self) -> Option<RawView>;

    fn physical_address(self: &Self, address: &Address) -> Option<SocketAddr>;
    fn logical_name(self: &Self, address: &Address) -> Option<String>;

    fn set_receiver(self: &Self, receiver: Arc<dyn TransportReceiver>);
    fn clear_receiver(self: &Self);

    fn send(
        self: &Self,
        request: OutboundRequest,
        filter: &mut dyn RspFilter,
    ) -> TransportResult<Vec<RawResponse>>;

    fn flush_supported(self: &Self) -> bool;

    /// True when messages multicast by this member are not delivered back to it
    fn discard_own_messages(self: &Self) -> bool;

    /// Asks a member (`target`, or one the transport picks) for its state. The state arrives
    /// later through `TransportReceiver::set_state` on another thread. Fails with
    /// `TransportError::NoStateProvider` when there is no other member to ask.
    fn request_state(self: &Self, target: Option<&Address>, timeout: Duration) -> TransportResult<()>;
}

/// Callbacks from the transport into the service. Calls arrive on transport threads.
pub trait TransportReceiver: Send + Sync {
    fn view_accepted(self: &Self, view: RawView);
    fn suspect(self: &Self, address: &Address);

    /// The transport is about to reorganise the group, outbound calls should pause
    fn block(self: &Self);
    fn unblock(self: &Self);

    /// Handles an inbound request. `None` means no response is sent.
    fn handle(self: &Self, request: &[u8]) -> Option<Vec<u8>>;

    fn get_state(self: &Self, output: &mut dyn Write) -> TransportResult<()>;
    fn set_state(self: &Self, input: &mut dyn Read);
    fn state_transfer_failed(self: &Self, error: TransportError);
}

/// Creates transports for services that were not given one
pub trait TransportFactory: Send + Sync {
    fn create_transport(self: &Self, group_name: &str) -> TransportResult<Arc<dyn Transport>>;
}
