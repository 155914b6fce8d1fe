/*
A transport for nodes that share one process. All nodes created from one network form a
single group. Views are numbered by the network and delivered to every member in the same
order; requests are handled synchronously on the sender's thread, in member order. Tests use
the extra controls on the network to suspect members, make them unreachable, run a flush and
inject merge views.
*/

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use groupcomm_net::{Address, ViewId};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{TransportError, TransportResult};

use super::{
    Destination, OutboundRequest, RawResponse, RawView, ResponseMode, RspFilter, Transport,
    TransportFactory, TransportReceiver,
};

pub const FIRST_LOOPBACK_PORT: u16 = 7800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackOptions {
    /// Deliver block and unblock around every view change
    pub flush_supported: bool,

    /// Leave the sender out of its own multicasts
    pub discard_own_messages: bool,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            flush_supported: false,
            discard_own_messages: true,
        }
    }
}

struct Endpoint {
    name: String,
    socket_address: SocketAddr,
    receiver: Option<Arc<dyn TransportReceiver>>,
    reachable: bool,
    open: bool,
}

struct NetworkState {
    view_id: ViewId,
    members: Vec<Address>,
    subgroups: Option<Vec<Vec<Address>>>,
    endpoints: HashMap<Address, Endpoint>,
    next_port: u16,
}

impl NetworkState {
    fn raw_view(self: &Self) -> RawView {
        RawView {
            view_id: self.view_id,
            members: self.members.clone(),
            subgroups: self.subgroups.clone(),
        }
    }

    fn member_receivers(self: &Self) -> Vec<Arc<dyn TransportReceiver>> {
        self.members
            .iter()
            .filter_map(|member| self.endpoints.get(member))
            .filter_map(|endpoint| endpoint.receiver.clone())
            .collect()
    }

    fn reachable_receiver(self: &Self, address: &Address) -> Option<Arc<dyn TransportReceiver>> {
        self.endpoints
            .get(address)
            .filter(|endpoint| endpoint.reachable)
            .and_then(|endpoint| endpoint.receiver.clone())
    }
}

pub struct LoopbackNetwork {
    options: LoopbackOptions,
    state: Mutex<NetworkState>,
    view_delivery: Mutex<()>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Self::with_options(LoopbackOptions::default())
    }

    pub fn with_options(options: LoopbackOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            state: Mutex::new(NetworkState {
                view_id: 0,
                members: Vec::new(),
                subgroups: None,
                endpoints: HashMap::new(),
                next_port: FIRST_LOOPBACK_PORT,
            }),
            view_delivery: Mutex::new(()),
        })
    }

    pub fn options(self: &Self) -> LoopbackOptions {
        self.options
    }

    /// Creates an endpoint with a fresh address and the next free port on 127.0.0.1
    pub fn create_transport(self: &Arc<Self>, name: &str) -> Arc<LoopbackTransport> {
        let port = {
            let mut state = self.state.lock().unwrap();
            let port = state.next_port;
            state.next_port = state.next_port.wrapping_add(1);
            port
        };
        self.create_transport_at(name, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
    }

    /// Creates an endpoint with a fresh address bound to the given socket address. Two
    /// endpoints at the same socket address look like the same node to the service.
    pub fn create_transport_at(self: &Arc<Self>, name: &str, socket_address: SocketAddr) -> Arc<LoopbackTransport> {
        let address = Address::new(Uuid::new_v4().to_string());
        self.state.lock().unwrap().endpoints.insert(
            address.clone(),
            Endpoint {
                name: name.to_owned(),
                socket_address,
                receiver: None,
                reachable: true,
                open: true,
            },
        );

        #[cfg(debug_assertions)]
        debug!("LoopbackNetwork: created endpoint {name} at {socket_address} with address {address}");

        Arc::new(LoopbackTransport {
            network: self.clone(),
            address,
        })
    }

    /// A factory that creates a new endpoint with the given logical name each time it is asked
    pub fn factory(self: &Arc<Self>, name: &str) -> Arc<LoopbackTransportFactory> {
        Arc::new(LoopbackTransportFactory {
            network: self.clone(),
            name: name.to_owned(),
        })
    }

    pub fn members(self: &Self) -> Vec<Address> {
        self.state.lock().unwrap().members.clone()
    }

    pub fn view_id(self: &Self) -> ViewId {
        self.state.lock().unwrap().view_id
    }

    /// Tells every other member that `address` is suspected of having failed
    pub fn suspect(self: &Self, address: &Address) {
        let receivers: Vec<Arc<dyn TransportReceiver>> = {
            let state = self.state.lock().unwrap();
            state
                .members
                .iter()
                .filter(|member| *member != address)
                .filter_map(|member| state.endpoints.get(member))
                .filter_map(|endpoint| endpoint.receiver.clone())
                .collect()
        };
        for receiver in receivers {
            receiver.suspect(address);
        }
    }

    /// An unreachable member stays in the view but never answers requests or supplies state
    pub fn set_reachable(self: &Self, address: &Address, reachable: bool) {
        if let Some(endpoint) = self.state.lock().unwrap().endpoints.get_mut(address) {
            endpoint.reachable = reachable;
        }
    }

    /// Installs a view formed by merging the given partitions, in the order given
    pub fn inject_merge_view(self: &Self, subgroups: Vec<Vec<Address>>) {
        let _delivery = self.view_delivery.lock().unwrap();
        let (view, receivers) = {
            let mut state = self.state.lock().unwrap();
            let mut members: Vec<Address> = Vec::new();
            for address in subgroups.iter().flatten() {
                if state.endpoints.contains_key(address) && !members.contains(address) {
                    members.push(address.clone());
                }
            }
            state.members = members;
            state.subgroups = Some(subgroups);
            state.view_id += 1;
            (state.raw_view(), state.member_receivers())
        };

        info!("LoopbackNetwork: merged view {} with {} members", view.view_id, view.members.len());
        self.deliver_view(&receivers, view);
    }

    pub fn begin_flush(self: &Self) {
        let receivers = self.state.lock().unwrap().member_receivers();
        for receiver in receivers {
            receiver.block();
        }
    }

    pub fn end_flush(self: &Self) {
        let receivers = self.state.lock().unwrap().member_receivers();
        for receiver in receivers {
            receiver.unblock();
        }
    }

    fn deliver_view(self: &Self, receivers: &[Arc<dyn TransportReceiver>], view: RawView) {
        if self.options.flush_supported {
            for receiver in receivers {
                receiver.block();
            }
        }
        for receiver in receivers {
            receiver.view_accepted(view.clone());
        }
        if self.options.flush_supported {
            for receiver in receivers {
                receiver.unblock();
            }
        }
    }
}

pub struct LoopbackTransport {
    network: Arc<LoopbackNetwork>,
    address: Address,
}

impl LoopbackTransport {
    pub fn address(self: &Self) -> &Address {
        &self.address
    }

    pub fn network(self: &Self) -> &Arc<LoopbackNetwork> {
        &self.network
    }
}

impl Transport for LoopbackTransport {
    fn connect(self: &Self, group_name: &str) -> TransportResult<()> {
        let _delivery = self.network.view_delivery.lock().unwrap();
        let (view, receivers) = {
            let mut state = self.network.state.lock().unwrap();
            match state.endpoints.get(&self.address) {
                Some(endpoint) if endpoint.open => (),
                _ => return Err(TransportError::Closed),
            }
            if state.members.contains(&self.address) {
                return Ok(());
            }
            state.members.push(self.address.clone());
            state.subgroups = None;
            state.view_id += 1;
            (state.raw_view(), state.member_receivers())
        };

        info!(
            "LoopbackNetwork: {} joined {group_name}, view {} has {} members",
            self.address,
            view.view_id,
            view.members.len()
        );
        self.network.deliver_view(&receivers, view);
        Ok(())
    }

    fn disconnect(self: &Self) {
        let _delivery = self.network.view_delivery.lock().unwrap();
        let (view, receivers) = {
            let mut state = self.network.state.lock().unwrap();
            let Some(position) = state.members.iter().position(|member| *member == self.address) else {
                return;
            };
            state.members.remove(position);
            state.subgroups = None;
            state.view_id += 1;
            (state.raw_view(), state.member_receivers())
        };

        info!("LoopbackNetwork: {} left, view {}", self.address, view.view_id);
        self.network.deliver_view(&receivers, view);
    }

    fn close(self: &Self) {
        self.disconnect();
        if let Some(endpoint) = self.network.state.lock().unwrap().endpoints.get_mut(&self.address) {
            endpoint.open = false;
            endpoint.receiver = None;
        }
    }

    fn is_connected(self: &Self) -> bool {
        self.network.state.lock().unwrap().members.contains(&self.address)
    }

    fn is_open(self: &Self) -> bool {
        self.network
            .state
            .lock()
            .unwrap()
            .endpoints
            .get(&self.address)
            .map_or(false, |endpoint| endpoint.open)
    }

    fn local_address(self: &Self) -> Option<Address> {
        if self.is_open() {
            Some(self.address.clone())
        } else {
            None
        }
    }

    fn view(self: &Self) -> Option<RawView> {
        let state = self.network.state.lock().unwrap();
        if state.members.contains(&self.address) {
            Some(state.raw_view())
        } else {
            None
        }
    }

    fn physical_address(self: &Self, address: &Address) -> Option<SocketAddr> {
        self.network
            .state
            .lock()
            .unwrap()
            .endpoints
            .get(address)
            .map(|endpoint| endpoint.socket_address)
    }

    fn logical_name(self: &Self, address: &Address) -> Option<String> {
        self.network
            .state
            .lock()
            .unwrap()
            .endpoints
            .get(address)
            .map(|endpoint| endpoint.name.clone())
    }

    fn set_receiver(self: &Self, receiver: Arc<dyn TransportReceiver>) {
        if let Some(endpoint) = self.network.state.lock().unwrap().endpoints.get_mut(&self.address) {
            endpoint.receiver = Some(receiver);
        }
    }

    fn clear_receiver(self: &Self) {
        if let Some(endpoint) = self.network.state.lock().unwrap().endpoints.get_mut(&self.address) {
            endpoint.receiver = None;
        }
    }

    fn send(
        self: &Self,
        request: OutboundRequest,
        filter: &mut dyn RspFilter,
    ) -> TransportResult<Vec<RawResponse>> {
        let targets: Vec<(Address, Option<Arc<dyn TransportReceiver>>)> = {
            let state = self.network.state.lock().unwrap();
            if !state.members.contains(&self.address) {
                return Err(TransportError::NotConnected);
            }

            let destinations: Vec<Address> = match &request.destination {
                Destination::All => state
                    .members
                    .iter()
                    .filter(|member| !request.exclude.contains(member))
                    .filter(|member| !(self.network.options.discard_own_messages && **member == self.address))
                    .cloned()
                    .collect(),
                Destination::Single(address) => {
                    if !state.members.contains(address) {
                        return Err(TransportError::UnknownDestination(address.clone()));
                    }
                    vec![address.clone()]
                }
            };

            destinations
                .into_iter()
                .map(|address| {
                    let receiver = state.reachable_receiver(&address);
                    (address, receiver)
                })
                .collect()
        };

        if request.mode == ResponseMode::None {
            let payload = request.payload;
            thread::Builder::new()
                .name(String::from("loopback-send"))
                .spawn(move || {
                    for (_, receiver) in targets {
                        if let Some(receiver) = receiver {
                            receiver.handle(&payload);
                        }
                    }
                })
                .map_err(|err| TransportError::Failure(format!("failed to start send thread: {err}")))?;
            return Ok(Vec::new());
        }

        let deadline = Instant::now().checked_add(request.timeout);
        let mut responses = Vec::with_capacity(targets.len());
        let mut done = false;

        for (sender, receiver) in targets {
            if !done && !filter.need_more_responses() {
                done = true;
            }
            if !done && deadline.map_or(false, |deadline| Instant::now() > deadline) {
                warn!("LoopbackNetwork: request from {} timed out after {:?}", self.address, request.timeout);
                done = true;
            }

            let mut payload = None;
            if !done {
                if let Some(receiver) = receiver {
                    if let Some(bytes) = receiver.handle(&request.payload) {
                        if filter.is_acceptable(&bytes, &sender) {
                            payload = Some(bytes);
                        }
                    }
                }
            }

            if payload.is_some() && request.mode == ResponseMode::First {
                done = true;
            }
            responses.push(RawResponse { sender, payload });
        }

        Ok(responses)
    }

    fn flush_supported(self: &Self) -> bool {
        self.network.options.flush_supported
    }

    fn discard_own_messages(self: &Self) -> bool {
        self.network.options.discard_own_messages
    }

    fn request_state(self: &Self, target: Option<&Address>, _timeout: Duration) -> TransportResult<()> {
        let (provider, requester) = {
            let state = self.network.state.lock().unwrap();
            if !state.members.contains(&self.address) {
                return Err(TransportError::NotConnected);
            }

            let requester = state
                .endpoints
                .get(&self.address)
                .and_then(|endpoint| endpoint.receiver.clone())
                .ok_or_else(|| TransportError::Failure(String::from("no receiver to deliver state to")))?;

            let candidate = match target {
                Some(address) => Some(address.clone()),
                None => state.members.iter().find(|member| **member != self.address).cloned(),
            };
            let provider = candidate
                .filter(|address| *address != self.address)
                .and_then(|address| state.reachable_receiver(&address));

            match provider {
                Some(provider) => (provider, requester),
                None => return Err(TransportError::NoStateProvider),
            }
        };

        thread::Builder::new()
            .name(String::from("loopback-state-transfer"))
            .spawn(move || {
                let mut buffer: Vec<u8> = Vec::new();
                match provider.get_state(&mut buffer) {
                    Ok(()) => requester.set_state(&mut buffer.as_slice()),
                    Err(err) => requester.state_transfer_failed(err),
                }
            })
            .map_err(|err| TransportError::Failure(format!("failed to start state transfer thread: {err}")))?;

        Ok(())
    }
}

pub struct LoopbackTransportFactory {
    network: Arc<LoopbackNetwork>,
    name: String,
}

impl TransportFactory for LoopbackTransportFactory {
    fn create_transport(self: &Self, group_name: &str) -> TransportResult<Arc<dyn Transport>> {
        #[cfg(debug_assertions)]
        debug!("LoopbackNetwork: creating transport for {} in {group_name}", self.name);

        let transport: Arc<dyn Transport> = self.network.create_transport(&self.name);
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        sync::mpsc::{channel, Sender},
    };

    use super::*;

    struct Recorder {
        name: &'static str,
        views: Mutex<Vec<RawView>>,
        state: Vec<u8>,
        delivered: Mutex<Option<Sender<Vec<u8>>>>,
    }

    impl Recorder {
        fn new(name: &'static str, state: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                name,
                views: Mutex::new(Vec::new()),
                state: state.to_vec(),
                delivered: Mutex::new(None),
            })
        }

        fn view_ids(self: &Self) -> Vec<ViewId> {
            self.views.lock().unwrap().iter().map(|view| view.view_id).collect()
        }
    }

    impl TransportReceiver for Recorder {
        fn view_accepted(self: &Self, view: RawView) {
            self.views.lock().unwrap().push(view);
        }
        fn suspect(self: &Self, _address: &Address) {}
        fn block(self: &Self) {}
        fn unblock(self: &Self) {}
        fn handle(self: &Self, _request: &[u8]) -> Option<Vec<u8>> {
            Some(self.name.as_bytes().to_vec())
        }
        fn get_state(self: &Self, output: &mut dyn Write) -> TransportResult<()> {
            output
                .write_all(&self.state)
                .map_err(|err| TransportError::Failure(err.to_string()))
        }
        fn set_state(self: &Self, input: &mut dyn Read) {
            let mut bytes = Vec::new();
            input.read_to_end(&mut bytes).unwrap();
            if let Some(sender) = self.delivered.lock().unwrap().take() {
                sender.send(bytes).unwrap();
            }
        }
        fn state_transfer_failed(self: &Self, _error: TransportError) {}
    }

    struct AcceptAll;

    impl RspFilter for AcceptAll {
        fn is_acceptable(self: &mut Self, _response: &[u8], _sender: &Address) -> bool {
            true
        }
        fn need_more_responses(self: &Self) -> bool {
            true
        }
    }

    fn broadcast(mode: ResponseMode) -> OutboundRequest {
        OutboundRequest {
            destination: Destination::All,
            exclude: Vec::new(),
            mode,
            timeout: Duration::from_secs(5),
            out_of_band: false,
            payload: vec![1],
        }
    }

    #[test]
    fn should_deliver_numbered_views_to_every_member() {
        let network = LoopbackNetwork::new();
        let a = network.create_transport("A");
        let b = network.create_transport("B");
        let recorder_a = Recorder::new("A", &[]);
        let recorder_b = Recorder::new("B", &[]);
        a.set_receiver(recorder_a.clone());
        b.set_receiver(recorder_b.clone());

        a.connect("group").unwrap();
        b.connect("group").unwrap();
        a.disconnect();

        assert_eq!(recorder_a.view_ids(), vec![1, 2]);
        assert_eq!(recorder_b.view_ids(), vec![2, 3]);
        assert_eq!(network.members(), vec![b.address().clone()]);
        assert_eq!(b.physical_address(a.address()).map(|socket| socket.port()), Some(FIRST_LOOPBACK_PORT));
        assert_eq!(b.logical_name(a.address()).as_deref(), Some("A"));
    }

    #[test]
    fn should_leave_sender_out_of_its_own_multicast() {
        let network = LoopbackNetwork::new();
        let a = network.create_transport("A");
        let b = network.create_transport("B");
        a.set_receiver(Recorder::new("A", &[]));
        b.set_receiver(Recorder::new("B", &[]));
        a.connect("group").unwrap();
        b.connect("group").unwrap();

        let responses = a.send(broadcast(ResponseMode::All), &mut AcceptAll).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].sender, *b.address());
        assert_eq!(responses[0].payload.as_deref(), Some("B".as_bytes()));
    }

    #[test]
    fn should_omit_answers_from_unreachable_members() {
        let network = LoopbackNetwork::new();
        let a = network.create_transport("A");
        let b = network.create_transport("B");
        a.set_receiver(Recorder::new("A", &[]));
        b.set_receiver(Recorder::new("B", &[]));
        a.connect("group").unwrap();
        b.connect("group").unwrap();
        network.set_reachable(b.address(), false);

        let responses = a.send(broadcast(ResponseMode::All), &mut AcceptAll).unwrap();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].payload.is_none());
    }

    #[test]
    fn should_report_no_state_provider_for_sole_member() {
        let network = LoopbackNetwork::new();
        let a = network.create_transport("A");
        a.set_receiver(Recorder::new("A", &[]));
        a.connect("group").unwrap();

        assert_eq!(
            a.request_state(None, Duration::from_secs(1)),
            Err(TransportError::NoStateProvider)
        );
    }

    #[test]
    fn should_stream_state_from_first_other_member() {
        let network = LoopbackNetwork::new();
        let a = network.create_transport("A");
        let b = network.create_transport("B");
        let recorder_b = Recorder::new("B", &[]);
        let (sender, receiver) = channel();
        *recorder_b.delivered.lock().unwrap() = Some(sender);
        a.set_receiver(Recorder::new("A", &[1, 2, 3]));
        b.set_receiver(recorder_b);
        a.connect("group").unwrap();
        b.connect("group").unwrap();

        b.request_state(None, Duration::from_secs(1)).unwrap();
        assert_eq!(receiver.recv_timeout(Duration::from_secs(5)).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn should_refuse_to_reconnect_after_close() {
        let network = LoopbackNetwork::new();
        let a = network.create_transport("A");
        a.connect("group").unwrap();
        a.close();

        assert!(!a.is_open());
        assert!(a.local_address().is_none());
        assert_eq!(a.connect("group"), Err(TransportError::Closed));
    }
}
