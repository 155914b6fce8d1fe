/*
The group communication service ties one transport to the components that sit on top of it.
The transport calls back into the service through a receiver adapter that only holds a weak
reference, so dropping the service releases everything even while the transport lives on.
Lifecycle requests are serialized by a lock that is held for the whole transition; transport
callbacks never take that lock.
*/

use std::{
    io::{Read, Write},
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use groupcomm_net::{Address, Payload, ScopeId, ViewId};
use log::{debug, error, info, warn};

use crate::{
    config::ServiceConfig,
    errors::{ServiceError, ServiceResult, TransportError, TransportResult},
    flush_gate::FlushGate,
    history::MembershipHistory,
    lifecycle::{ServiceState, Transition, LIFECYCLE_LOG_TARGET},
    membership::{GroupMembershipListener, MembershipTracker},
    model::{ClusterNode, GroupView},
    notification::NotificationFanout,
    rpc::{dispatcher::RpcDispatcher, CallOptions, DecodeContext, ResponseFilter, RpcHandler, RpcResult},
    state_transfer::{
        coordinator::StateTransferCoordinator, StateStream, StateTransferFuture, StateTransferProvider,
    },
    transport::{binding::TransportBinding, RawView, Transport, TransportFactory, TransportReceiver},
    worker_pool::{Executor, WorkerPool},
};

const WORKER_POOL_NAME: &str = "groupcomm-worker";

pub struct GroupCommunicationServiceBuilder {
    config: ServiceConfig,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    transport: Option<Arc<dyn Transport>>,
    executor: Option<Arc<dyn Executor>>,
}

impl GroupCommunicationServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: ServiceConfig::default(),
            transport_factory: None,
            transport: None,
            executor: None,
        }
    }

    pub fn with_config(mut self: Self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Used at start when the service has no open transport
    pub fn with_transport_factory(mut self: Self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Runs the service on a transport owned by the caller. If it is already connected the
    /// service leaves the connection alone when it stops.
    pub fn with_transport(mut self: Self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_executor(mut self: Self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self: Self) -> GroupCommunicationService {
        let executor = match self.executor {
            Some(executor) => Some(executor),
            None if self.config.worker_threads > 0 => {
                let pool: Arc<dyn Executor> =
                    Arc::new(WorkerPool::new(WORKER_POOL_NAME, self.config.worker_threads));
                Some(pool)
            }
            None => None,
        };

        let binding = Arc::new(TransportBinding::new());
        if let Some(transport) = self.transport {
            binding.attach(transport);
        }

        let membership = Arc::new(MembershipTracker::new());
        let flush_gate = Arc::new(FlushGate::new());

        let core = ServiceCore {
            dispatcher: RpcDispatcher::new(
                &binding,
                &membership,
                &flush_gate,
                executor.clone(),
                self.config.method_call_timeout(),
            ),
            state_transfer: StateTransferCoordinator::new(
                &binding,
                &membership,
                executor,
                self.config.state_transfer_timeout(),
            ),
            notifications: NotificationFanout::new(self.config.allow_synchronous_membership_notifications),
            history: MembershipHistory::new(self.config.max_history_length),
            transport_factory: self.transport_factory,
            binding,
            membership,
            flush_gate,
            state: Mutex::new(ServiceState::Unregistered),
            lifecycle: Mutex::new(()),
            config: self.config,
        };

        GroupCommunicationService { core: Arc::new(core) }
    }
}

impl Default for GroupCommunicationServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Group RPC, state transfer and membership notifications for the services of one node
pub struct GroupCommunicationService {
    core: Arc<ServiceCore>,
}

struct ServiceCore {
    config: ServiceConfig,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    binding: Arc<TransportBinding>,
    membership: Arc<MembershipTracker>,
    flush_gate: Arc<FlushGate>,
    notifications: NotificationFanout,
    dispatcher: RpcDispatcher,
    state_transfer: StateTransferCoordinator,
    history: MembershipHistory,
    state: Mutex<ServiceState>,
    lifecycle: Mutex<()>,
}

impl GroupCommunicationService {
    pub fn builder() -> GroupCommunicationServiceBuilder {
        GroupCommunicationServiceBuilder::new()
    }

    pub fn state(self: &Self) -> ServiceState {
        self.core.state()
    }

    pub fn create(self: &Self) {
        let _lifecycle = self.core.lifecycle.lock().unwrap();
        self.core.create();
    }

    /// Joins the group. Creates the service first if needed; a failed start can be retried.
    pub fn start(self: &Self) -> ServiceResult<()> {
        let _lifecycle = self.core.lifecycle.lock().unwrap();
        match self.core.state().on_start() {
            Transition::Ignore => {
                debug!("GroupCommunicationService: start ignored, service is {}", self.core.state());
                return Ok(());
            }
            Transition::CreateFirst => self.core.create(),
            Transition::Proceed | Transition::StopFirst => (),
        }

        self.core.set_state(ServiceState::Starting);
        match self.core.start_service() {
            Ok(()) => {
                self.core.set_state(ServiceState::Started);
                info!(
                    "GroupCommunicationService: started in group {} as {}",
                    self.core.config.group_name,
                    self.node_name().unwrap_or_default()
                );
                Ok(())
            }
            Err(err) => {
                self.core.set_state(ServiceState::Failed);
                error!("GroupCommunicationService: failed to start: {err}");
                Err(err)
            }
        }
    }

    pub fn stop(self: &Self) {
        let _lifecycle = self.core.lifecycle.lock().unwrap();
        self.core.stop();
    }

    /// Stops the service if it is running. A destroyed service can be started again.
    pub fn destroy(self: &Self) {
        let _lifecycle = self.core.lifecycle.lock().unwrap();
        match self.core.state().on_destroy() {
            Transition::Ignore => {
                debug!("GroupCommunicationService: destroy ignored, service is {}", self.core.state());
                return;
            }
            Transition::StopFirst => self.core.stop(),
            Transition::Proceed | Transition::CreateFirst => (),
        }
        self.core.set_state(ServiceState::Destroyed);
        info!("GroupCommunicationService: destroyed");
    }

    pub fn register_rpc_handler(self: &Self, service_name: &str, handler: Arc<dyn RpcHandler>) {
        self.core.dispatcher.register_handler(service_name, handler, None);
    }

    /// Arguments of inbound calls, and responses to outbound calls, are decoded with the
    /// given context instead of being passed through as they arrived
    pub fn register_rpc_handler_with_context(
        self: &Self,
        service_name: &str,
        handler: Arc<dyn RpcHandler>,
        context: Arc<dyn DecodeContext>,
    ) {
        self.core.dispatcher.register_handler(service_name, handler, Some(context));
    }

    pub fn unregister_rpc_handler(self: &Self, service_name: &str) -> bool {
        self.core.dispatcher.unregister_handler(service_name)
    }

    pub fn register_state_transfer_provider(self: &Self, service_name: &str, provider: Arc<dyn StateTransferProvider>) {
        self.core.state_transfer.register_provider(service_name, provider);
    }

    pub fn unregister_state_transfer_provider(self: &Self, service_name: &str) -> bool {
        self.core.state_transfer.unregister_provider(service_name)
    }

    pub fn register_group_membership_listener(self: &Self, listener: Arc<dyn GroupMembershipListener>) {
        self.core.notifications.register_async(listener);
    }

    /// The listener runs on the transport's thread, which is only allowed when the
    /// configuration enables synchronous notifications
    pub fn register_sync_group_membership_listener(self: &Self, listener: Arc<dyn GroupMembershipListener>) {
        self.core.notifications.register_sync(listener);
    }

    pub fn unregister_group_membership_listener(self: &Self, listener: &Arc<dyn GroupMembershipListener>) -> bool {
        self.core.notifications.unregister(listener)
    }

    pub fn call_on_cluster(
        self: &Self,
        service_name: &str,
        method_name: &str,
        args: &Payload,
        filter: Option<&mut dyn ResponseFilter>,
        options: &CallOptions,
    ) -> ServiceResult<Vec<RpcResult>> {
        self.core.check_not_destroyed()?;
        self.core
            .dispatcher
            .call_on_cluster(service_name, method_name, args, filter, options)
    }

    pub fn call_on_coordinator(
        self: &Self,
        service_name: &str,
        method_name: &str,
        args: &Payload,
        filter: Option<&mut dyn ResponseFilter>,
        options: &CallOptions,
    ) -> ServiceResult<Option<RpcResult>> {
        self.core.check_not_destroyed()?;
        self.core
            .dispatcher
            .call_on_coordinator(service_name, method_name, args, filter, options)
    }

    pub fn call_on_node(
        self: &Self,
        target: &ClusterNode,
        service_name: &str,
        method_name: &str,
        args: &Payload,
        filter: Option<&mut dyn ResponseFilter>,
        options: &CallOptions,
    ) -> ServiceResult<Option<RpcResult>> {
        self.core.check_not_destroyed()?;
        self.core
            .dispatcher
            .call_on_node(target, service_name, method_name, args, filter, options)
    }

    pub fn call_async_on_cluster(
        self: &Self,
        service_name: &str,
        method_name: &str,
        args: &Payload,
        options: &CallOptions,
    ) -> ServiceResult<()> {
        self.core.check_not_destroyed()?;
        self.core
            .dispatcher
            .call_async_on_cluster(service_name, method_name, args, options)
    }

    pub fn call_async_on_coordinator(
        self: &Self,
        service_name: &str,
        method_name: &str,
        args: &Payload,
        options: &CallOptions,
    ) -> ServiceResult<()> {
        self.core.check_not_destroyed()?;
        self.core
            .dispatcher
            .call_async_on_coordinator(service_name, method_name, args, options)
    }

    pub fn call_async_on_node(
        self: &Self,
        target: &ClusterNode,
        service_name: &str,
        method_name: &str,
        args: &Payload,
        options: &CallOptions,
    ) -> ServiceResult<()> {
        self.core.check_not_destroyed()?;
        self.core
            .dispatcher
            .call_async_on_node(target, service_name, method_name, args, options)
    }

    /// Asks the group for the state of a service. Fails at once only when a stream transfer
    /// for the same service is pending; every other failure is reported in the result.
    pub fn request_state(self: &Self, service_name: &str) -> ServiceResult<StateTransferFuture<Payload>> {
        self.core.check_not_destroyed()?;
        Ok(self.core.state_transfer.request_state(service_name, None)?)
    }

    pub fn request_state_with_context(
        self: &Self,
        service_name: &str,
        context: Arc<dyn DecodeContext>,
    ) -> ServiceResult<StateTransferFuture<Payload>> {
        self.core.check_not_destroyed()?;
        Ok(self.core.state_transfer.request_state(service_name, Some(context))?)
    }

    pub fn request_state_as_stream(self: &Self, service_name: &str) -> ServiceResult<StateTransferFuture<StateStream>> {
        self.core.check_not_destroyed()?;
        Ok(self.core.state_transfer.request_state_as_stream(service_name)?)
    }

    /// Name of the local node, once the service has joined
    pub fn node_name(self: &Self) -> Option<String> {
        self.core.binding.local_node().map(|node| node.name().to_owned())
    }

    pub fn group_name(self: &Self) -> &str {
        &self.core.config.group_name
    }

    pub fn scope_id(self: &Self) -> Option<ScopeId> {
        self.core.config.scope_id
    }

    pub fn view(self: &Self) -> Arc<GroupView> {
        self.core.membership.current()
    }

    /// Names of the current members, coordinator first
    pub fn current_view(self: &Self) -> Vec<String> {
        self.core.membership.current().member_names()
    }

    pub fn current_view_id(self: &Self) -> ViewId {
        self.core.membership.current().view_id()
    }

    pub fn cluster_nodes(self: &Self) -> Vec<ClusterNode> {
        self.core.membership.current().all_members().to_vec()
    }

    /// The local node, once the service has joined
    pub fn cluster_node(self: &Self) -> Option<ClusterNode> {
        self.core.binding.local_node()
    }

    pub fn is_current_node_coordinator(self: &Self) -> bool {
        self.core.is_coordinator()
    }

    pub fn show_history(self: &Self) -> String {
        self.core.history.show()
    }

    pub fn show_history_as_xml(self: &Self) -> String {
        self.core.history.show_as_xml()
    }

    pub fn method_call_timeout(self: &Self) -> Duration {
        self.core.config.method_call_timeout()
    }

    pub fn state_transfer_timeout(self: &Self) -> Duration {
        self.core.config.state_transfer_timeout()
    }

    pub fn config(self: &Self) -> &ServiceConfig {
        &self.core.config
    }
}

impl ServiceCore {
    fn state(self: &Self) -> ServiceState {
        *self.state.lock().unwrap()
    }

    fn set_state(self: &Self, state: ServiceState) {
        *self.state.lock().unwrap() = state;
    }

    fn check_not_destroyed(self: &Self) -> ServiceResult<()> {
        match self.state() {
            ServiceState::Destroyed => Err(ServiceError::Destroyed),
            _ => Ok(()),
        }
    }

    fn is_coordinator(self: &Self) -> bool {
        self.binding
            .local_node()
            .map_or(false, |local| self.membership.is_coordinator(&local))
    }

    fn create(self: &Self) {
        match self.state().on_create() {
            Transition::Ignore => {
                debug!("GroupCommunicationService: create ignored, service is {}", self.state());
            }
            _ => {
                self.set_state(ServiceState::Created);
                info!("GroupCommunicationService: created for group {}", self.config.group_name);
            }
        }
    }

    fn stop(self: &Self) {
        match self.state().on_stop() {
            Transition::Ignore => {
                debug!("GroupCommunicationService: stop ignored, service is {}", self.state());
            }
            _ => {
                self.set_state(ServiceState::Stopping);
                self.stop_service();
                self.set_state(ServiceState::Stopped);
                info!("GroupCommunicationService: stopped");
            }
        }
    }

    fn start_service(self: &Arc<Self>) -> ServiceResult<()> {
        let scope_id = self
            .config
            .scope_id
            .ok_or_else(|| ServiceError::Configuration("scope id is not set".to_owned()))?;

        let transport = match self.binding.current() {
            Some(transport) if transport.is_open() => transport,
            _ => {
                let factory = self
                    .transport_factory
                    .as_ref()
                    .ok_or_else(|| ServiceError::Configuration("no transport factory is configured".to_owned()))?;
                let transport = factory.create_transport(&self.config.group_name)?;
                self.binding.attach(transport.clone());
                transport
            }
        };

        transport.set_receiver(Arc::new(ReceiverAdapter {
            core: Arc::downgrade(self),
        }));

        match self.join_group(transport.as_ref()) {
            Ok(()) => {
                info!("GroupCommunicationService: listening on scope {scope_id}");
                Ok(())
            }
            Err(err) => {
                transport.clear_receiver();
                if self.binding.is_self_connected() {
                    transport.close();
                    self.binding.detach();
                }
                self.membership.reset();
                self.binding.clear_local_node();
                Err(err)
            }
        }
    }

    fn join_group(self: &Self, transport: &dyn Transport) -> ServiceResult<()> {
        if transport.is_connected() {
            if let Some(view) = transport.view() {
                self.on_view_accepted(view);
            }
            self.flush_gate.open();
        } else {
            self.binding.set_self_connected(true);
            transport.connect(&self.config.group_name)?;
            let timeout = self.config.method_call_timeout();
            if !self.membership.await_first_view(timeout) {
                return Err(ServiceError::NoView(timeout));
            }
        }

        let local = self.binding.resolve_local_node()?;
        self.verify_unique(&local)?;
        self.notifications.start();
        Ok(())
    }

    /// Only the local node itself may share the local socket address
    fn verify_unique(self: &Self, local: &ClusterNode) -> ServiceResult<()> {
        let view = self.membership.current();
        match view
            .all_members()
            .iter()
            .find(|member| *member == local && member.address() != local.address())
        {
            Some(duplicate) => Err(ServiceError::DuplicateNode {
                local: local.name().to_owned(),
                duplicate: duplicate.address().clone(),
            }),
            None => Ok(()),
        }
    }

    fn stop_service(self: &Self) {
        self.notifications.stop();

        if let Some(transport) = self.binding.current() {
            transport.clear_receiver();
            if self.binding.is_self_connected() {
                transport.disconnect();
                transport.close();
                self.binding.detach();
            }
        }

        self.state_transfer.fail_pending(&TransportError::Closed);
        self.membership.reset();
        self.binding.clear_local_node();
        self.flush_gate.close();
    }

    fn on_view_accepted(self: &Self, raw: RawView) {
        let view_id = raw.view_id;
        let change = match self.membership.accept(&raw, &self.binding) {
            Ok(Some(change)) => change,
            Ok(None) => return,
            Err(err) => {
                error!("GroupCommunicationService: failed to accept view {view_id}: {err}");
                return;
            }
        };

        let view = &change.view;
        let names = view.member_names().join(", ");
        self.history.record(format!("New view: [{names}] with viewId: {}", view.view_id()));

        if change.initial {
            info!("GroupCommunicationService: joined with view {} of [{names}]", view.view_id());
            return;
        }

        if self.is_coordinator() {
            info!(
                target: LIFECYCLE_LOG_TARGET,
                "GroupCommunicationService: view {} has dead members {:?} and new members {:?}",
                view.view_id(),
                view.dead_members().iter().map(|node| node.name()).collect::<Vec<_>>(),
                view.new_members().iter().map(|node| node.name()).collect::<Vec<_>>()
            );
        }

        self.notifications.publish(view);
    }

    fn on_suspect(self: &Self, address: &Address) {
        let name = match self.binding.cluster_node(address) {
            Ok(node) => node.name().to_owned(),
            Err(_) => address.to_string(),
        };
        self.history.record(format!("Node suspected: {name}"));

        if self.is_coordinator() {
            warn!(target: LIFECYCLE_LOG_TARGET, "GroupCommunicationService: {name} is suspected");
        } else {
            info!("GroupCommunicationService: {name} is suspected");
        }
    }
}

/// The transport's view of the service
struct ReceiverAdapter {
    core: Weak<ServiceCore>,
}

impl TransportReceiver for ReceiverAdapter {
    fn view_accepted(self: &Self, view: RawView) {
        if let Some(core) = self.core.upgrade() {
            core.on_view_accepted(view);
        }
    }

    fn suspect(self: &Self, address: &Address) {
        if let Some(core) = self.core.upgrade() {
            core.on_suspect(address);
        }
    }

    fn block(self: &Self) {
        if let Some(core) = self.core.upgrade() {
            #[cfg(debug_assertions)]
            debug!("GroupCommunicationService: flush started, holding outbound calls");
            core.flush_gate.close();
        }
    }

    fn unblock(self: &Self) {
        if let Some(core) = self.core.upgrade() {
            core.flush_gate.open();
        }
    }

    fn handle(self: &Self, request: &[u8]) -> Option<Vec<u8>> {
        self.core.upgrade()?.dispatcher.handle_request(request)
    }

    fn get_state(self: &Self, output: &mut dyn Write) -> TransportResult<()> {
        match self.core.upgrade() {
            Some(core) => core.state_transfer.supply(output),
            None => Err(TransportError::Closed),
        }
    }

    fn set_state(self: &Self, input: &mut dyn Read) {
        if let Some(core) = self.core.upgrade() {
            core.state_transfer.consume(input);
        }
    }

    fn state_transfer_failed(self: &Self, error: TransportError) {
        if let Some(core) = self.core.upgrade() {
            core.state_transfer.fail_pending(&error);
        }
    }
}
