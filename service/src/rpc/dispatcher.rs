use std::{sync::Arc, time::Duration};

use groupcomm_net::{
    bin_serialization::{ContractSerializer, MethodCall, Response},
    Address, Payload,
};
use log::{debug, warn};

use crate::{
    errors::{ServiceError, ServiceResult},
    flush_gate::FlushGate,
    membership::MembershipTracker,
    model::ClusterNode,
    transport::{
        binding::TransportBinding, Destination, OutboundRequest, RawResponse, ResponseMode, Transport,
    },
    worker_pool::{Executor, Job},
};

use super::{
    filter::{decode_response, NoHandlerFilter, ResponseFilter},
    handlers::{DecodeContext, RegisteredHandler, RpcHandler, RpcHandlerRegistry, RpcResult},
};

/// Per-call options. A call without a timeout uses the service's method call timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub exclude_self: bool,
    pub timeout: Option<Duration>,

    /// Allow the request to overtake requests sent earlier by this node
    pub unordered: bool,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn excluding_self(mut self: Self) -> Self {
        self.exclude_self = true;
        self
    }

    pub fn with_timeout(mut self: Self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn unordered(mut self: Self) -> Self {
        self.unordered = true;
        self
    }
}

/// Sends group RPCs and answers inbound ones.
///
/// When the transport does not loop a member's own multicasts back to it, a call that
/// includes the local node runs the local handler in process, and its result goes through
/// the same filter and into the same result list as the remote answers.
pub(crate) struct RpcDispatcher {
    serializer: ContractSerializer,
    handlers: RpcHandlerRegistry,
    binding: Arc<TransportBinding>,
    membership: Arc<MembershipTracker>,
    flush_gate: Arc<FlushGate>,
    executor: Option<Arc<dyn Executor>>,
    method_call_timeout: Duration,
}

impl RpcDispatcher {
    pub(crate) fn new(
        binding: &Arc<TransportBinding>,
        membership: &Arc<MembershipTracker>,
        flush_gate: &Arc<FlushGate>,
        executor: Option<Arc<dyn Executor>>,
        method_call_timeout: Duration,
    ) -> Self {
        Self {
            serializer: ContractSerializer::new(),
            handlers: RpcHandlerRegistry::new(),
            binding: binding.clone(),
            membership: membership.clone(),
            flush_gate: flush_gate.clone(),
            executor,
            method_call_timeout,
        }
    }

    pub(crate) fn register_handler(
        self: &Self,
        service_name: &str,
        handler: Arc<dyn RpcHandler>,
        context: Option<Arc<dyn DecodeContext>>,
    ) {
        self.handlers.register(service_name, handler, context);
    }

    pub(crate) fn unregister_handler(self: &Self, service_name: &str) -> bool {
        self.handlers.unregister(service_name)
    }

    pub(crate) fn call_on_cluster(
        self: &Self,
        service_name: &str,
        method_name: &str,
        args: &Payload,
        mut filter: Option<&mut dyn ResponseFilter>,
        options: &CallOptions,
    ) -> ServiceResult<Vec<RpcResult>> {
        let transport = self.binding.transport()?;
        let timeout = self.timeout(options);
        self.await_flush(transport.as_ref(), timeout);

        let request = self.encode_request(service_name, method_name, args)?;
        let mut results = Vec::new();

        if !options.exclude_self && transport.discard_own_messages() && need_more(&filter) {
            if let Some(result) = self.invoke_local(service_name, method_name, args) {
                if self.accept_local(&mut filter, &result) {
                    results.push(result);
                }
            }
        }

        #[cfg(debug_assertions)]
        debug!("RpcDispatcher: calling {service_name}.{method_name} on the cluster");

        let mut adapter = NoHandlerFilter::new(&self.serializer, &self.handlers, &self.binding, filter);
        let responses = transport.send(
            OutboundRequest {
                destination: Destination::All,
                exclude: self.exclusions(transport.as_ref(), options),
                mode: ResponseMode::All,
                timeout,
                out_of_band: options.unordered,
                payload: request,
            },
            &mut adapter,
        )?;

        results.extend(self.collect(responses));
        Ok(results)
    }

    /// Returns `None` when the local node coordinates and is excluded, or when no
    /// acceptable answer arrives
    pub(crate) fn call_on_coordinator(
        self: &Self,
        service_name: &str,
        method_name: &str,
        args: &Payload,
        mut filter: Option<&mut dyn ResponseFilter>,
        options: &CallOptions,
    ) -> ServiceResult<Option<RpcResult>> {
        let transport = self.binding.transport()?;
        let timeout = self.timeout(options);
        self.await_flush(transport.as_ref(), timeout);

        let Some(coordinator) = self.membership.current().coordinator().cloned() else {
            warn!("RpcDispatcher: no coordinator for {service_name}.{method_name}, the service has no view");
            return Ok(None);
        };

        if self.binding.is_local(&coordinator) {
            if options.exclude_self {
                return Ok(None);
            }
            return Ok(self.call_local(service_name, method_name, args, &mut filter));
        }

        let request = self.encode_request(service_name, method_name, args)?;
        self.call_single(transport.as_ref(), coordinator.address(), request, filter, timeout, options.unordered)
    }

    pub(crate) fn call_on_node(
        self: &Self,
        target: &ClusterNode,
        service_name: &str,
        method_name: &str,
        args: &Payload,
        mut filter: Option<&mut dyn ResponseFilter>,
        options: &CallOptions,
    ) -> ServiceResult<Option<RpcResult>> {
        self.check_owned(target)?;
        let transport = self.binding.transport()?;
        let timeout = self.timeout(options);
        self.await_flush(transport.as_ref(), timeout);

        if self.binding.is_local(target) {
            return Ok(self.call_local(service_name, method_name, args, &mut filter));
        }

        let request = self.encode_request(service_name, method_name, args)?;
        self.call_single(transport.as_ref(), target.address(), request, filter, timeout, options.unordered)
    }

    pub(crate) fn call_async_on_cluster(
        self: &Self,
        service_name: &str,
        method_name: &str,
        args: &Payload,
        options: &CallOptions,
    ) -> ServiceResult<()> {
        let transport = self.binding.transport()?;
        let timeout = self.timeout(options);
        self.await_flush(transport.as_ref(), timeout);

        let request = self.encode_request(service_name, method_name, args)?;
        if !options.exclude_self && transport.discard_own_messages() {
            self.invoke_local_async(service_name, method_name, args);
        }

        self.send_async(
            transport.as_ref(),
            Destination::All,
            self.exclusions(transport.as_ref(), options),
            request,
            timeout,
            options.unordered,
        )
    }

    pub(crate) fn call_async_on_coordinator(
        self: &Self,
        service_name: &str,
        method_name: &str,
        args: &Payload,
        options: &CallOptions,
    ) -> ServiceResult<()> {
        let transport = self.binding.transport()?;
        let timeout = self.timeout(options);
        self.await_flush(transport.as_ref(), timeout);

        let Some(coordinator) = self.membership.current().coordinator().cloned() else {
            warn!("RpcDispatcher: no coordinator for {service_name}.{method_name}, the service has no view");
            return Ok(());
        };

        if self.binding.is_local(&coordinator) {
            if !options.exclude_self {
                self.invoke_local_async(service_name, method_name, args);
            }
            return Ok(());
        }

        let request = self.encode_request(service_name, method_name, args)?;
        self.send_async(
            transport.as_ref(),
            Destination::Single(coordinator.address().clone()),
            Vec::new(),
            request,
            timeout,
            options.unordered,
        )
    }

    pub(crate) fn call_async_on_node(
        self: &Self,
        target: &ClusterNode,
        service_name: &str,
        method_name: &str,
        args: &Payload,
        options: &CallOptions,
    ) -> ServiceResult<()> {
        self.check_owned(target)?;
        let transport = self.binding.transport()?;
        let timeout = self.timeout(options);
        self.await_flush(transport.as_ref(), timeout);

        if self.binding.is_local(target) {
            self.invoke_local_async(service_name, method_name, args);
            return Ok(());
        }

        let request = self.encode_request(service_name, method_name, args)?;
        self.send_async(
            transport.as_ref(),
            Destination::Single(target.address().clone()),
            Vec::new(),
            request,
            timeout,
            options.unordered,
        )
    }

    /// Answers a request received from the transport. Returns `None`, so that no response is
    /// sent, when the request cannot be decoded.
    pub(crate) fn handle_request(self: &Self, request: &[u8]) -> Option<Vec<u8>> {
        let envelope = match self.serializer.deserialize_request(request) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("RpcDispatcher: dropping malformed request: {err}");
                return None;
            }
        };

        let Some(registered) = self.handlers.get(&envelope.service_name) else {
            #[cfg(debug_assertions)]
            debug!("RpcDispatcher: no handler registered for {}", envelope.service_name);
            return self.encode_response(&Response::NoHandler);
        };

        let call = match self.serializer.deserialize_method_call(&envelope.body) {
            Ok(call) => call,
            Err(err) => {
                warn!("RpcDispatcher: dropping malformed call to {}: {err}", envelope.service_name);
                return None;
            }
        };

        let args = match registered.decode_args(&call.args) {
            Ok(args) => args,
            Err(err) => {
                warn!(
                    "RpcDispatcher: dropping call to {}.{} with undecodable arguments: {err}",
                    envelope.service_name, call.method_name
                );
                return None;
            }
        };

        let response = match registered.invoke(&envelope.service_name, &call.method_name, &args) {
            Ok(Some(value)) => Response::Value(value),
            Ok(None) => Response::Null,
            Err(failure) => Response::Failure(failure),
        };

        if registered.context.is_some() {
            match self.serializer.scope_response(&envelope.service_name, &response) {
                Ok(scoped) => self.encode_response(&scoped),
                Err(err) => {
                    warn!("RpcDispatcher: failed to encode response from {}: {err}", envelope.service_name);
                    None
                }
            }
        } else {
            self.encode_response(&response)
        }
    }

    fn call_single(
        self: &Self,
        transport: &dyn Transport,
        destination: &Address,
        request: Vec<u8>,
        filter: Option<&mut dyn ResponseFilter>,
        timeout: Duration,
        unordered: bool,
    ) -> ServiceResult<Option<RpcResult>> {
        let mut adapter = NoHandlerFilter::new(&self.serializer, &self.handlers, &self.binding, filter);
        let responses = transport.send(
            OutboundRequest {
                destination: Destination::Single(destination.clone()),
                exclude: Vec::new(),
                mode: ResponseMode::First,
                timeout,
                out_of_band: unordered,
                payload: request,
            },
            &mut adapter,
        )?;
        Ok(self.collect(responses).into_iter().next())
    }

    fn send_async(
        self: &Self,
        transport: &dyn Transport,
        destination: Destination,
        exclude: Vec<Address>,
        request: Vec<u8>,
        timeout: Duration,
        unordered: bool,
    ) -> ServiceResult<()> {
        let mut adapter = NoHandlerFilter::new(&self.serializer, &self.handlers, &self.binding, None);
        transport.send(
            OutboundRequest {
                destination,
                exclude,
                mode: ResponseMode::None,
                timeout,
                out_of_band: unordered,
                payload: request,
            },
            &mut adapter,
        )?;
        Ok(())
    }

    fn call_local(
        self: &Self,
        service_name: &str,
        method_name: &str,
        args: &Payload,
        filter: &mut Option<&mut dyn ResponseFilter>,
    ) -> Option<RpcResult> {
        let result = self.invoke_local(service_name, method_name, args)?;
        if self.accept_local(filter, &result) {
            Some(result)
        } else {
            None
        }
    }

    /// `None` when no handler is registered locally, or when the service's decode context
    /// rejects the arguments or the value, as a remote node or caller would
    fn invoke_local(self: &Self, service_name: &str, method_name: &str, args: &Payload) -> Option<RpcResult> {
        let registered = self.handlers.get(service_name)?;
        match registered.invoke_in_context(service_name, method_name, args) {
            Ok(result) => Some(result),
            Err(err) => {
                warn!("RpcDispatcher: discarding local result of {service_name}.{method_name}: {err}");
                None
            }
        }
    }

    fn invoke_local_async(self: &Self, service_name: &str, method_name: &str, args: &Payload) {
        let Some(registered) = self.handlers.get(service_name) else {
            return;
        };

        let job = local_job(registered, service_name.to_owned(), method_name.to_owned(), args.clone());
        match &self.executor {
            Some(executor) => executor.execute(job),
            None => job(),
        }
    }

    fn accept_local(self: &Self, filter: &mut Option<&mut dyn ResponseFilter>, result: &RpcResult) -> bool {
        match (filter, self.binding.local_node()) {
            (Some(filter), Some(local)) => filter.is_acceptable(result, &local),
            _ => true,
        }
    }

    fn collect(self: &Self, responses: Vec<RawResponse>) -> Vec<RpcResult> {
        responses
            .into_iter()
            .filter_map(|response| {
                let bytes = response.payload?;
                match decode_response(&self.serializer, &self.handlers, &bytes) {
                    Ok(result) => result,
                    Err(err) => {
                        warn!("RpcDispatcher: discarding response from {}: {err}", response.sender);
                        None
                    }
                }
            })
            .collect()
    }

    fn check_owned(self: &Self, target: &ClusterNode) -> ServiceResult<()> {
        if self.binding.owns(target) {
            Ok(())
        } else {
            Err(ServiceError::ForeignNode(target.name().to_owned()))
        }
    }

    fn exclusions(self: &Self, transport: &dyn Transport, options: &CallOptions) -> Vec<Address> {
        match (options.exclude_self, transport.local_address()) {
            (true, Some(address)) => vec![address],
            _ => Vec::new(),
        }
    }

    fn timeout(self: &Self, options: &CallOptions) -> Duration {
        options.timeout.unwrap_or(self.method_call_timeout)
    }

    /// Calls go ahead even if the gate stays closed; the wait only holds them back while
    /// the transport reorganises the group
    fn await_flush(self: &Self, transport: &dyn Transport, timeout: Duration) {
        if transport.flush_supported() && !self.flush_gate.await_open(timeout) {
            warn!("RpcDispatcher: flush did not complete within {timeout:?}, sending anyway");
        }
    }

    fn encode_request(self: &Self, service_name: &str, method_name: &str, args: &Payload) -> ServiceResult<Vec<u8>> {
        let call = MethodCall {
            method_name: method_name.to_owned(),
            args: args.clone(),
        };
        Ok(self.serializer.serialize_request(service_name, &call)?)
    }

    fn encode_response(self: &Self, response: &Response) -> Option<Vec<u8>> {
        match self.serializer.serialize_response(response) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!("RpcDispatcher: failed to encode response: {err}");
                None
            }
        }
    }
}

fn need_more(filter: &Option<&mut dyn ResponseFilter>) -> bool {
    match filter {
        Some(filter) => filter.need_more_responses(),
        None => true,
    }
}

fn local_job(registered: RegisteredHandler, service_name: String, method_name: String, args: Payload) -> Job {
    Box::new(move || {
        match registered.invoke_in_context(&service_name, &method_name, &args) {
            Ok(Err(failure)) => {
                warn!("RpcDispatcher: asynchronous {service_name}.{method_name} failed locally: {failure}")
            }
            Err(err) => warn!("RpcDispatcher: asynchronous {service_name}.{method_name} could not be decoded locally: {err}"),
            Ok(Ok(_)) => (),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use std::net::SocketAddr;

    use groupcomm_net::{bin_serialization::RequestEnvelope, CodecError, CodecResult};

    use super::*;
    use crate::{
        errors::TransportResult,
        transport::{
            loopback::{LoopbackNetwork, LoopbackTransport},
            RawView, RspFilter, TransportReceiver,
        },
    };

    /// Records the response mode of every request before passing it on
    struct RecordingTransport {
        inner: Arc<LoopbackTransport>,
        modes: Mutex<Vec<ResponseMode>>,
    }

    impl Transport for RecordingTransport {
        fn connect(self: &Self, group_name: &str) -> TransportResult<()> {
            self.inner.connect(group_name)
        }
        fn disconnect(self: &Self) {
            self.inner.disconnect()
        }
        fn close(self: &Self) {
            self.inner.close()
        }
        fn is_connected(self: &Self) -> bool {
            self.inner.is_connected()
        }
        fn is_open(self: &Self) -> bool {
            self.inner.is_open()
        }
        fn local_address(self: &Self) -> Option<Address> {
            self.inner.local_address()
        }
        fn view(self: &Self) -> Option<RawView> {
            self.inner.view()
        }
        fn physical_address(self: &Self, address: &Address) -> Option<SocketAddr> {
            self.inner.physical_address(address)
        }
        fn logical_name(self: &Self, address: &Address) -> Option<String> {
            self.inner.logical_name(address)
        }
        fn set_receiver(self: &Self, receiver: Arc<dyn TransportReceiver>) {
            self.inner.set_receiver(receiver)
        }
        fn clear_receiver(self: &Self) {
            self.inner.clear_receiver()
        }
        fn send(self: &Self, request: OutboundRequest, filter: &mut dyn RspFilter) -> TransportResult<Vec<RawResponse>> {
            self.modes.lock().unwrap().push(request.mode);
            self.inner.send(request, filter)
        }
        fn flush_supported(self: &Self) -> bool {
            self.inner.flush_supported()
        }
        fn discard_own_messages(self: &Self) -> bool {
            self.inner.discard_own_messages()
        }
        fn request_state(self: &Self, target: Option<&Address>, timeout: Duration) -> TransportResult<()> {
            self.inner.request_state(target, timeout)
        }
    }

    struct Uppercase;

    impl DecodeContext for Uppercase {
        fn decode(self: &Self, bytes: &[u8]) -> CodecResult<Payload> {
            Ok(Payload::from_bytes(bytes.to_ascii_uppercase()))
        }
    }

    struct Unreadable;

    impl DecodeContext for Unreadable {
        fn decode(self: &Self, _bytes: &[u8]) -> CodecResult<Payload> {
            Err(CodecError::EmptyBuffer)
        }
    }

    /// Holds submitted jobs until the test runs them
    struct ParkedExecutor {
        jobs: Mutex<Vec<Job>>,
    }

    impl ParkedExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self { jobs: Mutex::new(Vec::new()) })
        }

        fn run_all(self: &Self) {
            let jobs: Vec<Job> = self.jobs.lock().unwrap().drain(..).collect();
            for job in jobs {
                job();
            }
        }
    }

    impl Executor for ParkedExecutor {
        fn execute(self: &Self, job: Job) {
            self.jobs.lock().unwrap().push(job);
        }
    }

    fn dispatcher(executor: Option<Arc<dyn Executor>>) -> RpcDispatcher {
        dispatcher_on(&Arc::new(TransportBinding::new()), executor)
    }

    fn dispatcher_on(binding: &Arc<TransportBinding>, executor: Option<Arc<dyn Executor>>) -> RpcDispatcher {
        RpcDispatcher::new(
            binding,
            &Arc::new(MembershipTracker::new()),
            &Arc::new(FlushGate::new()),
            executor,
            Duration::from_secs(1),
        )
    }

    fn echo() -> Arc<dyn RpcHandler> {
        Arc::new(|_method: &str, args: &Payload| -> RpcResult { Ok(Some(args.clone())) })
    }

    fn request(service_name: &str, method_name: &str, args: &[u8]) -> Vec<u8> {
        let call = MethodCall {
            method_name: method_name.to_owned(),
            args: Payload::from_bytes(args.to_vec()),
        };
        ContractSerializer::new().serialize_request(service_name, &call).unwrap()
    }

    fn response(bytes: Option<Vec<u8>>) -> Response {
        ContractSerializer::new().deserialize_response(&bytes.unwrap()).unwrap()
    }

    #[test]
    fn should_drop_malformed_requests() {
        let dispatcher = dispatcher(None);
        dispatcher.register_handler("echo", echo(), None);

        assert_eq!(dispatcher.handle_request(&[]), None);
        assert_eq!(dispatcher.handle_request(&[0xc1, 0x00]), None);

        let envelope = RequestEnvelope {
            service_name: String::from("echo"),
            body: vec![0xc1],
        };
        let bytes = Payload::encode(&envelope).unwrap().into_bytes();
        assert_eq!(dispatcher.handle_request(&bytes), None);
    }

    #[test]
    fn should_answer_no_handler_for_unknown_service() {
        let dispatcher = dispatcher(None);

        let answer = dispatcher.handle_request(&request("missing", "get", b"key"));
        assert_eq!(response(answer), Response::NoHandler);
    }

    #[test]
    fn should_answer_plain_services_without_scope() {
        let dispatcher = dispatcher(None);
        dispatcher.register_handler("echo", echo(), None);

        let answer = dispatcher.handle_request(&request("echo", "say", b"ab"));
        assert_eq!(response(answer), Response::Value(Payload::from_bytes(b"ab".to_vec())));
    }

    #[test]
    fn should_decode_arguments_and_scope_answers_with_service_context() {
        let dispatcher = dispatcher(None);
        dispatcher.register_handler("shout", echo(), Some(Arc::new(Uppercase)));

        let answer = dispatcher.handle_request(&request("shout", "say", b"ab"));
        match response(answer) {
            Response::Scoped { service_name, payload } => {
                assert_eq!(service_name, "shout");
                assert_eq!(
                    ContractSerializer::new().deserialize_response(&payload).unwrap(),
                    Response::Value(Payload::from_bytes(b"AB".to_vec()))
                );
            }
            other => panic!("Expected a scoped response, got {other:?}"),
        }
    }

    #[test]
    fn should_drop_calls_the_context_cannot_decode() {
        let dispatcher = dispatcher(None);
        dispatcher.register_handler("strict", echo(), Some(Arc::new(Unreadable)));

        assert_eq!(dispatcher.handle_request(&request("strict", "say", b"ab")), None);
        assert_eq!(dispatcher.invoke_local("strict", "say", &Payload::default()), None);
    }

    #[test]
    fn should_give_local_calls_the_same_result_as_remote_ones() {
        let dispatcher = dispatcher(None);
        dispatcher.register_handler("shout", echo(), Some(Arc::new(Uppercase)));

        let remote = dispatcher.handle_request(&request("shout", "say", b"ab")).unwrap();
        let remote = decode_response(&dispatcher.serializer, &dispatcher.handlers, &remote).unwrap();
        let local = dispatcher.invoke_local("shout", "say", &Payload::from_bytes(b"ab".to_vec()));

        assert_eq!(local, remote);
        assert_eq!(local, Some(Ok(Some(Payload::from_bytes(b"AB".to_vec())))));
    }

    #[test]
    fn should_run_local_async_calls_on_the_executor() {
        let executor = ParkedExecutor::new();
        let dispatcher = dispatcher(Some(executor.clone() as Arc<dyn Executor>));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<dyn RpcHandler> = {
            let seen = seen.clone();
            Arc::new(move |_method: &str, args: &Payload| -> RpcResult {
                seen.lock().unwrap().push(args.as_bytes().to_vec());
                Ok(None)
            })
        };
        dispatcher.register_handler("shout", handler, Some(Arc::new(Uppercase)));

        dispatcher.invoke_local_async("shout", "say", &Payload::from_bytes(b"ab".to_vec()));
        assert!(seen.lock().unwrap().is_empty());

        executor.run_all();
        assert_eq!(*seen.lock().unwrap(), vec![b"AB".to_vec()]);
    }

    #[test]
    fn should_run_local_async_calls_inline_without_executor() {
        let dispatcher = dispatcher(None);
        let calls = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn RpcHandler> = {
            let calls = calls.clone();
            Arc::new(move |_method: &str, _args: &Payload| -> RpcResult {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
        };
        dispatcher.register_handler("counter", handler, None);

        dispatcher.invoke_local_async("counter", "increment", &Payload::default());
        dispatcher.invoke_local_async("missing", "increment", &Payload::default());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn should_wait_for_first_answer_from_a_single_node() {
        let network = LoopbackNetwork::new();
        let local = network.create_transport("A");
        let remote = network.create_transport("B");
        local.connect("test-group").unwrap();
        remote.connect("test-group").unwrap();

        let transport = Arc::new(RecordingTransport {
            inner: local,
            modes: Mutex::new(Vec::new()),
        });
        let binding = Arc::new(TransportBinding::new());
        binding.attach(transport.clone());
        let dispatcher = dispatcher_on(&binding, None);
        let target = binding.cluster_node(remote.address()).unwrap();

        dispatcher
            .call_on_node(&target, "echo", "say", &Payload::default(), None, &CallOptions::new())
            .unwrap();
        dispatcher
            .call_on_cluster("echo", "say", &Payload::default(), None, &CallOptions::new())
            .unwrap();

        assert_eq!(*transport.modes.lock().unwrap(), vec![ResponseMode::First, ResponseMode::All]);
    }
}
