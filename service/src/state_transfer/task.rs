use std::{
    fmt,
    io::{self, Read},
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use groupcomm_net::Payload;
use log::{debug, info, warn};

use crate::{
    errors::{StateTransferError, TransportError},
    membership::MembershipTracker,
    rpc::handlers::DecodeContext,
    transport::binding::TransportBinding,
};

use super::{coordinator::PendingTransfer, StateTransferResult};

/// How received bytes are turned into the state handed to the requester
pub(crate) trait TransferMode: Send + Sync + Sized + 'static {
    type State: Clone + Send + 'static;

    const NAME: &'static str;

    fn decode(self: &Self, bytes: Vec<u8>) -> Result<Self::State, StateTransferError>;

    fn into_pending(task: Arc<StateTransferTask<Self>>) -> PendingTransfer;
    fn from_pending(pending: &PendingTransfer) -> Option<Arc<StateTransferTask<Self>>>;
}

/// Decodes the state with the decode context of the requesting service
pub(crate) struct ValueMode {
    pub(crate) context: Arc<dyn DecodeContext>,
}

impl TransferMode for ValueMode {
    type State = Payload;

    const NAME: &'static str = "value";

    fn decode(self: &Self, bytes: Vec<u8>) -> Result<Payload, StateTransferError> {
        self.context
            .decode(&bytes)
            .map_err(|err| StateTransferError::Decode(format!("{err}")))
    }

    fn into_pending(task: Arc<StateTransferTask<Self>>) -> PendingTransfer {
        PendingTransfer::Value(task)
    }

    fn from_pending(pending: &PendingTransfer) -> Option<Arc<StateTransferTask<Self>>> {
        match pending {
            PendingTransfer::Value(task) => Some(task.clone()),
            PendingTransfer::Stream(_) => None,
        }
    }
}

/// Hands the state back as raw bytes to read
pub(crate) struct StreamMode;

impl TransferMode for StreamMode {
    type State = StateStream;

    const NAME: &'static str = "stream";

    fn decode(self: &Self, bytes: Vec<u8>) -> Result<StateStream, StateTransferError> {
        Ok(StateStream::new(bytes))
    }

    fn into_pending(task: Arc<StateTransferTask<Self>>) -> PendingTransfer {
        PendingTransfer::Stream(task)
    }

    fn from_pending(pending: &PendingTransfer) -> Option<Arc<StateTransferTask<Self>>> {
        match pending {
            PendingTransfer::Stream(task) => Some(task.clone()),
            PendingTransfer::Value(_) => None,
        }
    }
}

/// Received state as a byte stream. Clones share the bytes but each reads from where it
/// was cloned.
#[derive(Clone)]
pub struct StateStream {
    bytes: Arc<[u8]>,
    position: usize,
}

impl StateStream {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into(),
            position: 0,
        }
    }

    pub fn len(self: &Self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(self: &Self) -> bool {
        self.bytes.is_empty()
    }

    pub fn remaining(self: &Self) -> usize {
        self.bytes.len() - self.position
    }
}

impl Read for StateStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = &self.bytes[self.position..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.position += count;
        Ok(count)
    }
}

impl fmt::Debug for StateStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateStream({} of {} bytes remaining)", self.remaining(), self.len())
    }
}

#[derive(Default)]
struct Delivery {
    bytes: Option<Vec<u8>>,
    failure: Option<StateTransferError>,
}

/// One transfer for one service. The transport delivers state on its own thread; the task
/// waits for it on the requesting thread and decodes it there. Everyone who calls the task
/// after it finished gets the same result.
pub(crate) struct StateTransferTask<M: TransferMode> {
    service_name: String,
    mode: M,
    timeout: Duration,
    delivery: Mutex<Delivery>,
    delivered: Condvar,
    call_mutex: Mutex<()>,
    result: Mutex<Option<StateTransferResult<M::State>>>,
}

impl<M: TransferMode> StateTransferTask<M> {
    pub(crate) fn new(service_name: &str, mode: M, timeout: Duration) -> Self {
        Self {
            service_name: service_name.to_owned(),
            mode,
            timeout,
            delivery: Mutex::new(Delivery::default()),
            delivered: Condvar::new(),
            call_mutex: Mutex::new(()),
            result: Mutex::new(None),
        }
    }

    pub(crate) fn service_name(self: &Self) -> &str {
        &self.service_name
    }

    pub(crate) fn is_resolved(self: &Self) -> bool {
        self.result.lock().unwrap().is_some()
    }

    /// Called by the transport's thread with the bytes supplied for this service
    pub(crate) fn deliver(self: &Self, bytes: Vec<u8>) {
        let mut delivery = self.delivery.lock().unwrap();
        if delivery.bytes.is_none() && delivery.failure.is_none() {
            delivery.bytes = Some(bytes);
        }
        self.delivered.notify_all();
    }

    pub(crate) fn fail(self: &Self, error: StateTransferError) {
        let mut delivery = self.delivery.lock().unwrap();
        if delivery.bytes.is_none() && delivery.failure.is_none() {
            delivery.failure = Some(error);
        }
        self.delivered.notify_all();
    }

    /// Runs the transfer once. Later calls, including calls that were waiting for the first
    /// one, return its result.
    pub(crate) fn call(
        self: &Self,
        binding: &TransportBinding,
        membership: &MembershipTracker,
    ) -> StateTransferResult<M::State> {
        let _guard = self.call_mutex.lock().unwrap();
        if let Some(result) = self.result.lock().unwrap().clone() {
            return result;
        }

        let result = self.transfer(binding, membership);
        *self.result.lock().unwrap() = Some(result.clone());
        result
    }

    fn transfer(self: &Self, binding: &TransportBinding, membership: &MembershipTracker) -> StateTransferResult<M::State> {
        if !self.has_delivery() {
            let transport = match binding.transport() {
                Ok(transport) => transport,
                Err(err) => return StateTransferResult::failed(StateTransferError::Transport(format!("{err}"))),
            };

            #[cfg(debug_assertions)]
            debug!("StateTransferTask: requesting {} state for {}", M::NAME, self.service_name);

            match transport.request_state(None, self.timeout) {
                Ok(()) => (),
                Err(TransportError::NoStateProvider) => return self.no_state_provider(binding, membership),
                Err(err) => return StateTransferResult::failed(StateTransferError::Transport(format!("{err}"))),
            }
        }

        match self.await_delivery() {
            Some(Ok(bytes)) => match self.mode.decode(bytes) {
                Ok(state) => {
                    info!("StateTransferTask: received state for {}", self.service_name);
                    StateTransferResult::received(state)
                }
                Err(err) => {
                    warn!("StateTransferTask: failed to decode state for {}: {err}", self.service_name);
                    StateTransferResult::failed(err)
                }
            },
            Some(Err(err)) => StateTransferResult::failed(err),
            None => StateTransferResult::failed(StateTransferError::Timeout {
                service: self.service_name.clone(),
                timeout: self.timeout,
            }),
        }
    }

    /// Nobody could supply state. That is only expected when this node is the first member,
    /// which is known once at least one view has arrived.
    fn no_state_provider(
        self: &Self,
        binding: &TransportBinding,
        membership: &MembershipTracker,
    ) -> StateTransferResult<M::State> {
        let is_coordinator = membership.await_first_view(self.timeout)
            && binding
                .local_node()
                .map_or(false, |local| membership.is_coordinator(&local));

        if is_coordinator {
            debug!(
                "StateTransferTask: state for {} could not be retrieved, this is the first member",
                self.service_name
            );
            StateTransferResult::nothing_to_receive()
        } else {
            StateTransferResult::failed(StateTransferError::InitialTransferFailed {
                service: self.service_name.clone(),
            })
        }
    }

    fn has_delivery(self: &Self) -> bool {
        let delivery = self.delivery.lock().unwrap();
        delivery.bytes.is_some() || delivery.failure.is_some()
    }

    fn await_delivery(self: &Self) -> Option<Result<Vec<u8>, StateTransferError>> {
        let delivery = self.delivery.lock().unwrap();
        let (mut delivery, _) = self
            .delivered
            .wait_timeout_while(delivery, self.timeout, |delivery| {
                delivery.bytes.is_none() && delivery.failure.is_none()
            })
            .unwrap();

        if let Some(failure) = delivery.failure.take() {
            return Some(Err(failure));
        }
        delivery.bytes.take().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Instant};

    use super::*;
    use crate::rpc::handlers::DefaultDecodeContext;

    #[test]
    fn should_read_stream_clones_independently() {
        let stream = StateStream::new(vec![1, 2, 3, 4]);
        let mut first = stream.clone();
        let mut buffer = [0u8; 3];
        assert_eq!(first.read(&mut buffer).unwrap(), 3);
        assert_eq!(buffer, [1, 2, 3]);
        assert_eq!(first.remaining(), 1);

        let mut second = stream.clone();
        let mut all = Vec::new();
        second.read_to_end(&mut all).unwrap();
        assert_eq!(all, vec![1, 2, 3, 4]);
        assert_eq!(format!("{stream:?}"), "StateStream(4 of 4 bytes remaining)");
    }

    #[test]
    fn should_keep_first_delivery() {
        let task = StateTransferTask::new("cache", StreamMode, Duration::from_secs(1));
        task.deliver(vec![1]);
        task.deliver(vec![2]);
        task.fail(StateTransferError::Abandoned);

        assert_eq!(task.await_delivery(), Some(Ok(vec![1])));
    }

    #[test]
    fn should_wake_waiter_on_delivery_from_another_thread() {
        let task = Arc::new(StateTransferTask::new(
            "cache",
            ValueMode {
                context: Arc::new(DefaultDecodeContext),
            },
            Duration::from_secs(5),
        ));

        let deliverer = {
            let task = task.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                task.deliver(vec![7, 8]);
            })
        };

        let start = Instant::now();
        assert_eq!(task.await_delivery(), Some(Ok(vec![7, 8])));
        assert!(start.elapsed() < Duration::from_secs(5));
        deliverer.join().unwrap();
    }

    #[test]
    fn should_give_up_waiting_after_timeout() {
        let task = StateTransferTask::new("cache", StreamMode, Duration::from_millis(20));
        assert_eq!(task.await_delivery(), None);
        assert_eq!(task.service_name(), "cache");
        assert!(!task.is_resolved());
    }
}
