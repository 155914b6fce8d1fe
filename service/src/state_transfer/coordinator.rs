/*
Bridges state requests made by services to the transport's state exchange. A requesting
service gets a task registered under its name; the task asks the transport for state and
waits. The transport calls back into `supply` on the member that provides state and into
`consume` on the requester. The provided stream carries a record for every registered
provider, so one exchange can satisfy several services at once.
*/

use std::{
    collections::HashMap,
    io::{Read, Write},
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use groupcomm_net::state_stream::{StateRecordReader, StateRecordWriter};
use log::{debug, info, warn};

use crate::{
    errors::{StateTransferError, TransportError, TransportResult},
    membership::MembershipTracker,
    rpc::handlers::{DecodeContext, DefaultDecodeContext},
    transport::binding::TransportBinding,
    worker_pool::{run_detached, Executor, Job},
};

use super::{
    future::StateTransferFuture,
    task::{StateStream, StateTransferTask, StreamMode, TransferMode, ValueMode},
    StateTransferProvider,
};

const STATE_TRANSFER_THREAD_NAME: &str = "state-transfer";

#[derive(Clone)]
pub(crate) enum PendingTransfer {
    Value(Arc<StateTransferTask<ValueMode>>),
    Stream(Arc<StateTransferTask<StreamMode>>),
}

impl PendingTransfer {
    fn mode_name(self: &Self) -> &'static str {
        match self {
            PendingTransfer::Value(_) => ValueMode::NAME,
            PendingTransfer::Stream(_) => StreamMode::NAME,
        }
    }

    fn is_resolved(self: &Self) -> bool {
        match self {
            PendingTransfer::Value(task) => task.is_resolved(),
            PendingTransfer::Stream(task) => task.is_resolved(),
        }
    }

    fn deliver(self: &Self, bytes: Vec<u8>) {
        match self {
            PendingTransfer::Value(task) => task.deliver(bytes),
            PendingTransfer::Stream(task) => task.deliver(bytes),
        }
    }

    fn fail(self: &Self, error: StateTransferError) {
        match self {
            PendingTransfer::Value(task) => task.fail(error),
            PendingTransfer::Stream(task) => task.fail(error),
        }
    }
}

type TaskMap = Arc<Mutex<HashMap<String, PendingTransfer>>>;

pub(crate) struct StateTransferCoordinator {
    providers: RwLock<Vec<(String, Arc<dyn StateTransferProvider>)>>,
    tasks: TaskMap,
    binding: Arc<TransportBinding>,
    membership: Arc<MembershipTracker>,
    executor: Option<Arc<dyn Executor>>,
    timeout: Duration,
}

impl StateTransferCoordinator {
    pub(crate) fn new(
        binding: &Arc<TransportBinding>,
        membership: &Arc<MembershipTracker>,
        executor: Option<Arc<dyn Executor>>,
        timeout: Duration,
    ) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            binding: binding.clone(),
            membership: membership.clone(),
            executor,
            timeout,
        }
    }

    /// Providers are asked for state in the order they were first registered
    pub(crate) fn register_provider(self: &Self, service_name: &str, provider: Arc<dyn StateTransferProvider>) {
        let mut providers = self.providers.write().unwrap();
        match providers.iter_mut().find(|(name, _)| name == service_name) {
            Some(entry) => {
                warn!("StateTransferCoordinator: replaced the state provider registered for {service_name}");
                entry.1 = provider;
            }
            None => providers.push((service_name.to_owned(), provider)),
        }
    }

    pub(crate) fn unregister_provider(self: &Self, service_name: &str) -> bool {
        let mut providers = self.providers.write().unwrap();
        let before = providers.len();
        providers.retain(|(name, _)| name != service_name);
        providers.len() != before
    }

    pub(crate) fn request_state(
        self: &Self,
        service_name: &str,
        context: Option<Arc<dyn DecodeContext>>,
    ) -> Result<StateTransferFuture<groupcomm_net::Payload>, StateTransferError> {
        let context = context.unwrap_or_else(|| Arc::new(DefaultDecodeContext));
        self.request(service_name, ValueMode { context })
    }

    pub(crate) fn request_state_as_stream(
        self: &Self,
        service_name: &str,
    ) -> Result<StateTransferFuture<StateStream>, StateTransferError> {
        self.request(service_name, StreamMode)
    }

    #[cfg(test)]
    fn pending_count(self: &Self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Joins an unresolved task of the same mode, fails if the pending task has another mode,
    /// and otherwise starts a new task
    fn request<M: TransferMode>(
        self: &Self,
        service_name: &str,
        mode: M,
    ) -> Result<StateTransferFuture<M::State>, StateTransferError> {
        let task = {
            let mut tasks = self.tasks.lock().unwrap();
            let unresolved = tasks
                .get(service_name)
                .filter(|pending| !pending.is_resolved())
                .cloned();
            match unresolved {
                Some(pending) => match M::from_pending(&pending) {
                    Some(task) => {
                        warn!("StateTransferCoordinator: a {} state transfer for {service_name} is already pending, joining it", M::NAME);
                        task
                    }
                    None => {
                        return Err(StateTransferError::ModeConflict {
                            service: service_name.to_owned(),
                            pending_mode: pending.mode_name(),
                        })
                    }
                },
                None => {
                    let task = Arc::new(StateTransferTask::new(service_name, mode, self.timeout));
                    tasks.insert(service_name.to_owned(), M::into_pending(task.clone()));
                    task
                }
            }
        };

        let (future, completer) = StateTransferFuture::pending();
        let tasks = self.tasks.clone();
        let binding = self.binding.clone();
        let membership = self.membership.clone();

        let job: Job = Box::new(move || {
            let result = task.call(&binding, &membership);
            discard_task(&tasks, &task);
            completer.complete(result);
        });

        match &self.executor {
            Some(executor) => executor.execute(job),
            None => run_detached(STATE_TRANSFER_THREAD_NAME, job),
        }

        Ok(future)
    }

    /// Writes a record for every registered provider, in registration order
    pub(crate) fn supply(self: &Self, output: &mut dyn Write) -> TransportResult<()> {
        let providers = self.providers.read().unwrap().clone();
        let mut writer = StateRecordWriter::new(output);

        for (service_name, provider) in providers {
            let payload = provider.current_state().map_err(|err| {
                warn!("StateTransferCoordinator: state provider for {service_name} failed: {err}");
                TransportError::Failure(format!("state provider for {service_name} failed: {err}"))
            })?;
            writer
                .write_record(&service_name, payload.as_bytes())
                .map_err(|err| TransportError::Failure(format!("failed to write state for {service_name}: {err}")))?;
        }

        let count = writer.record_count();
        writer
            .finish()
            .map_err(|err| TransportError::Failure(format!("failed to flush state: {err}")))?;

        info!("StateTransferCoordinator: supplied state for {count} services");
        Ok(())
    }

    /// Hands each record to the task waiting for it. Records nobody asked for are skipped;
    /// a stream that ends early stops processing without failing anything.
    pub(crate) fn consume(self: &Self, input: &mut dyn Read) {
        let mut reader = StateRecordReader::new(input);
        loop {
            let header = match reader.next_header() {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(err) => {
                    warn!("StateTransferCoordinator: stopped reading state: {err}");
                    break;
                }
            };

            let pending = self.tasks.lock().unwrap().get(&header.service_name).cloned();
            match pending {
                Some(pending) if !pending.is_resolved() => match reader.read_payload(&header) {
                    Ok(bytes) => pending.deliver(bytes),
                    Err(err) => {
                        warn!(
                            "StateTransferCoordinator: stopped reading state for {}: {err}",
                            header.service_name
                        );
                        break;
                    }
                },
                _ => {
                    debug!(
                        "StateTransferCoordinator: no pending transfer for {}, skipping {} bytes",
                        header.service_name, header.payload_length
                    );
                    if let Err(err) = reader.skip_payload(&header) {
                        warn!("StateTransferCoordinator: stopped reading state: {err}");
                        break;
                    }
                }
            }
        }
    }

    /// Ends every pending transfer with the transport's error
    pub(crate) fn fail_pending(self: &Self, error: &TransportError) {
        let pending: Vec<PendingTransfer> = self.tasks.lock().unwrap().values().cloned().collect();
        if pending.is_empty() {
            return;
        }
        warn!(
            "StateTransferCoordinator: state transfer failed for {} pending services: {error}",
            pending.len()
        );
        for task in pending {
            task.fail(StateTransferError::Transport(format!("{error}")));
        }
    }
}

/// Removes the task once its result is final, unless it was already replaced
fn discard_task<M: TransferMode>(tasks: &TaskMap, task: &Arc<StateTransferTask<M>>) {
    let mut tasks = tasks.lock().unwrap();
    let is_current = tasks
        .get(task.service_name())
        .and_then(M::from_pending)
        .map_or(false, |current| Arc::ptr_eq(&current, task));
    if is_current {
        tasks.remove(task.service_name());
    }
}
