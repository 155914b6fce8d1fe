use core::time::Duration;

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, info, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs work submitted by the service away from the caller's thread
pub trait Executor: Send + Sync {
    fn execute(self: &Self, job: Job);
}

/// Runs a job on a new named thread, for work that has no executor to run on
pub(crate) fn run_detached(name: &str, job: Job) {
    if let Err(err) = thread::Builder::new().name(name.to_owned()).spawn(job) {
        error!("WorkerPool: failed to spawn {name} thread: {err}");
    }
}

struct Dispatch {
    senders: Vec<Sender<Job>>,
    next_thread_index: usize,
}

/// A fixed set of named threads. Jobs are handed to the threads in turn, each thread has its
/// own queue and runs its jobs in submission order.
pub struct WorkerPool {
    name: String,
    stop_signal: Arc<AtomicBool>,
    dispatch: Mutex<Dispatch>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: &str, thread_count: usize) -> Self {
        let thread_count = thread_count.max(1);
        let stop_signal = Arc::new(AtomicBool::new(false));
        let mut senders = Vec::with_capacity(thread_count);
        let mut handles = Vec::with_capacity(thread_count);

        for index in 0..thread_count {
            let (sender, receiver) = channel::<Job>();
            let worker = WorkerThread {
                name: format!("{name}-{index}"),
                stop_signal: stop_signal.clone(),
                receiver,
            };
            match thread::Builder::new()
                .name(worker.name.clone())
                .spawn(move || worker.run())
            {
                Ok(handle) => {
                    senders.push(sender);
                    handles.push(handle);
                }
                Err(err) => error!("WorkerPool: failed to start {name}-{index}: {err}"),
            }
        }

        info!("WorkerPool: {name} started with {} threads", senders.len());

        Self {
            name: name.to_owned(),
            stop_signal,
            dispatch: Mutex::new(Dispatch {
                next_thread_index: senders.len().saturating_sub(1),
                senders,
            }),
            handles: Mutex::new(handles),
        }
    }

    pub fn thread_count(self: &Self) -> usize {
        self.dispatch.lock().unwrap().senders.len()
    }

    /// Stops accepting jobs, lets each thread finish the jobs already queued for it and
    /// waits for the threads to exit
    pub fn shutdown(self: &Self) {
        if self.stop_signal.swap(true, Ordering::Relaxed) {
            return;
        }
        info!("WorkerPool: {} stopping", self.name);

        self.dispatch.lock().unwrap().senders.clear();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("WorkerPool: a {} thread panicked", self.name);
            }
        }
    }
}

impl Executor for WorkerPool {
    fn execute(self: &Self, job: Job) {
        if self.stop_signal.load(Ordering::Relaxed) {
            warn!("WorkerPool: {} is stopped, running job on a new thread", self.name);
            run_detached(&self.name, job);
            return;
        }

        let mut dispatch = self.dispatch.lock().unwrap();
        if dispatch.senders.is_empty() {
            drop(dispatch);
            run_detached(&self.name, job);
            return;
        }

        let index = dispatch.next_thread_index;
        dispatch.next_thread_index = if index == 0 {
            dispatch.senders.len() - 1
        } else {
            index - 1
        };

        if let Err(rejected) = dispatch.senders[index].send(job) {
            drop(dispatch);
            warn!("WorkerPool: {}-{index} has exited, running job on a new thread", self.name);
            run_detached(&self.name, rejected.0);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct WorkerThread {
    name: String,
    stop_signal: Arc<AtomicBool>,
    receiver: Receiver<Job>,
}

impl WorkerThread {
    fn run(self: Self) {
        #[cfg(debug_assertions)]
        debug!("WorkerPool: {} starting", self.name);

        loop {
            match self.receiver.recv_timeout(Duration::from_millis(50)) {
                Ok(job) => {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        warn!("WorkerPool: job panicked on {}", self.name);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.stop_signal.load(Ordering::Relaxed) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        #[cfg(debug_assertions)]
        debug!("WorkerPool: {} stopping", self.name);
    }
}
