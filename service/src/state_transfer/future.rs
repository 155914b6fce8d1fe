use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Condvar, Mutex},
    task::{Context, Poll, Waker},
    time::Duration,
};

use crate::errors::StateTransferError;

use super::StateTransferResult;

struct FutureState<S> {
    result: Option<StateTransferResult<S>>,
    waker: Option<Waker>,
}

struct Shared<S> {
    state: Mutex<FutureState<S>>,
    ready: Condvar,
}

impl<S> Shared<S> {
    fn resolve(self: &Self, result: StateTransferResult<S>) {
        let waker = {
            let mut state = self.state.lock().unwrap();
            if state.result.is_none() {
                state.result = Some(result);
            }
            state.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// The result of a state transfer request. Callers either block with `wait` or `.await` it.
pub struct StateTransferFuture<S> {
    shared: Arc<Shared<S>>,
}

/// The producing side of a `StateTransferFuture`. Dropping it without completing resolves
/// the future with `StateTransferError::Abandoned`.
pub(crate) struct FutureCompleter<S> {
    shared: Option<Arc<Shared<S>>>,
}

impl<S> StateTransferFuture<S> {
    pub(crate) fn pending() -> (Self, FutureCompleter<S>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(FutureState {
                result: None,
                waker: None,
            }),
            ready: Condvar::new(),
        });
        (
            Self {
                shared: shared.clone(),
            },
            FutureCompleter { shared: Some(shared) },
        )
    }

    pub fn is_done(self: &Self) -> bool {
        self.shared.state.lock().unwrap().result.is_some()
    }

    /// Blocks until the transfer has finished
    pub fn wait(self: Self) -> StateTransferResult<S> {
        let state = self.shared.state.lock().unwrap();
        let mut state = self
            .shared
            .ready
            .wait_while(state, |state| state.result.is_none())
            .unwrap();
        match state.result.take() {
            Some(result) => result,
            None => StateTransferResult::failed(StateTransferError::Abandoned),
        }
    }
}

impl<S: Clone> StateTransferFuture<S> {
    /// Returns `None` if the transfer is still running after `timeout`
    pub fn wait_timeout(self: &Self, timeout: Duration) -> Option<StateTransferResult<S>> {
        let state = self.shared.state.lock().unwrap();
        let (state, _) = self
            .shared
            .ready
            .wait_timeout_while(state, timeout, |state| state.result.is_none())
            .unwrap();
        state.result.clone()
    }
}

impl<S> Future for StateTransferFuture<S> {
    type Output = StateTransferResult<S>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock().unwrap();
        match state.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<S> FutureCompleter<S> {
    pub(crate) fn complete(mut self: Self, result: StateTransferResult<S>) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(result);
        }
    }
}

impl<S> Drop for FutureCompleter<S> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(StateTransferResult::failed(StateTransferError::Abandoned));
        }
    }
}
